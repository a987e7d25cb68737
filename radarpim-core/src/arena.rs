//! Shared registry of PIMs
//!
//! PIMs live in one arena and are referred to by [`PimHandle`]s. A manager's
//! dispatch list and any chain of sibling PIMs are just sets of handles, so
//! removing a PIM from the arena makes every handle to it stale at once
//! instead of leaving dangling links behind.
//!
//! ```text
//!   arena   [0: pim A g1] [1: free g3] [2: pim C g1]
//!   manager  {0/g1, 2/g1}
//!   chain    {2/g1, 0/g1}
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::error::PimError;
use crate::pim::Pim;

/// Stable reference to a PIM in a [`PimArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PimHandle {
    index: u32,
    generation: u32,
}

impl PimHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for PimHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.generation)
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    pim: Option<Arc<Pim>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

#[derive(Clone, Default)]
pub struct PimArena {
    inner: Arc<RwLock<Slots>>,
}

impl fmt::Debug for PimArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PimArena").field("len", &self.len()).finish()
    }
}

impl PimArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pim: Pim) -> PimHandle {
        self.insert_arc(Arc::new(pim))
    }

    pub fn insert_arc(&self, pim: Arc<Pim>) -> PimHandle {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot::default());
                (inner.slots.len() - 1) as u32
            }
        };
        let slot = &mut inner.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        debug!("arena: inserted '{}' at {}/{}", pim.name(), index, slot.generation);
        slot.pim = Some(pim);
        PimHandle {
            index,
            generation: slot.generation,
        }
    }

    pub fn get(&self, handle: PimHandle) -> Result<Arc<Pim>, PimError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.pim.clone())
            .ok_or(PimError::StaleHandle)
    }

    pub fn contains(&self, handle: PimHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Take a PIM out of the arena. Holders of an `Arc` keep it alive, but
    /// every handle to it is stale from now on.
    pub fn remove(&self, handle: PimHandle) -> Result<Arc<Pim>, PimError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let slot = inner
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(PimError::StaleHandle)?;
        let pim = slot.pim.take().ok_or(PimError::StaleHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index);
        debug!("arena: removed '{}' at {}", pim.name(), handle);
        Ok(pim)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .iter()
            .filter(|s| s.pim.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles of every live PIM, in slot order
    pub fn handles(&self) -> Vec<PimHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.pim.is_some())
            .map(|(i, s)| PimHandle {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<PimHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.slots.iter().enumerate().find_map(|(i, s)| {
            s.pim
                .as_ref()
                .filter(|p| p.name() == name)
                .map(|_| PimHandle {
                    index: i as u32,
                    generation: s.generation,
                })
        })
    }
}

/// Ordered set of handles over an arena, e.g. PIMs fed from the same input
/// at different resolutions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PimChain {
    handles: Vec<PimHandle>,
}

impl PimChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append, ignoring a handle already in the chain
    pub fn push(&mut self, handle: PimHandle) {
        if !self.handles.contains(&handle) {
            self.handles.push(handle);
        }
    }

    pub fn remove(&mut self, handle: PimHandle) -> bool {
        let before = self.handles.len();
        self.handles.retain(|h| *h != handle);
        self.handles.len() != before
    }

    pub fn contains(&self, handle: PimHandle) -> bool {
        self.handles.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[PimHandle] {
        &self.handles
    }

    /// Live PIMs of the chain in order, skipping stale handles
    pub fn resolve(&self, arena: &PimArena) -> Vec<(PimHandle, Arc<Pim>)> {
        self.handles
            .iter()
            .filter_map(|&h| arena.get(h).ok().map(|p| (h, p)))
            .collect()
    }

    /// Drop handles whose PIM has left the arena, returns how many went
    pub fn prune(&mut self, arena: &PimArena) -> usize {
        let before = self.handles.len();
        self.handles.retain(|&h| arena.contains(h));
        before - self.handles.len()
    }
}

impl FromIterator<PimHandle> for PimChain {
    fn from_iter<I: IntoIterator<Item = PimHandle>>(iter: I) -> Self {
        let mut chain = PimChain::new();
        for handle in iter {
            chain.push(handle);
        }
        chain
    }
}
