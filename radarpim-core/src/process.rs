//! Consumer notification contract
//!
//! Processes that consume a PIM (scan converters, trackers, recorders)
//! implement [`RunProcess`] and are attached to the PIM's
//! [`ProcessManager`]. They are called synchronously on the thread that
//! updates the PIM, so they must be quick or hand the work off.

use std::sync::{Arc, PoisonError, RwLock};

use crate::header::ChangeFlags;
use crate::pim::Pim;

/// Azimuths that became available since the previous notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Notification {
    /// Index (in input returns processed by the PIM) of the first return
    /// covered by this notification
    pub first_new_return: u64,
    /// First bucket written since the previous notification
    pub first_azimuth: u32,
    /// Number of buckets from `first_azimuth`, in scan direction
    pub num_azimuths: u32,
}

/// A consumer of PIM updates
pub trait RunProcess: Send + Sync {
    /// New azimuths are available in `pim`
    fn notify(&self, pim: &Pim, notification: &Notification);

    /// Configuration or source of `pim` changed
    fn notify_changes(&self, _pim: &Pim, _changes: ChangeFlags) {}
}

/// Ordered fan-out of one PIM's consumers
#[derive(Default)]
pub struct ProcessManager {
    processes: RwLock<Vec<Arc<dyn RunProcess>>>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("processes", &self.len())
            .finish()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, process: Arc<dyn RunProcess>) {
        self.processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(process);
    }

    /// Detach a process, returns false if it was not attached
    pub fn remove(&self, process: &Arc<dyn RunProcess>) -> bool {
        let mut processes = self.processes.write().unwrap_or_else(PoisonError::into_inner);
        let before = processes.len();
        processes.retain(|p| !Arc::ptr_eq(p, process));
        processes.len() != before
    }

    pub fn len(&self) -> usize {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn RunProcess>> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call every attached process in the order they were added
    pub fn notify(&self, pim: &Pim, notification: &Notification) {
        for process in self.snapshot() {
            process.notify(pim, notification);
        }
    }

    pub fn notify_changes(&self, pim: &Pim, changes: ChangeFlags) {
        for process in self.snapshot() {
            process.notify_changes(pim, changes);
        }
    }
}
