//! Shared context handed to every PIM
//!
//! Holds the combine lookup tables, which are large and identical for every
//! PIM using the same packing, and the debug categories. One `Runtime` is
//! normally shared by all PIMs of a process through an `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bitflags::bitflags;
use log::debug;

use crate::combine::{AzimuthCombine, CombineOp, CombineTable, SampleCombiner};
use crate::error::PimError;
use crate::packing::Packing;

/// First table index available for user combine tables
pub const FIRST_USER_COMBINE_TABLE: usize = 3;

/// Total number of 8 bit combine table slots, built-in ones included
pub const MAX_COMBINE_TABLES: usize = 10;

bitflags! {
    /// Categories of extra diagnostics emitted by PIMs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u32 {
        /// One line per input return
        const INPUT_SUMMARY = 0x0001;
        /// Azimuth tracking decisions
        const UPDATES = 0x0002;
        /// Full header of every return
        const UPDATES_HEADER = 0x0004;
        /// Store state after each update
        const UPDATE_STATE = 0x0008;
        /// Navigation data used for referencing
        const NAV_DATA = 0x0010;
        const VIDEO = 0x0020;
        const VIDEO_QUICKLOOK = 0x0040;
    }
}

#[derive(Debug, Default)]
pub struct Runtime {
    tables: Mutex<HashMap<(CombineOp, Packing), Arc<CombineTable>>>,
    user_tables: RwLock<[Option<Arc<CombineTable>>; MAX_COMBINE_TABLES]>,
    /// Bumped whenever a user table is registered
    table_epoch: AtomicU64,
    debug: AtomicU32,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug_flags(&self) -> DebugFlags {
        DebugFlags::from_bits_truncate(self.debug.load(Ordering::Relaxed))
    }

    pub fn set_debug_flags(&self, flags: DebugFlags) {
        self.debug.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn debug_enabled(&self, flags: DebugFlags) -> bool {
        self.debug_flags().intersects(flags)
    }

    /// Register a user combine table at `index` (3..10)
    pub fn set_user_combine_table(&self, index: usize, table: CombineTable) -> Result<(), PimError> {
        if !(FIRST_USER_COMBINE_TABLE..MAX_COMBINE_TABLES).contains(&index) {
            return Err(PimError::invalid("combineTableIndex", index));
        }
        let mut tables = self.user_tables.write().unwrap_or_else(PoisonError::into_inner);
        tables[index] = Some(Arc::new(table));
        self.table_epoch.fetch_add(1, Ordering::Release);
        debug!("Registered user combine table {}", index);
        Ok(())
    }

    /// Changes whenever a combiner resolved earlier may be out of date
    pub fn table_epoch(&self) -> u64 {
        self.table_epoch.load(Ordering::Acquire)
    }

    pub fn user_combine_table(&self, index: usize) -> Option<Arc<CombineTable>> {
        let tables = self.user_tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(index).cloned().flatten()
    }

    /// Built-in table for `op` on an 8 bit packing, built on first use
    pub fn combine_table(&self, op: CombineOp, packing: Packing) -> Arc<CombineTable> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry((op, packing))
            .or_insert_with(|| {
                debug!("Building {} combine table for {}", op, packing);
                Arc::new(CombineTable::build(op, packing))
            })
            .clone()
    }

    pub fn num_cached_tables(&self) -> usize {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Resolve the combination strategy for a mode and packing. A user
    /// table, when given and registered, replaces the built-in operation of
    /// the merging modes for 8 bit packings.
    pub fn combiner(
        &self,
        mode: AzimuthCombine,
        user_table: Option<usize>,
        packing: Packing,
        big_endian: bool,
    ) -> SampleCombiner {
        let Some(op) = mode.op() else {
            return match mode {
                AzimuthCombine::Overwrite => SampleCombiner::Replace,
                _ => SampleCombiner::Keep,
            };
        };
        if packing.bytes_per_sample() == 1 {
            if let Some(table) = user_table.and_then(|i| self.user_combine_table(i)) {
                return SampleCombiner::Table(table);
            }
            SampleCombiner::Table(self.combine_table(op, packing))
        } else {
            SampleCombiner::Direct {
                op,
                packing,
                big_endian,
            }
        }
    }
}
