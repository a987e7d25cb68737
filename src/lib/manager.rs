//! PIM manager
//!
//! One worker thread per input buffer. It pulls complete records out of the
//! [`Rib`] and hands each one to every registered PIM in the order they were
//! added; consumers of a PIM are then called on this same thread.
//!
//! ```text
//!   source ──write──▶ Rib ──read──▶ pim-manager ──update──▶ PIM 1 ──▶ processes
//!                                              └──update──▶ PIM 2 ──▶ processes
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use radarpim_core::header::{ChangeFlags, ReturnHeader, HEADER_SIZE};
use radarpim_core::{Pim, PimArena, PimError, PimHandle};

use crate::rib::{ReadFlags, Rib, RibError};

/// How long the worker sleeps on the buffer before looking at change flags
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const RESYNC_REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct Entry {
    handle: PimHandle,
    pim: Arc<Pim>,
    /// Held for the whole update of this PIM; false once removed
    live: Arc<Mutex<bool>>,
}

#[derive(Default)]
struct Progress {
    processed: u64,
    busy: bool,
}

#[derive(Default)]
struct ResyncReporter {
    last_report: Option<Instant>,
    skipped: u64,
}

impl ResyncReporter {
    fn skipped(&mut self, bytes: usize, reason: &dyn std::fmt::Display) {
        self.skipped += bytes as u64;
        let now = Instant::now();
        if self
            .last_report
            .is_none_or(|t| now.duration_since(t) >= RESYNC_REPORT_INTERVAL)
        {
            warn!("input buffer out of sync ({}), skipped {} bytes", reason, self.skipped);
            self.last_report = Some(now);
            self.skipped = 0;
        }
    }
}

struct Shared {
    rib: Arc<Rib>,
    arena: PimArena,
    entries: Mutex<Vec<Entry>>,
    stop: AtomicBool,
    progress: Mutex<Progress>,
    progress_changed: Condvar,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Entry> {
        self.entries().clone()
    }

    fn set_busy(&self, busy: bool) {
        self.progress().busy = busy;
        self.progress_changed.notify_all();
    }

    fn run(&self) {
        let mut scratch = vec![0u8; self.rib.size()];
        let mut resync = ResyncReporter::default();
        debug!("pim-manager: started on {} byte input buffer", scratch.len());

        while !self.stop.load(Ordering::Acquire) {
            self.rib.wait_for_data(POLL_INTERVAL);
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            let changes = self.rib.get_and_clear_change_flags();
            if !changes.is_empty() {
                self.dispatch_changes(changes);
            }
            if self.rib.take_full_status() {
                warn!(
                    "input buffer full, {} returns dropped so far",
                    self.rib.dropped_writes()
                );
            }
            self.drain(&mut scratch, &mut resync);
        }
        debug!("pim-manager: stopped");
    }

    fn drain(&self, scratch: &mut [u8], resync: &mut ResyncReporter) {
        self.set_busy(true);
        loop {
            let waiting = self.rib.bytes_waiting_in_buffer();
            if waiting == 0 {
                break;
            }
            if waiting < HEADER_SIZE {
                // Records are written whole, so a short tail is never a record
                let n = self.rib.discard(waiting);
                resync.skipped(n, &"short tail");
                break;
            }

            let mut bytes = [0u8; HEADER_SIZE];
            self.rib.peek(HEADER_SIZE, &mut bytes);
            let header = match ReturnHeader::from_bytes(&bytes).and_then(|h| h.validate().map(|_| h)) {
                Ok(header) => header,
                Err(e) => {
                    let n = self.rib.discard(1);
                    resync.skipped(n, &e);
                    continue;
                }
            };
            let total = header.total_size as usize;
            if total > waiting || total > scratch.len() {
                let n = self.rib.discard(1);
                resync.skipped(
                    n,
                    &PimError::TooShort {
                        expected: total,
                        actual: waiting,
                    },
                );
                continue;
            }

            let record = &mut scratch[..total];
            if self.rib.read(total, record, ReadFlags::ALL_OR_NOTHING) != total {
                break;
            }
            self.dispatch(record);

            self.progress().processed += 1;
            self.progress_changed.notify_all();
        }
        self.set_busy(false);
    }

    fn dispatch(&self, record: &[u8]) {
        for entry in self.snapshot() {
            let live = entry.live.lock().unwrap_or_else(PoisonError::into_inner);
            if !*live {
                continue;
            }
            // Errors are logged by the PIM; the others still get the return
            if let Ok(outcome) = entry.pim.update_bytes(record) {
                entry.pim.notify_changes(outcome.changes);
                if let Some(notification) = outcome.notification {
                    entry.pim.notify(&notification);
                }
            }
        }
    }

    fn dispatch_changes(&self, changes: ChangeFlags) {
        debug!("pim-manager: source changes {:?}", changes);
        for entry in self.snapshot() {
            let live = entry.live.lock().unwrap_or_else(PoisonError::into_inner);
            if *live {
                entry.pim.notify_changes(changes);
            }
        }
    }
}

/// Worker feeding the PIMs of one input buffer
pub struct PimManager {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PimManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PimManager")
            .field("rib", &self.shared.rib)
            .field("pims", &self.pims())
            .finish()
    }
}

impl PimManager {
    /// Start the worker thread reading `rib`. PIMs are looked up in `arena`.
    pub fn new(rib: Arc<Rib>, arena: PimArena) -> Result<PimManager, RibError> {
        Self::with_pims(rib, arena, &[])
    }

    /// As [`PimManager::new`] with `handles` registered before the worker
    /// reads anything, so returns already waiting reach all of them
    pub fn with_pims(rib: Arc<Rib>, arena: PimArena, handles: &[PimHandle]) -> Result<PimManager, RibError> {
        let mut entries: Vec<Entry> = Vec::with_capacity(handles.len());
        for &handle in handles {
            if entries.iter().any(|e| e.handle == handle) {
                continue;
            }
            entries.push(Entry {
                handle,
                pim: arena.get(handle)?,
                live: Arc::new(Mutex::new(true)),
            });
        }
        let shared = Arc::new(Shared {
            rib,
            arena,
            entries: Mutex::new(entries),
            stop: AtomicBool::new(false),
            progress: Mutex::new(Progress::default()),
            progress_changed: Condvar::new(),
        });
        let worker = shared.clone();
        let thread = thread::Builder::new()
            .name("pim-manager".to_string())
            .spawn(move || worker.run())?;
        info!("PIM manager started with {} PIMs", shared.entries().len());
        Ok(PimManager {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn rib(&self) -> &Arc<Rib> {
        &self.shared.rib
    }

    pub fn arena(&self) -> &PimArena {
        &self.shared.arena
    }

    /// Feed returns to a PIM already in the arena. Adding a PIM twice is a
    /// no-op.
    pub fn add_pim(&self, handle: PimHandle) -> Result<(), RibError> {
        let pim = self.shared.arena.get(handle)?;
        let mut entries = self.shared.entries();
        if entries.iter().any(|e| e.handle == handle) {
            return Ok(());
        }
        info!("{}: attached to PIM manager as {}", pim.name(), handle);
        entries.push(Entry {
            handle,
            pim,
            live: Arc::new(Mutex::new(true)),
        });
        Ok(())
    }

    /// Put `pim` in the arena and feed returns to it
    pub fn add_new_pim(&self, pim: Pim) -> Result<PimHandle, RibError> {
        let handle = self.shared.arena.insert(pim);
        self.add_pim(handle)?;
        Ok(handle)
    }

    /// Stop feeding a PIM. Waits for an update of that PIM in progress; once
    /// this returns the PIM receives no further returns.
    pub fn remove_pim(&self, handle: PimHandle) -> Result<(), RibError> {
        let entry = {
            let mut entries = self.shared.entries();
            let pos = entries
                .iter()
                .position(|e| e.handle == handle)
                .ok_or(PimError::StaleHandle)?;
            entries.remove(pos)
        };
        *entry.live.lock().unwrap_or_else(PoisonError::into_inner) = false;
        info!("{}: detached from PIM manager", entry.pim.name());
        Ok(())
    }

    /// Registered PIMs in dispatch order
    pub fn pims(&self) -> Vec<PimHandle> {
        self.shared.entries().iter().map(|e| e.handle).collect()
    }

    /// Records taken from the buffer and dispatched
    pub fn num_returns_processed(&self) -> u64 {
        self.shared.progress().processed
    }

    /// Block until at least one more record has been dispatched. Returns
    /// false on timeout.
    pub fn wait_for_notifications(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress();
        let start = progress.processed;
        while progress.processed == start {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            progress = self
                .shared
                .progress_changed
                .wait_timeout(progress, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Block until the buffer is empty and no record is being dispatched.
    /// Returns false on timeout.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress();
        loop {
            if !progress.busy && self.shared.rib.bytes_waiting_in_buffer() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Writes do not touch the condvar, so poll as well
            let wait = (deadline - now).min(Duration::from_millis(10));
            progress = self
                .shared
                .progress_changed
                .wait_timeout(progress, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Stop and join the worker. Safe to call more than once.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.rib.signal();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("PIM manager thread panicked");
            } else {
                info!("PIM manager stopped");
            }
        }
    }
}

impl Drop for PimManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::WriteFlags;
    use radarpim_core::{PimConfig, Runtime};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn header(azimuth: u16) -> ReturnHeader {
        ReturnHeader {
            azimuth,
            nominal_length: 8,
            this_length: 8,
            ..Default::default()
        }
    }

    fn setup() -> (PimManager, PimHandle) {
        let rib = Arc::new(Rib::new(4096).unwrap());
        let manager = PimManager::new(rib, PimArena::new()).unwrap();
        let pim = Pim::new(Arc::new(Runtime::new()), PimConfig::new(8, 16)).unwrap();
        let handle = manager.add_new_pim(pim).unwrap();
        (manager, handle)
    }

    #[test]
    fn test_dispatch() {
        let (manager, handle) = setup();
        manager.rib().write(&header(0), &[5u8; 8], WriteFlags::empty()).unwrap();
        manager.rib().write(&header(4096), &[6u8; 8], WriteFlags::empty()).unwrap();
        assert!(manager.wait_until_drained(TIMEOUT));
        assert_eq!(manager.num_returns_processed(), 2);

        let pim = manager.arena().get(handle).unwrap();
        assert_eq!(pim.num_returns_processed(), 2);
        assert_eq!(pim.get_return(0).unwrap().data, vec![5u8; 8]);
        assert_eq!(pim.get_return(1).unwrap().data, vec![6u8; 8]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let (manager, handle) = setup();
        manager.rib().write_bytes(&[0xAA; 5], WriteFlags::NO_SIGNAL).unwrap();
        manager.rib().write(&header(0), &[9u8; 8], WriteFlags::empty()).unwrap();
        assert!(manager.wait_until_drained(TIMEOUT));
        assert_eq!(manager.num_returns_processed(), 1);
        let pim = manager.arena().get(handle).unwrap();
        assert_eq!(pim.get_return(0).unwrap().data, vec![9u8; 8]);
    }

    #[test]
    fn test_remove_pim_stops_updates() {
        let (manager, handle) = setup();
        manager.rib().write(&header(0), &[1u8; 8], WriteFlags::empty()).unwrap();
        assert!(manager.wait_until_drained(TIMEOUT));
        manager.remove_pim(handle).unwrap();
        assert!(manager.pims().is_empty());
        assert!(manager.remove_pim(handle).is_err());

        manager.rib().write(&header(0), &[2u8; 8], WriteFlags::empty()).unwrap();
        assert!(manager.wait_until_drained(TIMEOUT));
        let pim = manager.arena().get(handle).unwrap();
        assert_eq!(pim.num_returns_processed(), 1);
        assert_eq!(pim.get_return(0).unwrap().data, vec![1u8; 8]);
    }

    #[test]
    fn test_add_pim_rejects_stale_handle() {
        let (manager, handle) = setup();
        manager.add_pim(handle).unwrap();
        assert_eq!(manager.pims(), vec![handle]);
        manager.remove_pim(handle).unwrap();
        manager.arena().remove(handle).unwrap();
        assert!(matches!(
            manager.add_pim(handle),
            Err(RibError::Return(PimError::StaleHandle))
        ));
    }

    #[test]
    fn test_shutdown_twice() {
        let (manager, _) = setup();
        manager.shutdown();
        manager.shutdown();
        assert!(!manager.wait_for_notifications(Duration::from_millis(10)));
    }
}
