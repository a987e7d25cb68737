//! Radar Input Buffer
//!
//! A byte ring between one radar source and one PIM manager. Each return is
//! written as a single record (48 byte header followed by its payload) and
//! either fits completely or is dropped; a slow reader never stalls the
//! source.
//!
//! ```text
//!          read_ptr                 write_ptr
//!             v                         v
//!   [ ....... | hdr | data | hdr | data | ............ ]
//!             <------ bytes waiting ---->
//! ```
//!
//! Writes signal a coalescing wake-up: several writes before the reader
//! runs produce one wake-up, so readers loop on `bytes_waiting_in_buffer()`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bitflags::bitflags;
use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, trace};
use thiserror::Error;

use radarpim_core::header::{
    ChangeFlags, ReturnHeader, HEADER_SIZE, MAX_VIDEO_SIZE, PROTOCOL_VERSION, RETURN_MAGIC1,
    RETURN_MAGIC2, SENSOR_MAGIC1,
};
use radarpim_core::PimError;

#[derive(Error, Debug)]
pub enum RibError {
    #[error("Not enough space in input buffer: need {needed} bytes, {available} free")]
    InsufficientSpace { needed: usize, available: usize },

    #[error("Invalid input buffer size {0}")]
    InvalidSize(usize),

    #[error("Payload of {0} bytes does not fit in one return")]
    PayloadTooLarge(usize),

    #[error(transparent)]
    Return(#[from] PimError),

    #[error("Cannot start manager thread: {0}")]
    Thread(#[from] std::io::Error),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReadFlags: u32 {
        /// Read nothing unless all requested bytes are waiting
        const ALL_OR_NOTHING = 0x0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WriteFlags: u32 {
        /// Do not wake the reader; a later write or `signal()` will
        const NO_SIGNAL = 0x0001;
    }
}

/// Backing store of the ring
pub enum RibMemory {
    Owned(Box<[u8]>),
    /// Caller supplied memory, e.g. a shared or device mapped region
    External(&'static mut [u8]),
}

impl RibMemory {
    fn as_slice(&self) -> &[u8] {
        match self {
            RibMemory::Owned(b) => b,
            RibMemory::External(s) => s,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            RibMemory::Owned(b) => b,
            RibMemory::External(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Owned,
    External,
}

struct Ring {
    memory: RibMemory,
    read_ptr: usize,
    write_ptr: usize,
}

impl Ring {
    fn copy_in(&mut self, data: &[u8]) {
        let mem = self.memory.as_mut_slice();
        let size = mem.len();
        let first = data.len().min(size - self.write_ptr);
        mem[self.write_ptr..self.write_ptr + first].copy_from_slice(&data[..first]);
        mem[..data.len() - first].copy_from_slice(&data[first..]);
        self.write_ptr = (self.write_ptr + data.len()) % size;
    }

    fn copy_out(&self, dest: &mut [u8]) {
        let mem = self.memory.as_slice();
        let size = mem.len();
        let first = dest.len().min(size - self.read_ptr);
        let n = dest.len();
        dest[..first].copy_from_slice(&mem[self.read_ptr..self.read_ptr + first]);
        dest[first..].copy_from_slice(&mem[..n - first]);
    }

    fn advance(&mut self, n: usize) {
        self.read_ptr = (self.read_ptr + n) % self.memory.as_slice().len();
    }
}

pub struct Rib {
    size: usize,
    allocation: Allocation,
    ring: Mutex<Ring>,
    bytes_waiting: AtomicUsize,
    return_length: AtomicUsize,
    num_writes: AtomicU64,
    dropped_writes: AtomicU64,
    full: AtomicBool,
    change_flags: AtomicU32,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl std::fmt::Debug for Rib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rib")
            .field("size", &self.size)
            .field("bytes_waiting", &self.bytes_waiting_in_buffer())
            .field("num_writes", &self.num_writes())
            .finish()
    }
}

impl Rib {
    /// Ring owning `size` bytes
    pub fn new(size: usize) -> Result<Rib, RibError> {
        if size == 0 {
            return Err(RibError::InvalidSize(size));
        }
        Ok(Self::build(RibMemory::Owned(vec![0u8; size].into_boxed_slice()), Allocation::Owned))
    }

    /// Ring over caller memory
    pub fn with_memory(memory: &'static mut [u8]) -> Result<Rib, RibError> {
        if memory.is_empty() {
            return Err(RibError::InvalidSize(0));
        }
        Ok(Self::build(RibMemory::External(memory), Allocation::External))
    }

    fn build(memory: RibMemory, allocation: Allocation) -> Rib {
        let size = memory.as_slice().len();
        let (wake_tx, wake_rx) = bounded(1);
        debug!("created input buffer of {} bytes", size);
        Rib {
            size,
            allocation,
            ring: Mutex::new(Ring {
                memory,
                read_ptr: 0,
                write_ptr: 0,
            }),
            bytes_waiting: AtomicUsize::new(0),
            return_length: AtomicUsize::new(0),
            num_writes: AtomicU64::new(0),
            dropped_writes: AtomicU64::new(0),
            full: AtomicBool::new(false),
            change_flags: AtomicU32::new(0),
            wake_tx,
            wake_rx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build a record from `header` and `payload` and write it as one unit.
    /// Size fields, magics and protocol version are filled in here.
    pub fn write(&self, header: &ReturnHeader, payload: &[u8], flags: WriteFlags) -> Result<(), RibError> {
        if payload.len() > MAX_VIDEO_SIZE {
            return Err(RibError::PayloadTooLarge(payload.len()));
        }
        let mut header = header.clone();
        if header.magic != SENSOR_MAGIC1 {
            header.magic = RETURN_MAGIC1;
        }
        header.magic2 = RETURN_MAGIC2;
        header.version = PROTOCOL_VERSION;
        header.set_sizes(payload.len());
        self.write_parts(&[&header.to_bytes(), payload], flags)
    }

    /// Write pre-encoded bytes as one unit
    pub fn write_bytes(&self, bytes: &[u8], flags: WriteFlags) -> Result<(), RibError> {
        self.write_parts(&[bytes], flags)
    }

    fn write_parts(&self, parts: &[&[u8]], flags: WriteFlags) -> Result<(), RibError> {
        let needed: usize = parts.iter().map(|p| p.len()).sum();
        {
            let mut ring = self.lock();
            let available = self.size - self.bytes_waiting.load(Ordering::Acquire);
            if needed > available {
                drop(ring);
                self.dropped_writes.fetch_add(1, Ordering::Relaxed);
                self.full.store(true, Ordering::Release);
                trace!("input buffer full: {} bytes needed, {} free", needed, available);
                return Err(RibError::InsufficientSpace { needed, available });
            }
            for part in parts {
                ring.copy_in(part);
            }
            self.bytes_waiting.fetch_add(needed, Ordering::AcqRel);
        }
        self.return_length.store(needed, Ordering::Relaxed);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        if !flags.contains(WriteFlags::NO_SIGNAL) {
            self.signal();
        }
        Ok(())
    }

    /// Copy up to `max` waiting bytes into `dest` and consume them. Returns
    /// the number of bytes read, never blocks.
    pub fn read(&self, max: usize, dest: &mut [u8], flags: ReadFlags) -> usize {
        let mut ring = self.lock();
        let n = self.readable(max, dest.len(), flags);
        if n > 0 {
            ring.copy_out(&mut dest[..n]);
            ring.advance(n);
            self.bytes_waiting.fetch_sub(n, Ordering::AcqRel);
        }
        n
    }

    /// As [`Rib::read`] without consuming
    pub fn peek(&self, max: usize, dest: &mut [u8]) -> usize {
        let ring = self.lock();
        let n = self.readable(max, dest.len(), ReadFlags::empty());
        ring.copy_out(&mut dest[..n]);
        n
    }

    /// Consume up to `n` bytes without copying them
    pub fn discard(&self, n: usize) -> usize {
        let mut ring = self.lock();
        let n = n.min(self.bytes_waiting.load(Ordering::Acquire));
        ring.advance(n);
        self.bytes_waiting.fetch_sub(n, Ordering::AcqRel);
        n
    }

    fn readable(&self, max: usize, room: usize, flags: ReadFlags) -> usize {
        let waiting = self.bytes_waiting.load(Ordering::Acquire);
        let wanted = max.min(room);
        if flags.contains(ReadFlags::ALL_OR_NOTHING) && waiting < wanted {
            return 0;
        }
        wanted.min(waiting)
    }

    pub fn bytes_waiting_in_buffer(&self) -> usize {
        self.bytes_waiting.load(Ordering::Acquire)
    }

    pub fn space_left_in_buffer(&self) -> usize {
        self.size - self.bytes_waiting_in_buffer()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    /// Read pointer, write pointer and size
    pub fn pointers(&self) -> (usize, usize, usize) {
        let ring = self.lock();
        (ring.read_ptr, ring.write_ptr, self.size)
    }

    /// Length in bytes of the last record written
    pub fn return_length(&self) -> usize {
        self.return_length.load(Ordering::Relaxed)
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    /// True if a write was dropped since the last call
    pub fn take_full_status(&self) -> bool {
        self.full.swap(false, Ordering::AcqRel)
    }

    pub fn set_change_flags(&self, flags: ChangeFlags) {
        self.change_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn get_and_clear_change_flags(&self) -> ChangeFlags {
        ChangeFlags::from_bits_retain(self.change_flags.swap(0, Ordering::AcqRel))
    }

    /// Wake a waiting reader
    pub fn signal(&self) {
        // Full means a wake-up is already pending
        let _ = self.wake_tx.try_send(());
    }

    /// Block until signalled, data is already waiting, or `timeout` passes.
    /// Returns false on timeout.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        if self.bytes_waiting_in_buffer() > 0 {
            return true;
        }
        self.wake_rx.recv_timeout(timeout).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radarpim_core::Return;

    fn header(len: usize) -> ReturnHeader {
        ReturnHeader {
            nominal_length: len as u16,
            this_length: len as u16,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_read_record() {
        let rib = Rib::new(1024).unwrap();
        rib.write(&header(16), &[7u8; 16], WriteFlags::empty()).unwrap();
        assert_eq!(rib.bytes_waiting_in_buffer(), HEADER_SIZE + 16);
        assert_eq!(rib.return_length(), HEADER_SIZE + 16);
        assert_eq!(rib.num_writes(), 1);

        let mut buf = vec![0u8; 1024];
        let n = rib.read(1024, &mut buf, ReadFlags::empty());
        assert_eq!(n, HEADER_SIZE + 16);
        let ret = Return::decode(&buf[..n]).unwrap();
        assert_eq!(ret.data, vec![7u8; 16]);
        assert_eq!(ret.header.total_size as usize, n);
        assert_eq!(rib.bytes_waiting_in_buffer(), 0);
    }

    #[test]
    fn test_insufficient_space_leaves_ring() {
        let rib = Rib::new(HEADER_SIZE + 8).unwrap();
        let result = rib.write(&header(16), &[1u8; 16], WriteFlags::empty());
        assert!(matches!(result, Err(RibError::InsufficientSpace { .. })));
        assert_eq!(rib.bytes_waiting_in_buffer(), 0);
        assert_eq!(rib.pointers(), (0, 0, HEADER_SIZE + 8));
        assert_eq!(rib.dropped_writes(), 1);
        assert!(rib.take_full_status());
        assert!(!rib.take_full_status());
    }

    #[test]
    fn test_wraparound() {
        let rib = Rib::new(100).unwrap();
        let mut buf = [0u8; 100];
        for round in 0..10u8 {
            let data: Vec<u8> = (0..30).map(|i| i + round).collect();
            rib.write_bytes(&data, WriteFlags::empty()).unwrap();
            assert_eq!(rib.read(30, &mut buf, ReadFlags::empty()), 30);
            assert_eq!(&buf[..30], &data[..]);
        }
        let (read_ptr, write_ptr, _) = rib.pointers();
        assert_eq!(read_ptr, 0);
        assert_eq!(write_ptr, 0);
    }

    #[test]
    fn test_all_or_nothing_and_peek() {
        let rib = Rib::new(64).unwrap();
        rib.write_bytes(&[1, 2, 3, 4], WriteFlags::empty()).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(rib.read(8, &mut buf, ReadFlags::ALL_OR_NOTHING), 0);
        assert_eq!(rib.peek(2, &mut buf), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(rib.bytes_waiting_in_buffer(), 4);
        assert_eq!(rib.discard(1), 1);
        assert_eq!(rib.read(8, &mut buf, ReadFlags::empty()), 3);
        assert_eq!(&buf[..3], &[2, 3, 4]);
    }

    #[test]
    fn test_change_flags_accumulate() {
        let rib = Rib::new(64).unwrap();
        rib.set_change_flags(ChangeFlags::RANGE);
        rib.set_change_flags(ChangeFlags::TIMING);
        assert_eq!(
            rib.get_and_clear_change_flags(),
            ChangeFlags::RANGE | ChangeFlags::TIMING
        );
        assert!(rib.get_and_clear_change_flags().is_empty());
    }

    #[test]
    fn test_wakeup_coalesces() {
        let rib = Rib::new(256).unwrap();
        rib.write_bytes(&[0; 4], WriteFlags::empty()).unwrap();
        rib.write_bytes(&[0; 4], WriteFlags::empty()).unwrap();
        let mut buf = [0u8; 8];
        rib.read(8, &mut buf, ReadFlags::empty());
        // one pending wake-up for both writes
        assert!(rib.wait_for_data(Duration::from_millis(1)));
        assert!(!rib.wait_for_data(Duration::from_millis(1)));
        rib.write_bytes(&[0; 4], WriteFlags::NO_SIGNAL).unwrap();
        assert!(rib.wait_for_data(Duration::from_millis(1)));
    }

    #[test]
    fn test_external_memory() {
        let memory: &'static mut [u8] = Box::leak(vec![0u8; 128].into_boxed_slice());
        let rib = Rib::with_memory(memory).unwrap();
        assert_eq!(rib.allocation(), Allocation::External);
        assert_eq!(rib.size(), 128);
        assert!(Rib::new(0).is_err());
    }
}
