//! # RadarPIM Core
//!
//! Polar interpolated memory for radar video.
//!
//! Radar returns arrive at whatever azimuth the antenna happens to be
//! pointing at, with whatever number of samples the source produces. A
//! [`Pim`] resamples that stream onto a fixed range × azimuth grid which
//! scan converters, trackers and recorders can read at any time.
//!
//! This crate has no threads and does no I/O beyond saving and loading a
//! store; the `radarpim` crate adds the input buffer and the worker thread
//! that drives it.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  radarpim-core                                                │
//! │  ├── header       (48 byte return record codec)               │
//! │  ├── packing      (sample layouts, channel masks)             │
//! │  ├── combine      (peak/min/smooth, range reduction)          │
//! │  ├── runtime      (shared combine tables, debug flags)        │
//! │  ├── azimuth      (north/heading/course referencing)          │
//! │  ├── stats        (PRF, rotation period)                      │
//! │  ├── interference (multi-return minimum filter)               │
//! │  ├── pim/         (polar store, persistence, centroid)        │
//! │  ├── process      (consumer notification)                     │
//! │  └── arena        (PIM registry and handles)                  │
//! └───────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  radarpim               │
//!                 │  (RIB, manager thread)  │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use radarpim_core::{Pim, PimConfig, Return, ReturnHeader, Runtime};
//!
//! let pim = Pim::new(Arc::new(Runtime::new()), PimConfig::new(512, 2048)).unwrap();
//! let header = ReturnHeader {
//!     azimuth: 16384, // 90 degrees
//!     nominal_length: 512,
//!     this_length: 512,
//!     ..Default::default()
//! };
//! pim.update(&Return::new(header, vec![0x80; 512])).unwrap();
//! assert_eq!(pim.get_return(512).unwrap().data[0], 0x80);
//! ```

pub mod arena;
pub mod azimuth;
pub mod combine;
pub mod error;
pub mod header;
pub mod interference;
pub mod packing;
pub mod pim;
pub mod process;
pub mod runtime;
pub mod stats;

pub use arena::{PimArena, PimChain, PimHandle};
pub use azimuth::{AziRefMode, NavDataProvider, NavSample, ReferenceOptions};
pub use combine::{AzimuthCombine, CombineTable, RangeCombine};
pub use error::PimError;
pub use header::{ChangeFlags, DataFlags, PimFlags, Return, ReturnHeader, ScanMode, SourceType};
pub use packing::Packing;
pub use pim::{Centroid, CellState, FillMode, Pim, PimConfig, PimSettings, UpdateInterval, UpdateOutcome};
pub use process::{Notification, ProcessManager, RunProcess};
pub use runtime::{DebugFlags, Runtime};
