//! Runtime side of the polar store: the input buffer a radar source writes
//! into, the worker that feeds PIMs from it, shared navigation data and the
//! JSON configuration of an input channel.

pub mod config;
pub mod manager;
pub mod navdata;
pub mod rib;
pub mod source;

pub use config::{Config, ConfigError, Persistence};
pub use manager::PimManager;
pub use navdata::SharedNavData;
pub use rib::{ReadFlags, Rib, RibError, WriteFlags};
pub use source::{TargetSpot, TestPatternConfig, TestPatternSource};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
