//! Error types for the polar store

use thiserror::Error;

/// Errors that can occur when decoding returns or operating on a PIM
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PimError {
    /// Buffer is too short to contain the required data
    #[error("Return too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    /// One of the header magic numbers is wrong
    #[error("Invalid return header magic: {magic1:#010X}/{magic2:#010X}")]
    BadMagic { magic1: u32, magic2: u32 },

    /// Size fields in the header are inconsistent
    #[error("Inconsistent return sizes: header {header_size}, video {video_size}, total {total_size}")]
    BadSizes {
        header_size: usize,
        video_size: usize,
        total_size: usize,
    },

    /// This-length larger than nominal length
    #[error("Return length {this_length} exceeds nominal length {nominal_length}")]
    LengthExceedsNominal {
        this_length: u16,
        nominal_length: u16,
    },

    /// Packing is not one the polar store can hold
    #[error("Unsupported packing {0}")]
    UnsupportedPacking(u8),

    /// Samples wider than the store was built for
    #[error("Return needs {needed} bytes per sample, store supports {supported}")]
    SampleTooWide { needed: usize, supported: usize },

    /// The requested azimuth has never been written (or was cleared)
    #[error("No data at azimuth {azimuth}")]
    NoData { azimuth: u32 },

    /// Azimuth outside the current azimuth dimension
    #[error("Azimuth {azimuth} out of range (dimension {dim})")]
    AzimuthOutOfRange { azimuth: u32, dim: u32 },

    /// Configuration value rejected, configuration left unchanged
    #[error("Invalid value '{value}' for parameter '{name}'")]
    InvalidParameter { name: String, value: String },

    /// Parameter name not recognised
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Two stores cannot be copied or compared
    #[error("Incompatible polar stores: {0}")]
    Incompatible(String),

    /// Two stores differ
    #[error("Polar stores differ: {0}")]
    Differs(String),

    /// Handle no longer refers to a PIM in the arena
    #[error("Stale PIM handle")]
    StaleHandle,

    /// Save/restore file problem
    #[error("PIM file error: {0}")]
    File(String),

    /// Failed to serialize or deserialize settings
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for PimError {
    fn from(e: bincode::Error) -> Self {
        PimError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for PimError {
    fn from(e: std::io::Error) -> Self {
        PimError::File(e.to_string())
    }
}

impl PimError {
    pub fn invalid(name: &str, value: impl ToString) -> Self {
        PimError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}
