//! Radar return record
//!
//! A return is one radar transmission's worth of samples at one azimuth: a
//! fixed 48-byte little-endian header followed by the packed sample payload.
//!
//! ```text
//!  0        4      6  7  8      10 11 12 13 14     16        18        20      22 23 24
//!  ┌────────┬──────┬──┬──┬───────┬──┬──┬──┬──┬───────┬─────────┬─────────┬───────┬──┬──┬──
//!  │ magic1 │ ver  │  │hs│ video │nt│st│  │sc│ count │ nominal │  this   │azimuth│pk│sm│..
//!  └────────┴──────┴──┴──┴───────┴──┴──┴──┴──┴───────┴─────────┴─────────┴───────┴──┴──┴──
//!  24         28        30    32        34 35 36          40          44        48
//!  ┌──────────┬─────────┬─────┬─────────┬──┬──┬───────────┬───────────┬─────────┐
//!  │total size│ heading │     │interval │pf│df│start range│ end range │ magic2  │
//!  └──────────┴─────────┴─────┴─────────┴──┴──┴───────────┴───────────┴─────────┘
//! ```

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::PimError;
use crate::packing::Packing;

/// First magic number of a radar video return
pub const RETURN_MAGIC1: u32 = 0xC0DE_5837;
/// First magic number of a sensor specific data record
pub const SENSOR_MAGIC1: u32 = 0xC0DE_5E45;
/// Trailing magic number of every record
pub const RETURN_MAGIC2: u32 = 0xC0DE_6948;

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 48;

/// Largest payload the 16 bit video size field can describe
pub const MAX_VIDEO_SIZE: usize = u16::MAX as usize;

/// Protocol version written into new headers
pub const PROTOCOL_VERSION: u16 = 1;

bitflags! {
    /// Per-return flags used by the polar store
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PimFlags: u8 {
        /// Return repeats the previous azimuth
        const REPEAT = 0x01;
        /// Cell was black-filled, not written by a real return
        const BLACKFILL = 0x02;
        /// Azimuth has been corrected
        const AZI_CORR = 0x04;
        /// AZI_REF flag is valid
        const AZI_REF_SET = 0x08;
        /// Clear for north referenced, set for heading or course referenced
        const AZI_REF = 0x10;
        /// Original azimuth reference of the input
        const AZI_REF_ORIG = 0x20;
        /// Heading field is valid
        const HEADING_SET = 0x40;
        /// Azimuth is course referenced
        const AZI_REF_COURSE = 0x80;
    }
}

bitflags! {
    /// Flags describing the payload encoding
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DataFlags: u8 {
        /// Multi-byte samples are big-endian
        const BIG_ENDIAN = 0x01;
        const COMPRESSED_ORC = 0x02;
        const COMPRESSED_ZLIB = 0x04;
        /// Antenna rotates anticlockwise
        const ANTI_CLOCKWISE = 0x08;
    }
}

bitflags! {
    /// What changed in a source or store since the last time someone looked
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChangeFlags: u32 {
        const INIT = 0x0001;
        const TYPE = 0x0002;
        const CONTENT = 0x0004;
        const DIMENSIONS = 0x0008;
        const RANGE = 0x0010;
        const TIMING = 0x0020;
        const SCANMODE = 0x0040;
        const STATE = 0x0080;
        const SENSORDATA = 0x0100;
    }
}

/// Origin of the radar video
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    FromPrimitive,
    ToPrimitive,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum SourceType {
    Network = 0,
    Test = 1,
    Replay = 2,
    Scenario = 3,
    Hardware = 4,
    External = 5,
    Simulator = 6,
    SyncCombine = 10,
    Http = 20,
    #[default]
    Unknown = 255,
}

impl SourceType {
    pub fn from_u8(value: u8) -> SourceType {
        num_traits::FromPrimitive::from_u8(value).unwrap_or(SourceType::Unknown)
    }
}

/// Antenna scan pattern
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    FromPrimitive,
    ToPrimitive,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum ScanMode {
    #[default]
    Rotating = 0,
    Compensated = 1,
    Sector = 2,
    Random = 3,
    SectorFlyBack = 4,
    NoAziData = 5,
    Auto = 255,
}

impl ScanMode {
    pub fn from_u8(value: u8) -> ScanMode {
        num_traits::FromPrimitive::from_u8(value).unwrap_or(ScanMode::Auto)
    }

    /// Sector scans sweep back and forth, so a backwards step is new data
    pub fn is_sector(self) -> bool {
        matches!(self, ScanMode::Sector | ScanMode::SectorFlyBack)
    }

    /// Azimuths carry no scan ordering at all
    pub fn is_unordered(self) -> bool {
        matches!(self, ScanMode::Random | ScanMode::NoAziData)
    }
}

/// Decoded return header
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnHeader {
    pub magic: u32,
    pub version: u16,
    pub header_size: u8,
    pub radar_video_size: u16,
    pub num_triggers: u8,
    pub source_type: u8,
    pub source_code: u8,
    pub count: u16,
    pub nominal_length: u16,
    pub this_length: u16,
    /// 0..65535 for 0..360 degrees
    pub azimuth: u16,
    pub packing: u8,
    pub scan_mode: u8,
    pub total_size: u32,
    /// 0..65535 for 0..360 degrees, valid with `PimFlags::HEADING_SET`
    pub heading: u16,
    /// Microseconds since the previous return
    pub time_interval: u16,
    pub pim_flags: PimFlags,
    pub data_flags: DataFlags,
    /// Metres
    pub start_range: f32,
    /// Metres
    pub end_range: f32,
    pub magic2: u32,
}

impl Default for ReturnHeader {
    fn default() -> Self {
        Self {
            magic: RETURN_MAGIC1,
            version: PROTOCOL_VERSION,
            header_size: HEADER_SIZE as u8,
            radar_video_size: 0,
            num_triggers: 1,
            source_type: SourceType::Unknown as u8,
            source_code: 0,
            count: 0,
            nominal_length: 0,
            this_length: 0,
            azimuth: 0,
            packing: Packing::Raw8 as u8,
            scan_mode: ScanMode::Rotating as u8,
            total_size: HEADER_SIZE as u32,
            heading: 0,
            time_interval: 0,
            pim_flags: PimFlags::empty(),
            data_flags: DataFlags::empty(),
            start_range: 0.0,
            end_range: 0.0,
            magic2: RETURN_MAGIC2,
        }
    }
}

impl ReturnHeader {
    /// Encode into the 48 byte wire layout
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[7] = self.header_size;
        buf[8..10].copy_from_slice(&self.radar_video_size.to_le_bytes());
        buf[10] = self.num_triggers;
        buf[11] = self.source_type;
        buf[13] = self.source_code;
        buf[14..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16..18].copy_from_slice(&self.nominal_length.to_le_bytes());
        buf[18..20].copy_from_slice(&self.this_length.to_le_bytes());
        buf[20..22].copy_from_slice(&self.azimuth.to_le_bytes());
        buf[22] = self.packing;
        buf[23] = self.scan_mode;
        buf[24..28].copy_from_slice(&self.total_size.to_le_bytes());
        buf[28..30].copy_from_slice(&self.heading.to_le_bytes());
        buf[32..34].copy_from_slice(&self.time_interval.to_le_bytes());
        buf[34] = self.pim_flags.bits();
        buf[35] = self.data_flags.bits();
        buf[36..40].copy_from_slice(&self.start_range.to_le_bytes());
        buf[40..44].copy_from_slice(&self.end_range.to_le_bytes());
        buf[44..48].copy_from_slice(&self.magic2.to_le_bytes());

        buf
    }

    /// Decode a header without checking it, see [`ReturnHeader::validate`]
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PimError> {
        if buf.len() < HEADER_SIZE {
            return Err(PimError::TooShort {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);

        Ok(Self {
            magic: u32_at(0),
            version: u16_at(4),
            header_size: buf[7],
            radar_video_size: u16_at(8),
            num_triggers: buf[10],
            source_type: buf[11],
            source_code: buf[13],
            count: u16_at(14),
            nominal_length: u16_at(16),
            this_length: u16_at(18),
            azimuth: u16_at(20),
            packing: buf[22],
            scan_mode: buf[23],
            total_size: u32_at(24),
            heading: u16_at(28),
            time_interval: u16_at(32),
            pim_flags: PimFlags::from_bits_retain(buf[34]),
            data_flags: DataFlags::from_bits_retain(buf[35]),
            start_range: f32::from_bits(u32_at(36)),
            end_range: f32::from_bits(u32_at(40)),
            magic2: u32_at(44),
        })
    }

    pub fn is_sensor_data(&self) -> bool {
        self.magic == SENSOR_MAGIC1
    }

    /// Check the structural invariants of the header on its own
    pub fn validate(&self) -> Result<(), PimError> {
        if (self.magic != RETURN_MAGIC1 && self.magic != SENSOR_MAGIC1)
            || self.magic2 != RETURN_MAGIC2
        {
            return Err(PimError::BadMagic {
                magic1: self.magic,
                magic2: self.magic2,
            });
        }
        if (self.header_size as usize) < HEADER_SIZE
            || (self.header_size as usize + self.radar_video_size as usize)
                > self.total_size as usize
        {
            return Err(PimError::BadSizes {
                header_size: self.header_size as usize,
                video_size: self.radar_video_size as usize,
                total_size: self.total_size as usize,
            });
        }
        if self.this_length > self.nominal_length {
            return Err(PimError::LengthExceedsNominal {
                this_length: self.this_length,
                nominal_length: self.nominal_length,
            });
        }
        Ok(())
    }

    /// Bytes after header and video that belong to the record
    pub fn extra_bytes(&self) -> usize {
        (self.total_size as usize)
            .saturating_sub(self.header_size as usize + self.radar_video_size as usize)
    }

    pub fn packing(&self) -> Option<Packing> {
        Packing::from_u8(self.packing)
    }

    pub fn scan_mode(&self) -> ScanMode {
        ScanMode::from_u8(self.scan_mode)
    }

    pub fn source_type(&self) -> SourceType {
        SourceType::from_u8(self.source_type)
    }

    pub fn azimuth_degrees(&self) -> f64 {
        self.azimuth as f64 * 360.0 / 65536.0
    }

    pub fn heading_degrees(&self) -> f64 {
        self.heading as f64 * 360.0 / 65536.0
    }

    /// Set the size fields for a payload of `video_size` bytes, at most
    /// [`MAX_VIDEO_SIZE`]
    pub fn set_sizes(&mut self, video_size: usize) {
        debug_assert!(video_size <= MAX_VIDEO_SIZE);
        self.header_size = HEADER_SIZE as u8;
        self.radar_video_size = video_size as u16;
        self.total_size = (HEADER_SIZE + video_size) as u32;
    }
}

/// Convert degrees to the 16 bit azimuth representation
pub fn degrees_to_azimuth(degrees: f64) -> u16 {
    let wrapped = degrees.rem_euclid(360.0);
    ((wrapped * 65536.0 / 360.0).round() as u32 & 0xFFFF) as u16
}

/// A return header with its owned payload
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Return {
    pub header: ReturnHeader,
    pub data: Vec<u8>,
}

impl Return {
    /// Build a return with consistent size fields
    pub fn new(mut header: ReturnHeader, data: Vec<u8>) -> Self {
        header.set_sizes(data.len());
        Return { header, data }
    }

    /// Header followed by payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.data.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode and validate one record from the start of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self, PimError> {
        let header = ReturnHeader::from_bytes(buf)?;
        header.validate()?;
        let start = header.header_size as usize;
        let end = start + header.radar_video_size as usize;
        if buf.len() < end {
            return Err(PimError::TooShort {
                expected: end,
                actual: buf.len(),
            });
        }
        Ok(Return {
            data: buf[start..end].to_vec(),
            header,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ReturnHeader {
        ReturnHeader {
            count: 77,
            nominal_length: 512,
            this_length: 500,
            azimuth: 0x4000,
            packing: Packing::Raw16 as u8,
            scan_mode: ScanMode::Sector as u8,
            heading: 0x8000,
            time_interval: 1000,
            pim_flags: PimFlags::HEADING_SET | PimFlags::AZI_REF_SET,
            data_flags: DataFlags::ANTI_CLOCKWISE,
            start_range: 10.0,
            end_range: 1852.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_header().to_bytes();
        assert_eq!(&bytes[0..4], &RETURN_MAGIC1.to_le_bytes());
        assert_eq!(bytes[7], 48);
        assert_eq!(&bytes[20..22], &[0x00, 0x40]);
        assert_eq!(bytes[22], 8);
        assert_eq!(bytes[34], 0x48);
        assert_eq!(bytes[35], 0x08);
        assert_eq!(&bytes[44..48], &RETURN_MAGIC2.to_le_bytes());
    }

    #[test]
    fn test_header_decode() {
        let header = sample_header();
        let decoded = ReturnHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.scan_mode(), ScanMode::Sector);
        assert_eq!(decoded.packing(), Some(Packing::Raw16));
        assert!((decoded.azimuth_degrees() - 90.0).abs() < 1e-9);
        assert!((decoded.heading_degrees() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_bad_magic() {
        let mut header = sample_header();
        header.magic2 = 0;
        assert!(matches!(header.validate(), Err(PimError::BadMagic { .. })));
    }

    #[test]
    fn test_validate_rejects_long_return() {
        let mut header = sample_header();
        header.this_length = 513;
        assert_eq!(
            header.validate(),
            Err(PimError::LengthExceedsNominal {
                this_length: 513,
                nominal_length: 512
            })
        );
    }

    #[test]
    fn test_validate_sizes() {
        let mut header = sample_header();
        header.set_sizes(100);
        assert!(header.validate().is_ok());
        header.total_size = 120;
        assert!(matches!(header.validate(), Err(PimError::BadSizes { .. })));
        header.total_size = 160;
        assert_eq!(header.extra_bytes(), 12);
    }

    #[test]
    fn test_return_encode_decode() {
        let ret = Return::new(sample_header(), vec![7u8; 1000]);
        let bytes = ret.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 1000);
        assert_eq!(Return::decode(&bytes).unwrap(), ret);
        assert!(matches!(
            Return::decode(&bytes[..500]),
            Err(PimError::TooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_enum_values() {
        assert_eq!(SourceType::from_u8(99), SourceType::Unknown);
        assert_eq!(SourceType::from_u8(10), SourceType::SyncCombine);
        assert_eq!(ScanMode::from_u8(42), ScanMode::Auto);
        assert!(ScanMode::SectorFlyBack.is_sector());
        assert!(ScanMode::NoAziData.is_unordered());
    }

    #[test]
    fn test_degrees_to_azimuth() {
        assert_eq!(degrees_to_azimuth(0.0), 0);
        assert_eq!(degrees_to_azimuth(90.0), 0x4000);
        assert_eq!(degrees_to_azimuth(-90.0), 0xC000);
        assert_eq!(degrees_to_azimuth(360.0), 0);
    }
}
