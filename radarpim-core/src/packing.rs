//! Sample packing formats
//!
//! The packing byte in a return header says how samples are laid out in the
//! payload: how many bytes each sample takes, which bits carry analogue video
//! and which carry single-bit digital channels. Multi-byte samples are
//! little-endian unless the header says otherwise.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Maximum number of bytes per sample that a polar store will hold.
pub const MAX_BYTES_PER_SAMPLE: usize = 2;

/// Packing of radar samples in a return payload.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    FromPrimitive,
    ToPrimitive,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum Packing {
    /// 8 bit samples uncompressed
    Raw8 = 0,
    /// 4 bit samples tightly packed
    Raw4 = 1,
    /// 2 bit samples tightly packed
    Raw2 = 2,
    /// 1 bit samples tightly packed
    Raw1 = 3,
    /// 4+1+1+1+1 bits per byte
    Raw4_1111 = 4,
    /// 5+1+1+1 bits per byte
    Raw5_111 = 5,
    /// 6+1+1 bits per byte
    Raw6_11 = 6,
    /// 7+1 bits per byte
    Raw7_1 = 7,
    /// 16 bits, least significant byte first
    Raw16 = 8,
    /// 4 bits channel A (MSB), 4 bits channel B (LSB)
    Raw4_4 = 9,
    /// RAW8 ORC compressed
    Orc = 10,
    /// RAW8 zlib compressed
    Zlib = 20,
    /// 10-bit sample in the MSBs of 16
    Raw10 = 25,
    /// 12-bit sample in the MSBs of 16
    Raw12 = 30,
    /// 12+1+1+1+1
    Raw12_1111 = 31,
    /// 8 bits A plus 8 bits B
    Raw8_8 = 40,
    /// 8 bits + 7 bits + 1 bit
    Raw8_7_1 = 41,
    /// 8 bits + 6 bits + 1+1 bits
    Raw8_6_11 = 42,
    /// 8 bits + 5 bits + 1+1+1 bits
    Raw8_5_111 = 43,
    /// 8 bits + 4 bits + 1+1+1+1 bits
    Raw8_4_1111 = 44,
    /// 8 bits + eight single bits
    Raw8_11111111 = 45,
}

impl Default for Packing {
    fn default() -> Self {
        Packing::Raw8
    }
}

/// One analogue channel inside a sample: its bit mask and shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub mask: u16,
    pub shift: u8,
}

impl Channel {
    const fn new(mask: u16) -> Self {
        Channel {
            mask,
            shift: mask.trailing_zeros() as u8,
        }
    }

    /// Extract the channel value, right aligned
    #[inline]
    pub fn get(&self, sample: u16) -> u16 {
        (sample & self.mask) >> self.shift
    }

    /// Position a right-aligned value back into the channel bits
    #[inline]
    pub fn put(&self, value: u16) -> u16 {
        (value << self.shift) & self.mask
    }

    /// Largest value the channel can hold
    pub fn max_value(&self) -> u16 {
        self.mask >> self.shift
    }
}

impl Packing {
    pub fn from_u8(value: u8) -> Option<Packing> {
        num_traits::FromPrimitive::from_u8(value)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whole bytes per sample, or 0 for sub-byte packings
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Packing::Raw4 | Packing::Raw2 | Packing::Raw1 => 0,
            Packing::Raw16
            | Packing::Raw10
            | Packing::Raw12
            | Packing::Raw12_1111
            | Packing::Raw8_8
            | Packing::Raw8_7_1
            | Packing::Raw8_6_11
            | Packing::Raw8_5_111
            | Packing::Raw8_4_1111
            | Packing::Raw8_11111111 => 2,
            _ => 1,
        }
    }

    /// Samples per byte, or 0 for multi-byte packings
    pub fn samples_per_byte(self) -> usize {
        match self {
            Packing::Raw4 => 2,
            Packing::Raw2 => 4,
            Packing::Raw1 => 8,
            p if p.bytes_per_sample() == 1 => 1,
            _ => 0,
        }
    }

    /// Number of payload bytes needed for `num_samples`
    pub fn num_bytes(self, num_samples: usize) -> usize {
        match self.samples_per_byte() {
            0 => num_samples * self.bytes_per_sample(),
            spb => num_samples.div_ceil(spb),
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, Packing::Orc | Packing::Zlib)
    }

    /// True if a polar store can hold samples in this packing directly
    pub fn is_storable(self) -> bool {
        !self.is_compressed() && matches!(self.bytes_per_sample(), 1 | 2)
    }

    /// Analogue channels, most significant first
    pub fn analogue_channels(self) -> &'static [Channel] {
        const RAW8: [Channel; 1] = [Channel::new(0x00FF)];
        const RAW4: [Channel; 1] = [Channel::new(0x000F)];
        const RAW2: [Channel; 1] = [Channel::new(0x0003)];
        const RAW1: [Channel; 1] = [Channel::new(0x0001)];
        const RAW4_1111: [Channel; 1] = [Channel::new(0x00F0)];
        const RAW5_111: [Channel; 1] = [Channel::new(0x00F8)];
        const RAW6_11: [Channel; 1] = [Channel::new(0x00FC)];
        const RAW7_1: [Channel; 1] = [Channel::new(0x00FE)];
        const RAW16: [Channel; 1] = [Channel::new(0xFFFF)];
        const RAW4_4: [Channel; 2] = [Channel::new(0x00F0), Channel::new(0x000F)];
        const RAW10: [Channel; 1] = [Channel::new(0xFFC0)];
        const RAW12: [Channel; 1] = [Channel::new(0xFFF0)];
        const RAW8_8: [Channel; 2] = [Channel::new(0xFF00), Channel::new(0x00FF)];
        const RAW8_7_1: [Channel; 2] = [Channel::new(0xFF00), Channel::new(0x00FE)];
        const RAW8_6_11: [Channel; 2] = [Channel::new(0xFF00), Channel::new(0x00FC)];
        const RAW8_5_111: [Channel; 2] = [Channel::new(0xFF00), Channel::new(0x00F8)];
        const RAW8_4_1111: [Channel; 2] = [Channel::new(0xFF00), Channel::new(0x00F0)];
        const RAW8_1X8: [Channel; 1] = [Channel::new(0xFF00)];

        match self {
            Packing::Raw8 | Packing::Orc | Packing::Zlib => &RAW8,
            Packing::Raw4 => &RAW4,
            Packing::Raw2 => &RAW2,
            Packing::Raw1 => &RAW1,
            Packing::Raw4_1111 => &RAW4_1111,
            Packing::Raw5_111 => &RAW5_111,
            Packing::Raw6_11 => &RAW6_11,
            Packing::Raw7_1 => &RAW7_1,
            Packing::Raw16 => &RAW16,
            Packing::Raw4_4 => &RAW4_4,
            Packing::Raw10 => &RAW10,
            Packing::Raw12 | Packing::Raw12_1111 => &RAW12,
            Packing::Raw8_8 => &RAW8_8,
            Packing::Raw8_7_1 => &RAW8_7_1,
            Packing::Raw8_6_11 => &RAW8_6_11,
            Packing::Raw8_5_111 => &RAW8_5_111,
            Packing::Raw8_4_1111 => &RAW8_4_1111,
            Packing::Raw8_11111111 => &RAW8_1X8,
        }
    }

    /// Bits holding the main (channel A) radar value
    pub fn normal_bits_mask(self) -> u16 {
        self.analogue_channels()[0].mask
    }

    /// Bits holding the single-bit digital channels
    pub fn extra_bits_mask(self) -> u16 {
        match self {
            Packing::Raw4_1111 | Packing::Raw12_1111 | Packing::Raw8_4_1111 => 0x000F,
            Packing::Raw5_111 | Packing::Raw8_5_111 => 0x0007,
            Packing::Raw6_11 | Packing::Raw8_6_11 => 0x0003,
            Packing::Raw7_1 | Packing::Raw8_7_1 => 0x0001,
            Packing::Raw8_11111111 => 0x00FF,
            _ => 0,
        }
    }

    pub fn num_analogue_channels(self) -> usize {
        self.analogue_channels().len()
    }

    pub fn num_digital_bits(self) -> u32 {
        self.extra_bits_mask().count_ones()
    }

    /// Largest channel A value
    pub fn max_value(self) -> u16 {
        self.analogue_channels()[0].max_value()
    }
}

/// Read sample `index` from a payload of 1 or 2 bytes per sample.
#[inline]
pub fn read_sample(data: &[u8], index: usize, bps: usize, big_endian: bool) -> u16 {
    if bps == 2 {
        let b = [data[index * 2], data[index * 2 + 1]];
        if big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        }
    } else {
        data[index] as u16
    }
}

/// Write sample `index` into a payload of 1 or 2 bytes per sample.
#[inline]
pub fn write_sample(data: &mut [u8], index: usize, bps: usize, big_endian: bool, value: u16) {
    if bps == 2 {
        let b = if big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        data[index * 2] = b[0];
        data[index * 2 + 1] = b[1];
    } else {
        data[index] = value as u8;
    }
}
