//! Sample combination
//!
//! Two returns landing in the same azimuth bucket are merged per sample with
//! the azimuth combine mode; a return longer than the store is folded onto
//! the store's range dimension with the range combine mode. Analogue channels
//! are combined by value, single-bit digital channels are OR'ed together (AND
//! for `Min`).
//!
//! For 8 bit packings the per-sample work is a 256×256 lookup table, built
//! once per `(op, packing)` and shared through the [`Runtime`](crate::Runtime).

use std::sync::Arc;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::PimError;
use crate::packing::{read_sample, write_sample, Packing};

/// Number of entries in an 8 bit combine table
pub const COMBINE_TABLE_SIZE: usize = 256 * 256;

/// How successive returns at one azimuth bucket are merged
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
pub enum AzimuthCombine {
    /// First return at a bucket wins, later ones are ignored
    #[strum(to_string = "NoCombine", serialize = "Subsample")]
    NoCombine = 1,
    /// Last return at a bucket wins
    Overwrite = 2,
    #[default]
    Peak = 3,
    Min = 4,
    Smooth = 5,
}

/// How a return longer than the store is folded onto the range dimension
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
pub enum RangeCombine {
    Subsample = 1,
    #[default]
    Peak = 2,
    Min = 3,
    Smooth = 4,
}

impl AzimuthCombine {
    pub fn from_u8(value: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(value)
    }

    /// Per-sample operation, if this mode merges samples at all
    pub fn op(self) -> Option<CombineOp> {
        match self {
            AzimuthCombine::NoCombine | AzimuthCombine::Overwrite => None,
            AzimuthCombine::Peak => Some(CombineOp::Peak),
            AzimuthCombine::Min => Some(CombineOp::Min),
            AzimuthCombine::Smooth => Some(CombineOp::Smooth),
        }
    }
}

impl RangeCombine {
    pub fn from_u8(value: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(value)
    }

    pub fn op(self) -> Option<CombineOp> {
        match self {
            RangeCombine::Subsample => None,
            RangeCombine::Peak => Some(CombineOp::Peak),
            RangeCombine::Min => Some(CombineOp::Min),
            RangeCombine::Smooth => Some(CombineOp::Smooth),
        }
    }
}

/// Built-in per-sample operation. The discriminant is the table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CombineOp {
    Peak = 0,
    Min = 1,
    Smooth = 2,
}

impl CombineOp {
    pub fn table_index(self) -> usize {
        self as usize
    }
}

/// Combine two raw samples of the given packing
pub fn combine_sample(op: CombineOp, packing: Packing, a: u16, b: u16) -> u16 {
    let mut out = 0u16;
    for ch in packing.analogue_channels() {
        let (x, y) = (ch.get(a), ch.get(b));
        let v = match op {
            CombineOp::Peak => x.max(y),
            CombineOp::Min => x.min(y),
            CombineOp::Smooth => ((x as u32 + y as u32 + 1) / 2) as u16,
        };
        out |= ch.put(v);
    }
    let digital = packing.extra_bits_mask();
    out | match op {
        CombineOp::Min => a & b & digital,
        _ => (a | b) & digital,
    }
}

/// Fold any number of samples into one, `None` when there are none
pub fn reduce_samples(
    op: CombineOp,
    packing: Packing,
    samples: impl Iterator<Item = u16> + Clone,
) -> Option<u16> {
    match op {
        CombineOp::Peak | CombineOp::Min => samples.reduce(|a, b| combine_sample(op, packing, a, b)),
        CombineOp::Smooth => {
            let n = samples.clone().count() as u32;
            if n == 0 {
                return None;
            }
            let mut out = 0u16;
            for ch in packing.analogue_channels() {
                let sum: u32 = samples.clone().map(|s| ch.get(s) as u32).sum();
                out |= ch.put(((sum + n / 2) / n) as u16);
            }
            let digital = samples.fold(0, |acc, s| acc | s) & packing.extra_bits_mask();
            Some(out | digital)
        }
    }
}

/// Linear blend between two samples, `t` in 0..=1 from `a` to `b`. Digital
/// bits come from the nearer sample.
pub fn interpolate_sample(packing: Packing, a: u16, b: u16, t: f64) -> u16 {
    let mut out = 0u16;
    for ch in packing.analogue_channels() {
        let (x, y) = (ch.get(a) as f64, ch.get(b) as f64);
        out |= ch.put((x + (y - x) * t).round() as u16);
    }
    let nearest = if t < 0.5 { a } else { b };
    out | (nearest & packing.extra_bits_mask())
}

/// 256×256 lookup table for combining two 8 bit samples, indexed `[old][new]`
#[derive(Clone, PartialEq, Eq)]
pub struct CombineTable {
    entries: Box<[u8]>,
}

impl std::fmt::Debug for CombineTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombineTable").finish_non_exhaustive()
    }
}

impl CombineTable {
    pub fn from_fn(f: impl Fn(u8, u8) -> u8) -> Self {
        let mut entries = vec![0u8; COMBINE_TABLE_SIZE];
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                entries[(a as usize) << 8 | b as usize] = f(a, b);
            }
        }
        CombineTable {
            entries: entries.into_boxed_slice(),
        }
    }

    /// Table for a built-in operation on an 8 bit packing
    pub fn build(op: CombineOp, packing: Packing) -> Self {
        Self::from_fn(|a, b| combine_sample(op, packing, a as u16, b as u16) as u8)
    }

    /// Wrap a user supplied table, which must hold exactly 65536 entries
    pub fn from_slice(entries: &[u8]) -> Result<Self, PimError> {
        if entries.len() != COMBINE_TABLE_SIZE {
            return Err(PimError::invalid("combineTable", entries.len()));
        }
        Ok(CombineTable {
            entries: entries.into(),
        })
    }

    #[inline]
    pub fn get(&self, old: u8, new: u8) -> u8 {
        self.entries[(old as usize) << 8 | new as usize]
    }
}

/// Strategy for merging a new return into an occupied cell, resolved once
/// per configuration or source change
#[derive(Debug, Clone)]
pub enum SampleCombiner {
    /// Keep what is already stored
    Keep,
    /// Replace with the new return
    Replace,
    /// 8 bit lookup
    Table(Arc<CombineTable>),
    /// Computed per sample for 16 bit packings
    Direct {
        op: CombineOp,
        packing: Packing,
        big_endian: bool,
    },
}

impl SampleCombiner {
    /// Merge `new` into `old` sample by sample. Both hold `num_samples`
    /// samples of `bps` bytes.
    pub fn combine_into(&self, old: &mut [u8], new: &[u8], num_samples: usize, bps: usize) {
        match self {
            SampleCombiner::Keep => {}
            SampleCombiner::Replace => {
                let n = num_samples * bps;
                old[..n].copy_from_slice(&new[..n]);
            }
            SampleCombiner::Table(table) => {
                for (o, &n) in old[..num_samples].iter_mut().zip(&new[..num_samples]) {
                    *o = table.get(*o, n);
                }
            }
            SampleCombiner::Direct {
                op,
                packing,
                big_endian,
            } => {
                for i in 0..num_samples {
                    let a = read_sample(old, i, bps, *big_endian);
                    let b = read_sample(new, i, bps, *big_endian);
                    write_sample(old, i, bps, *big_endian, combine_sample(*op, *packing, a, b));
                }
            }
        }
    }
}

/// Fold `this_length` valid samples of a return with `nominal` samples onto
/// `range_dim` samples. Output bin `i` covers input samples
/// `[i * nominal / range_dim, (i + 1) * nominal / range_dim)`. Returns the
/// number of valid output samples; the rest of `dst` is zeroed.
#[allow(clippy::too_many_arguments)]
pub fn reduce_range(
    src: &[u8],
    this_length: usize,
    nominal: usize,
    dst: &mut [u8],
    range_dim: usize,
    mode: RangeCombine,
    packing: Packing,
    bps: usize,
    big_endian: bool,
) -> usize {
    let out_length = (this_length * range_dim).div_ceil(nominal.max(1)).min(range_dim);
    dst[..range_dim * bps].fill(0);
    for i in 0..out_length {
        let start = i * nominal / range_dim;
        let end = ((i + 1) * nominal / range_dim).max(start + 1).min(this_length);
        if start >= end {
            continue;
        }
        let samples = (start..end).map(|j| read_sample(src, j, bps, big_endian));
        let value = match mode.op() {
            None => read_sample(src, start, bps, big_endian),
            Some(op) => reduce_samples(op, packing, samples).unwrap_or(0),
        };
        write_sample(dst, i, bps, big_endian, value);
    }
    out_length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_raw8() {
        assert_eq!(combine_sample(CombineOp::Peak, Packing::Raw8, 10, 200), 200);
        assert_eq!(combine_sample(CombineOp::Min, Packing::Raw8, 10, 200), 10);
        assert_eq!(combine_sample(CombineOp::Smooth, Packing::Raw8, 10, 201), 106);
    }

    #[test]
    fn test_combine_digital_bits() {
        // analogue 0x40 + bit 0 vs analogue 0x80 + bit 1
        let a = 0x40 << 1 | 0x01;
        let b = 0x20 << 2 | 0x02;
        let p = Packing::Raw6_11;
        let peak = combine_sample(CombineOp::Peak, p, a, b);
        assert_eq!(peak & 0x03, 0x03);
        assert_eq!(peak & 0xFC, 0x80);
        let min = combine_sample(CombineOp::Min, p, a, b);
        assert_eq!(min & 0x03, 0x00);
    }

    #[test]
    fn test_smooth_stays_in_channel() {
        let p = Packing::Raw4_1111;
        let out = combine_sample(CombineOp::Smooth, p, 0xF0, 0xE0);
        assert_eq!(out, 0xF0);
    }

    #[test]
    fn test_dual_channel() {
        let p = Packing::Raw8_8;
        let out = combine_sample(CombineOp::Peak, p, 0x10F0, 0x2001);
        assert_eq!(out, 0x20F0);
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(interpolate_sample(Packing::Raw8, 0, 100, 0.25), 25);
        assert_eq!(interpolate_sample(Packing::Raw8, 100, 0, 0.5), 50);
        let p = Packing::Raw7_1;
        assert_eq!(interpolate_sample(p, 0x01, 0xFE, 0.25) & 0x01, 0x01);
        assert_eq!(interpolate_sample(p, 0x01, 0xFE, 0.75) & 0x01, 0x00);
    }

    #[test]
    fn test_table_matches_direct() {
        let table = CombineTable::build(CombineOp::Smooth, Packing::Raw7_1);
        for (a, b) in [(0u8, 0u8), (3, 254), (255, 1), (128, 129)] {
            assert_eq!(
                table.get(a, b) as u16,
                combine_sample(CombineOp::Smooth, Packing::Raw7_1, a as u16, b as u16)
            );
        }
    }

    #[test]
    fn test_user_table_size() {
        assert!(CombineTable::from_slice(&[0u8; 100]).is_err());
        let table = CombineTable::from_slice(&vec![9u8; COMBINE_TABLE_SIZE]).unwrap();
        assert_eq!(table.get(1, 2), 9);
    }

    #[test]
    fn test_combiner_modes() {
        let new = [5u8, 50, 200];
        let mut cell = [100u8, 20, 30];
        SampleCombiner::Keep.combine_into(&mut cell, &new, 3, 1);
        assert_eq!(cell, [100, 20, 30]);
        let peak = SampleCombiner::Table(Arc::new(CombineTable::build(CombineOp::Peak, Packing::Raw8)));
        peak.combine_into(&mut cell, &new, 3, 1);
        assert_eq!(cell, [100, 50, 200]);
        SampleCombiner::Replace.combine_into(&mut cell, &new, 3, 1);
        assert_eq!(cell, new);
    }

    #[test]
    fn test_combiner_direct_16bit() {
        let mut cell = 1000u16.to_le_bytes().to_vec();
        let new = 3000u16.to_le_bytes();
        let min = SampleCombiner::Direct {
            op: CombineOp::Min,
            packing: Packing::Raw16,
            big_endian: false,
        };
        min.combine_into(&mut cell, &new, 1, 2);
        assert_eq!(u16::from_le_bytes([cell[0], cell[1]]), 1000);
    }

    #[test]
    fn test_reduce_range_modes() {
        let src = [1u8, 9, 4, 4, 7, 3, 0, 0];
        let mut dst = [0xAAu8; 4];
        let n = reduce_range(&src, 8, 8, &mut dst, 4, RangeCombine::Peak, Packing::Raw8, 1, false);
        assert_eq!(n, 4);
        assert_eq!(dst, [9, 4, 7, 0]);
        reduce_range(&src, 8, 8, &mut dst, 4, RangeCombine::Min, Packing::Raw8, 1, false);
        assert_eq!(dst, [1, 4, 3, 0]);
        reduce_range(&src, 8, 8, &mut dst, 4, RangeCombine::Smooth, Packing::Raw8, 1, false);
        assert_eq!(dst, [5, 4, 5, 0]);
        reduce_range(&src, 8, 8, &mut dst, 4, RangeCombine::Subsample, Packing::Raw8, 1, false);
        assert_eq!(dst, [1, 4, 7, 0]);
    }

    #[test]
    fn test_reduce_range_short_return() {
        let src = [10u8, 20, 30, 0, 0, 0];
        let mut dst = [0xAAu8; 3];
        let n = reduce_range(&src, 3, 6, &mut dst, 3, RangeCombine::Peak, Packing::Raw8, 1, false);
        assert_eq!(n, 2);
        assert_eq!(dst, [20, 30, 0]);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Subsample".parse::<AzimuthCombine>(), Ok(AzimuthCombine::NoCombine));
        assert_eq!("Peak".parse::<RangeCombine>(), Ok(RangeCombine::Peak));
        assert_eq!(AzimuthCombine::from_u8(5), Some(AzimuthCombine::Smooth));
        assert_eq!(RangeCombine::from_u8(0), None);
    }
}
