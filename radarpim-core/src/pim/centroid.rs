//! Video centroid of a polar region

use super::Pim;
use crate::error::PimError;
use crate::header::DataFlags;
use crate::packing::read_sample;

/// Amplitude-weighted centre of the video in a region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    /// Samples, or metres for [`Pim::video_centroid_metres`]
    pub range: f64,
    /// Buckets, or degrees for [`Pim::video_centroid_metres`]
    pub azimuth: f64,
    /// Peak channel A value in the region
    pub strength: u16,
    /// Fraction of samples in the region holding video
    pub density: f64,
}

impl Pim {
    /// Centroid of buckets `start_azimuth..=end_azimuth` (wrapping through
    /// north when start > end) and samples `start_range..=end_range`.
    /// Returns `Ok(None)` when the region holds no video or its density is
    /// below `min_density`.
    pub fn video_centroid(
        &self,
        start_range: u32,
        start_azimuth: u32,
        end_range: u32,
        end_azimuth: u32,
        min_density: f64,
    ) -> Result<Option<Centroid>, PimError> {
        let state = self.lock_state();
        let dim = state.store.azimuth_dim() as u32;
        for azimuth in [start_azimuth, end_azimuth] {
            if azimuth >= dim {
                return Err(PimError::AzimuthOutOfRange { azimuth, dim });
            }
        }
        if start_range > end_range || end_range as usize >= self.range_dim {
            return Err(PimError::invalid("range", format!("{}..={}", start_range, end_range)));
        }

        let span = (end_azimuth + dim - start_azimuth) % dim + 1;
        let samples_per_bucket = (end_range - start_range + 1) as u64;
        let mut total = 0u64;
        let mut populated = 0u64;
        let mut sum = 0f64;
        let mut sum_range = 0f64;
        let mut sum_azimuth = 0f64;
        let mut strength = 0u16;

        for k in 0..span {
            let bucket = (start_azimuth + k) % dim;
            total += samples_per_bucket;
            let Some(cell) = state.store.cell(bucket as usize).filter(|c| !c.is_empty()) else {
                continue;
            };
            let header = &cell.header;
            let Some(packing) = header.packing() else {
                continue;
            };
            let channel = &packing.analogue_channels()[0];
            let bps = packing.bytes_per_sample().max(1);
            let big_endian = header.data_flags.contains(DataFlags::BIG_ENDIAN);
            let valid = (header.this_length as u32).min(end_range + 1);
            for r in start_range..valid {
                let value = channel.get(read_sample(&cell.data, r as usize, bps, big_endian));
                if value == 0 {
                    continue;
                }
                populated += 1;
                strength = strength.max(value);
                let w = value as f64;
                sum += w;
                sum_range += w * r as f64;
                sum_azimuth += w * k as f64;
            }
        }

        if populated == 0 {
            return Ok(None);
        }
        let density = populated as f64 / total as f64;
        if density < min_density {
            return Ok(None);
        }
        Ok(Some(Centroid {
            range: sum_range / sum,
            azimuth: (start_azimuth as f64 + sum_azimuth / sum) % dim as f64,
            strength,
            density,
        }))
    }

    /// [`Pim::video_centroid`] for a region given in metres and degrees,
    /// using the range scale of the last stored return
    pub fn video_centroid_metres(
        &self,
        start_metres: f64,
        start_degrees: f64,
        end_metres: f64,
        end_degrees: f64,
        min_density: f64,
    ) -> Result<Option<Centroid>, PimError> {
        let header = self
            .last_return_header()
            .ok_or(PimError::NoData { azimuth: 0 })?;
        let length = header.nominal_length.max(1) as f64;
        let start = header.start_range as f64;
        let metres_per_sample = (header.end_range as f64 - start) / length;
        if metres_per_sample <= 0.0 {
            return Err(PimError::invalid("endRange", header.end_range));
        }
        let dim = self.azimuth_dim() as f64;
        let max_sample = (self.range_dim - 1) as f64;

        let to_sample = |m: f64| ((m - start) / metres_per_sample).floor().clamp(0.0, max_sample) as u32;
        let to_bucket = |d: f64| ((d.rem_euclid(360.0) * dim / 360.0) as u32).min(dim as u32 - 1);

        let centroid = self.video_centroid(
            to_sample(start_metres),
            to_bucket(start_degrees),
            to_sample(end_metres),
            to_bucket(end_degrees),
            min_density,
        )?;
        Ok(centroid.map(|c| Centroid {
            range: start + (c.range + 0.5) * metres_per_sample,
            azimuth: (c.azimuth + 0.5) * 360.0 / dim,
            ..c
        }))
    }
}
