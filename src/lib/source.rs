//! Synthetic rotating radar
//!
//! Produces returns the way a real antenna would: one return per trigger,
//! azimuth stepping round the scan, each stamped with a return count and
//! the interval since the previous trigger.

use std::sync::Arc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use radarpim_core::header::{degrees_to_azimuth, DataFlags, ReturnHeader, SourceType, MAX_VIDEO_SIZE};
use radarpim_core::packing::write_sample;
use radarpim_core::{Packing, PimError, Return};

use crate::rib::{Rib, RibError, WriteFlags};

/// A blob of video at a fixed position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpot {
    pub azimuth_degrees: f64,
    pub width_degrees: f64,
    /// First sample of the target
    pub range_sample: u16,
    pub length_samples: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestPatternConfig {
    pub azimuths_per_scan: u32,
    pub samples: u16,
    /// Triggers per second
    pub prf: f64,
    pub packing: Packing,
    /// Draw a range ring every this many samples, 0 for none
    pub ring_spacing: u16,
    pub target: Option<TargetSpot>,
    pub start_range: f32,
    pub end_range: f32,
    pub source_code: u8,
    pub anticlockwise: bool,
}

impl Default for TestPatternConfig {
    fn default() -> Self {
        TestPatternConfig {
            azimuths_per_scan: 2048,
            samples: 512,
            prf: 1000.0,
            packing: Packing::Raw8,
            ring_spacing: 64,
            target: Some(TargetSpot {
                azimuth_degrees: 45.0,
                width_degrees: 3.0,
                range_sample: 200,
                length_samples: 8,
            }),
            start_range: 0.0,
            end_range: 1852.0,
            source_code: 0,
            anticlockwise: false,
        }
    }
}

impl TestPatternConfig {
    fn validate(&self) -> Result<(), PimError> {
        if self.azimuths_per_scan == 0 || self.azimuths_per_scan > 65536 {
            return Err(PimError::invalid("azimuthsPerScan", self.azimuths_per_scan));
        }
        if self.samples == 0 {
            return Err(PimError::invalid("samples", self.samples));
        }
        if self.prf.is_nan() || self.prf <= 0.0 {
            return Err(PimError::invalid("prf", self.prf));
        }
        if !self.packing.is_storable() {
            return Err(PimError::invalid("packing", self.packing));
        }
        if self.packing.num_bytes(self.samples as usize) > MAX_VIDEO_SIZE {
            return Err(PimError::invalid("samples", self.samples));
        }
        if self.end_range <= self.start_range {
            return Err(PimError::invalid("endRange", self.end_range));
        }
        Ok(())
    }
}

pub struct TestPatternSource {
    config: TestPatternConfig,
    rib: Arc<Rib>,
    count: u16,
    index: u64,
    written: u64,
    dropped: u64,
}

impl TestPatternSource {
    pub fn new(config: TestPatternConfig, rib: Arc<Rib>) -> Result<Self, RibError> {
        config.validate()?;
        debug!(
            "test pattern: {} azimuths of {} samples at {} Hz",
            config.azimuths_per_scan, config.samples, config.prf
        );
        Ok(TestPatternSource {
            config,
            rib,
            count: 0,
            index: 0,
            written: 0,
            dropped: 0,
        })
    }

    pub fn config(&self) -> &TestPatternConfig {
        &self.config
    }

    /// Returns written to the buffer
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns lost because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn azimuth_degrees(&self, index: u64) -> f64 {
        let n = self.config.azimuths_per_scan as u64;
        let degrees = (index % n) as f64 * 360.0 / n as f64;
        if self.config.anticlockwise { 360.0 - degrees } else { degrees }
    }

    fn in_target(&self, degrees: f64, sample: u16) -> bool {
        let Some(t) = &self.config.target else {
            return false;
        };
        let off = (degrees - t.azimuth_degrees + 180.0).rem_euclid(360.0) - 180.0;
        off.abs() <= t.width_degrees / 2.0
            && sample >= t.range_sample
            && sample < t.range_sample.saturating_add(t.length_samples)
    }

    /// Build the next return without writing it
    pub fn next_return(&mut self) -> Return {
        let degrees = self.azimuth_degrees(self.index);
        let packing = self.config.packing;
        let bps = packing.bytes_per_sample();
        let channel = packing.analogue_channels()[0];
        let full = channel.put(channel.max_value());
        let mut data = vec![0u8; packing.num_bytes(self.config.samples as usize)];

        for s in 0..self.config.samples {
            let ring = self.config.ring_spacing > 0 && s > 0 && s % self.config.ring_spacing == 0;
            if ring || self.in_target(degrees, s) {
                write_sample(&mut data, s as usize, bps, false, full);
            }
        }

        let mut data_flags = DataFlags::empty();
        if self.config.anticlockwise {
            data_flags |= DataFlags::ANTI_CLOCKWISE;
        }
        let header = ReturnHeader {
            source_type: SourceType::Test as u8,
            source_code: self.config.source_code,
            count: self.count,
            nominal_length: self.config.samples,
            this_length: self.config.samples,
            azimuth: degrees_to_azimuth(degrees),
            packing: packing.as_u8(),
            time_interval: (1_000_000.0 / self.config.prf).round().min(u16::MAX as f64) as u16,
            data_flags,
            start_range: self.config.start_range,
            end_range: self.config.end_range,
            ..Default::default()
        };
        self.count = self.count.wrapping_add(1);
        self.index += 1;
        Return::new(header, data)
    }

    /// Write the next return. A full buffer drops it, as a live source would.
    pub fn write_next(&mut self) -> Result<(), RibError> {
        let ret = self.next_return();
        match self.rib.write(&ret.header, &ret.data, WriteFlags::empty()) {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(e @ RibError::InsufficientSpace { .. }) => {
                self.dropped += 1;
                trace!("test pattern: return {} dropped", ret.header.count);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Write one full scan, returns how many returns made it into the buffer
    pub fn write_scan(&mut self) -> Result<u32, RibError> {
        let mut ok = 0;
        for _ in 0..self.config.azimuths_per_scan {
            match self.write_next() {
                Ok(()) => ok += 1,
                Err(RibError::InsufficientSpace { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ok)
    }
}
