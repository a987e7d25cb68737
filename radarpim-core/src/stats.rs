//! PRF and rotation period estimation
//!
//! The estimator runs on the update path under the PIM data lock; the values
//! it publishes live in [`Statistics`] and can be read from any thread
//! without locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use atomic_float::AtomicF64;

use crate::header::{DataFlags, ReturnHeader};

/// Returns per average PRF window
pub const PRF_AVERAGE_WINDOW: u32 = 100;

/// Weight of the newest period in the running average
const PERIOD_SMOOTHING: f64 = 0.1;

/// Published statistics of one PIM
#[derive(Debug)]
pub struct Statistics {
    prf: AtomicF64,
    average_prf: AtomicF64,
    average_period: AtomicF64,
    reset_prf: AtomicBool,
    reset_period: AtomicBool,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            prf: AtomicF64::new(0.0),
            average_prf: AtomicF64::new(0.0),
            average_period: AtomicF64::new(0.0),
            reset_prf: AtomicBool::new(false),
            reset_period: AtomicBool::new(false),
        }
    }
}

impl Statistics {
    /// PRF in Hz from the latest return interval
    pub fn prf(&self) -> f64 {
        self.prf.load(Ordering::Relaxed)
    }

    /// PRF in Hz averaged over the last complete window, 0 until one completes
    pub fn average_prf(&self) -> f64 {
        self.average_prf.load(Ordering::Relaxed)
    }

    /// Rotation period in seconds, 0 until one full scan has been timed
    pub fn average_period(&self) -> f64 {
        self.average_period.load(Ordering::Relaxed)
    }

    /// Forget the PRF average; a fresh window has to complete
    pub fn reset_average_prf(&self) {
        self.average_prf.store(0.0, Ordering::Relaxed);
        self.reset_prf.store(true, Ordering::Release);
    }

    pub fn reset_average_period(&self) {
        self.average_period.store(0.0, Ordering::Relaxed);
        self.reset_period.store(true, Ordering::Release);
    }

    fn reset_all(&self) {
        self.prf.store(0.0, Ordering::Relaxed);
        self.reset_average_prf();
        self.reset_average_period();
    }
}

/// Running state behind [`Statistics`]
#[derive(Debug, Default)]
pub struct StatsEstimator {
    window_sum_us: u64,
    window_count: u32,
    last_azimuth: Option<u16>,
    last_time: Option<Instant>,
    /// Microseconds since the last north crossing, `None` before the first
    scan_time_us: Option<f64>,
}

impl StatsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start again after a discontinuity in the source
    pub fn reset(&mut self, stats: &Statistics) {
        *self = Self::default();
        stats.reset_all();
    }

    /// Account for one input return
    pub fn update(&mut self, stats: &Statistics, header: &ReturnHeader, now: Instant) {
        if stats.reset_prf.swap(false, Ordering::Acquire) {
            self.window_sum_us = 0;
            self.window_count = 0;
        }
        if stats.reset_period.swap(false, Ordering::Acquire) {
            self.scan_time_us = None;
        }

        let interval_us = if header.time_interval > 0 {
            header.time_interval as f64
        } else {
            self.last_time
                .map(|t| now.saturating_duration_since(t).as_secs_f64() * 1e6)
                .unwrap_or(0.0)
        };
        self.last_time = Some(now);

        if header.time_interval > 0 {
            stats
                .prf
                .store(1e6 / header.time_interval as f64, Ordering::Relaxed);
            self.window_sum_us += header.time_interval as u64;
            self.window_count += 1;
            if self.window_count >= PRF_AVERAGE_WINDOW {
                let average = 1e6 * self.window_count as f64 / self.window_sum_us as f64;
                stats.average_prf.store(average, Ordering::Relaxed);
                self.window_sum_us = 0;
                self.window_count = 0;
            }
        }

        if let Some(t) = self.scan_time_us.as_mut() {
            *t += interval_us;
        }
        let anticlockwise = header
            .data_flags
            .contains(DataFlags::ANTI_CLOCKWISE);
        if let Some(previous) = self.last_azimuth {
            if crossed_north(previous, header.azimuth, anticlockwise) {
                if let Some(scan_us) = self.scan_time_us {
                    let period = scan_us / 1e6;
                    let average = stats.average_period();
                    let average = if average > 0.0 {
                        average * (1.0 - PERIOD_SMOOTHING) + period * PERIOD_SMOOTHING
                    } else {
                        period
                    };
                    stats.average_period.store(average, Ordering::Relaxed);
                }
                self.scan_time_us = Some(0.0);
            }
        }
        self.last_azimuth = Some(header.azimuth);
    }
}

/// True if going from `previous` to `current` passed through zero degrees
pub fn crossed_north(previous: u16, current: u16, anticlockwise: bool) -> bool {
    let step = if anticlockwise {
        current as i32 - previous as i32
    } else {
        previous as i32 - current as i32
    };
    step > 32768
}
