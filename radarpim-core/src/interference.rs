//! Interference suppression
//!
//! Interference from another radar shows up as a spike on a single return,
//! while real echoes persist from one return to the next. Limiting every
//! sample to the minimum of itself and the same sample in the previous
//! `level` returns removes the spikes.

use std::collections::VecDeque;

use crate::combine::{combine_sample, CombineOp};
use crate::packing::{read_sample, write_sample, Packing};

/// Highest supported suppression level
pub const MAX_INTERFERENCE_LEVEL: u8 = 3;

#[derive(Debug, Default, Clone)]
pub struct InterferenceFilter {
    /// Unfiltered recent returns, newest first
    history: VecDeque<Vec<u8>>,
}

impl InterferenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Filter `num_samples` samples in place at the given level and remember
    /// the unfiltered input for the next return. Level 0 passes the samples
    /// through and drops the history.
    pub fn apply(
        &mut self,
        level: u8,
        samples: &mut [u8],
        num_samples: usize,
        bps: usize,
        packing: Packing,
        big_endian: bool,
    ) {
        let level = level.min(MAX_INTERFERENCE_LEVEL) as usize;
        if level == 0 {
            self.history.clear();
            return;
        }
        let raw = samples[..num_samples * bps].to_vec();
        let previous: Vec<&Vec<u8>> = self.history.iter().take(level).collect();
        let limit = previous
            .iter()
            .map(|h| h.len() / bps)
            .min()
            .unwrap_or(0)
            .min(num_samples);
        for i in 0..limit {
            let mut value = read_sample(samples, i, bps, big_endian);
            for h in &previous {
                let old = read_sample(h, i, bps, big_endian);
                value = combine_sample(CombineOp::Min, packing, value, old);
            }
            write_sample(samples, i, bps, big_endian, value);
        }
        self.history.push_front(raw);
        self.history.truncate(MAX_INTERFERENCE_LEVEL as usize);
    }
}
