// adc-perf/src/stats.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Simple statistics for evaluating ADC performance.

use std::fmt;

/// Noise statistics for the samples of a single channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    /// The arithmetic mean
    pub mean: f64,
    /// The population standard deviation
    pub std: f64,
    /// The peak-to-peak range (max - min)
    pub ptp: u32,
}

impl ChannelStats {
    /// Computes the statistics for a set of samples.
    /// Returns `None` if there are no samples.
    pub fn from_samples(samples: &[u32]) -> Option<Self> {
        let min = *samples.iter().min()?;
        let max = *samples.iter().max()?;

        let n = samples.len() as f64;
        let mean = samples.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
        let var = samples
            .iter()
            .map(|&x| {
                let d = f64::from(x) - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        Some(Self {
            mean,
            std: var.sqrt(),
            ptp: max - min,
        })
    }
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.mean, self.std, self.ptp)
    }
}

// --------------------------------------------------------------------------
