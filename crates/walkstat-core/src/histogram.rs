//! Size histogram buckets.
//!
//! Bucket `i` (for `i < N - 1`) has the inclusive upper bound
//! `start * factor^i`; the last bucket is unbounded. The same bounds label
//! the buckets, assign sizes to them and feed the exported histogram, whose
//! `le` buckets are inclusive as well.

use crate::config::{ConfigError, HistogramConfig};
use crate::fmt::format_bytes;

/// One histogram bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBucket {
    /// Display label, e.g. `"<=2.0K"` or `">3.9K"`.
    pub label: String,
    /// Inclusive upper bound in bytes; `None` for the last bucket.
    pub upper_bound: Option<f64>,
}

/// Maps sizes to buckets.
#[derive(Debug, Clone)]
pub struct HistogramBinner {
    bounds: Vec<f64>,
    buckets: Vec<HistogramBucket>,
}

impl HistogramBinner {
    /// Builds `count` buckets. Requires `start > 0`, `factor > 1`,
    /// `count >= 2` and a finite largest bound.
    pub fn new(start: f64, factor: f64, count: usize) -> Result<Self, ConfigError> {
        if !start.is_finite() || start <= 0.0 {
            return Err(ConfigError::InvalidHistogram(format!(
                "start must be a positive number of bytes, got {}",
                start
            )));
        }
        if !factor.is_finite() || factor <= 1.0 {
            return Err(ConfigError::InvalidHistogram(format!(
                "factor must be greater than 1, got {}",
                factor
            )));
        }
        if count < 2 {
            return Err(ConfigError::InvalidHistogram(format!(
                "at least 2 buckets are required, got {}",
                count
            )));
        }

        let mut bounds = Vec::with_capacity(count - 1);
        let mut bound = start;
        for _ in 0..count - 1 {
            bounds.push(bound);
            bound *= factor;
        }
        if bounds.last().is_some_and(|b| !b.is_finite()) {
            return Err(ConfigError::InvalidHistogram(format!(
                "{} buckets overflow with start {} and factor {}",
                count, start, factor
            )));
        }

        let mut buckets: Vec<HistogramBucket> = bounds
            .iter()
            .map(|&b| HistogramBucket {
                label: format!("<={}", format_bytes(b.round() as u64)),
                upper_bound: Some(b),
            })
            .collect();
        let last = bounds[bounds.len() - 1];
        buckets.push(HistogramBucket {
            label: format!(">{}", format_bytes(last.round() as u64)),
            upper_bound: None,
        });

        Ok(Self { bounds, buckets })
    }

    pub fn from_config(config: &HistogramConfig) -> Result<Self, ConfigError> {
        Self::new(config.start, config.factor, config.buckets)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> &[HistogramBucket] {
        &self.buckets
    }

    /// Finite upper bounds, in order. The exported histogram adds `+Inf`.
    pub fn upper_bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Index of the bucket holding `size`: the first bucket whose bound is
    /// at least `size`, or the last bucket.
    pub fn bucket_index(&self, size: u64) -> usize {
        let size = size as f64;
        self.bounds
            .iter()
            .position(|&bound| size <= bound)
            .unwrap_or(self.bounds.len())
    }
}
