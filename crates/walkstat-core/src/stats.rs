//! Per-walk statistics aggregation.
//!
//! A [`StatsAggregator`] lives for exactly one walk and is owned by it. It
//! receives one [`FileObservation`] per non-excluded object and keeps the
//! per-prefix totals, size histogram and extension / content-type breakdowns.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::histogram::HistogramBinner;

/// One observed object, after prefix resolution and filtering.
#[derive(Debug, Clone, Copy)]
pub struct FileObservation<'a> {
    pub prefix: &'a str,
    pub size: u64,
    /// Segment count of the object path below its root.
    pub depth: usize,
    /// Extension with its dot, or `""`.
    pub extension: &'a str,
    /// Content type, or `""` when unknown.
    pub content_type: &'a str,
    /// Backend labels for this object, e.g. `bucket` and `storageClass`.
    pub labels: &'a [(&'a str, &'a str)],
}

/// Aggregates for one prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefixStats {
    pub total_size: u64,
    pub file_count: u64,
    /// Object count per histogram bucket.
    pub size_histogram: Vec<u64>,
    pub ext_counts: BTreeMap<String, u64>,
    pub ext_sizes: BTreeMap<String, u64>,
    pub content_type_counts: BTreeMap<String, u64>,
    pub content_type_sizes: BTreeMap<String, u64>,
}

impl PrefixStats {
    fn new(buckets: usize) -> Self {
        Self {
            size_histogram: vec![0; buckets],
            ..Default::default()
        }
    }
}

/// Mutable accumulator keyed by prefix.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    binner: HistogramBinner,
    prefixes: BTreeMap<String, PrefixStats>,
    max_depth_seen: usize,
    total_size: u64,
    total_count: u64,
}

impl StatsAggregator {
    pub fn new(binner: HistogramBinner) -> Self {
        Self {
            binner,
            prefixes: BTreeMap::new(),
            max_depth_seen: 0,
            total_size: 0,
            total_count: 0,
        }
    }

    /// Records one object. Never fails.
    pub fn process_file(&mut self, file: &FileObservation<'_>) {
        self.max_depth_seen = self.max_depth_seen.max(file.depth);
        self.total_size = self.total_size.saturating_add(file.size);
        self.total_count += 1;

        let buckets = self.binner.bucket_count();
        let bucket = self.binner.bucket_index(file.size);
        let stats = self
            .prefixes
            .entry(file.prefix.to_string())
            .or_insert_with(|| PrefixStats::new(buckets));

        stats.total_size = stats.total_size.saturating_add(file.size);
        stats.file_count += 1;
        stats.size_histogram[bucket] += 1;

        add(&mut stats.ext_counts, file.extension, 1);
        add(&mut stats.ext_sizes, file.extension, file.size);
        add(&mut stats.content_type_counts, file.content_type, 1);
        add(&mut stats.content_type_sizes, file.content_type, file.size);
    }

    pub fn prefix(&self, prefix: &str) -> Option<&PrefixStats> {
        self.prefixes.get(prefix)
    }

    /// All prefixes in lexical order.
    pub fn prefixes(&self) -> impl Iterator<Item = (&str, &PrefixStats)> {
        self.prefixes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    pub fn max_depth_seen(&self) -> usize {
        self.max_depth_seen
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }
}

fn add(map: &mut BTreeMap<String, u64>, key: &str, value: u64) {
    match map.get_mut(key) {
        Some(v) => *v = v.saturating_add(value),
        None => {
            map.insert(key.to_string(), value);
        }
    }
}
