//! Storage backends driving the aggregation pipeline.
//!
//! A [`Backend`] knows how to enumerate one kind of storage. The shared
//! [`AggregationPipeline`] does everything else: single-flight guarding,
//! prefix resolution, filtering, aggregation and metric publication.

mod fs_walker;
mod pipeline;
mod s3_walker;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::MetricSnapshot;
use crate::source::StoreError;
use crate::stats::PrefixStats;

pub use fs_walker::FsWalker;
pub use pipeline::{AggregationPipeline, ObservedFile, WalkSession};
pub use s3_walker::S3Walker;

/// A storage-specific traversal.
pub trait Backend: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Runs one walk.
    ///
    /// Returns [`WalkStatus::Skipped`] without touching any state when a
    /// walk is already in progress.
    fn walk(&self) -> Result<WalkStatus, WalkError>;

    /// Metrics published by this backend.
    fn snapshot(&self) -> &Arc<MetricSnapshot>;
}

/// Outcome of a successful [`Backend::walk`] call.
#[derive(Debug, Clone)]
pub enum WalkStatus {
    Completed(WalkReport),
    /// Another walk was running; nothing was done.
    Skipped,
}

/// Summary of a completed walk.
#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_objects: u64,
    pub total_size: u64,
    pub max_depth: usize,
    pub prefix_count: usize,
    /// Entries that could not be read and were skipped.
    pub unreadable_entries: u64,
    /// Objects whose prefix matched an exclusion pattern.
    pub excluded_objects: u64,
    /// Buckets whose listing failed, fully or part way.
    pub failed_containers: u64,
    #[serde(skip)]
    pub prefixes: BTreeMap<String, PrefixStats>,
}

/// Walk-level failure. The walk is discarded; the previous generation stays
/// published.
#[derive(Debug)]
pub enum WalkError {
    /// The traversal root is missing or not a directory.
    RootUnavailable { path: PathBuf, reason: String },
    /// Buckets could not be enumerated.
    ListBuckets(StoreError),
    /// The walk ran past its configured timeout.
    TimedOut { elapsed: Duration },
}

impl std::fmt::Display for WalkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalkError::RootUnavailable { path, reason } => {
                write!(f, "root {} unavailable: {}", path.display(), reason)
            }
            WalkError::ListBuckets(e) => write!(f, "bucket enumeration failed: {}", e),
            WalkError::TimedOut { elapsed } => {
                write!(f, "walk timed out after {}", crate::fmt::format_duration(*elapsed))
            }
        }
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WalkError::ListBuckets(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for WalkError {
    fn from(e: StoreError) -> Self {
        WalkError::ListBuckets(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_error_display() {
        let err = WalkError::RootUnavailable {
            path: PathBuf::from("/data"),
            reason: "not a directory".into(),
        };
        assert_eq!(err.to_string(), "root /data unavailable: not a directory");

        let err: WalkError = StoreError::TimedOut("ListBuckets").into();
        assert_eq!(
            err.to_string(),
            "bucket enumeration failed: ListBuckets timed out"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
