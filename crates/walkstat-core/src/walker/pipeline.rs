//! Backend-independent part of a walk.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, trace};

use super::{WalkError, WalkReport, WalkStatus};
use crate::config::{ConfigError, WalkerConfig};
use crate::filter::Filter;
use crate::fmt::{format_bytes, format_duration};
use crate::histogram::HistogramBinner;
use crate::metrics::{MetricSchema, MetricSnapshot, WalkResult};
use crate::prefix;
use crate::stats::{FileObservation, StatsAggregator};

/// Prefix resolution, filtering, aggregation and publication shared by all
/// backends.
pub struct AggregationPipeline {
    max_depth: usize,
    filter: Filter,
    binner: HistogramBinner,
    snapshot: Arc<MetricSnapshot>,
    guess_content_type: bool,
    walk_timeout: Option<Duration>,
    in_progress: AtomicBool,
}

/// Clears the in-progress flag when dropped, panics included.
struct WalkGuard<'a>(&'a AtomicBool);

impl<'a> WalkGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for WalkGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AggregationPipeline {
    /// Validates the walker settings and builds the metric schema.
    ///
    /// `backend_labels` are attached to every series and override custom
    /// labels; `dynamic_labels` are filled per object by the backend.
    pub fn new(
        config: &WalkerConfig,
        backend_labels: &[(&str, &str)],
        dynamic_labels: &[&str],
    ) -> Result<Self, ConfigError> {
        let binner = HistogramBinner::from_config(&config.histogram)?;
        let filter = Filter::new(&config.prefix_filters)?;
        let schema =
            MetricSchema::new(&config.custom_labels, backend_labels, dynamic_labels, &binner)?;

        debug!(
            max_depth = config.max_depth,
            buckets = binner.bucket_count(),
            filters = filter.len(),
            "aggregation pipeline ready"
        );

        Ok(Self {
            max_depth: config.max_depth,
            filter,
            binner,
            snapshot: Arc::new(MetricSnapshot::new(schema)?),
            guess_content_type: config.guess_content_type,
            walk_timeout: config.walk_timeout,
            in_progress: AtomicBool::new(false),
        })
    }

    pub fn snapshot(&self) -> &Arc<MetricSnapshot> {
        &self.snapshot
    }

    pub fn is_walking(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Runs one walk with `traverse` feeding objects into the session.
    ///
    /// An overlapping call returns [`WalkStatus::Skipped`] at once. On error
    /// the pending generation is discarded. The in-progress flag is always
    /// cleared on return.
    pub fn run<F>(&self, backend: &'static str, traverse: F) -> Result<WalkStatus, WalkError>
    where
        F: FnOnce(&mut WalkSession<'_>) -> Result<(), WalkError>,
    {
        let Some(_guard) = WalkGuard::acquire(&self.in_progress) else {
            debug!(backend, "walk already in progress, skipping");
            self.snapshot.record_walk(WalkResult::Skipped);
            return Ok(WalkStatus::Skipped);
        };

        let started_at = Utc::now();
        info!(backend, "walk started");
        self.snapshot.start_processing();

        let mut session = WalkSession {
            pipeline: self,
            aggregator: StatsAggregator::new(self.binner.clone()),
            started: Instant::now(),
            unreadable_entries: 0,
            excluded_objects: 0,
            failed_containers: 0,
        };

        if let Err(e) = traverse(&mut session) {
            self.snapshot.abort_processing();
            self.snapshot.record_walk(WalkResult::Failed);
            return Err(e);
        }

        let duration = self
            .snapshot
            .end_processing()
            .unwrap_or_else(|| session.started.elapsed());
        self.snapshot.record_walk(WalkResult::Completed);

        let report = session.into_report(started_at, duration);
        info!(
            backend,
            objects = report.total_objects,
            size = %format_bytes(report.total_size),
            prefixes = report.prefix_count,
            max_depth = report.max_depth,
            excluded = report.excluded_objects,
            unreadable = report.unreadable_entries,
            failed_containers = report.failed_containers,
            duration = %format_duration(duration),
            "walk completed"
        );
        Ok(WalkStatus::Completed(report))
    }
}

/// One object as found by a backend, before prefix resolution.
#[derive(Debug, Clone, Copy)]
pub struct ObservedFile<'a> {
    /// Traversal root the path is relative to; `""` for object keys.
    pub root: &'a str,
    pub path: &'a str,
    pub size: u64,
    /// Content type reported by the backend, if any.
    pub content_type: Option<&'a str>,
    pub labels: &'a [(&'a str, &'a str)],
}

/// State of one running walk.
pub struct WalkSession<'p> {
    pipeline: &'p AggregationPipeline,
    aggregator: StatsAggregator,
    started: Instant,
    unreadable_entries: u64,
    excluded_objects: u64,
    failed_containers: u64,
}

impl WalkSession<'_> {
    /// Resolves, filters and records one object.
    pub fn observe(&mut self, file: &ObservedFile<'_>) {
        let resolved = prefix::resolve(file.root, file.path, self.pipeline.max_depth);
        if self.pipeline.filter.is_excluded(&resolved.prefix) {
            debug!(prefix = %resolved.prefix, path = file.path, "object excluded");
            self.excluded_objects += 1;
            return;
        }

        let content_type = file
            .content_type
            .or_else(|| {
                if self.pipeline.guess_content_type {
                    mime_guess::from_path(file.path).first_raw()
                } else {
                    None
                }
            })
            .unwrap_or("");

        trace!(
            prefix = %resolved.prefix,
            path = file.path,
            size = file.size,
            depth = resolved.depth,
            "object"
        );

        let observation = FileObservation {
            prefix: &resolved.prefix,
            size: file.size,
            depth: resolved.depth,
            extension: prefix::extension(file.path),
            content_type,
            labels: file.labels,
        };
        self.aggregator.process_file(&observation);
        self.pipeline.snapshot.process_file(&observation);
    }

    /// Fails once the walk has run for its configured timeout.
    pub fn check_deadline(&self) -> Result<(), WalkError> {
        match self.pipeline.walk_timeout {
            Some(limit) if self.started.elapsed() >= limit => Err(WalkError::TimedOut {
                elapsed: self.started.elapsed(),
            }),
            _ => Ok(()),
        }
    }

    pub fn record_unreadable(&mut self) {
        self.unreadable_entries += 1;
    }

    pub fn record_failed_container(&mut self) {
        self.failed_containers += 1;
    }

    fn into_report(self, started_at: chrono::DateTime<Utc>, duration: Duration) -> WalkReport {
        let aggregator = self.aggregator;
        WalkReport {
            started_at,
            duration_ms: duration.as_millis() as u64,
            total_objects: aggregator.total_count(),
            total_size: aggregator.total_size(),
            max_depth: aggregator.max_depth_seen(),
            prefix_count: aggregator.prefix_count(),
            unreadable_entries: self.unreadable_entries,
            excluded_objects: self.excluded_objects,
            failed_containers: self.failed_containers,
            prefixes: aggregator
                .prefixes()
                .map(|(prefix, stats)| (prefix.to_string(), stats.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sample;

    fn build(config: WalkerConfig) -> AggregationPipeline {
        AggregationPipeline::new(&config, &[("type", "test")], &[]).unwrap()
    }

    fn file(path: &str, size: u64) -> ObservedFile<'_> {
        ObservedFile {
            root: "/data",
            path,
            size,
            content_type: None,
            labels: &[],
        }
    }

    fn completed(status: WalkStatus) -> WalkReport {
        match status {
            WalkStatus::Completed(report) => report,
            WalkStatus::Skipped => panic!("walk was skipped"),
        }
    }

    #[test]
    fn rejects_invalid_settings() {
        let config = WalkerConfig {
            prefix_filters: vec!["(".into()],
            ..Default::default()
        };
        assert!(matches!(
            AggregationPipeline::new(&config, &[], &[]),
            Err(ConfigError::InvalidPattern { .. })
        ));

        let mut config = WalkerConfig::default();
        config.histogram.factor = 1.0;
        assert!(matches!(
            AggregationPipeline::new(&config, &[], &[]),
            Err(ConfigError::InvalidHistogram(_))
        ));
    }

    #[test]
    fn nested_run_is_skipped() {
        let pipeline = build(WalkerConfig::default());
        let report = completed(
            pipeline
                .run("test", |session| {
                    session.observe(&file("/data/a.txt", 10));
                    let inner = pipeline.run("test", |session| {
                        session.observe(&file("/data/b.txt", 99));
                        Ok(())
                    });
                    assert!(matches!(inner, Ok(WalkStatus::Skipped)));
                    Ok(())
                })
                .unwrap(),
        );

        assert_eq!(report.total_objects, 1);
        assert_eq!(report.total_size, 10);
        assert!(!pipeline.is_walking());

        let text = pipeline.snapshot().encode_text().unwrap();
        assert_eq!(sample(&text, "file_walker_walks_total", &[("result", "skipped")]), Some(1.0));
        assert_eq!(sample(&text, "file_walker_total_objects_size", &[]), Some(10.0));
    }

    #[test]
    fn failed_run_releases_guard_and_keeps_generation() {
        let pipeline = build(WalkerConfig::default());
        pipeline
            .run("test", |session| {
                session.observe(&file("/data/a.txt", 10));
                Ok(())
            })
            .unwrap();

        let err = pipeline.run("test", |session| {
            session.observe(&file("/data/a.txt", 500));
            Err(WalkError::RootUnavailable {
                path: "/data".into(),
                reason: "gone".into(),
            })
        });
        assert!(err.is_err());
        assert!(!pipeline.is_walking());

        let text = pipeline.snapshot().encode_text().unwrap();
        assert_eq!(sample(&text, "file_walker_total_objects_size", &[]), Some(10.0));
        assert_eq!(sample(&text, "file_walker_walks_total", &[("result", "failed")]), Some(1.0));
    }

    #[test]
    fn excluded_prefixes_do_not_contribute() {
        let pipeline = build(WalkerConfig {
            prefix_filters: vec!["^tmp".into()],
            ..Default::default()
        });
        let report = completed(
            pipeline
                .run("test", |session| {
                    session.observe(&file("/data/tmp/cache/x.bin", 1000));
                    session.observe(&file("/data/keep/y.bin", 7));
                    Ok(())
                })
                .unwrap(),
        );

        assert_eq!(report.total_objects, 1);
        assert_eq!(report.total_size, 7);
        assert_eq!(report.excluded_objects, 1);
        assert!(!report.prefixes.contains_key("tmp/cache"));

        let text = pipeline.snapshot().encode_text().unwrap();
        assert_eq!(sample(&text, "file_walker_objects_size", &[("prefix", "tmp/cache")]), None);
        assert_eq!(sample(&text, "file_walker_objects_size", &[("prefix", "keep")]), Some(7.0));
    }

    #[test]
    fn content_type_is_guessed_only_when_enabled_and_missing() {
        let pipeline = build(WalkerConfig {
            guess_content_type: true,
            ..Default::default()
        });
        let report = completed(
            pipeline
                .run("test", |session| {
                    session.observe(&file("/data/a.txt", 1));
                    session.observe(&ObservedFile {
                        content_type: Some("application/x-custom"),
                        ..file("/data/b.txt", 2)
                    });
                    session.observe(&file("/data/noext", 3));
                    Ok(())
                })
                .unwrap(),
        );

        let root = &report.prefixes["ROOT"];
        assert_eq!(root.content_type_counts.get("text/plain"), Some(&1));
        assert_eq!(root.content_type_counts.get("application/x-custom"), Some(&1));
        assert_eq!(root.content_type_counts.get(""), Some(&1));

        let plain = build(WalkerConfig::default());
        let report = completed(
            plain
                .run("test", |session| {
                    session.observe(&file("/data/a.txt", 1));
                    Ok(())
                })
                .unwrap(),
        );
        assert_eq!(report.prefixes["ROOT"].content_type_counts.get(""), Some(&1));
    }

    #[test]
    fn zero_timeout_fails_at_first_check() {
        let pipeline = build(WalkerConfig {
            walk_timeout: Some(Duration::ZERO),
            ..Default::default()
        });
        let result = pipeline.run("test", |session| {
            session.check_deadline()?;
            session.observe(&file("/data/a.txt", 1));
            Ok(())
        });
        assert!(matches!(result, Err(WalkError::TimedOut { .. })));
        assert!(!pipeline.snapshot().has_published_generation());
    }
}
