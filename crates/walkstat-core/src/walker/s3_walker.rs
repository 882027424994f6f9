//! Object-store backend.
//!
//! Enumerates buckets (or uses the single configured one), skips buckets
//! matching the bucket filter and lists every object of the rest. Object
//! keys are aggregated relative to the bucket, with `bucket` and
//! `storageClass` as per-object labels.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{AggregationPipeline, Backend, ObservedFile, WalkError, WalkSession, WalkStatus};
use crate::config::{ConfigError, S3Config, WalkerConfig};
use crate::filter::Filter;
use crate::metrics::MetricSnapshot;
use crate::source::ObjectStore;

const OBJECT_LABELS: &[&str] = &["bucket", "storageClass"];

/// Walks the buckets of an object store.
pub struct S3Walker<S: ObjectStore> {
    store: S,
    bucket: Option<String>,
    bucket_filter: Filter,
    pipeline: AggregationPipeline,
}

impl<S: ObjectStore> S3Walker<S> {
    pub fn new(store: S, config: &S3Config, walker: &WalkerConfig) -> Result<Self, ConfigError> {
        let bucket_filter = Filter::new(&config.bucket_filters)?;
        let endpoint = config.endpoint.as_deref().unwrap_or_default();
        let labels = [("type", "s3Walker"), ("s3Endpoint", endpoint)];
        let pipeline = AggregationPipeline::new(walker, &labels, OBJECT_LABELS)?;

        Ok(Self {
            store,
            bucket: config.bucket.clone().filter(|b| !b.is_empty()),
            bucket_filter,
            pipeline,
        })
    }

    fn buckets(&self, session: &WalkSession<'_>) -> Result<Vec<String>, WalkError> {
        if let Some(bucket) = &self.bucket {
            return Ok(vec![bucket.clone()]);
        }

        let buckets = match self.store.list_buckets() {
            Ok(buckets) => buckets,
            Err(e) => {
                session.check_deadline()?;
                return Err(e.into());
            }
        };

        Ok(buckets
            .into_iter()
            .map(|b| b.name)
            .filter(|name| {
                let excluded = self.bucket_filter.is_excluded(name);
                if excluded {
                    info!(bucket = %name, "bucket excluded");
                }
                !excluded
            })
            .collect())
    }

    /// Lists one bucket. A listing error ends this bucket only; objects
    /// observed before it are kept.
    fn walk_bucket(&self, session: &mut WalkSession<'_>, bucket: &str) -> Result<(), WalkError> {
        let mut listed = 0u64;
        for item in self.store.list_objects(bucket) {
            session.check_deadline()?;
            let object = match item {
                Ok(object) => object,
                Err(e) => {
                    if listed == 0 {
                        error!(bucket, error = %e, "failed to list bucket, skipping");
                    } else {
                        warn!(bucket, listed, error = %e, "bucket listing aborted");
                    }
                    session.record_failed_container();
                    return Ok(());
                }
            };

            listed += 1;
            let storage_class = object.storage_class.as_deref().unwrap_or_default();
            let labels = [("bucket", bucket), ("storageClass", storage_class)];
            session.observe(&ObservedFile {
                root: "",
                path: &object.key,
                size: object.size,
                content_type: object.content_type.as_deref(),
                labels: &labels,
            });
        }
        Ok(())
    }
}

impl<S: ObjectStore> Backend for S3Walker<S> {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn walk(&self) -> Result<WalkStatus, WalkError> {
        self.pipeline.run(self.name(), |session| {
            for bucket in self.buckets(session)? {
                session.check_deadline()?;
                self.walk_bucket(session, &bucket)?;
            }
            Ok(())
        })
    }

    fn snapshot(&self) -> &Arc<MetricSnapshot> {
        self.pipeline.snapshot()
    }
}
