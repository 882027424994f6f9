//! In-memory mock object store.

use std::collections::BTreeMap;

use crate::source::traits::{BucketInfo, ObjectInfo, ObjectIter, ObjectStore, StoreError};

#[derive(Debug, Clone, Default)]
struct MockBucket {
    objects: Vec<ObjectInfo>,
    /// Number of objects listed before the listing fails.
    fail_after: Option<usize>,
}

/// In-memory object store for testing.
///
/// Buckets list in name order, objects in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    buckets: BTreeMap<String, MockBucket>,
    list_buckets_error: Option<String>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&mut self, bucket: &str) {
        self.buckets.entry(bucket.to_string()).or_default();
    }

    /// Adds an object; the bucket is created if needed.
    pub fn add_object(&mut self, bucket: &str, object: ObjectInfo) {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .objects
            .push(object);
    }

    /// Makes listing `bucket` fail after `count` objects.
    pub fn fail_after(&mut self, bucket: &str, count: usize) {
        self.buckets.entry(bucket.to_string()).or_default().fail_after = Some(count);
    }

    /// Makes `list_buckets` fail with `message`.
    pub fn fail_list_buckets(&mut self, message: &str) {
        self.list_buckets_error = Some(message.to_string());
    }
}

impl ObjectStore for MockStore {
    fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        if let Some(message) = &self.list_buckets_error {
            return Err(StoreError::Request {
                operation: "ListBuckets",
                message: message.clone(),
            });
        }
        Ok(self
            .buckets
            .keys()
            .map(|name| BucketInfo { name: name.clone() })
            .collect())
    }

    fn list_objects<'a>(&'a self, bucket: &'a str) -> ObjectIter<'a> {
        let Some(mock) = self.buckets.get(bucket) else {
            return Box::new(std::iter::once(Err(StoreError::Request {
                operation: "ListObjectsV2",
                message: format!("NoSuchBucket: {}", bucket),
            })));
        };

        let limit = mock.fail_after.unwrap_or(mock.objects.len());
        let listed = mock.objects.iter().take(limit).cloned().map(Ok);
        let failure = mock.fail_after.map(|_| {
            Err(StoreError::Request {
                operation: "ListObjectsV2",
                message: "connection reset".to_string(),
            })
        });
        Box::new(listed.chain(failure))
    }
}
