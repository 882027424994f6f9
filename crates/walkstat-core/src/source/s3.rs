//! S3-compatible object store backed by `aws-sdk-s3`.
//!
//! Walks are synchronous; every request is driven to completion on the
//! runtime handle given at construction. Listing must therefore happen on a
//! thread outside the async runtime (the daemon walks in `spawn_blocking`).

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use tokio::runtime::Handle;
use tracing::{debug, info};
use url::Url;

use crate::config::{ConfigError, S3Config};
use crate::source::traits::{BucketInfo, ObjectInfo, ObjectIter, ObjectStore, StoreError};

/// Object store client for S3 and S3-compatible endpoints.
pub struct S3Store {
    client: Client,
    runtime: Handle,
    request_timeout: Option<Duration>,
}

struct ObjectPage {
    objects: Vec<ObjectInfo>,
    next_token: Option<String>,
}

impl S3Store {
    /// Builds the client.
    ///
    /// Static credentials are used when both keys are configured, otherwise
    /// the default AWS credential chain. Must not be called from inside the
    /// runtime behind `runtime`.
    pub fn connect(
        config: &S3Config,
        runtime: Handle,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        if let Some(endpoint) = &config.endpoint {
            validate_endpoint(endpoint)?;
        }

        let shared = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(config.region.clone()))
                .load(),
        );

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        match config.static_credentials() {
            Some((access, secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access, secret, None, None, "walkstat",
                ));
                debug!("S3: using static credentials");
            }
            None => debug!("S3: using default credential chain"),
        }

        info!(
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            region = %config.region,
            path_style = config.path_style,
            "S3 client configured"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            runtime,
            request_timeout,
        })
    }

    fn run<T, F>(&self, operation: &'static str, request: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.runtime.block_on(async {
            match self.request_timeout {
                Some(limit) => tokio::time::timeout(limit, request)
                    .await
                    .map_err(|_| StoreError::TimedOut(operation))?,
                None => request.await,
            }
        })
    }

    fn list_page(&self, bucket: &str, token: Option<String>) -> Result<ObjectPage, StoreError> {
        const OPERATION: &str = "ListObjectsV2";

        let output = self.run(OPERATION, async {
            self.client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(token)
                .send()
                .await
                .map_err(|e| request_error(OPERATION, e))
        })?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    size: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    content_type: None,
                    storage_class: object.storage_class().map(|c| c.as_str().to_string()),
                })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }
}

impl ObjectStore for S3Store {
    fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        const OPERATION: &str = "ListBuckets";

        let output = self.run(OPERATION, async {
            self.client
                .list_buckets()
                .send()
                .await
                .map_err(|e| request_error(OPERATION, e))
        })?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(|name| BucketInfo {
                name: name.to_string(),
            })
            .collect())
    }

    fn list_objects<'a>(&'a self, bucket: &'a str) -> ObjectIter<'a> {
        Box::new(Pages {
            store: self,
            bucket,
            buffer: VecDeque::new(),
            token: None,
            done: false,
        })
    }
}

/// Lazily fetches `ListObjectsV2` pages.
struct Pages<'a> {
    store: &'a S3Store,
    bucket: &'a str,
    buffer: VecDeque<ObjectInfo>,
    token: Option<String>,
    done: bool,
}

impl Iterator for Pages<'_> {
    type Item = Result<ObjectInfo, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(object) = self.buffer.pop_front() {
                return Some(Ok(object));
            }
            if self.done {
                return None;
            }
            match self.store.list_page(self.bucket, self.token.take()) {
                Ok(page) => {
                    self.buffer.extend(page.objects);
                    self.done = page.next_token.is_none();
                    self.token = page.next_token;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn request_error<E>(operation: &'static str, error: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Request {
        operation,
        message: DisplayErrorContext(&error).to_string(),
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConfigError::InvalidEndpoint(format!("'{}': {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEndpoint(format!(
            "'{}' must use http or https",
            endpoint
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidEndpoint(format!(
            "'{}' has no host",
            endpoint
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("http://localhost:9000").is_ok());
        assert!(validate_endpoint("https://s3.example.com/").is_ok());
        assert!(validate_endpoint("localhost:9000").is_err());
        assert!(validate_endpoint("https://").is_err());
        assert!(validate_endpoint("ftp://host").is_err());
        assert!(validate_endpoint("http://host:notaport").is_err());
        assert!(validate_endpoint("http://ho st").is_err());
        assert!(validate_endpoint("https://[::1").is_err());
        assert!(validate_endpoint("http://[::1]:9000").is_ok());
    }

    #[test]
    fn connect_rejects_bad_endpoint_before_touching_the_network() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        for endpoint in ["not a url", "http://host:notaport", "http://ho st", "https://[::1"] {
            let config = S3Config {
                endpoint: Some(endpoint.into()),
                ..Default::default()
            };
            let err = S3Store::connect(&config, runtime.handle().clone(), None)
                .err()
                .unwrap();
            assert!(matches!(err, ConfigError::InvalidEndpoint(_)), "{}", endpoint);
        }
    }
}
