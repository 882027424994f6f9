//! Walker configuration.
//!
//! Plain structs populated by the daemon (flags or environment) and validated
//! by the components that consume them. Every validation failure is a
//! [`ConfigError`] and is fatal at startup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration error raised while building walkers, filters or metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// An exclusion pattern is not a valid regular expression.
    InvalidPattern { pattern: String, reason: String },
    /// Histogram parameters cannot produce increasing finite buckets.
    InvalidHistogram(String),
    /// A label name is malformed or declared twice.
    InvalidLabel { name: String, reason: String },
    /// The filesystem root is missing or not a directory.
    Folder { path: PathBuf, reason: String },
    /// The object-store endpoint cannot be used.
    InvalidEndpoint(String),
    /// The metrics library rejected a metric declaration.
    Metrics(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPattern { pattern, reason } => {
                write!(f, "invalid exclusion pattern '{}': {}", pattern, reason)
            }
            ConfigError::InvalidHistogram(msg) => write!(f, "invalid histogram: {}", msg),
            ConfigError::InvalidLabel { name, reason } => {
                write!(f, "invalid label '{}': {}", name, reason)
            }
            ConfigError::Folder { path, reason } => {
                write!(f, "folder {}: {}", path.display(), reason)
            }
            ConfigError::InvalidEndpoint(msg) => write!(f, "invalid S3 endpoint: {}", msg),
            ConfigError::Metrics(msg) => write!(f, "metrics registration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Size histogram layout.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramConfig {
    /// Upper bound of the first bucket, in bytes.
    pub start: f64,
    /// Growth factor between consecutive bucket bounds.
    pub factor: f64,
    /// Number of buckets, the unbounded last one included.
    pub buckets: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            start: 10_000_000.0,
            factor: 1.5,
            buckets: 30,
        }
    }
}

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkerConfig {
    /// Deepest directory level that still gets its own prefix.
    pub max_depth: usize,
    pub histogram: HistogramConfig,
    /// Regular expressions; a prefix matching any of them is not aggregated.
    pub prefix_filters: Vec<String>,
    /// Static labels attached to every exported series.
    pub custom_labels: BTreeMap<String, String>,
    /// Abort a walk that runs longer than this.
    pub walk_timeout: Option<Duration>,
    /// Derive a content type from the extension when the backend reports none.
    pub guess_content_type: bool,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_depth: 1,
            histogram: HistogramConfig::default(),
            prefix_filters: Vec::new(),
            custom_labels: BTreeMap::new(),
            walk_timeout: None,
            guess_content_type: false,
        }
    }
}

/// Filesystem backend settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FsConfig {
    pub folder: PathBuf,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("/"),
        }
    }
}

/// Object-store backend settings.
#[derive(Debug, Clone, PartialEq)]
pub struct S3Config {
    /// Endpoint URL (`http://` or `https://`). `None` uses the AWS default.
    pub endpoint: Option<String>,
    /// Restrict the walk to this bucket instead of enumerating all buckets.
    pub bucket: Option<String>,
    /// Static credentials. Both must be set, otherwise the default AWS
    /// credential chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: String,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub path_style: bool,
    /// Regular expressions; an enumerated bucket matching any of them is skipped.
    pub bucket_filters: Vec<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: None,
            access_key: None,
            secret_key: None,
            region: "us-west".to_string(),
            path_style: false,
            bucket_filters: Vec::new(),
        }
    }
}

impl S3Config {
    /// Returns the static credentials when both halves are configured.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access), Some(secret)) if !access.is_empty() && !secret.is_empty() => {
                Some((access, secret))
            }
            _ => None,
        }
    }
}
