//! Metric publication layer.
//!
//! # Consistency model
//!
//! Every walk writes into its own *generation*: a fresh [`Registry`] holding
//! newly created metric containers. Scrapes read the *published* generation
//! only. [`MetricSnapshot::end_processing`] swaps the pending generation in
//! under a write lock, so a scrape sees either the previous walk or the new
//! one, never a mix and never a walk in progress. Series of prefixes that
//! disappeared are dropped with the generation that held them.
//!
//! A walk that fails is discarded with [`MetricSnapshot::abort_processing`]
//! and the previous generation stays published.
//!
//! ```text
//!  walk ──process_file──▶ pending generation ──end_processing──▶ published ◀── scrape
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{
    Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::{debug, error, warn};

use crate::config::ConfigError;
use crate::histogram::HistogramBinner;
use crate::stats::FileObservation;

/// Namespace of every exported metric family.
pub const NAMESPACE: &str = "file_walker";

/// Label names set per observation by the pipeline itself.
const RESERVED_LABELS: &[&str] = &["prefix", "ext", "contentType", "le", "result"];

/// Outcome of a walk, counted in `walks_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkResult {
    Completed,
    Failed,
    Skipped,
}

impl WalkResult {
    pub fn as_str(self) -> &'static str {
        match self {
            WalkResult::Completed => "completed",
            WalkResult::Failed => "failed",
            WalkResult::Skipped => "skipped",
        }
    }
}

/// Label layout shared by all generations.
///
/// Fixed at startup; every generation declares exactly these labels, so a
/// metric name never changes its label set between walks.
#[derive(Debug, Clone)]
pub struct MetricSchema {
    const_labels: BTreeMap<String, String>,
    dynamic_labels: Vec<String>,
    buckets: Vec<f64>,
}

impl MetricSchema {
    /// Builds the schema.
    ///
    /// Backend labels win over `custom_labels` on the same key. This holds
    /// for the static `backend_labels` and for the per-object
    /// `dynamic_labels` (e.g. `bucket`): a shadowed custom label is dropped.
    /// A dynamic label must not collide with a static backend label.
    pub fn new(
        custom_labels: &BTreeMap<String, String>,
        backend_labels: &[(&str, &str)],
        dynamic_labels: &[&str],
        binner: &HistogramBinner,
    ) -> Result<Self, ConfigError> {
        let mut const_labels = custom_labels.clone();
        for &name in dynamic_labels {
            if let Some(value) = const_labels.remove(name) {
                warn!(label = name, value = %value, "custom label shadowed by per-object backend label");
            }
        }
        for (name, value) in backend_labels {
            const_labels.insert((*name).to_string(), (*value).to_string());
        }

        for name in const_labels.keys() {
            validate_label_name(name)?;
        }

        let mut seen: Vec<&str> = Vec::with_capacity(dynamic_labels.len());
        for &name in dynamic_labels {
            validate_label_name(name)?;
            if const_labels.contains_key(name) {
                return Err(ConfigError::InvalidLabel {
                    name: name.to_string(),
                    reason: "already declared as a static label".to_string(),
                });
            }
            if seen.contains(&name) {
                return Err(ConfigError::InvalidLabel {
                    name: name.to_string(),
                    reason: "declared twice".to_string(),
                });
            }
            seen.push(name);
        }

        let schema = Self {
            const_labels,
            dynamic_labels: dynamic_labels.iter().map(|s| s.to_string()).collect(),
            buckets: binner.upper_bounds().to_vec(),
        };

        // Registration errors surface here, not at the first reset.
        Generation::build(&schema).map_err(|e| ConfigError::Metrics(e.to_string()))?;
        Ok(schema)
    }

    pub fn const_labels(&self) -> &BTreeMap<String, String> {
        &self.const_labels
    }

    pub fn dynamic_labels(&self) -> &[String] {
        &self.dynamic_labels
    }

    fn const_label_map(&self) -> HashMap<String, String> {
        self.const_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn label_names<'a>(&'a self, extra: &[&'a str]) -> Vec<&'a str> {
        self.dynamic_labels
            .iter()
            .map(String::as_str)
            .chain(extra.iter().copied())
            .collect()
    }

    /// Values of the dynamic labels, in declaration order; missing ones are empty.
    fn dynamic_values<'a>(&self, labels: &[(&'a str, &'a str)]) -> Vec<&'a str> {
        self.dynamic_labels
            .iter()
            .map(|name| {
                labels
                    .iter()
                    .find(|(k, _)| *k == name.as_str())
                    .map(|(_, v)| *v)
                    .unwrap_or("")
            })
            .collect()
    }
}

fn validate_label_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidLabel {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("empty name")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(invalid("must start with a letter or underscore"));
        }
        _ => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid("only letters, digits and underscores are allowed"));
    }
    if name.starts_with("__") {
        return Err(invalid("names starting with __ are reserved"));
    }
    if RESERVED_LABELS.contains(&name) {
        return Err(invalid("reserved for per-object labels"));
    }
    Ok(())
}

/// Metric containers of one walk.
struct Generation {
    registry: Registry,
    max_depth: Gauge,
    duration: Gauge,
    total_size: Gauge,
    total_count: Gauge,
    started: Gauge,
    sizes: HistogramVec,
    prefix_size: GaugeVec,
    prefix_count: GaugeVec,
    ext_count: GaugeVec,
    ext_size: GaugeVec,
    content_type_count: GaugeVec,
    content_type_size: GaugeVec,
    max_depth_seen: usize,
}

impl Generation {
    fn build(schema: &MetricSchema) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let labels = schema.const_label_map();

        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(NAMESPACE)
                .const_labels(labels.clone())
        };
        let gauge = |name: &str, help: &str| -> prometheus::Result<Gauge> {
            register(&registry, Gauge::with_opts(opts(name, help))?)
        };
        let gauge_vec = |name: &str, help: &str, extra: &[&str]| -> prometheus::Result<GaugeVec> {
            register(
                &registry,
                GaugeVec::new(opts(name, help), &schema.label_names(extra))?,
            )
        };

        let sizes = HistogramVec::new(
            HistogramOpts::new(
                "objects_sizes_count",
                "Histogram showing the files size repartition across prefixes",
            )
            .namespace(NAMESPACE)
            .const_labels(labels.clone())
            .buckets(schema.buckets.clone()),
            &schema.label_names(&["prefix"]),
        )?;

        Ok(Self {
            max_depth: gauge("max_tree_depth", "Maximum depth of folder tree")?,
            duration: gauge(
                "stats_collection_duration",
                "Time spent reading objects and folders, in seconds",
            )?,
            total_size: gauge("total_objects_size", "Total objects volume in bytes")?,
            total_count: gauge("total_objects_count", "Total number of objects found")?,
            started: gauge(
                "stats_collection_date",
                "Date when the stats collection started, as unix seconds",
            )?,
            sizes: register(&registry, sizes)?,
            prefix_size: gauge_vec("objects_size", "Objects volume across prefixes", &["prefix"])?,
            prefix_count: gauge_vec("objects_count", "Objects count across prefixes", &["prefix"])?,
            ext_count: gauge_vec(
                "objects_extensions_count",
                "Repartition of objects per file extension",
                &["prefix", "ext"],
            )?,
            ext_size: gauge_vec(
                "objects_extensions_size",
                "Total size of objects per extension",
                &["prefix", "ext"],
            )?,
            content_type_count: gauge_vec(
                "objects_content_type_count",
                "Repartition of objects per content type",
                &["prefix", "contentType"],
            )?,
            content_type_size: gauge_vec(
                "objects_content_type_size",
                "Total size of objects per content type",
                &["prefix", "contentType"],
            )?,
            max_depth_seen: 0,
            registry,
        })
    }

    fn observe(&mut self, schema: &MetricSchema, file: &FileObservation<'_>) {
        if file.depth > self.max_depth_seen {
            self.max_depth_seen = file.depth;
            self.max_depth.set(file.depth as f64);
        }

        let size = file.size as f64;
        self.total_count.inc();
        self.total_size.add(size);

        let mut values = schema.dynamic_values(file.labels);
        values.push(file.prefix);
        self.sizes.with_label_values(values.as_slice()).observe(size);
        self.prefix_size.with_label_values(values.as_slice()).add(size);
        self.prefix_count.with_label_values(values.as_slice()).inc();

        values.push(file.extension);
        self.ext_count.with_label_values(values.as_slice()).inc();
        self.ext_size.with_label_values(values.as_slice()).add(size);
        values.pop();

        values.push(file.content_type);
        self.content_type_count.with_label_values(values.as_slice()).inc();
        self.content_type_size.with_label_values(values.as_slice()).add(size);
    }
}

fn register<M>(registry: &Registry, metric: M) -> prometheus::Result<M>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

struct Pending {
    generation: Generation,
    started: Option<Instant>,
}

/// Externally observable metrics of the last completed walk.
///
/// Shared between the walking backend (writer) and the scrape endpoint
/// (reader). Each instance owns its registries; nothing is registered
/// process-wide.
pub struct MetricSnapshot {
    schema: MetricSchema,
    lifetime: Registry,
    walks: IntCounterVec,
    pending: Mutex<Option<Pending>>,
    published: RwLock<Option<Registry>>,
}

impl MetricSnapshot {
    pub fn new(schema: MetricSchema) -> Result<Self, ConfigError> {
        let lifetime = Registry::new();
        let walks = IntCounterVec::new(
            Opts::new("walks_total", "Walks by result")
                .namespace(NAMESPACE)
                .const_labels(schema.const_label_map()),
            &["result"],
        )
        .and_then(|walks| register(&lifetime, walks))
        .map_err(|e| ConfigError::Metrics(e.to_string()))?;

        Ok(Self {
            schema,
            lifetime,
            walks,
            pending: Mutex::new(None),
            published: RwLock::new(None),
        })
    }

    pub fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    /// Replaces the pending generation with a fresh, empty one.
    ///
    /// The published generation is left untouched.
    pub fn reset(&self) {
        let generation = match Generation::build(&self.schema) {
            Ok(generation) => Some(Pending {
                generation,
                started: None,
            }),
            Err(e) => {
                error!(error = %e, "failed to build metric generation");
                None
            }
        };
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = generation;
    }

    /// Resets and records the walk start.
    pub fn start_processing(&self) {
        self.reset();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = pending.as_mut() {
            pending.started = Some(Instant::now());
            pending
                .generation
                .started
                .set(Utc::now().timestamp() as f64);
        }
    }

    /// Writes one observation into the pending generation.
    pub fn process_file(&self, file: &FileObservation<'_>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_mut() {
            Some(pending) => pending.generation.observe(&self.schema, file),
            None => debug!(prefix = file.prefix, "no pending generation, observation dropped"),
        }
    }

    /// Finalizes the pending generation and publishes it.
    ///
    /// Returns the walk duration, or `None` if nothing was pending.
    pub fn end_processing(&self) -> Option<Duration> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let elapsed = pending.started.map(|t| t.elapsed()).unwrap_or_default();
        pending.generation.duration.set(elapsed.as_secs_f64());

        *self.published.write().unwrap_or_else(PoisonError::into_inner) =
            Some(pending.generation.registry);
        Some(elapsed)
    }

    /// Drops the pending generation; the published one is kept.
    pub fn abort_processing(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn record_walk(&self, result: WalkResult) {
        self.walks.with_label_values(&[result.as_str()]).inc();
    }

    pub fn has_published_generation(&self) -> bool {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Gathers lifetime counters and the published generation.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let mut families = self.lifetime.gather();
        if let Some(registry) = self
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            families.extend(registry.gather());
        }
        families
    }

    /// Renders [`gather`](Self::gather) in the text exposition format.
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&self.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Reads one sample from text exposition output.
///
/// Returns the value of the first series of `name` carrying all of `labels`.
#[cfg(test)]
pub(crate) fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let rest = line.strip_prefix(name)?;
            let (label_part, value) = match rest.strip_prefix('{') {
                Some(rest) => {
                    let end = rest.rfind('}')?;
                    (&rest[..end], rest[end + 1..].trim())
                }
                None if rest.starts_with(' ') => ("", rest.trim()),
                None => return None,
            };
            let all_present = labels
                .iter()
                .all(|(k, v)| label_part.contains(&format!("{}=\"{}\"", k, v)));
            if all_present { value.parse().ok() } else { None }
        })
        .next()
}
