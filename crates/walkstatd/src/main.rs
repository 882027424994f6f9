mod background;
mod handlers;
mod state;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, ValueEnum};
use tokio::runtime::Handle;
use tower_http::compression::CompressionLayer;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use walkstat_core::config::{ConfigError, FsConfig, HistogramConfig, S3Config, WalkerConfig};
use walkstat_core::fmt::format_bytes;
use walkstat_core::source::{RealFs, S3Store};
use walkstat_core::walker::{Backend, FsWalker, S3Walker};

use state::AppState;

// ============================================================
// CLI
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WalkerType {
    /// Local filesystem below --folder.
    Fs,
    /// S3-compatible object store.
    S3,
}

/// Exports file and object size statistics as Prometheus metrics.
#[derive(Parser)]
#[command(name = "walkstatd", about = "Filesystem and S3 usage exporter", version = walkstat_core::VERSION)]
struct Args {
    /// Storage backend to walk.
    #[arg(long = "type", value_enum, default_value = "fs", env = "WALKER_TYPE")]
    walker_type: WalkerType,

    /// Seconds between two walks.
    #[arg(long, default_value = "600", env = "SCRAPE_INTERVAL")]
    interval: u64,

    /// Deepest directory level that still gets its own prefix.
    #[arg(long, default_value = "1", env = "WALKER_MAX_DEPTH")]
    max_depth: usize,

    /// Number of size histogram buckets, the unbounded last one included.
    #[arg(long, default_value = "30", env = "HISTOGRAM_BINS")]
    histogram_bins: usize,

    /// Upper bound of the first histogram bucket (e.g. "10000000", "10M").
    #[arg(long, default_value = "10000000", env = "HISTOGRAM_START", value_parser = parse_size)]
    histogram_start: u64,

    /// Growth factor between consecutive histogram bounds.
    #[arg(long, default_value = "1.5", env = "HISTOGRAM_FACTOR")]
    histogram_factor: f64,

    /// Regular expressions; matching prefixes are not aggregated.
    #[arg(long, env = "PREFIX_FILTER", value_delimiter = ',')]
    prefix_filter: Vec<String>,

    /// Static labels added to every series, as key=value pairs.
    #[arg(long, env = "CUSTOM_LABELS", value_delimiter = ',', value_parser = parse_label)]
    custom_labels: Vec<(String, String)>,

    /// Abort a walk running longer than this many seconds.
    #[arg(long, env = "WALK_TIMEOUT")]
    walk_timeout: Option<u64>,

    /// Derive a content type from the file extension when none is reported.
    #[arg(long, env = "GUESS_CONTENT_TYPE")]
    guess_content_type: bool,

    /// Root folder of the filesystem walker.
    #[arg(long, default_value = "/", env = "FOLDER")]
    folder: PathBuf,

    /// S3 endpoint URL. Defaults to AWS.
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Walk only this bucket instead of all visible buckets.
    #[arg(long, env = "S3_BUCKET")]
    s3_bucket: Option<String>,

    /// S3 access key. Without both keys the default AWS credential chain is used.
    #[arg(long, env = "S3_ACCESS_KEY", hide_env_values = true)]
    s3_access_key: Option<String>,

    /// S3 secret key.
    #[arg(long, env = "S3_SECRET_KEY", hide_env_values = true)]
    s3_secret_key: Option<String>,

    /// S3 region.
    #[arg(long, default_value = "us-west", env = "S3_REGION")]
    s3_region: String,

    /// Use path-style bucket addressing.
    #[arg(long, env = "S3_BUCKET_PATH_STYLE")]
    s3_bucket_path_style: bool,

    /// Regular expressions; matching buckets are skipped.
    #[arg(long, env = "BUCKET_FILTER", value_delimiter = ',')]
    bucket_filter: Vec<String>,

    /// Listen address.
    #[arg(long, default_value = "0.0.0.0", env = "HTTP_ADDR")]
    http_addr: IpAddr,

    /// Listen port.
    #[arg(long, default_value = "6535", env = "HTTP_PORT")]
    http_port: u16,

    /// Path of the metrics endpoint.
    #[arg(long, default_value = "/metrics", env = "HTTP_PATH")]
    http_path: String,

    /// TLS certificate (PEM). Requires --key-file.
    #[arg(long, env = "CERT_FILE")]
    cert_file: Option<PathBuf>,

    /// TLS private key (PEM). Requires --cert-file.
    #[arg(long, env = "KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Checks the settings no core component validates.
    fn validate(&self) -> Result<(), String> {
        if self.interval == 0 {
            return Err("--interval must be at least 1 second".to_string());
        }
        if !self.http_path.starts_with('/') {
            return Err(format!("--http-path '{}' must start with '/'", self.http_path));
        }
        if ["/", "/health", "/status"].contains(&self.http_path.as_str()) {
            return Err(format!("--http-path '{}' is reserved", self.http_path));
        }
        self.tls_files().map(|_| ())
    }

    fn tls_files(&self) -> Result<Option<(&Path, &Path)>, String> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Ok(Some((cert.as_path(), key.as_path()))),
            (None, None) => Ok(None),
            _ => Err("--cert-file and --key-file must both be set".to_string()),
        }
    }

    fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            max_depth: self.max_depth,
            histogram: HistogramConfig {
                start: self.histogram_start as f64,
                factor: self.histogram_factor,
                buckets: self.histogram_bins,
            },
            prefix_filters: self.prefix_filter.clone(),
            custom_labels: self.custom_labels.iter().cloned().collect(),
            walk_timeout: self.walk_timeout.map(Duration::from_secs),
            guess_content_type: self.guess_content_type,
        }
    }

    fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.s3_endpoint.clone(),
            bucket: self.s3_bucket.clone(),
            access_key: self.s3_access_key.clone(),
            secret_key: self.s3_secret_key.clone(),
            region: self.s3_region.clone(),
            path_style: self.s3_bucket_path_style,
            bucket_filters: self.bucket_filter.clone(),
        }
    }

    fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http_addr, self.http_port)
    }
}

/// Parses a human-readable size string (e.g., "1G", "500M", "1024K") into bytes.
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('G') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('K') {
        (num, 1024)
    } else {
        (s, 1)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid size '{}': {}", s, e))?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", s))
}

/// Parses one `key=value` label.
fn parse_label(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("label '{}' is not key=value", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("label '{}' has an empty name", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["walkstatd", "walkstat_core"] {
        match format!("{}={}", target, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", target, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = args.validate() {
        error!(error = %e, "invalid configuration");
        process::exit(1);
    }

    info!(
        version = walkstat_core::VERSION,
        walker = ?args.walker_type,
        interval_s = args.interval,
        max_depth = args.max_depth,
        histogram_start = %format_bytes(args.histogram_start),
        histogram_factor = args.histogram_factor,
        histogram_bins = args.histogram_bins,
        "walkstatd starting"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    // S3 client setup blocks on the runtime, so it happens before entering it.
    let backend = match build_backend(&args, runtime.handle()) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "failed to initialize walker");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(args, backend)) {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("walkstatd stopped");
}

fn build_backend(args: &Args, runtime: &Handle) -> Result<Arc<dyn Backend>, ConfigError> {
    let config = args.walker_config();
    match args.walker_type {
        WalkerType::Fs => {
            let fs_config = FsConfig {
                folder: args.folder.clone(),
            };
            info!(folder = %fs_config.folder.display(), "filesystem walker");
            Ok(Arc::new(FsWalker::new(RealFs::new(), fs_config, &config)?))
        }
        WalkerType::S3 => {
            let s3_config = args.s3_config();
            if s3_config.static_credentials().is_none()
                && (s3_config.access_key.is_some() || s3_config.secret_key.is_some())
            {
                warn!("incomplete static credentials, using default credential chain");
            }
            let store = S3Store::connect(&s3_config, runtime.clone(), config.walk_timeout)?;
            Ok(Arc::new(S3Walker::new(store, &s3_config, &config)?))
        }
    }
}

async fn serve(args: Args, backend: Arc<dyn Backend>) -> io::Result<()> {
    let state = AppState::new(backend, &args.http_path);

    tokio::spawn(background::schedule_loop(
        state.clone(),
        Duration::from_secs(args.interval),
    ));

    let app = Router::new()
        .route("/", get(handlers::handle_index))
        .route("/health", get(handlers::handle_health))
        .route("/status", get(handlers::handle_status))
        .route(&args.http_path, get(handlers::handle_metrics))
        .with_state(state)
        .layer(CompressionLayer::new());

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    let addr = args.listen_addr();
    match args.tls_files().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))? {
        Some((cert, key)) => {
            let tls = RustlsConfig::from_pem_file(cert, key).await?;
            info!(%addr, path = %args.http_path, "listening (TLS)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(%addr, path = %args.http_path, "listening");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    }
}

async fn shutdown_on_signal(handle: axum_server::Handle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received");
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        }
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10000000"), Ok(10_000_000));
        assert_eq!(parse_size("10M"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_size(" 2G "), Ok(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("512K"), Ok(512 * 1024));
        assert!(parse_size("").is_err());
        assert!(parse_size("ten").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label("env=prod"),
            Ok(("env".to_string(), "prod".to_string()))
        );
        assert_eq!(
            parse_label("url=http://x?a=b"),
            Ok(("url".to_string(), "http://x?a=b".to_string()))
        );
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=x").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["walkstatd"]).unwrap();
        assert_eq!(args.walker_type, WalkerType::Fs);
        assert_eq!(args.interval, 600);
        assert_eq!(args.http_port, 6535);
        assert_eq!(args.http_path, "/metrics");
        assert_eq!(args.listen_addr().to_string(), "0.0.0.0:6535");
        assert!(args.validate().is_ok());

        let config = args.walker_config();
        assert_eq!(config, WalkerConfig::default());
        assert_eq!(args.s3_config(), S3Config::default());
    }

    #[test]
    fn test_lists_and_labels() {
        let args = Args::try_parse_from([
            "walkstatd",
            "--type",
            "s3",
            "--prefix-filter",
            "^tmp,^cache",
            "--custom-labels",
            "env=prod,team=storage",
            "--bucket-filter",
            "^logs",
            "--walk-timeout",
            "30",
            "--histogram-start",
            "1M",
        ])
        .unwrap();
        assert_eq!(args.walker_type, WalkerType::S3);

        let config = args.walker_config();
        assert_eq!(config.prefix_filters, vec!["^tmp", "^cache"]);
        assert_eq!(config.custom_labels.get("team").map(String::as_str), Some("storage"));
        assert_eq!(config.walk_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.histogram.start, 1024.0 * 1024.0);
        assert_eq!(args.s3_config().bucket_filters, vec!["^logs"]);
    }

    #[test]
    fn test_validate() {
        let args = Args::try_parse_from(["walkstatd", "--cert-file", "c.pem"]).unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["walkstatd", "--http-path", "metrics"]).unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["walkstatd", "--http-path", "/status"]).unwrap();
        assert!(args.validate().is_err());

        let args = Args::try_parse_from(["walkstatd", "--interval", "0"]).unwrap();
        assert!(args.validate().is_err());

        assert!(Args::try_parse_from(["walkstatd", "--type", "ftp"]).is_err());
    }

    #[test]
    fn test_build_backend_rejects_missing_folder() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let args =
            Args::try_parse_from(["walkstatd", "--folder", "/nonexistent/path/12345"]).unwrap();
        let err = build_backend(&args, runtime.handle()).err().unwrap();
        assert!(matches!(err, ConfigError::Folder { .. }));
    }
}
