use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for web-archive
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub assessment: AssessmentConfig,
}

impl Config {
    /// Builds a default configuration for a single seed URL
    pub fn for_seed(seed_url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.crawler.seed_url = seed_url.into();
        config
    }
}

/// Traversal and fetch behavior for one archive run
///
/// Immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Where the archive starts. May be omitted from the file and given on the command line.
    #[serde(rename = "seed-url")]
    pub seed_url: String,

    /// Maximum link depth from the seed (the seed is depth 0)
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Maximum number of pages accepted into the frontier
    #[serde(rename = "max-pages")]
    pub max_pages: usize,

    /// Size of the fetch worker pool
    #[serde(rename = "max-concurrent-fetches")]
    pub max_concurrent_fetches: usize,

    /// Minimum time between requests to the same host (milliseconds)
    #[serde(rename = "per-host-interval-ms")]
    pub per_host_interval_ms: u64,

    /// Only follow links on the seed's host
    #[serde(rename = "same-origin-only")]
    pub same_origin_only: bool,

    /// Hard timeout for one fetch attempt (milliseconds)
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    /// Additional attempts after a transient failure
    #[serde(rename = "retry-count")]
    pub retry_count: u32,

    /// Base of the exponential retry backoff (milliseconds)
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// Redirect hops followed before giving up
    #[serde(rename = "max-redirects")]
    pub max_redirects: u32,

    /// Largest body accepted for a page or asset
    #[serde(rename = "max-resource-bytes")]
    pub max_resource_bytes: u64,

    /// Overall run deadline (seconds)
    #[serde(rename = "run-deadline-secs", skip_serializing_if = "Option::is_none")]
    pub run_deadline_secs: Option<u64>,

    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_url: String::new(),
            max_depth: 3,
            max_pages: 200,
            max_concurrent_fetches: 8,
            per_host_interval_ms: 250,
            same_origin_only: true,
            request_timeout_ms: 15_000,
            retry_count: 2,
            retry_backoff_ms: 500,
            max_redirects: 10,
            max_resource_bytes: 25 * 1024 * 1024,
            run_deadline_secs: None,
            user_agent: format!("web-archive/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl CrawlConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn per_host_interval(&self) -> Duration {
        Duration::from_millis(self.per_host_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory under which per-host, per-run archive roots are created
    #[serde(rename = "archive-root")]
    pub archive_root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("./archives"),
        }
    }
}

/// Which completeness check runs after the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentStrategy {
    /// Local comparison of references against the manifest
    #[default]
    Structural,

    /// Delegate to the external judgment service
    Judgment,
}

/// Completeness assessment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    pub strategy: AssessmentStrategy,

    /// Endpoint the judgment request is POSTed to
    #[serde(rename = "judgment-endpoint", skip_serializing_if = "Option::is_none")]
    pub judgment_endpoint: Option<String>,

    /// Timeout for the whole judgment call (milliseconds)
    #[serde(rename = "judgment-timeout-ms")]
    pub judgment_timeout_ms: u64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            strategy: AssessmentStrategy::Structural,
            judgment_endpoint: None,
            judgment_timeout_ms: 30_000,
        }
    }
}

impl AssessmentConfig {
    pub fn judgment_timeout(&self) -> Duration {
        Duration::from_millis(self.judgment_timeout_ms)
    }
}
