use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for a crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Crawl behavior configuration
///
/// Immutable for the lifetime of a crawl.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Number of concurrent workers
    #[serde(rename = "max-parallel-crawl")]
    pub max_parallel_crawl: u32,

    /// Minimum spacing between two requests issued by the same worker (milliseconds)
    #[serde(rename = "crawl-delay")]
    pub crawl_delay: u64,

    /// Retries after the first attempt, for transport-level failures only
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Per-attempt timeout (milliseconds)
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,

    /// Maximum redirect hops followed for a single URL
    #[serde(rename = "max-redirects")]
    pub max_redirects: u32,

    /// User-Agent header sent on every attempt
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Maximum number of external links probed during the crawl
    #[serde(rename = "max-external-links")]
    pub max_external_links: u32,

    /// Base delay between retries, multiplied by the attempt number (milliseconds)
    #[serde(rename = "retry-backoff", default = "default_retry_backoff")]
    pub retry_backoff: u64,

    /// Abort the crawl once this many in-domain pages have been dispatched
    #[serde(rename = "max-pages", default)]
    pub max_pages: Option<u32>,

    /// Do not enqueue links deeper than this many hops from the root
    #[serde(rename = "max-depth", default)]
    pub max_depth: Option<u32>,

    /// Save a checkpoint this often while running (seconds)
    #[serde(rename = "checkpoint-interval", default)]
    pub checkpoint_interval: Option<u64>,
}

fn default_retry_backoff() -> u64 {
    250
}

impl CrawlConfig {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_delay)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval.map(Duration::from_secs)
    }
}

/// The site being crawled
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Root URL of the domain; the crawl starts here
    #[serde(rename = "root-url")]
    pub root_url: String,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: String,

    /// Restore a previously saved crawl of the same domain
    #[serde(default = "default_resume")]
    pub resume: bool,
}

fn default_database_path() -> String {
    "./sitegauge.db".to_string()
}

fn default_resume() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            resume: default_resume(),
        }
    }
}
