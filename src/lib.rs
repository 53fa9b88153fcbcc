//! Sitegauge: single-domain crawl core with per-page transport telemetry
//!
//! This crate crawls one web domain under bounded concurrency and records,
//! for every page, how the HTTP exchange went: timing, redirects, security
//! headers, compression and caching, and detected technologies. Parsed
//! documents and page records are handed to pluggable analyzers.

pub mod analyzer;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod transport;
pub mod url;

use thiserror::Error;

/// Main error type for crawl operations
///
/// Per-page failures never surface here; they are recorded in the crawl
/// ledger. Only setup and persistence failures end a crawl with an error.
#[derive(Debug, Error)]
pub enum GaugeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid technology signature: {0}")]
    Signatures(#[from] regex::Error),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crawler::CrawlPhase,
        to: crawler::CrawlPhase,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, GaugeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{Config, CrawlConfig};
pub use crawler::{AbortReason, Coordinator, CrawlPhase};
pub use output::CrawlSummary;
pub use state::{CrawlState, PageResult};
pub use storage::StorageAdapter;
pub use url::{extract_domain, normalize_url, LinkScope};
