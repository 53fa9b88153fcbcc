//! URL handling module
//!
//! This module provides URL normalization, domain extraction and the
//! same-site test that decides which discovered links get crawled.

mod domain;
mod normalize;

use serde::{Deserialize, Serialize};
use url::Url;

pub use domain::{extract_domain, site_host};
pub use normalize::normalize_url;

/// Where a discovered link points relative to the crawled site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkScope {
    /// Same site - crawled fully
    Internal,
    /// Another site - at most probed, never parsed
    External,
}

impl LinkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

/// Classifies `url` against the crawl root
///
/// A URL is internal when its host matches the root's host (ignoring a
/// leading `www.`) and both use the same explicit port, if any.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sitegauge::url::{classify_link, LinkScope};
///
/// let root = Url::parse("https://example.com/").unwrap();
/// let link = Url::parse("http://www.example.com/about").unwrap();
/// assert_eq!(classify_link(&link, &root), LinkScope::Internal);
///
/// let link = Url::parse("https://other.org/").unwrap();
/// assert_eq!(classify_link(&link, &root), LinkScope::External);
/// ```
pub fn classify_link(url: &Url, root: &Url) -> LinkScope {
    match (site_host(url), site_host(root)) {
        (Some(a), Some(b)) if a == b && url.port() == root.port() => LinkScope::Internal,
        _ => LinkScope::External,
    }
}
