//! Per-page telemetry extraction
//!
//! This module derives non-content facts from one completed HTTP exchange:
//! - Security header presence, validity and a weighted score
//! - Compression and caching flags
//! - Technology fingerprints from headers and body markers
//! - Response time and download speed
//!
//! Extraction is a pure function of its inputs and never touches the network.

mod security;
mod technology;

pub use security::{parse_hsts_max_age, score_security_headers, HeaderCheck, SecurityHeaders};
pub use technology::{Evidence, TechCategory, Technology, TechnologyDetector};

use crate::transport::HttpResponse;
use reqwest::header::HeaderMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Compression {
    /// Value of `content-encoding`, lowercased
    pub encoding: Option<String>,
    pub compressed: bool,
    /// Bytes on the wire
    pub transfer_size: usize,
    /// Bytes after decoding
    pub content_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Caching {
    pub cache_control: Option<String>,
    /// `max-age` from `cache-control`, in seconds
    pub max_age: Option<u64>,
    pub no_store: bool,
    pub no_cache: bool,
    pub has_etag: bool,
    pub has_last_modified: bool,
    pub has_expires: bool,
}

impl Caching {
    pub fn is_cacheable(&self) -> bool {
        !self.no_store && (self.max_age.unwrap_or(0) > 0 || self.has_etag || self.has_last_modified)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timing {
    /// End-to-end time measured by the caller
    pub response_time_ms: u64,
    pub page_size: usize,
    /// Bytes per second; 0 when either size or time is zero
    pub download_speed: f64,
}

/// Everything extracted from one exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub security: SecurityHeaders,
    pub compression: Compression,
    pub caching: Caching,
    pub technologies: Vec<Technology>,
    pub timing: Timing,
}

/// Extracts [`Telemetry`] from completed responses
///
/// Holds the compiled technology signatures, so build one per crawl and share it.
pub struct TelemetryExtractor {
    detector: TechnologyDetector,
}

impl TelemetryExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            detector: TechnologyDetector::new()?,
        })
    }

    /// Derives telemetry for `response`
    ///
    /// # Arguments
    ///
    /// * `response` - The final response of a redirect chain
    /// * `response_time_ms` - End-to-end time the caller measured for the page
    pub fn extract(&self, response: &HttpResponse, response_time_ms: u64) -> Telemetry {
        let body = response.is_html().then_some(response.body.as_slice());

        Telemetry {
            security: score_security_headers(&response.headers),
            compression: compression(response),
            caching: caching(&response.headers),
            technologies: self.detector.detect(&response.headers, body),
            timing: Timing {
                response_time_ms,
                page_size: response.body.len(),
                download_speed: download_speed(response.body.len(), response_time_ms),
            },
        }
    }
}

fn compression(response: &HttpResponse) -> Compression {
    let encoding = response
        .header("content-encoding")
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());

    Compression {
        compressed: encoding.as_deref().map(|e| e != "identity").unwrap_or(false),
        encoding,
        transfer_size: response.wire_size,
        content_size: response.body.len(),
    }
}

fn caching(headers: &HeaderMap) -> Caching {
    let cache_control = headers
        .get_all("cache-control")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    let cache_control = (!cache_control.is_empty()).then_some(cache_control);

    let mut caching = Caching {
        has_etag: headers.contains_key("etag"),
        has_last_modified: headers.contains_key("last-modified"),
        has_expires: headers.contains_key("expires"),
        ..Caching::default()
    };

    if let Some(value) = &cache_control {
        for directive in value.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            match directive.split_once('=') {
                Some(("max-age", age)) => {
                    caching.max_age = age.trim().trim_matches('"').parse().ok();
                }
                _ if directive == "no-store" => caching.no_store = true,
                _ if directive == "no-cache" => caching.no_cache = true,
                _ => {}
            }
        }
    }

    caching.cache_control = cache_control;
    caching
}

/// Bytes per second, guarding against zero-duration and empty responses
pub fn download_speed(bytes: usize, elapsed_ms: u64) -> f64 {
    if bytes == 0 || elapsed_ms == 0 {
        return 0.0;
    }
    bytes as f64 / (elapsed_ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use url::Url;

    fn response(headers: &[(&'static str, &'static str)], body: &[u8]) -> HttpResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        HttpResponse {
            url: Url::parse("https://example.com/").unwrap(),
            status_code: 200,
            headers: map,
            body: body.to_vec(),
            wire_size: body.len(),
            elapsed_ms: 10,
            attempts: 1,
        }
    }

    #[test]
    fn test_download_speed() {
        assert_eq!(download_speed(2000, 500), 4000.0);
        assert_eq!(download_speed(0, 500), 0.0);
        assert_eq!(download_speed(2000, 0), 0.0);
        assert!(download_speed(1, 1).is_finite());
    }

    #[test]
    fn test_compression_flags() {
        let plain = compression(&response(&[], b"abc"));
        assert!(!plain.compressed);
        assert_eq!(plain.encoding, None);

        let gzip = compression(&response(&[("content-encoding", "GZIP")], b"abc"));
        assert!(gzip.compressed);
        assert_eq!(gzip.encoding.as_deref(), Some("gzip"));

        let identity = compression(&response(&[("content-encoding", "identity")], b"abc"));
        assert!(!identity.compressed);
    }

    #[test]
    fn test_caching_directives() {
        let headers = response(
            &[
                ("cache-control", "public, max-age=3600"),
                ("etag", "\"abc\""),
            ],
            b"",
        )
        .headers;

        let caching = caching(&headers);
        assert_eq!(caching.max_age, Some(3600));
        assert!(caching.has_etag);
        assert!(!caching.has_last_modified);
        assert!(!caching.no_store);
        assert!(caching.is_cacheable());
    }

    #[test]
    fn test_no_store_is_not_cacheable() {
        let headers = response(&[("cache-control", "no-store, no-cache")], b"").headers;
        let caching = caching(&headers);
        assert!(caching.no_store);
        assert!(caching.no_cache);
        assert_eq!(caching.max_age, None);
        assert!(!caching.is_cacheable());
    }

    #[test]
    fn test_missing_cache_headers() {
        let caching = caching(&HeaderMap::new());
        assert_eq!(caching, Caching::default());
    }

    #[test]
    fn test_extract_only_scans_html_bodies() {
        let extractor = TelemetryExtractor::new().unwrap();
        let marker = b"<script src=\"/_next/static/chunk.js\"></script>";

        let json = response(&[("content-type", "application/json")], marker);
        assert!(extractor.extract(&json, 10).technologies.is_empty());

        let html = response(&[("content-type", "text/html")], marker);
        let techs = extractor.extract(&html, 10).technologies;
        assert_eq!(techs.len(), 1);
        assert_eq!(techs[0].name, "Next.js");
    }

    #[test]
    fn test_extract_is_deterministic() {
        let extractor = TelemetryExtractor::new().unwrap();
        let page = response(
            &[
                ("content-type", "text/html"),
                ("server", "Apache"),
                ("x-frame-options", "DENY"),
                ("strict-transport-security", "max-age=600"),
            ],
            b"<html><body>/wp-content/</body></html>",
        );

        let first = extractor.extract(&page, 42);
        let second = extractor.extract(&page, 42);
        assert_eq!(first, second);
        assert_eq!(first.security.score, 45);
        assert_eq!(first.timing.response_time_ms, 42);
        assert_eq!(first.timing.page_size, page.body.len());
    }
}
