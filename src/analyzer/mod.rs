//! Analyzer boundary
//!
//! Analyzers receive a parsed document together with the page's transport
//! record and return findings. They run synchronously on the worker that
//! produced the page and must treat their inputs as read-only.

mod builtin;

pub use builtin::{MixedContentAnalyzer, SecurityHeaderAnalyzer, TitleAnalyzer};

use crate::state::PageResult;
use scraper::Html;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One observation an analyzer made about a page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// Name of the analyzer that produced it
    pub analyzer: String,
    /// Stable machine-readable identifier, e.g. `title.missing`
    pub code: String,
    pub severity: Severity,
    pub message: String,
    /// Analyzer-specific payload
    pub data: serde_json::Value,
}

impl Finding {
    pub fn new(
        analyzer: &str,
        code: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            analyzer: analyzer.to_string(),
            code: code.to_string(),
            severity,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A content analyzer plugged into the crawl
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, document: &Html, url: &str, page: &PageResult) -> Vec<Finding>;
}

/// What the crawl hands to the reporting boundary for each completed page
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page: PageResult,
    pub findings: Vec<Finding>,
}

/// Ordered set of analyzers run against every parsed page
#[derive(Default)]
pub struct AnalyzerPipeline {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline with the analyzers that ship with the crate
    pub fn with_defaults() -> Self {
        Self::new()
            .register(SecurityHeaderAnalyzer)
            .register(TitleAnalyzer::default())
            .register(MixedContentAnalyzer)
    }

    pub fn register<A: Analyzer + 'static>(mut self, analyzer: A) -> Self {
        self.analyzers.push(Box::new(analyzer));
        self
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Runs every analyzer, in registration order
    ///
    /// A panicking analyzer is logged and skipped; the others still run.
    pub fn run(&self, document: &Html, url: &str, page: &PageResult) -> Vec<Finding> {
        let mut findings = Vec::new();
        for analyzer in &self.analyzers {
            match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(document, url, page))) {
                Ok(mut found) => findings.append(&mut found),
                Err(_) => {
                    tracing::error!("Analyzer '{}' panicked on {}", analyzer.name(), url);
                }
            }
        }
        findings
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crawler::RedirectChain;
    use crate::url::LinkScope;

    pub(crate) fn page(url: &str) -> PageResult {
        PageResult {
            url: url.to_string(),
            final_url: url.to_string(),
            scope: LinkScope::Internal,
            depth: 0,
            status_code: Some(200),
            response_time_ms: 10,
            page_size: 100,
            redirect_chain: RedirectChain::default(),
            security_headers: None,
            technologies: Vec::new(),
            compression: None,
            caching: None,
            download_speed: 0.0,
            title: None,
            links_found: 0,
            error: None,
        }
    }

    struct Counting;

    impl Analyzer for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn analyze(&self, _document: &Html, url: &str, _page: &PageResult) -> Vec<Finding> {
            vec![Finding::new("counting", "seen", Severity::Info, url)]
        }
    }

    struct Panicking;

    impl Analyzer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn analyze(&self, _document: &Html, _url: &str, _page: &PageResult) -> Vec<Finding> {
            panic!("analyzer bug")
        }
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let pipeline = AnalyzerPipeline::new().register(Counting).register(Counting);
        let document = Html::parse_document("<html></html>");

        let findings = pipeline.run(&document, "https://example.com/", &page("https://example.com/"));
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].message, "https://example.com/");
    }

    #[test]
    fn test_panicking_analyzer_is_isolated() {
        let pipeline = AnalyzerPipeline::new()
            .register(Panicking)
            .register(Counting);
        let document = Html::parse_document("<html></html>");

        let findings = pipeline.run(&document, "https://example.com/", &page("https://example.com/"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].analyzer, "counting");
    }

    #[test]
    fn test_default_pipeline() {
        let pipeline = AnalyzerPipeline::with_defaults();
        assert_eq!(pipeline.len(), 3);
        assert!(AnalyzerPipeline::new().is_empty());
    }
}
