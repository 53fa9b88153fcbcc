//! Output module for end-of-crawl summaries
//!
//! This module handles:
//! - Condensing the crawl ledger into a [`CrawlSummary`]
//! - Printing the summary for the command-line caller

use crate::crawler::{AbortReason, CrawlPhase};
use crate::state::{CrawlState, PageOutcome};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a finished crawl amounted to
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub domain: String,

    /// `Draining` for a crawl that ran out of work, `Aborted` otherwise
    pub ended_in: CrawlPhase,

    pub abort_reason: Option<AbortReason>,

    /// In-domain pages dispatched, including those from a resumed run
    pub pages_crawled: u32,

    /// External links dispatched as probes
    pub external_probed: u32,

    /// Distinct external links discovered
    pub external_links_seen: usize,

    pub successes: u32,
    pub bad_requests: u32,
    pub redirect_errors: u32,
    pub content_errors: u32,

    /// Failure counts keyed by kind (`timeout`, `http_404`, ...)
    pub failures_by_kind: BTreeMap<String, u32>,

    /// Mean end-to-end response time over pages that got a response
    pub average_response_time_ms: f64,

    /// URLs left in the queue; non-zero only for an aborted crawl
    pub queue_remaining: usize,

    pub duration_ms: u64,
}

impl CrawlSummary {
    pub fn from_state(
        domain: &str,
        state: &CrawlState,
        ended_in: CrawlPhase,
        abort_reason: Option<AbortReason>,
        duration_ms: u64,
    ) -> Self {
        let mut bad_requests = 0;
        let mut redirect_errors = 0;
        let mut content_errors = 0;
        let mut failures_by_kind = BTreeMap::new();

        for failure in state.bad_requests().values() {
            match failure.kind.outcome() {
                PageOutcome::BadRequest => bad_requests += 1,
                PageOutcome::RedirectError => redirect_errors += 1,
                PageOutcome::ContentError => content_errors += 1,
                PageOutcome::Success => {}
            }
            *failures_by_kind
                .entry(failure.kind.to_db_string())
                .or_insert(0) += 1;
        }

        let stats = state.stats();
        let average_response_time_ms = if stats.is_empty() {
            0.0
        } else {
            let total: u64 = stats.values().map(|s| s.response_time_ms).sum();
            total as f64 / stats.len() as f64
        };

        let pages_crawled = state.pages_dispatched();
        let external_probed = state.external_dispatched();
        let failed = bad_requests + redirect_errors + content_errors;

        Self {
            domain: domain.to_string(),
            ended_in,
            abort_reason,
            pages_crawled,
            external_probed,
            external_links_seen: state.external_links_seen(),
            successes: (pages_crawled + external_probed).saturating_sub(failed),
            bad_requests,
            redirect_errors,
            content_errors,
            failures_by_kind,
            average_response_time_ms,
            queue_remaining: state.queue_len(),
            duration_ms,
        }
    }

    /// Pages and probes that ended in any kind of error
    pub fn failed(&self) -> u32 {
        self.bad_requests + self.redirect_errors + self.content_errors
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failed();
        if total == 0 {
            0.0
        } else {
            (self.successes as f64 / total as f64) * 100.0
        }
    }
}

/// Prints the summary to stdout in a formatted manner
pub fn print_summary(summary: &CrawlSummary) {
    println!("=== Crawl Summary: {} ===\n", summary.domain);

    match summary.abort_reason {
        Some(reason) => println!("Status: {} ({})", summary.ended_in, reason),
        None => println!("Status: completed"),
    }
    println!("Duration: {:.1}s", summary.duration_ms as f64 / 1000.0);
    println!();

    println!("Overview:");
    println!("  Pages crawled: {}", summary.pages_crawled);
    println!(
        "  External links: {} seen, {} probed",
        summary.external_links_seen, summary.external_probed
    );
    println!(
        "  Average response time: {:.0}ms",
        summary.average_response_time_ms
    );
    if summary.queue_remaining > 0 {
        println!("  Still queued: {}", summary.queue_remaining);
    }
    println!();

    println!("Outcomes:");
    println!("  Success: {}", summary.successes);
    println!("  Bad request: {}", summary.bad_requests);
    println!("  Redirect error: {}", summary.redirect_errors);
    println!("  Content error: {}", summary.content_errors);
    println!();

    if !summary.failures_by_kind.is_empty() {
        println!("Failures by Kind:");
        // Sort kinds by count (descending)
        let mut kinds: Vec<_> = summary.failures_by_kind.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        for (kind, count) in kinds {
            println!("  {}: {}", kind, count);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} requests)",
        summary.success_rate(),
        summary.successes,
        summary.successes + summary.failed()
    );
}
