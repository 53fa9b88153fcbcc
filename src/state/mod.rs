//! State module for tracking crawl progress
//!
//! This module provides the crawl ledger and the per-page records it keeps.
//!
//! # Components
//!
//! - `CrawlState`: visited set, FIFO queue, per-URL stats and failed-request ledger
//! - `PageResult`: everything learned about one dispatched URL
//! - `CrawlSnapshot`: serializable copy of the ledger for persistence and resume

mod ledger;
mod page_result;
mod snapshot;

// Re-export main types
pub use ledger::{CrawlLimits, CrawlState, Next, QueuedUrl};
pub use page_result::{
    BadRequest, FailureKind, PageError, PageOutcome, PageResult, PageStat,
};
pub use snapshot::CrawlSnapshot;
