use crate::state::ledger::QueuedUrl;
use crate::state::page_result::{BadRequest, PageStat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time copy of a crawl ledger, as handed to storage
///
/// Maps are ordered so two snapshots of the same ledger compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSnapshot {
    pub domain: String,
    pub root_url: String,
    pub visited: Vec<String>,
    /// Dispatch order; re-queued in-flight URLs come first
    pub queue: Vec<QueuedUrl>,
    pub stats: BTreeMap<String, PageStat>,
    pub bad_requests: BTreeMap<String, BadRequest>,
    pub external_links: Vec<String>,
    pub external_queued: u32,
    pub pages_dispatched: u32,
    pub external_dispatched: u32,
}

impl CrawlSnapshot {
    /// True when a resumed crawl would have nothing left to dispatch
    pub fn is_complete(&self) -> bool {
        self.queue.is_empty()
    }
}
