use crate::config::CrawlConfig;
use crate::state::page_result::{BadRequest, PageStat};
use crate::state::snapshot::CrawlSnapshot;
use crate::url::LinkScope;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// A URL waiting in, or taken from, the crawl queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUrl {
    /// Normalized URL
    pub url: String,
    pub scope: LinkScope,
    /// Link hops from the crawl root
    pub depth: u32,
}

impl QueuedUrl {
    pub fn internal(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            scope: LinkScope::Internal,
            depth,
        }
    }

    pub fn external(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            scope: LinkScope::External,
            depth,
        }
    }
}

/// Caps enforced at the ledger's dequeue and enqueue gates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlLimits {
    /// In-domain pages that may be dispatched before the crawl aborts
    pub max_pages: Option<u32>,
    /// External links that may be queued for probing
    pub max_external_links: u32,
}

impl CrawlLimits {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_external_links: config.max_external_links,
        }
    }
}

/// What a worker should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Dispatch this URL; it is already marked visited
    Task(QueuedUrl),
    /// Queue is empty and no worker is mid-flight
    Exhausted,
    /// `max-pages` in-domain pages have been dispatched
    LimitReached,
}

#[derive(Debug, Default)]
struct Ledger {
    visited: HashSet<String>,
    queue: VecDeque<QueuedUrl>,
    /// Mirror of `queue` membership
    queued: HashSet<String>,
    in_flight: HashMap<String, QueuedUrl>,
    /// Redirect targets claimed by an in-flight dispatch, keyed by its URL
    claimed_targets: HashMap<String, String>,
    stats: HashMap<String, PageStat>,
    bad_requests: HashMap<String, BadRequest>,
    /// Every distinct external link discovered
    external_links: BTreeSet<String>,
    /// External links queued for probing, counted against the budget
    external_queued: u32,
    pages_dispatched: u32,
    external_dispatched: u32,
    limits: CrawlLimits,
}

impl Ledger {
    fn is_known(&self, url: &str) -> bool {
        self.visited.contains(url) || self.queued.contains(url)
    }

    fn push(&mut self, entry: QueuedUrl) -> bool {
        if self.is_known(&entry.url) {
            return false;
        }
        self.queued.insert(entry.url.clone());
        self.queue.push_back(entry);
        true
    }

    /// Pops the next dispatchable URL, marking it visited in the same step
    fn pop(&mut self) -> Option<Next> {
        while let Some(front) = self.queue.front() {
            // Claimed elsewhere (a redirect target) after being queued
            if self.visited.contains(&front.url) {
                if let Some(stale) = self.queue.pop_front() {
                    self.queued.remove(&stale.url);
                }
                continue;
            }

            if front.scope == LinkScope::Internal {
                if let Some(max) = self.limits.max_pages {
                    if self.pages_dispatched >= max {
                        return Some(Next::LimitReached);
                    }
                }
            }

            let task = self.queue.pop_front()?;
            self.queued.remove(&task.url);
            self.visited.insert(task.url.clone());
            self.in_flight.insert(task.url.clone(), task.clone());
            match task.scope {
                LinkScope::Internal => self.pages_dispatched += 1,
                LinkScope::External => self.external_dispatched += 1,
            }
            return Some(Next::Task(task));
        }

        self.in_flight.is_empty().then_some(Next::Exhausted)
    }
}

/// The mutable ledger of a crawl
///
/// Every operation takes the same lock, so claim, enqueue and dequeue are
/// mutually exclusive and a URL can be dispatched at most once.
#[derive(Debug)]
pub struct CrawlState {
    ledger: Mutex<Ledger>,
    /// Signalled whenever work is queued or a dispatch finishes
    changed: Notify,
}

impl CrawlState {
    pub fn new(limits: CrawlLimits) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                limits,
                ..Ledger::default()
            }),
            changed: Notify::new(),
        }
    }

    /// Rebuilds a ledger from a saved snapshot
    pub fn restore(snapshot: CrawlSnapshot, limits: CrawlLimits) -> Self {
        let mut ledger = Ledger {
            visited: snapshot.visited.into_iter().collect(),
            stats: snapshot.stats.into_iter().collect(),
            bad_requests: snapshot.bad_requests.into_iter().collect(),
            external_links: snapshot.external_links.into_iter().collect(),
            external_queued: snapshot.external_queued,
            pages_dispatched: snapshot.pages_dispatched,
            external_dispatched: snapshot.external_dispatched,
            limits,
            ..Ledger::default()
        };
        for entry in snapshot.queue {
            ledger.push(entry);
        }

        Self {
            ledger: Mutex::new(ledger),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        // The ledger has no invariants a panicking holder could break half-way
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `url` visited iff it was not already; the crawl's sole dedup gate
    pub fn try_claim(&self, url: &str) -> bool {
        self.lock().visited.insert(url.to_string())
    }

    /// Claims the final URL a dispatched `source` redirected to
    ///
    /// The claim is tied to `source` until it finishes, so a snapshot taken
    /// in between leaves the target unvisited.
    pub fn try_claim_target(&self, source: &str, target: &str) -> bool {
        let mut ledger = self.lock();
        if !ledger.visited.insert(target.to_string()) {
            return false;
        }
        if ledger.in_flight.contains_key(source) {
            ledger
                .claimed_targets
                .insert(source.to_string(), target.to_string());
        }
        true
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.lock().visited.contains(url)
    }

    /// Appends URLs that are neither visited nor already queued
    ///
    /// # Returns
    ///
    /// The number of URLs actually added.
    pub fn enqueue<I>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = QueuedUrl>,
    {
        let added = {
            let mut ledger = self.lock();
            urls.into_iter().map(|u| ledger.push(u)).filter(|&pushed| pushed).count()
        };
        if added > 0 {
            self.changed.notify_waiters();
        }
        added
    }

    /// Records an external link and queues it for probing while budget remains
    ///
    /// Returns true if the link was queued.
    pub fn enqueue_external(&self, url: &str, depth: u32) -> bool {
        let queued = {
            let mut ledger = self.lock();
            if !ledger.external_links.insert(url.to_string()) {
                return false;
            }
            if ledger.external_queued >= ledger.limits.max_external_links {
                return false;
            }
            let pushed = ledger.push(QueuedUrl::external(url, depth));
            if pushed {
                ledger.external_queued += 1;
            }
            pushed
        };
        if queued {
            self.changed.notify_waiters();
        }
        queued
    }

    /// Takes the next URL without waiting
    ///
    /// Returns None when the queue has nothing dispatchable right now,
    /// including when the page limit has been reached.
    pub fn dequeue(&self) -> Option<QueuedUrl> {
        match self.lock().pop() {
            Some(Next::Task(task)) => Some(task),
            _ => None,
        }
    }

    /// Waits until there is work, the crawl is exhausted, or the page limit is hit
    ///
    /// Exhaustion is only reported once the queue is empty and no dispatch is
    /// outstanding, so a worker about to enqueue links keeps the others waiting.
    pub async fn next_task(&self) -> Next {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between the two is not lost
            notified.as_mut().enable();

            if let Some(next) = self.lock().pop() {
                return next;
            }
            notified.await;
        }
    }

    /// Marks a dispatched URL as no longer in flight
    pub fn finish(&self, url: &str) {
        {
            let mut ledger = self.lock();
            ledger.in_flight.remove(url);
            ledger.claimed_targets.remove(url);
        }
        self.changed.notify_waiters();
    }

    pub fn record_stat(&self, url: &str, stat: PageStat) {
        self.lock().stats.insert(url.to_string(), stat);
    }

    pub fn record_failure(&self, url: &str, failure: BadRequest) {
        self.lock().bad_requests.insert(url.to_string(), failure);
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn visited_count(&self) -> usize {
        self.lock().visited.len()
    }

    pub fn pages_dispatched(&self) -> u32 {
        self.lock().pages_dispatched
    }

    pub fn external_dispatched(&self) -> u32 {
        self.lock().external_dispatched
    }

    pub fn external_links_seen(&self) -> usize {
        self.lock().external_links.len()
    }

    pub fn stats(&self) -> HashMap<String, PageStat> {
        self.lock().stats.clone()
    }

    pub fn bad_requests(&self) -> HashMap<String, BadRequest> {
        self.lock().bad_requests.clone()
    }

    /// Captures the ledger for persistence
    ///
    /// URLs still in flight are put back at the head of the saved queue and
    /// left out of the saved visited set, so a resumed crawl dispatches them
    /// again. Redirect targets they claimed are left out of visited too.
    pub fn snapshot(&self, domain: &str, root_url: &str) -> CrawlSnapshot {
        let ledger = self.lock();

        let mut in_flight: Vec<QueuedUrl> = ledger.in_flight.values().cloned().collect();
        in_flight.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.url.cmp(&b.url)));

        let in_flight_pages = in_flight
            .iter()
            .filter(|t| t.scope == LinkScope::Internal)
            .count() as u32;
        let in_flight_external = in_flight.len() as u32 - in_flight_pages;

        let claimed: HashSet<&str> = ledger
            .claimed_targets
            .values()
            .map(String::as_str)
            .collect();
        let mut visited: Vec<String> = ledger
            .visited
            .iter()
            .filter(|url| !ledger.in_flight.contains_key(*url))
            .filter(|url| !claimed.contains(url.as_str()))
            .cloned()
            .collect();
        visited.sort();

        let queue = in_flight
            .into_iter()
            .chain(ledger.queue.iter().cloned())
            .collect();

        CrawlSnapshot {
            domain: domain.to_string(),
            root_url: root_url.to_string(),
            visited,
            queue,
            stats: ledger
                .stats
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bad_requests: ledger
                .bad_requests
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            external_links: ledger.external_links.iter().cloned().collect(),
            external_queued: ledger.external_queued,
            pages_dispatched: ledger.pages_dispatched - in_flight_pages,
            external_dispatched: ledger.external_dispatched - in_flight_external,
        }
    }
}
