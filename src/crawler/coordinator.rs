//! Crawler coordinator - crawl orchestration
//!
//! This module contains the crawl state machine and its worker pool,
//! including:
//! - Seeding the ledger from the root URL or a saved snapshot
//! - Running exactly `max-parallel-crawl` workers with per-worker pacing
//! - Resolving, measuring, parsing and analyzing each dispatched URL
//! - Enqueueing same-site links and probing a bounded number of external ones
//! - Abort handling, periodic checkpoints and the final save

use crate::analyzer::{AnalyzerPipeline, Finding, PageReport};
use crate::config::{Config, CrawlConfig};
use crate::crawler::parser::parse_document;
use crate::crawler::redirect::{RedirectResolver, Resolution};
use crate::output::CrawlSummary;
use crate::state::{
    BadRequest, CrawlLimits, CrawlState, FailureKind, Next, PageError, PageResult, QueuedUrl,
};
use crate::storage::{RunStatus, SqliteStorage, StorageAdapter, StorageError};
use crate::telemetry::TelemetryExtractor;
use crate::transport::{HttpExchange, HttpResponse, NetworkTransport, ReqwestExchange};
use crate::url::{classify_link, extract_domain, normalize_url, LinkScope};
use crate::{GaugeError, UrlError};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Lifecycle of one crawl
///
/// `Idle -> Running -> (Draining | Aborted) -> Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Idle,
    Running,
    /// Workers agreed the queue is exhausted
    Draining,
    /// Stopped early; in-flight pages finish but nothing new is dispatched
    Aborted,
    Terminated,
}

impl CrawlPhase {
    pub fn can_transition_to(&self, next: CrawlPhase) -> bool {
        use CrawlPhase::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Draining)
                | (Running, Aborted)
                | (Draining, Terminated)
                | (Aborted, Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Aborted => "aborted",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a crawl was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The caller cancelled through [`Coordinator::abort_handle`]
    Cancelled,
    /// `max-pages` in-domain pages were dispatched
    PageLimit,
    /// A checkpoint could not be saved
    StorageFailure,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Cancelled => "cancelled by caller",
            Self::PageLimit => "page limit reached",
            Self::StorageFailure => "checkpoint failed",
        };
        write!(f, "{}", reason)
    }
}

/// Shared by every worker of one run
struct CrawlContext {
    state: Arc<CrawlState>,
    resolver: Arc<RedirectResolver>,
    extractor: Arc<TelemetryExtractor>,
    pipeline: Arc<AnalyzerPipeline>,
    reports: Option<UnboundedSender<PageReport>>,
    cancel: CancellationToken,
    abort_reason: Arc<Mutex<Option<AbortReason>>>,
    root: Url,
    crawl_delay: Duration,
    max_depth: Option<u32>,
}

impl CrawlContext {
    /// Records the first abort reason and stops all new dispatching
    fn abort(&self, reason: AbortReason) {
        record_abort(&self.abort_reason, reason);
        self.cancel.cancel();
    }
}

fn record_abort(slot: &Mutex<Option<AbortReason>>, reason: AbortReason) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        tracing::info!("Aborting crawl: {}", reason);
        *slot = Some(reason);
    }
}

/// Takes a dispatched URL out of the in-flight set on drop, even if the
/// worker panics
struct InFlight<'a> {
    state: &'a CrawlState,
    url: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.finish(self.url);
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: CrawlConfig,
    root: Url,
    domain: String,
    phase: CrawlPhase,
    state: Arc<CrawlState>,
    resolver: Arc<RedirectResolver>,
    extractor: Arc<TelemetryExtractor>,
    pipeline: Arc<AnalyzerPipeline>,
    reports: Option<UnboundedSender<PageReport>>,
    storage: Box<dyn StorageAdapter>,
    cancel: CancellationToken,
    abort_reason: Arc<Mutex<Option<AbortReason>>>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// With `resume` set in the storage section, an unfinished snapshot of the
    /// same domain is restored; otherwise any saved state is cleared and the
    /// queue is seeded with the root URL.
    ///
    /// # Arguments
    ///
    /// * `config` - The crawl configuration
    /// * `exchange` - Wire-level HTTP implementation
    /// * `storage` - Where checkpoints and the final ledger go
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to [`run`](Self::run)
    /// * `Err(GaugeError)` - Invalid root URL or storage failure while loading
    pub fn new(
        config: &Config,
        exchange: Arc<dyn HttpExchange>,
        mut storage: Box<dyn StorageAdapter>,
    ) -> Result<Self, GaugeError> {
        let root = normalize_url(&config.site.root_url)?;
        let domain = extract_domain(&root).ok_or(UrlError::MissingDomain)?;
        let limits = CrawlLimits::from_config(&config.crawl);

        let restored = if config.storage.resume {
            storage.load(&domain)?
        } else {
            storage.clear(&domain)?;
            None
        };

        let state = match restored {
            Some(snapshot) if !snapshot.is_complete() => {
                tracing::info!(
                    "Resuming crawl of {}: {} visited, {} queued",
                    domain,
                    snapshot.visited.len(),
                    snapshot.queue.len()
                );
                CrawlState::restore(snapshot, limits)
            }
            previous => {
                if previous.is_some() {
                    tracing::info!("Previous crawl of {} finished, starting fresh", domain);
                }
                let state = CrawlState::new(limits);
                state.enqueue([QueuedUrl::internal(root.as_str(), 0)]);
                state
            }
        };

        let cancel = CancellationToken::new();
        let transport = NetworkTransport::new(exchange, &config.crawl, cancel.clone());
        let resolver = RedirectResolver::new(Arc::new(transport), config.crawl.max_redirects);

        Ok(Self {
            config: config.crawl.clone(),
            root,
            domain,
            phase: CrawlPhase::Idle,
            state: Arc::new(state),
            resolver: Arc::new(resolver),
            extractor: Arc::new(TelemetryExtractor::new()?),
            pipeline: Arc::new(AnalyzerPipeline::with_defaults()),
            reports: None,
            storage,
            cancel,
            abort_reason: Arc::new(Mutex::new(None)),
        })
    }

    /// Builds a coordinator over real HTTP and the configured SQLite database
    pub fn from_config(config: &Config, config_hash: &str) -> Result<Self, GaugeError> {
        let exchange = ReqwestExchange::new(&config.crawl.user_agent)?;
        let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?
            .with_config_hash(config_hash);
        Self::new(config, Arc::new(exchange), Box::new(storage))
    }

    /// Replaces the analyzers run against every parsed page
    pub fn with_pipeline(mut self, pipeline: AnalyzerPipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Delivers a [`PageReport`] for every completed page
    pub fn with_report_sink(mut self, sink: UnboundedSender<PageReport>) -> Self {
        self.reports = Some(sink);
        self
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn state(&self) -> &Arc<CrawlState> {
        &self.state
    }

    /// Token that aborts the crawl when cancelled
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&mut self, next: CrawlPhase) -> Result<(), GaugeError> {
        if !self.phase.can_transition_to(next) {
            return Err(GaugeError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::info!("Crawl phase: {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// The first reason the crawl was aborted for, if it was
    pub fn abort_reason(&self) -> Option<AbortReason> {
        *self
            .abort_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn save_snapshot(&mut self) -> Result<(), StorageError> {
        let snapshot = self.state.snapshot(&self.domain, self.root.as_str());
        self.storage.save(&snapshot)
    }

    /// Runs the crawl to termination
    ///
    /// Per-page failures are recorded in the ledger and never returned. The
    /// only errors are storage failures, returned after the crawl has drained.
    pub async fn run(&mut self) -> Result<CrawlSummary, GaugeError> {
        self.transition(CrawlPhase::Running)?;
        let started = Instant::now();

        tracing::info!(
            "Starting crawl of {} with {} workers",
            self.root,
            self.config.max_parallel_crawl
        );

        let ctx = Arc::new(CrawlContext {
            state: self.state.clone(),
            resolver: self.resolver.clone(),
            extractor: self.extractor.clone(),
            pipeline: self.pipeline.clone(),
            reports: self.reports.take(),
            cancel: self.cancel.clone(),
            abort_reason: self.abort_reason.clone(),
            root: self.root.clone(),
            crawl_delay: self.config.crawl_delay(),
            max_depth: self.config.max_depth,
        });

        let mut workers = JoinSet::new();
        for id in 0..self.config.max_parallel_crawl {
            workers.spawn(run_worker(id, ctx.clone()));
        }

        let mut checkpoints = self
            .config
            .checkpoint_interval()
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));
        let cancel = self.cancel.clone();
        let mut storage_error: Option<StorageError> = None;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => tracing::error!("Worker task failed: {}", e),
                    None => break,
                },
                _ = next_checkpoint(&mut checkpoints) => {
                    match self.save_snapshot() {
                        Ok(()) => tracing::debug!("Checkpoint saved for {}", self.domain),
                        Err(e) => {
                            tracing::error!("Checkpoint failed for {}: {}", self.domain, e);
                            storage_error = Some(e);
                            checkpoints = None;
                            ctx.abort(AbortReason::StorageFailure);
                        }
                    }
                }
                _ = cancel.cancelled(), if self.phase == CrawlPhase::Running => {
                    record_abort(&self.abort_reason, AbortReason::Cancelled);
                    self.transition(CrawlPhase::Aborted)?;
                }
            }
        }
        drop(ctx);

        if self.phase == CrawlPhase::Running {
            if cancel.is_cancelled() {
                record_abort(&self.abort_reason, AbortReason::Cancelled);
                self.transition(CrawlPhase::Aborted)?;
            } else {
                self.transition(CrawlPhase::Draining)?;
            }
        }
        let ended_in = self.phase;

        if let Err(e) = self.save_snapshot() {
            tracing::error!("Final save failed for {}: {}", self.domain, e);
            storage_error.get_or_insert(e);
        }

        let status = match (&storage_error, ended_in) {
            (Some(_), _) => RunStatus::Failed,
            (None, CrawlPhase::Aborted) => RunStatus::Interrupted,
            (None, _) => RunStatus::Completed,
        };
        if let Err(e) = self.storage.finish(&self.domain, status) {
            tracing::error!("Failed to record run status for {}: {}", self.domain, e);
            storage_error.get_or_insert(e);
        }

        self.transition(CrawlPhase::Terminated)?;

        let summary = CrawlSummary::from_state(
            &self.domain,
            &self.state,
            ended_in,
            self.abort_reason(),
            millis(started.elapsed()),
        );
        tracing::info!(
            "Crawl of {} {}: {} pages, {} failed, {} external probes in {:?}",
            self.domain,
            if ended_in == CrawlPhase::Aborted { "aborted" } else { "completed" },
            summary.pages_crawled,
            summary.failed(),
            summary.external_probed,
            started.elapsed()
        );

        match storage_error {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }
}

async fn next_checkpoint(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// One worker: pace, dequeue, process, repeat
async fn run_worker(id: u32, ctx: Arc<CrawlContext>) {
    let mut last_request: Option<Instant> = None;

    loop {
        if let Some(last) = last_request {
            let wait = ctx.crawl_delay.saturating_sub(last.elapsed());
            if !wait.is_zero() {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            next = ctx.state.next_task() => next,
        };

        let task = match next {
            Next::Task(task) => task,
            Next::Exhausted => {
                tracing::debug!("Worker {} done: queue exhausted", id);
                break;
            }
            Next::LimitReached => {
                ctx.abort(AbortReason::PageLimit);
                break;
            }
        };

        let _in_flight = InFlight {
            state: &ctx.state,
            url: &task.url,
        };
        last_request = Some(Instant::now());
        crawl_one(&ctx, &task).await;
    }
}

/// Processes a single dispatched URL end to end
async fn crawl_one(ctx: &CrawlContext, task: &QueuedUrl) {
    let url = match Url::parse(&task.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("Dropping unparseable queued URL {}: {}", task.url, e);
            ctx.state.record_failure(
                &task.url,
                BadRequest {
                    kind: FailureKind::ProtocolError,
                    attempts: 0,
                    last_error: e.to_string(),
                },
            );
            return;
        }
    };

    tracing::debug!(
        "Dispatching {} ({}, depth {})",
        url,
        task.scope.as_str(),
        task.depth
    );

    let started = Instant::now();
    let Resolution { chain, outcome } = ctx.resolver.resolve(&url).await;
    let response_time_ms = millis(started.elapsed());

    let (page, findings) = match outcome {
        Err(error) => {
            let page = PageResult::failed(
                &task.url,
                task.scope,
                task.depth,
                chain,
                response_time_ms,
                error.to_page_error(),
            );
            (page, Vec::new())
        }
        Ok(response) => {
            // A redirect target is claimed so nobody dispatches it again
            let duplicate = response.url.as_str() != task.url
                && !ctx.state.try_claim_target(&task.url, response.url.as_str());
            let same_site = classify_link(&response.url, &ctx.root) == LinkScope::Internal;

            let telemetry = ctx.extractor.extract(&response, response_time_ms);
            let mut page = PageResult::from_response(
                &task.url,
                task.scope,
                task.depth,
                chain,
                &response,
                telemetry,
            );

            let examine_body = task.scope == LinkScope::Internal
                && same_site
                && !duplicate
                && page.error.is_none()
                && response.is_html();

            if duplicate {
                tracing::debug!("{} resolved to already visited {}", task.url, response.url);
            }

            if examine_body {
                let (links, findings) = examine(ctx, &response, &mut page);
                enqueue_links(ctx, task, links);
                (page, findings)
            } else {
                (page, Vec::new())
            }
        }
    };

    if page.status_code.is_some() {
        ctx.state.record_stat(&task.url, page.stat());
    }

    match &page.error {
        Some(error) => {
            tracing::warn!("{} failed: {} ({})", task.url, error.kind, error.message);
            ctx.state.record_failure(&task.url, BadRequest::from(error));
        }
        None => tracing::debug!(
            "{} -> {:?} in {}ms",
            task.url,
            page.status_code,
            page.response_time_ms
        ),
    }

    let dispatched = ctx.state.pages_dispatched();
    if task.scope == LinkScope::Internal && dispatched % 10 == 0 {
        tracing::info!(
            "Progress: {} pages dispatched, {} queued, {} in flight",
            dispatched,
            ctx.state.queue_len(),
            ctx.state.in_flight()
        );
    }

    if let Some(reports) = &ctx.reports {
        // A dropped receiver only means nobody is listening any more
        let _ = reports.send(PageReport { page, findings });
    }
}

/// Parses the body, runs analyzers and returns the page's outbound links
///
/// Kept synchronous so the parsed document never lives across an await.
fn examine(
    ctx: &CrawlContext,
    response: &HttpResponse,
    page: &mut PageResult,
) -> (Vec<Url>, Vec<Finding>) {
    match parse_document(&response.body, response.content_type(), &response.url) {
        Ok(parsed) => {
            page.title = parsed.title.clone();
            page.links_found = parsed.links.len();
            let findings = ctx.pipeline.run(&parsed.document, &page.url, page);
            (parsed.links, findings)
        }
        Err(e) => {
            page.error = Some(PageError::new(
                FailureKind::ContentParse,
                e.to_string(),
                response.attempts,
            ));
            (Vec::new(), Vec::new())
        }
    }
}

/// Queues same-site links within the depth bound and offers external ones for probing
fn enqueue_links(ctx: &CrawlContext, task: &QueuedUrl, links: Vec<Url>) {
    let depth = task.depth + 1;
    let mut internal = Vec::new();

    for link in links {
        let normalized = match normalize_url(link.as_str()) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("Skipping link {}: {}", link, e);
                continue;
            }
        };

        match classify_link(&normalized, &ctx.root) {
            LinkScope::Internal => {
                if ctx.max_depth.map_or(true, |max| depth <= max) {
                    internal.push(QueuedUrl::internal(normalized.as_str(), depth));
                }
            }
            LinkScope::External => {
                if ctx.state.enqueue_external(normalized.as_str(), depth) {
                    tracing::debug!("Queued external probe {}", normalized);
                }
            }
        }
    }

    let added = ctx.state.enqueue(internal);
    if added > 0 {
        tracing::debug!("{} new links queued from {}", added, task.url);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
