use crate::config::CrawlConfig;
use crate::transport::{
    ExchangeError, FetchResult, HttpExchange, HttpResponse, TransportErrorKind, TransportFailure,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Issues single requests with timeout, retry and cancellation policy
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | Any HTTP status (2xx-5xx) | Returned as a response, never retried |
/// | Timeout | Retry up to `max-retries` times |
/// | Connection failure | Retry up to `max-retries` times |
/// | Malformed response | Immediate failure |
/// | Protocol error | Immediate failure |
/// | Crawl cancelled | No further attempt or backoff starts |
///
/// An attempt that is already on the wire when the crawl is cancelled runs
/// to completion, bounded by the request timeout.
pub struct NetworkTransport {
    exchange: Arc<dyn HttpExchange>,
    request_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
    cancel: CancellationToken,
}

impl NetworkTransport {
    pub fn new(
        exchange: Arc<dyn HttpExchange>,
        config: &CrawlConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            exchange,
            request_timeout: config.request_timeout(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            cancel,
        }
    }

    /// Fetches `url`, making at most `1 + max_retries` attempts
    pub async fn fetch(&self, url: &Url) -> FetchResult {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let attempt_started = Instant::now();

            // Dropping the exchange future on timeout cancels the attempt.
            let outcome = match tokio::time::timeout(self.request_timeout, self.exchange.execute(url))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ExchangeError::new(
                    TransportErrorKind::Timeout,
                    format!("no response within {}ms", self.request_timeout.as_millis()),
                )),
            };

            let error = match outcome {
                Ok(raw) => {
                    return Ok(HttpResponse {
                        url: url.clone(),
                        status_code: raw.status_code,
                        headers: raw.headers,
                        body: raw.body,
                        wire_size: raw.wire_size,
                        elapsed_ms: millis(attempt_started.elapsed()),
                        attempts: attempt,
                    })
                }
                Err(error) => error,
            };

            let failure = |attempts: u32| TransportFailure {
                kind: error.kind,
                message: error.message.clone(),
                attempts,
                elapsed_ms: millis(started.elapsed()),
            };

            if !error.kind.is_transient() || attempt > self.max_retries {
                return Err(failure(attempt));
            }

            if self.cancel.is_cancelled() {
                tracing::debug!("Not retrying {} after {}: crawl cancelled", url, error.kind);
                return Err(failure(attempt));
            }

            tracing::debug!(
                "Attempt {} for {} failed ({}): {}; retrying",
                attempt,
                url,
                error.kind,
                error.message
            );

            let backoff = backoff_for(self.retry_backoff, attempt);
            if !backoff.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(failure(attempt)),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// Linear backoff, saturating at `Duration::MAX`
fn backoff_for(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
