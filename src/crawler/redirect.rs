//! Manual redirect following with loop detection

use crate::state::{FailureKind, PageError};
use crate::transport::{HttpResponse, NetworkTransport, TransportFailure};
use crate::url::normalize_url;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// One response in a redirect chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectHop {
    pub url: String,
    pub status_code: u16,
    /// Raw `Location` header, for redirect responses
    pub location: Option<String>,
}

/// Ordered record of every response received while resolving a URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedirectChain {
    pub hops: Vec<RedirectHop>,
    /// Last URL the chain reached
    pub final_url: String,
    /// A URL repeated within this chain
    pub has_loop: bool,
}

impl RedirectChain {
    fn starting_at(url: &Url) -> Self {
        Self {
            final_url: url.to_string(),
            ..Self::default()
        }
    }

    /// Number of redirects that were followed or refused
    pub fn redirect_count(&self) -> usize {
        self.hops.iter().filter(|hop| hop.location.is_some()).count()
    }
}

/// Why a chain ended without a final response
#[derive(Debug, Clone)]
pub enum ResolveError {
    Transport(TransportFailure),
    TooManyRedirects { max: u32 },
    Loop { url: String },
    InvalidLocation { location: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(failure) => write!(f, "{}", failure),
            Self::TooManyRedirects { max } => {
                write!(f, "too many redirects (more than {})", max)
            }
            Self::Loop { url } => write!(f, "redirect loop detected at {}", url),
            Self::InvalidLocation { location } => {
                write!(f, "invalid redirect location '{}'", location)
            }
        }
    }
}

impl ResolveError {
    pub fn to_page_error(&self) -> PageError {
        match self {
            Self::Transport(failure) => PageError::from(failure),
            Self::TooManyRedirects { .. } => {
                PageError::new(FailureKind::TooManyRedirects, self.to_string(), 1)
            }
            Self::Loop { .. } => PageError::new(FailureKind::RedirectLoop, self.to_string(), 1),
            Self::InvalidLocation { .. } => {
                PageError::new(FailureKind::InvalidRedirect, self.to_string(), 1)
            }
        }
    }
}

/// Result of resolving one URL
#[derive(Debug)]
pub struct Resolution {
    pub chain: RedirectChain,
    pub outcome: Result<HttpResponse, ResolveError>,
}

/// Follows `Location` headers through [`NetworkTransport`]
///
/// Each hop is a separate fetch with its own retry budget. Loop detection uses
/// a seen-set local to one resolution, independent of the crawl's visited set.
pub struct RedirectResolver {
    transport: Arc<NetworkTransport>,
    max_redirects: u32,
}

impl RedirectResolver {
    pub fn new(transport: Arc<NetworkTransport>, max_redirects: u32) -> Self {
        Self {
            transport,
            max_redirects,
        }
    }

    /// Resolves `url` to its final response
    ///
    /// Issues at most `max_redirects + 1` fetches.
    pub async fn resolve(&self, url: &Url) -> Resolution {
        let mut chain = RedirectChain::starting_at(url);
        let mut seen = HashSet::from([url.to_string()]);
        let mut current = url.clone();
        let mut followed: u32 = 0;

        loop {
            let response = match self.transport.fetch(&current).await {
                Ok(response) => response,
                Err(failure) => {
                    return Resolution {
                        chain,
                        outcome: Err(ResolveError::Transport(failure)),
                    }
                }
            };

            // A 3xx without Location is a final response like any other
            let location = response
                .is_redirect()
                .then(|| response.header("location").map(str::to_string))
                .flatten();

            chain.hops.push(RedirectHop {
                url: current.to_string(),
                status_code: response.status_code,
                location: location.clone(),
            });

            let Some(location) = location else {
                return Resolution {
                    chain,
                    outcome: Ok(response),
                };
            };

            let next = match current
                .join(location.trim())
                .ok()
                .and_then(|joined| normalize_url(joined.as_str()).ok())
            {
                Some(next) => next,
                None => {
                    return Resolution {
                        chain,
                        outcome: Err(ResolveError::InvalidLocation { location }),
                    }
                }
            };

            chain.final_url = next.to_string();

            if !seen.insert(next.to_string()) {
                tracing::debug!("Redirect loop: {} -> {}", current, next);
                chain.has_loop = true;
                return Resolution {
                    chain,
                    outcome: Err(ResolveError::Loop {
                        url: next.to_string(),
                    }),
                };
            }

            followed += 1;
            if followed > self.max_redirects {
                return Resolution {
                    chain,
                    outcome: Err(ResolveError::TooManyRedirects {
                        max: self.max_redirects,
                    }),
                };
            }

            tracing::debug!(
                "Redirect {} {} -> {}",
                response.status_code,
                current,
                next
            );
            current = next;
        }
    }
}
