//! Network transport for single HTTP exchanges
//!
//! This module issues one logical request at a time, including:
//! - Per-attempt timeouts that drop the in-flight attempt
//! - Retries for transport-level failures only (never for 4xx/5xx)
//! - A cancellation token that stops further attempts once a crawl aborts
//! - Classification of failures into a small set of error kinds
//!
//! The transport knows nothing about crawling. The actual wire I/O sits
//! behind the [`HttpExchange`] trait so tests can substitute a scripted server.

mod exchange;
mod network;

pub use exchange::{build_http_client, decode_body, HttpExchange, ReqwestExchange};
pub use network::NetworkTransport;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Classified transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// No complete response arrived within the request timeout
    Timeout,
    /// DNS, TCP or TLS setup failed
    ConnectionFailure,
    /// The response arrived but its body could not be read or decoded
    MalformedResponse,
    /// Anything else the HTTP layer rejected
    ProtocolError,
}

impl TransportErrorKind {
    /// Returns true for failures worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailure => "connection_failure",
            Self::MalformedResponse => "malformed_response",
            Self::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a single exchange produced on the wire
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status_code: u16,
    pub headers: HeaderMap,
    /// Body after content-encoding has been undone
    pub body: Vec<u8>,
    /// Bytes actually transferred
    pub wire_size: usize,
}

/// Failure of a single exchange attempt
#[derive(Debug, Clone)]
pub struct ExchangeError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A completed HTTP response, whatever its status code
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The URL that was requested
    pub url: Url,
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub wire_size: usize,
    /// Duration of the attempt that produced this response
    pub elapsed_ms: u64,
    /// Attempts spent, including the successful one
    pub attempts: u32,
}

impl HttpResponse {
    /// Returns the first value of a header as a string, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status_code, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            })
            .unwrap_or(false)
    }
}

/// A request that failed at the transport level after all permitted attempts
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub message: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.kind, self.attempts, self.message
        )
    }
}

/// Result of [`NetworkTransport::fetch`]
pub type FetchResult = Result<HttpResponse, TransportFailure>;
