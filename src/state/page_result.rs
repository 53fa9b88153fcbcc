//! Per-page records shared by the crawl ledger, analyzers and reporting

use crate::crawler::RedirectChain;
use crate::telemetry::{Caching, Compression, SecurityHeaders, Technology, Telemetry};
use crate::transport::{HttpResponse, TransportErrorKind, TransportFailure};
use crate::url::LinkScope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a dispatched URL did not end in success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    // ===== Transport =====
    Timeout,
    ConnectionFailure,
    MalformedResponse,
    ProtocolError,

    // ===== Terminal HTTP =====
    /// A well-formed 4xx/5xx response
    HttpStatus(u16),

    // ===== Redirect =====
    TooManyRedirects,
    RedirectLoop,
    /// `Location` that does not resolve to an http(s) URL
    InvalidRedirect,

    // ===== Content =====
    ContentParse,
}

/// The four ways a dispatched URL can end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    Success,
    BadRequest,
    RedirectError,
    ContentError,
}

impl FailureKind {
    pub fn outcome(&self) -> PageOutcome {
        match self {
            Self::Timeout
            | Self::ConnectionFailure
            | Self::MalformedResponse
            | Self::ProtocolError
            | Self::HttpStatus(_) => PageOutcome::BadRequest,
            Self::TooManyRedirects | Self::RedirectLoop | Self::InvalidRedirect => {
                PageOutcome::RedirectError
            }
            Self::ContentParse => PageOutcome::ContentError,
        }
    }

    /// Converts the kind to its database string representation
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::ConnectionFailure => "connection_failure".to_string(),
            Self::MalformedResponse => "malformed_response".to_string(),
            Self::ProtocolError => "protocol_error".to_string(),
            Self::HttpStatus(code) => format!("http_{}", code),
            Self::TooManyRedirects => "too_many_redirects".to_string(),
            Self::RedirectLoop => "redirect_loop".to_string(),
            Self::InvalidRedirect => "invalid_redirect".to_string(),
            Self::ContentParse => "content_parse".to_string(),
        }
    }

    /// Parses a kind from its database string representation
    ///
    /// Returns None if the string doesn't match any known kind.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "connection_failure" => Some(Self::ConnectionFailure),
            "malformed_response" => Some(Self::MalformedResponse),
            "protocol_error" => Some(Self::ProtocolError),
            "too_many_redirects" => Some(Self::TooManyRedirects),
            "redirect_loop" => Some(Self::RedirectLoop),
            "invalid_redirect" => Some(Self::InvalidRedirect),
            "content_parse" => Some(Self::ContentParse),
            other => other
                .strip_prefix("http_")
                .and_then(|code| code.parse().ok())
                .map(Self::HttpStatus),
        }
    }
}

impl From<TransportErrorKind> for FailureKind {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Timeout => Self::Timeout,
            TransportErrorKind::ConnectionFailure => Self::ConnectionFailure,
            TransportErrorKind::MalformedResponse => Self::MalformedResponse,
            TransportErrorKind::ProtocolError => Self::ProtocolError,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpStatus(code) => write!(f, "HTTP {}", code),
            Self::TooManyRedirects => write!(f, "too many redirects"),
            Self::RedirectLoop => write!(f, "loop detected"),
            other => write!(f, "{}", other.to_db_string().replace('_', " ")),
        }
    }
}

/// Error attached to a page record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageError {
    pub kind: FailureKind,
    pub message: String,
    /// Transport attempts spent on the failing hop
    pub attempts: u32,
}

impl PageError {
    pub fn new(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }
}

impl From<&TransportFailure> for PageError {
    fn from(failure: &TransportFailure) -> Self {
        Self::new(failure.kind.into(), failure.message.clone(), failure.attempts)
    }
}

/// Per-URL statistics kept in the crawl ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStat {
    pub response_time_ms: u64,
    pub page_size: usize,
    pub status_code: Option<u16>,
}

/// Failed-request ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadRequest {
    pub kind: FailureKind,
    pub attempts: u32,
    pub last_error: String,
}

impl From<&PageError> for BadRequest {
    fn from(error: &PageError) -> Self {
        Self {
            kind: error.kind,
            attempts: error.attempts,
            last_error: error.message.clone(),
        }
    }
}

/// Everything the crawl learned about one dispatched URL
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub url: String,
    /// Last URL of the redirect chain; equals `url` when nothing redirected
    pub final_url: String,
    pub scope: LinkScope,
    /// Link hops from the crawl root
    pub depth: u32,
    /// Status of the final response, if any response arrived
    pub status_code: Option<u16>,
    /// End-to-end time across all redirect hops and retries (milliseconds)
    pub response_time_ms: u64,
    /// Decoded body size in bytes
    pub page_size: usize,
    pub redirect_chain: RedirectChain,
    pub security_headers: Option<SecurityHeaders>,
    pub technologies: Vec<Technology>,
    pub compression: Option<Compression>,
    pub caching: Option<Caching>,
    /// Bytes per second of the final response
    pub download_speed: f64,
    pub title: Option<String>,
    /// Outbound links found in the document
    pub links_found: usize,
    pub error: Option<PageError>,
}

impl PageResult {
    /// Record for a URL that never reached a final response
    pub fn failed(
        url: &str,
        scope: LinkScope,
        depth: u32,
        redirect_chain: RedirectChain,
        response_time_ms: u64,
        error: PageError,
    ) -> Self {
        Self {
            url: url.to_string(),
            final_url: redirect_chain.final_url.clone(),
            scope,
            depth,
            status_code: redirect_chain.hops.last().map(|hop| hop.status_code),
            response_time_ms,
            page_size: 0,
            redirect_chain,
            security_headers: None,
            technologies: Vec::new(),
            compression: None,
            caching: None,
            download_speed: 0.0,
            title: None,
            links_found: 0,
            error: Some(error),
        }
    }

    /// Record for a URL whose redirect chain ended in a response
    ///
    /// A 4xx/5xx final status is recorded as an error; its telemetry is kept.
    pub fn from_response(
        url: &str,
        scope: LinkScope,
        depth: u32,
        redirect_chain: RedirectChain,
        response: &HttpResponse,
        telemetry: Telemetry,
    ) -> Self {
        let error = (response.status_code >= 400).then(|| {
            PageError::new(
                FailureKind::HttpStatus(response.status_code),
                format!("HTTP {}", response.status_code),
                response.attempts,
            )
        });

        Self {
            url: url.to_string(),
            final_url: response.url.to_string(),
            scope,
            depth,
            status_code: Some(response.status_code),
            response_time_ms: telemetry.timing.response_time_ms,
            page_size: telemetry.timing.page_size,
            redirect_chain,
            security_headers: Some(telemetry.security),
            technologies: telemetry.technologies,
            compression: Some(telemetry.compression),
            caching: Some(telemetry.caching),
            download_speed: telemetry.timing.download_speed,
            title: None,
            links_found: 0,
            error,
        }
    }

    pub fn outcome(&self) -> PageOutcome {
        self.error
            .as_ref()
            .map(|e| e.kind.outcome())
            .unwrap_or(PageOutcome::Success)
    }

    pub fn stat(&self) -> PageStat {
        PageStat {
            response_time_ms: self.response_time_ms,
            page_size: self.page_size,
            status_code: self.status_code,
        }
    }
}
