//! The wire-level exchange seam and its reqwest implementation

use crate::transport::{ExchangeError, RawResponse, TransportErrorKind};
use async_trait::async_trait;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING};
use reqwest::{redirect::Policy, Client};
use std::io::Read;
use std::time::Duration;
use url::Url;

/// Performs exactly one HTTP GET, with no timeout, retry or redirect following
///
/// Timeouts and retries are layered on top by [`super::NetworkTransport`],
/// so an implementation only has to report what happened on the wire.
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn execute(&self, url: &Url) -> Result<RawResponse, ExchangeError>;
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are handled manually and automatic decompression is off, so
/// `Location` and `Content-Encoding` reach the telemetry extractor untouched.
///
/// # Example
///
/// ```no_run
/// use sitegauge::transport::build_http_client;
///
/// let client = build_http_client("SitegaugeBot/0.1").unwrap();
/// ```
pub fn build_http_client(user_agent: &str) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::none())
        .build()
}

/// [`HttpExchange`] backed by a shared `reqwest::Client`
#[derive(Clone)]
pub struct ReqwestExchange {
    client: Client,
}

impl ReqwestExchange {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn execute(&self, url: &Url) -> Result<RawResponse, ExchangeError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_error)?;

        let status_code = response.status().as_u16();
        let headers = response.headers().clone();
        let wire = response.bytes().await.map_err(classify_error)?;
        let body = decode_body(&headers, &wire)?;

        Ok(RawResponse {
            status_code,
            headers,
            body,
            wire_size: wire.len(),
        })
    }
}

/// Maps a reqwest error onto the transport's error kinds
fn classify_error(e: reqwest::Error) -> ExchangeError {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_connect() {
        TransportErrorKind::ConnectionFailure
    } else if e.is_body() || e.is_decode() {
        TransportErrorKind::MalformedResponse
    } else {
        TransportErrorKind::ProtocolError
    };

    ExchangeError::new(kind, e.to_string())
}

/// Undoes the response's content-encoding
///
/// Encodings this client never advertises are passed through as-is.
pub fn decode_body(headers: &HeaderMap, wire: &[u8]) -> Result<Vec<u8>, ExchangeError> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());

    if wire.is_empty() {
        return Ok(Vec::new());
    }

    let malformed =
        |e: std::io::Error| ExchangeError::new(TransportErrorKind::MalformedResponse, e.to_string());

    let mut body = Vec::new();
    match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => {
            GzDecoder::new(wire).read_to_end(&mut body).map_err(malformed)?;
        }
        Some("deflate") => {
            // Servers disagree on whether "deflate" carries a zlib wrapper
            if ZlibDecoder::new(wire).read_to_end(&mut body).is_err() {
                body.clear();
                DeflateDecoder::new(wire)
                    .read_to_end(&mut body)
                    .map_err(malformed)?;
            }
        }
        _ => body.extend_from_slice(wire),
    }

    Ok(body)
}
