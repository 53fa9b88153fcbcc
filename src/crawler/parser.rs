//! HTML parser for the crawl's document boundary
//!
//! This module handles decoding a fetched body by its declared charset and
//! parsing it into:
//! - A queryable document tree handed to analyzers
//! - Outbound links to follow (from <a> tags and canonical links)
//! - Page title

use encoding_rs::{Encoding, UTF_8};
use scraper::{Html, Selector};
use std::borrow::Cow;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Why a body could not be turned into a document
///
/// Malformed markup is never an error; the HTML parser recovers from it.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("body decoded as {encoding} contains NUL characters; not a text document")]
    Binary { encoding: &'static str },
}

/// A parsed page
pub struct ParsedDocument {
    pub document: Html,

    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Distinct absolute http(s) links, in document order
    pub links: Vec<Url>,
}

/// Parses an HTML body and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
///
/// Relative links resolve against `<base href>` when the page declares one.
///
/// # Arguments
///
/// * `body` - The decompressed response body
/// * `content_type` - The `Content-Type` header, whose `charset` picks the decoding
/// * `base_url` - The final URL of the page, for resolving relative links
///
/// # Example
///
/// ```
/// use sitegauge::crawler::parse_document;
/// use url::Url;
///
/// let html = br#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_document(html, Some("text/html"), &base_url).unwrap();
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links[0].as_str(), "https://example.com/page");
/// ```
pub fn parse_document(
    body: &[u8],
    content_type: Option<&str>,
    base_url: &Url,
) -> Result<ParsedDocument, ParseError> {
    let text = decode_text(body, content_type)?;

    let document = Html::parse_document(&text);
    let title = extract_title(&document);
    let base = document_base(&document, base_url);
    let links = extract_links(&document, &base);

    Ok(ParsedDocument {
        document,
        title,
        links,
    })
}

/// Decodes a body using the `charset` of its content type
///
/// A byte order mark overrides the declared charset. Unknown or missing
/// labels fall back to UTF-8, and malformed sequences become U+FFFD.
pub fn decode_text<'a>(
    body: &'a [u8],
    content_type: Option<&str>,
) -> Result<Cow<'a, str>, ParseError> {
    let encoding = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(body);
    if had_errors {
        tracing::debug!("Replaced malformed {} sequences while decoding", used.name());
    }
    if text.contains('\0') {
        return Err(ParseError::Binary {
            encoding: used.name(),
        });
    }
    Ok(text)
}

/// The `charset` parameter of a media type, unquoted
fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Returns the URL relative links resolve against
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|element| element.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .filter(|base| base.scheme() == "http" || base.scheme() == "https")
        .unwrap_or_else(|| page_url.clone())
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |url: Url| {
        if seen.insert(url.as_str().to_string()) {
            links.push(url);
        }
    };

    // Extract links from <a> tags
    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            // Skip if it has the download attribute
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                push(url);
            }
        }
    }

    // Extract canonical link
    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                push(url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}
