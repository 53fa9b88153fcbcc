//! Technology fingerprinting from headers and body signatures
//!
//! Matching is pure pattern lookup over bytes already received. Page scripts
//! are never evaluated.

use regex::bytes::RegexSet as BytesRegexSet;
use regex::RegexSet;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;

/// Broad family a detected technology belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TechCategory {
    WebServer,
    Cdn,
    Language,
    Framework,
    Cms,
    JsLibrary,
    Analytics,
    Ecommerce,
}

/// Where a signature matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    Header,
    Cookie,
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Technology {
    pub name: String,
    pub category: TechCategory,
    /// First source that matched
    pub evidence: Evidence,
}

/// Which part of the response a signature is tested against
#[derive(Clone, Copy)]
enum Source {
    /// Value of the named header
    Header(&'static str),
    /// Any Set-Cookie value
    Cookie,
    Body,
}

struct Signature {
    name: &'static str,
    category: TechCategory,
    source: Source,
    pattern: &'static str,
}

const fn sig(
    name: &'static str,
    category: TechCategory,
    source: Source,
    pattern: &'static str,
) -> Signature {
    Signature {
        name,
        category,
        source,
        pattern,
    }
}

use Source::{Body, Cookie, Header};
use TechCategory::*;

const SIGNATURES: &[Signature] = &[
    // Server
    sig("Nginx", WebServer, Header("server"), r"(?i)\bnginx\b"),
    sig("OpenResty", WebServer, Header("server"), r"(?i)\bopenresty\b"),
    sig("Apache", WebServer, Header("server"), r"(?i)\bapache\b"),
    sig("Microsoft IIS", WebServer, Header("server"), r"(?i)microsoft-iis"),
    sig("LiteSpeed", WebServer, Header("server"), r"(?i)litespeed"),
    sig("Caddy", WebServer, Header("server"), r"(?i)\bcaddy\b"),
    sig("Cloudflare", Cdn, Header("server"), r"(?i)^cloudflare"),
    sig("Vercel", Cdn, Header("server"), r"(?i)^vercel"),
    // Edge and platform headers
    sig("Cloudflare", Cdn, Header("cf-ray"), r"."),
    sig("Amazon CloudFront", Cdn, Header("x-amz-cf-id"), r"."),
    sig("Fastly", Cdn, Header("x-served-by"), r"(?i)cache-"),
    sig("Vercel", Cdn, Header("x-vercel-id"), r"."),
    sig("Netlify", Cdn, Header("x-nf-request-id"), r"."),
    sig("Shopify", Ecommerce, Header("x-shopid"), r"."),
    sig("Drupal", Cms, Header("x-drupal-cache"), r"."),
    sig("Drupal", Cms, Header("x-generator"), r"(?i)drupal"),
    sig("Wix", Cms, Header("x-wix-request-id"), r"."),
    // X-Powered-By
    sig("PHP", Language, Header("x-powered-by"), r"(?i)\bphp\b"),
    sig("ASP.NET", Framework, Header("x-powered-by"), r"(?i)asp\.net"),
    sig("ASP.NET", Framework, Header("x-aspnet-version"), r"."),
    sig("Express", Framework, Header("x-powered-by"), r"(?i)\bexpress\b"),
    sig("Next.js", Framework, Header("x-powered-by"), r"(?i)next\.js"),
    sig("WordPress", Cms, Header("x-powered-by"), r"(?i)wp engine"),
    // Cookies
    sig("PHP", Language, Cookie, r"(?i)\bPHPSESSID="),
    sig("Java", Language, Cookie, r"\bJSESSIONID="),
    sig("ASP.NET", Framework, Cookie, r"(?i)\bASP\.NET_SessionId="),
    sig("Laravel", Framework, Cookie, r"\blaravel_session="),
    sig("Django", Framework, Cookie, r"\bdjango_language=|\bcsrftoken="),
    sig("WordPress", Cms, Cookie, r"\bwordpress_|\bwp-settings-"),
    sig("Shopify", Ecommerce, Cookie, r"\b_shopify_"),
    // Body markers
    sig("WordPress", Cms, Body, r"/wp-content/|/wp-includes/"),
    sig("WordPress", Cms, Body, r#"(?i)<meta name="generator" content="WordPress"#),
    sig("Drupal", Cms, Body, r"Drupal\.settings|/sites/default/files/"),
    sig("Joomla", Cms, Body, r#"(?i)<meta name="generator" content="Joomla"#),
    sig("Wix", Cms, Body, r"static\.wixstatic\.com"),
    sig("Squarespace", Cms, Body, r"static1\.squarespace\.com"),
    sig("Shopify", Ecommerce, Body, r"cdn\.shopify\.com"),
    sig("Next.js", Framework, Body, r"__NEXT_DATA__|/_next/static/"),
    sig("Nuxt.js", Framework, Body, r"window\.__NUXT__|/_nuxt/"),
    sig("Gatsby", Framework, Body, r"___gatsby"),
    sig("React", JsLibrary, Body, r"data-reactroot|react-dom(\.production)?(\.min)?\.js"),
    sig("Angular", JsLibrary, Body, r#"ng-version=""#),
    sig("Vue.js", JsLibrary, Body, r#"data-v-[0-9a-f]{8}|vue(\.runtime)?(\.min)?\.js"#),
    sig("jQuery", JsLibrary, Body, r"jquery([.-][0-9.]+)?(\.min)?\.js"),
    sig("Bootstrap", JsLibrary, Body, r"bootstrap(\.bundle)?(\.min)?\.(css|js)"),
    sig("Google Tag Manager", Analytics, Body, r"googletagmanager\.com/gtm\.js"),
    sig(
        "Google Analytics",
        Analytics,
        Body,
        r"google-analytics\.com/(analytics|ga)\.js|googletagmanager\.com/gtag/js",
    ),
    sig("Hotjar", Analytics, Body, r"static\.hotjar\.com"),
    sig("Meta Pixel", Analytics, Body, r"connect\.facebook\.net/[^\s]*/fbevents\.js"),
    sig("Plausible", Analytics, Body, r"plausible\.io/js/"),
];

/// Compiled signature sets, built once per crawl
pub struct TechnologyDetector {
    headers: RegexSet,
    header_index: Vec<usize>,
    cookies: RegexSet,
    cookie_index: Vec<usize>,
    body: BytesRegexSet,
    body_index: Vec<usize>,
}

impl TechnologyDetector {
    pub fn new() -> Result<Self, regex::Error> {
        let header_index = signatures_from(|s| matches!(s, Header(_)));
        let cookie_index = signatures_from(|s| matches!(s, Cookie));
        let body_index = signatures_from(|s| matches!(s, Body));

        Ok(Self {
            headers: RegexSet::new(patterns(&header_index))?,
            cookies: RegexSet::new(patterns(&cookie_index))?,
            body: BytesRegexSet::new(patterns(&body_index))?,
            header_index,
            cookie_index,
            body_index,
        })
    }

    /// Returns every detected technology, sorted by name
    ///
    /// `body` is scanned only when given; callers pass it for HTML responses.
    pub fn detect(&self, headers: &HeaderMap, body: Option<&[u8]>) -> Vec<Technology> {
        let mut found: BTreeMap<&'static str, Technology> = BTreeMap::new();
        let mut record = |index: usize, evidence: Evidence| {
            let signature = &SIGNATURES[index];
            found.entry(signature.name).or_insert_with(|| Technology {
                name: signature.name.to_string(),
                category: signature.category,
                evidence,
            });
        };

        // A header pattern only counts against the header it names, so each
        // value is tested and then filtered by the signature's header.
        for (position, &index) in self.header_index.iter().enumerate() {
            let Header(name) = SIGNATURES[index].source else {
                continue;
            };
            let matched = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .any(|value| self.headers.matches(value).matched(position));
            if matched {
                record(index, Evidence::Header);
            }
        }

        for value in headers
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
        {
            for position in self.cookies.matches(value).iter() {
                record(self.cookie_index[position], Evidence::Cookie);
            }
        }

        if let Some(body) = body {
            for position in self.body.matches(body).iter() {
                record(self.body_index[position], Evidence::Body);
            }
        }

        found.into_values().collect()
    }
}

fn signatures_from(want: fn(&Source) -> bool) -> Vec<usize> {
    SIGNATURES
        .iter()
        .enumerate()
        .filter(|(_, s)| want(&s.source))
        .map(|(i, _)| i)
        .collect()
}

fn patterns(index: &[usize]) -> Vec<&'static str> {
    index.iter().map(|&i| SIGNATURES[i].pattern).collect()
}
