//! Crawler module for page resolution and crawl coordination
//!
//! This module contains the core crawling logic, including:
//! - Redirect resolution with loop detection
//! - HTML parsing and link extraction
//! - The crawl state machine and its worker pool

mod coordinator;
mod parser;
mod redirect;

pub use coordinator::{AbortReason, Coordinator, CrawlPhase};
pub use parser::{decode_text, parse_document, ParseError, ParsedDocument};
pub use redirect::{RedirectChain, RedirectHop, RedirectResolver, Resolution, ResolveError};
