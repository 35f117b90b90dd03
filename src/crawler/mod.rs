//! Crawler module for fetching and archiving pages
//!
//! This module contains the archive pipeline, including:
//! - The BFS frontier with its depth, page and origin limits
//! - HTTP fetching with retry logic and per-host politeness
//! - Reference extraction and rewriting to local paths
//! - Asset resolution shared across pages
//! - Overall run coordination

mod assets;
mod coordinator;
mod extractor;
mod fetcher;
mod frontier;
mod markup;
mod politeness;
mod progress;
mod rewriter;

pub use assets::{AssetOutcome, AssetResolver};
pub use coordinator::{archive, Coordinator};
pub use extractor::{
    extract, settle_page, AssetRef, DiscoveredLink, Document, Extraction, HtmlDocument,
    SettledPage, StylesheetDocument,
};
pub use fetcher::{
    build_http_client, fetch_with_retry, Fetch, FetchError, FetchResult, HttpFetcher, RetryPolicy,
};
pub use frontier::{EnqueueOutcome, Frontier, FrontierEntry, InFlight};
pub use politeness::Politeness;
pub use progress::ProgressEvent;
pub use rewriter::{rewrite_css, rewrite_html, ReferenceMap};
