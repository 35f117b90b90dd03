//! The crawl result returned to callers

use crate::assess::Verdict;
use crate::output::stats::CrawlStats;
use crate::state::FailureReason;
use crate::storage::Manifest;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether the crawl itself ran to completion
///
/// Independent of the completeness verdict: a run whose judgment service
/// failed is still a `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,

    /// The run deadline cut the crawl short
    Partial,
}

/// Why the crawl stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every reachable in-scope page was processed
    FrontierExhausted,

    /// In-scope links were refused because `max-pages` was reached
    PageLimit,

    /// Links beyond `max-depth` were not followed
    DepthLimit,

    /// The run deadline expired
    Deadline,
}

/// A page that could not be archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub url: String,
    pub reason: FailureReason,
}

/// Final output of an archive run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub status: RunStatus,

    /// Archived pages in dequeue order
    pub crawled_pages: Vec<String>,

    pub broken_links: Vec<BrokenLink>,

    /// Pages abandoned when the deadline expired
    pub not_attempted: Vec<String>,

    pub archive_path: PathBuf,
    pub manifest_path: PathBuf,
    pub termination: Termination,
    pub completeness: Verdict,
    pub stats: CrawlStats,
}

impl CrawlResult {
    /// Builds the result from a finalized manifest
    ///
    /// Every page record lands in exactly one of `crawled_pages` and
    /// `broken_links`.
    pub fn from_manifest(
        manifest: &Manifest,
        manifest_path: PathBuf,
        status: RunStatus,
        termination: Termination,
        not_attempted: Vec<String>,
        completeness: Verdict,
    ) -> Self {
        let mut crawled_pages = Vec::new();
        let mut broken_links = Vec::new();
        for page in &manifest.pages {
            match page.failure_reason() {
                None => crawled_pages.push(page.display_url.clone()),
                Some(reason) => broken_links.push(BrokenLink {
                    url: page.display_url.clone(),
                    reason,
                }),
            }
        }

        Self {
            status,
            crawled_pages,
            broken_links,
            not_attempted,
            archive_path: manifest.run.archive_root.clone(),
            manifest_path,
            termination,
            completeness,
            stats: CrawlStats::from_manifest(manifest),
        }
    }
}
