//! Statistics derived from a finalized manifest
//!
//! This module summarizes what a run archived and prints the summary to
//! stdout for the CLI.

use crate::state::FailureReason;
use crate::storage::{Manifest, ResourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Archive statistics summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    /// Pages dequeued from the frontier
    pub pages_total: u64,

    pub pages_archived: u64,
    pub pages_failed: u64,

    /// Archived pages per discovery depth
    pub pages_by_depth: BTreeMap<u32, u64>,

    /// Failed pages per reason
    pub failures_by_reason: BTreeMap<FailureReason, u64>,

    pub assets_stored: u64,
    pub assets_failed: u64,

    /// Stored assets per kind
    pub assets_by_kind: BTreeMap<ResourceKind, u64>,

    /// Total size of stored asset bodies
    pub asset_bytes: u64,

    pub duration_secs: f64,
}

impl CrawlStats {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut stats = Self {
            pages_total: manifest.pages.len() as u64,
            ..Self::default()
        };

        for page in &manifest.pages {
            match page.failure_reason() {
                None => {
                    stats.pages_archived += 1;
                    *stats.pages_by_depth.entry(page.depth).or_default() += 1;
                }
                Some(reason) => {
                    stats.pages_failed += 1;
                    *stats.failures_by_reason.entry(reason).or_default() += 1;
                }
            }
        }

        for resource in &manifest.resources {
            stats.assets_stored += 1;
            stats.asset_bytes += resource.size;
            *stats.assets_by_kind.entry(resource.kind).or_default() += 1;
        }
        stats.assets_failed = manifest.failed_resources.len() as u64;

        let elapsed = manifest.run.finished_at - manifest.run.started_at;
        stats.duration_secs = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        stats
    }

    /// Percentage of dequeued pages that were archived
    pub fn success_rate(&self) -> f64 {
        if self.pages_total == 0 {
            0.0
        } else {
            (self.pages_archived as f64 / self.pages_total as f64) * 100.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStats) {
    println!("=== Archive Statistics ===\n");

    println!("Pages:");
    println!("  Dequeued: {}", stats.pages_total);
    println!("  Archived: {}", stats.pages_archived);
    println!("  Failed: {}", stats.pages_failed);
    println!();

    if !stats.pages_by_depth.is_empty() {
        println!("Archived by Depth:");
        for (depth, count) in &stats.pages_by_depth {
            println!("  {}: {}", depth, count);
        }
        println!();
    }

    if !stats.failures_by_reason.is_empty() {
        println!("Failure Summary:");
        // Most frequent first
        let mut failures: Vec<_> = stats.failures_by_reason.iter().collect();
        failures.sort_by(|a, b| b.1.cmp(a.1));
        for (reason, count) in failures {
            println!("  {}: {}", reason, count);
        }
        println!();
    }

    println!("Assets:");
    println!("  Stored: {} ({} bytes)", stats.assets_stored, stats.asset_bytes);
    for (kind, count) in &stats.assets_by_kind {
        println!("    {:?}: {}", kind, count);
    }
    println!("  Failed: {}", stats.assets_failed);
    println!();

    println!(
        "Success Rate: {:.1}% ({} / {} pages archived in {:.1}s)",
        stats.success_rate(),
        stats.pages_archived,
        stats.pages_total,
        stats.duration_secs
    );
}
