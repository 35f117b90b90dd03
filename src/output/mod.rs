//! Output module for crawl results and reports
//!
//! This module handles:
//! - The `CrawlResult` returned to callers and printed as JSON
//! - Statistics derived from the manifest
//! - The markdown report written into the archive root

mod markdown;
mod result;
pub mod stats;

pub use crate::assess::Verdict;
pub use markdown::{format_markdown_report, write_markdown_report, REPORT_FILE};
pub use result::{BrokenLink, CrawlResult, RunStatus, Termination};
pub use stats::{print_statistics, CrawlStats};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Renders a crawl result as pretty-printed JSON
pub fn result_json(result: &CrawlResult) -> OutputResult<String> {
    Ok(serde_json::to_string_pretty(result)?)
}
