//! Markdown report generation
//!
//! This module renders a human-readable `report.md` next to the manifest,
//! covering run statistics, broken links and the completeness verdict.

use crate::output::{CrawlResult, OutputResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// File name of the report inside the archive root
pub const REPORT_FILE: &str = "report.md";

/// Writes the markdown report for a run
///
/// # Arguments
///
/// * `result` - The crawl result
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote the report
/// * `Err(OutputError)` - Failed to write the report
pub fn write_markdown_report(result: &CrawlResult, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_report(result);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a crawl result as markdown
pub fn format_markdown_report(result: &CrawlResult) -> String {
    let stats = &result.stats;
    let mut md = String::new();

    md.push_str("# Web Archive Report\n\n");

    md.push_str("## Run Information\n\n");
    match result.crawled_pages.first() {
        Some(seed) => md.push_str(&format!("- **Seed**: {}\n", seed)),
        None => md.push_str("- **Seed**: not archived\n"),
    }
    md.push_str(&format!("- **Archive**: {}\n", result.archive_path.display()));
    md.push_str(&format!("- **Status**: {:?}\n", result.status));
    md.push_str(&format!("- **Termination**: {:?}\n", result.termination));
    md.push_str(&format!("- **Duration**: {:.1} seconds\n\n", stats.duration_secs));

    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Pages Archived**: {}\n", stats.pages_archived));
    md.push_str(&format!("- **Pages Failed**: {}\n", stats.pages_failed));
    md.push_str(&format!("- **Not Attempted**: {}\n", result.not_attempted.len()));
    md.push_str(&format!(
        "- **Assets Stored**: {} ({} bytes)\n",
        stats.assets_stored, stats.asset_bytes
    ));
    md.push_str(&format!("- **Assets Failed**: {}\n", stats.assets_failed));
    md.push_str(&format!("- **Success Rate**: {:.2}%\n\n", stats.success_rate()));

    if !stats.pages_by_depth.is_empty() {
        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages |\n");
        md.push_str("|-------|-------|\n");
        for (depth, count) in &stats.pages_by_depth {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    if !result.broken_links.is_empty() {
        md.push_str("## Broken Links\n\n");
        md.push_str("| URL | Reason |\n");
        md.push_str("|-----|--------|\n");
        for broken in &result.broken_links {
            md.push_str(&format!("| {} | {} |\n", broken.url, broken.reason));
        }
        md.push('\n');
    }

    if !result.not_attempted.is_empty() {
        md.push_str("## Not Attempted\n\n");
        for url in result.not_attempted.iter().take(50) {
            md.push_str(&format!("- {}\n", url));
        }
        if result.not_attempted.len() > 50 {
            md.push_str(&format!("\n... and {} more\n", result.not_attempted.len() - 50));
        }
        md.push('\n');
    }

    md.push_str("## Completeness\n\n");
    md.push_str(&format!(
        "- **Complete**: {}\n\n",
        if result.completeness.is_complete { "yes" } else { "no" }
    ));
    md.push_str(&result.completeness.report);
    md.push('\n');

    md
}
