//! Storage module for persisting archive data
//!
//! This module handles everything written to disk during a run:
//! - Deterministic page and asset layout under the archive root
//! - Atomic (write then rename) file placement
//! - Page, resource and failure records
//! - The `manifest.json` written when the run is finalized

mod layout;
mod store;

pub use layout::{asset_path, page_path, relative_path};
pub use store::{Store, MANIFEST_FILE};

use crate::state::FailureReason;
use crate::url::CanonicalUrl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create archive root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive already finalized")]
    Finalized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Kind of an embedded asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Stylesheet,
    Script,
    Image,
    Other,
}

impl ResourceKind {
    /// File extension used when neither the content type nor the URL gives one
    pub fn fallback_extension(&self) -> &'static str {
        match self {
            Self::Stylesheet => "css",
            Self::Script => "js",
            Self::Image => "img",
            Self::Other => "bin",
        }
    }
}

/// A reference found while extracting a page or stylesheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRecord {
    pub url: CanonicalUrl,

    /// `None` for navigable links, the asset kind otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<ResourceKind>,

    /// Whether the archive is expected to contain this reference. Links
    /// excluded by the same-origin policy or the depth limit are not.
    pub required: bool,
}

/// Outcome of fetching and storing a frontier entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success,
    Failure { reason: FailureReason },
}

/// One dequeued frontier entry and what became of it
///
/// Immutable once created. The relink pass may rewrite the stored file, but
/// `content_hash` stays the hash of the settled document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub url: CanonicalUrl,

    /// URL as it appeared where it was discovered
    pub display_url: String,

    pub depth: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<CanonicalUrl>,

    /// Dequeue order, used to order the manifest
    pub sequence: u64,

    pub outcome: FetchOutcome,

    /// Canonical URL after redirects, if it differs from `url`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<CanonicalUrl>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// Path relative to the archive root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,

    #[serde(default)]
    pub references: Vec<ReferenceRecord>,
}

impl PageRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success)
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self.outcome {
            FetchOutcome::Success => None,
            FetchOutcome::Failure { reason } => Some(reason),
        }
    }
}

/// An asset stored once under its content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub url: CanonicalUrl,
    pub kind: ResourceKind,
    pub content_hash: String,
    pub local_path: String,
    pub owners: Vec<CanonicalUrl>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    pub size: u64,

    /// References found inside a stylesheet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ReferenceRecord>,
}

/// An asset that could not be fetched or stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedResource {
    pub url: CanonicalUrl,
    pub kind: ResourceKind,
    pub reason: FailureReason,
    pub owners: Vec<CanonicalUrl>,
}

/// Run metadata recorded at the top of the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub seed_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub archive_root: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

/// Everything the archive contains, written to `manifest.json`
///
/// Pages are ordered by dequeue sequence, resources by canonical URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub run: RunMetadata,
    pub pages: Vec<PageRecord>,
    pub resources: Vec<ResourceRecord>,
    pub failed_resources: Vec<FailedResource>,
}

impl Manifest {
    /// Looks up the page record for a canonical URL, following redirect aliases
    pub fn page(&self, url: &CanonicalUrl) -> Option<&PageRecord> {
        self.pages
            .iter()
            .find(|p| &p.url == url)
            .or_else(|| self.pages.iter().find(|p| p.final_url.as_ref() == Some(url)))
    }

    pub fn resource(&self, url: &CanonicalUrl) -> Option<&ResourceRecord> {
        self.resources.iter().find(|r| &r.url == url)
    }

    pub fn failed_resource(&self, url: &CanonicalUrl) -> Option<&FailedResource> {
        self.failed_resources.iter().find(|r| &r.url == url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::canonicalize;
    use url::Url;

    fn url(path: &str) -> CanonicalUrl {
        canonicalize(path, &Url::parse("https://example.com/").unwrap()).unwrap()
    }

    fn page(path: &str, outcome: FetchOutcome) -> PageRecord {
        PageRecord {
            url: url(path),
            display_url: path.to_string(),
            depth: 0,
            referrer: None,
            sequence: 0,
            outcome,
            final_url: None,
            content_type: None,
            content_hash: None,
            local_path: None,
            references: Vec::new(),
        }
    }

    #[test]
    fn test_fetch_outcome_serialization() {
        let json = serde_json::to_value(FetchOutcome::Failure {
            reason: FailureReason::NotFound,
        })
        .unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["reason"], "not_found");
    }

    #[test]
    fn test_page_record_failure_reason() {
        let ok = page("/", FetchOutcome::Success);
        assert!(ok.is_success());
        assert_eq!(ok.failure_reason(), None);

        let failed = page(
            "/missing",
            FetchOutcome::Failure {
                reason: FailureReason::NotFound,
            },
        );
        assert!(!failed.is_success());
        assert_eq!(failed.failure_reason(), Some(FailureReason::NotFound));
    }

    #[test]
    fn test_manifest_lookup_follows_redirects() {
        let mut redirected = page("/old", FetchOutcome::Success);
        redirected.final_url = Some(url("/new"));

        let manifest = Manifest {
            run: RunMetadata {
                seed_url: "https://example.com/".to_string(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                archive_root: PathBuf::from("/tmp/archive"),
                config_hash: None,
            },
            pages: vec![redirected],
            resources: Vec::new(),
            failed_resources: Vec::new(),
        };

        assert!(manifest.page(&url("/old")).is_some());
        assert!(manifest.page(&url("/new")).is_some());
        assert!(manifest.page(&url("/other")).is_none());
    }
}
