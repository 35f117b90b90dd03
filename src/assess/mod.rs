//! Completeness assessment of a finished archive
//!
//! Two strategies share one verdict shape:
//! - Structural: a local check that every required reference was archived
//! - Judgment: delegation to an external service behind [`JudgmentService`]
//!
//! Assessment never fails a run. A broken or slow judgment service yields an
//! incomplete verdict with a diagnostic report.

mod judgment;
mod structural;

pub use judgment::{
    HttpJudgmentService, JudgmentError, JudgmentRequest, JudgmentResponse, JudgmentService,
};
pub use structural::{assess_structure, missing_references, MissingReference};

use crate::storage::Manifest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Completeness verdict of an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub report: String,
    pub is_complete: bool,
}

/// How completeness is decided
#[derive(Clone)]
pub enum Strategy {
    Structural,
    Judgment {
        service: Arc<dyn JudgmentService>,
        timeout: Duration,
    },
}

/// Decides whether an archive is complete
pub struct CompletenessAssessor {
    strategy: Strategy,
}

impl CompletenessAssessor {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn structural() -> Self {
        Self::new(Strategy::Structural)
    }

    /// Assesses a finalized manifest
    ///
    /// # Arguments
    ///
    /// * `manifest` - The finalized manifest of the run
    /// * `seed` - The seed URL the run started from
    pub async fn assess(&self, manifest: &Manifest, seed: &Url) -> Verdict {
        match &self.strategy {
            Strategy::Structural => assess_structure(manifest, seed),
            Strategy::Judgment { service, timeout } => {
                judge(service.as_ref(), *timeout, seed, &manifest.run.archive_root).await
            }
        }
    }
}

async fn judge(
    service: &dyn JudgmentService,
    timeout: Duration,
    seed: &Url,
    archive_root: &Path,
) -> Verdict {
    let request = JudgmentRequest {
        original_url: seed.to_string(),
        archive_location: archive_root.display().to_string(),
    };

    let result = match tokio::time::timeout(timeout, service.judge(&request)).await {
        Ok(result) => result,
        Err(_) => Err(JudgmentError::Timeout(timeout)),
    };

    match result {
        Ok(response) => Verdict {
            report: response.completeness_report,
            is_complete: response.is_complete,
        },
        Err(e) => {
            tracing::warn!("Judgment service failed: {}", e);
            Verdict {
                report: format!("Completeness could not be judged: {}", e),
                is_complete: false,
            }
        }
    }
}
