/// Page state definitions for tracking archive progress
///
/// This module defines all states a frontier entry moves through while it is
/// fetched, extracted, rewritten and stored.
use crate::ArchiveError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a page in the archive pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    // ===== Active States =====
    /// Page has been discovered but not yet accepted by the frontier
    Discovered,

    /// Page is queued in the frontier and waiting to be fetched
    Queued,

    /// Page is currently being fetched
    Fetching,

    /// Page bytes were retrieved successfully
    Fetched,

    /// References were extracted from the page
    Extracted,

    /// References were rewritten to local paths
    Rewritten,

    // ===== Terminal States =====
    /// Page was written to the archive
    Stored,

    /// Page could not be fetched or stored
    Failed,
}

impl PageState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stored | Self::Failed)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Stored)
    }

    /// Returns true if the pipeline may move from `self` to `next`
    ///
    /// `Fetched` may jump straight to `Stored` for non-HTML documents, which
    /// have nothing to extract or rewrite. Any active state after `Queued`
    /// may fail.
    pub fn can_transition_to(&self, next: PageState) -> bool {
        use PageState::*;
        matches!(
            (self, next),
            (Discovered, Queued)
                | (Queued, Fetching)
                | (Fetching, Fetched)
                | (Fetched, Extracted)
                | (Fetched, Stored)
                | (Extracted, Rewritten)
                | (Rewritten, Stored)
                | (Fetching | Fetched | Extracted | Rewritten, Failed)
        )
    }

    /// Moves to `next`, rejecting transitions the pipeline never makes
    pub fn transition(self, next: PageState) -> Result<PageState, ArchiveError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ArchiveError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Returns the string used in logs and serialized output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Extracted => "extracted",
            Self::Rewritten => "rewritten",
            Self::Stored => "stored",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified reason a page or resource could not be archived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// HTTP 404 or 410
    NotFound,

    /// Any other 4xx response
    ClientError,

    /// 5xx response, still failing after retries
    ServerError,

    /// HTTP 429, still failing after retries
    RateLimited,

    /// Attempt exceeded the request timeout
    Timeout,

    /// DNS, connect, TLS or mid-body transport failure
    ConnectionFailed,

    /// Body exceeded the configured size limit
    TooLarge,

    /// Redirect chain exceeded the hop limit or looped
    TooManyRedirects,

    /// Writing to the archive failed twice
    StorageError,
}

impl FailureReason {
    /// Returns true for failures worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServerError | Self::RateLimited | Self::Timeout | Self::ConnectionFailed
        )
    }

    /// Returns the snake_case label used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection_failed",
            Self::TooLarge => "too_large",
            Self::TooManyRedirects => "too_many_redirects",
            Self::StorageError => "storage_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
