//! State module for tracking archive progress
//!
//! This module provides state management for pages and hosts during an
//! archive run.
//!
//! # Components
//!
//! - `PageState`: Tracks the state of individual frontier entries (queued, fetching, stored, etc.)
//! - `FailureReason`: Classifies why a page or resource could not be archived
//! - `HostState`: Tracks per-host request spacing

mod host_state;
mod page_state;

// Re-export main types
pub use host_state::HostState;
pub use page_state::{FailureReason, PageState};
