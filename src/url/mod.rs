//! URL handling module
//!
//! This module provides URL canonicalization for identity comparison and the
//! host helpers used by the same-origin policy and the archive layout.

mod domain;
mod normalize;

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

// Re-export main functions
pub use domain::{extract_host, host_dir_name, same_host};
pub use normalize::{canonicalize, canonicalize_url, normalize_seed};

/// Normalized identity form of a URL
///
/// Two references that canonicalize to the same value are the same resource.
/// The canonical form is a dedup key and map key only; the URL as written by
/// the site is kept separately for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalUrl(Url);

impl CanonicalUrl {
    /// Wraps a URL that has already gone through canonicalization
    pub(crate) fn from_normalized(url: Url) -> Self {
        Self(url)
    }

    /// Returns the canonical string form
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the underlying parsed URL
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Returns the lowercase host
    pub fn host(&self) -> Option<String> {
        extract_host(&self.0)
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url_serializes_as_string() {
        let base = Url::parse("https://example.com/").unwrap();
        let url = canonicalize("/about/", &base).unwrap();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"https://example.com/about\"");

        let back: CanonicalUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }

    #[test]
    fn test_host_accessor() {
        let base = Url::parse("https://Example.com/").unwrap();
        let url = canonicalize("/x", &base).unwrap();
        assert_eq!(url.host(), Some("example.com".to_string()));
    }
}
