//! Structural completeness check
//!
//! Deterministic and local: every required reference recorded during
//! extraction must resolve to a successful page or a stored asset.

use crate::assess::Verdict;
use crate::storage::{Manifest, ReferenceRecord};
use crate::url::{canonicalize_url, CanonicalUrl};
use std::collections::BTreeMap;
use url::Url;

/// A required reference the archive does not contain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReference {
    pub url: CanonicalUrl,

    /// Why it is missing, e.g. `not_found` or `not attempted`
    pub reason: String,

    /// Pages or stylesheets that reference it
    pub owners: Vec<CanonicalUrl>,
}

/// Lists every required reference missing from the archive, by URL
pub fn missing_references(manifest: &Manifest, seed: &Url) -> Vec<MissingReference> {
    let mut missing: BTreeMap<CanonicalUrl, MissingReference> = BTreeMap::new();

    if let Ok(seed) = canonicalize_url(seed) {
        if let Some(reason) = page_gap(manifest, &seed) {
            missing.insert(
                seed.clone(),
                MissingReference {
                    url: seed,
                    reason,
                    owners: Vec::new(),
                },
            );
        }
    }

    let page_refs = manifest
        .pages
        .iter()
        .filter(|p| p.is_success())
        .flat_map(|p| p.references.iter().map(move |r| (&p.url, r)));
    let sheet_refs = manifest
        .resources
        .iter()
        .flat_map(|r| r.references.iter().map(move |reference| (&r.url, reference)));

    for (owner, reference) in page_refs.chain(sheet_refs) {
        if !reference.required {
            continue;
        }
        let Some(reason) = reference_gap(manifest, reference) else {
            continue;
        };
        let entry = missing
            .entry(reference.url.clone())
            .or_insert_with(|| MissingReference {
                url: reference.url.clone(),
                reason,
                owners: Vec::new(),
            });
        if !entry.owners.contains(owner) {
            entry.owners.push(owner.clone());
        }
    }

    missing.into_values().collect()
}

/// Runs the structural check and renders its report
pub fn assess_structure(manifest: &Manifest, seed: &Url) -> Verdict {
    let missing = missing_references(manifest, seed);
    let pages = manifest.pages.iter().filter(|p| p.is_success()).count();
    let assets = manifest.resources.len();

    if missing.is_empty() {
        return Verdict {
            report: format!(
                "Archive is complete: {} pages and {} assets, every required reference archived.",
                pages, assets
            ),
            is_complete: true,
        };
    }

    let mut report = format!(
        "Archive is incomplete: {} of the required references are missing ({} pages and {} assets archived).\n",
        missing.len(),
        pages,
        assets
    );
    for gap in &missing {
        if gap.owners.is_empty() {
            report.push_str(&format!("- {} ({})\n", gap.url, gap.reason));
        } else {
            let owners: Vec<&str> = gap.owners.iter().map(CanonicalUrl::as_str).collect();
            report.push_str(&format!(
                "- {} ({}), referenced by {}\n",
                gap.url,
                gap.reason,
                owners.join(", ")
            ));
        }
    }

    Verdict {
        report,
        is_complete: false,
    }
}

fn page_gap(manifest: &Manifest, url: &CanonicalUrl) -> Option<String> {
    match manifest.page(url) {
        Some(page) => page.failure_reason().map(|reason| reason.to_string()),
        None => Some("not attempted".to_string()),
    }
}

fn reference_gap(manifest: &Manifest, reference: &ReferenceRecord) -> Option<String> {
    if reference.asset.is_none() {
        return page_gap(manifest, &reference.url);
    }
    if manifest.resource(&reference.url).is_some() {
        return None;
    }
    Some(
        manifest
            .failed_resource(&reference.url)
            .map_or_else(|| "not archived".to_string(), |failed| failed.reason.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureReason;
    use crate::storage::{
        FailedResource, FetchOutcome, PageRecord, ResourceKind, ResourceRecord, RunMetadata,
    };
    use crate::url::canonicalize;
    use chrono::Utc;
    use std::path::PathBuf;

    fn url(path: &str) -> CanonicalUrl {
        canonicalize(path, &Url::parse("https://example.com/").unwrap()).unwrap()
    }

    fn seed() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    fn page(path: &str, sequence: u64, outcome: FetchOutcome, references: Vec<ReferenceRecord>) -> PageRecord {
        let success = matches!(outcome, FetchOutcome::Success);
        PageRecord {
            url: url(path),
            display_url: format!("https://example.com{}", path),
            depth: sequence as u32,
            referrer: None,
            sequence,
            outcome,
            final_url: None,
            content_type: Some("text/html".to_string()),
            content_hash: success.then(|| "hash".to_string()),
            local_path: success.then(|| format!("{}/index.html", path.trim_matches('/'))),
            references,
        }
    }

    fn link(path: &str, required: bool) -> ReferenceRecord {
        ReferenceRecord {
            url: url(path),
            asset: None,
            required,
        }
    }

    fn asset(path: &str) -> ReferenceRecord {
        ReferenceRecord {
            url: url(path),
            asset: Some(ResourceKind::Image),
            required: true,
        }
    }

    fn manifest(pages: Vec<PageRecord>, resources: Vec<ResourceRecord>, failed: Vec<FailedResource>) -> Manifest {
        Manifest {
            run: RunMetadata {
                seed_url: seed().to_string(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                archive_root: PathBuf::from("/tmp/archive"),
                config_hash: None,
            },
            pages,
            resources,
            failed_resources: failed,
        }
    }

    fn resource(path: &str) -> ResourceRecord {
        ResourceRecord {
            url: url(path),
            kind: ResourceKind::Image,
            content_hash: "abc".to_string(),
            local_path: "assets/abc.png".to_string(),
            owners: vec![url("/")],
            content_type: Some("image/png".to_string()),
            size: 3,
            references: Vec::new(),
        }
    }

    #[test]
    fn test_complete_archive() {
        let m = manifest(
            vec![
                page("/", 0, FetchOutcome::Success, vec![link("/about", true), asset("/logo.png")]),
                page("/about", 1, FetchOutcome::Success, vec![link("/", true)]),
            ],
            vec![resource("/logo.png")],
            Vec::new(),
        );

        let verdict = assess_structure(&m, &seed());
        assert!(verdict.is_complete, "{}", verdict.report);
        assert!(verdict.report.contains("2 pages and 1 assets"));
    }

    #[test]
    fn test_broken_link_makes_archive_incomplete() {
        let m = manifest(
            vec![
                page("/", 0, FetchOutcome::Success, vec![link("/about", true)]),
                page("/about", 1, FetchOutcome::Success, vec![link("/missing", true)]),
                page(
                    "/missing",
                    2,
                    FetchOutcome::Failure {
                        reason: FailureReason::NotFound,
                    },
                    Vec::new(),
                ),
            ],
            Vec::new(),
            Vec::new(),
        );

        let missing = missing_references(&m, &seed());
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].url, url("/missing"));
        assert_eq!(missing[0].reason, "not_found");
        assert_eq!(missing[0].owners, vec![url("/about")]);

        let verdict = assess_structure(&m, &seed());
        assert!(!verdict.is_complete);
        assert!(verdict.report.contains("https://example.com/missing (not_found), referenced by https://example.com/about"));
    }

    #[test]
    fn test_out_of_scope_links_are_ignored() {
        let m = manifest(
            vec![page("/", 0, FetchOutcome::Success, vec![link("https://other.com/page", false)])],
            Vec::new(),
            Vec::new(),
        );
        assert!(assess_structure(&m, &seed()).is_complete);
    }

    #[test]
    fn test_failed_asset_and_unattempted_page() {
        let m = manifest(
            vec![page("/", 0, FetchOutcome::Success, vec![asset("/gone.png"), link("/later", true)])],
            Vec::new(),
            vec![FailedResource {
                url: url("/gone.png"),
                kind: ResourceKind::Image,
                reason: FailureReason::Timeout,
                owners: vec![url("/")],
            }],
        );

        let missing = missing_references(&m, &seed());
        let reasons: Vec<(&str, &str)> = missing.iter().map(|m| (m.url.as_str(), m.reason.as_str())).collect();
        assert_eq!(
            reasons,
            vec![
                ("https://example.com/gone.png", "timeout"),
                ("https://example.com/later", "not attempted"),
            ]
        );
    }

    #[test]
    fn test_missing_seed_is_incomplete() {
        let m = manifest(
            vec![page(
                "/",
                0,
                FetchOutcome::Failure {
                    reason: FailureReason::ConnectionFailed,
                },
                Vec::new(),
            )],
            Vec::new(),
            Vec::new(),
        );

        let verdict = assess_structure(&m, &seed());
        assert!(!verdict.is_complete);
        assert!(verdict.report.contains("https://example.com/ (connection_failed)"));
    }

    #[test]
    fn test_redirect_alias_counts_as_archived() {
        let mut old = page("/old", 1, FetchOutcome::Success, Vec::new());
        old.final_url = Some(url("/new"));
        let m = manifest(
            vec![page("/", 0, FetchOutcome::Success, vec![link("/old", true), link("/new", true)]), old],
            Vec::new(),
            Vec::new(),
        );
        assert!(assess_structure(&m, &seed()).is_complete);
    }
}
