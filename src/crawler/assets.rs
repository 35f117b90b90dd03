//! Asset fetching and placement shared by all workers
//!
//! Each canonical asset URL gets one `OnceCell`. The first page to reference
//! an asset fetches and stores it; every other page awaits the same cell and
//! only registers itself as an owner.

use crate::crawler::extractor::{AssetRef, Document, StylesheetDocument};
use crate::crawler::fetcher::{fetch_with_retry, Fetch, FetchResult, RetryPolicy};
use crate::crawler::politeness::Politeness;
use crate::crawler::rewriter::{rewrite_css, ReferenceMap};
use crate::state::FailureReason;
use crate::storage::{
    asset_path, relative_path, FailedResource, ReferenceRecord, ResourceKind, ResourceRecord, Store,
};
use crate::url::CanonicalUrl;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use url::Url;

/// What became of an asset reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Stored at `path`, relative to the archive root
    Stored { path: String },
    Failed { reason: FailureReason },
}

impl AssetOutcome {
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Stored { path } => Some(path),
            Self::Failed { .. } => None,
        }
    }
}

/// A stylesheet whose path is claimed but whose references are not yet resolved
struct PendingStylesheet {
    record: ResourceRecord,
    text: String,
    base: Url,
    owner: CanonicalUrl,
}

/// Resolves asset references to stored files
pub struct AssetResolver {
    fetcher: Arc<dyn Fetch>,
    store: Arc<Store>,
    politeness: Arc<Politeness>,
    policy: RetryPolicy,
    cells: Mutex<HashMap<CanonicalUrl, Arc<OnceCell<AssetOutcome>>>>,
}

impl AssetResolver {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        store: Arc<Store>,
        politeness: Arc<Politeness>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            store,
            politeness,
            policy,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves every asset of one page
    ///
    /// Assets are handled one at a time. Stylesheets found along the way are
    /// drained from a worklist after the page's own assets, so nested
    /// `@import` chains never recurse.
    ///
    /// # Arguments
    ///
    /// * `assets` - The page's asset references, in document order
    /// * `owner` - Canonical URL of the page
    pub async fn resolve_all(
        &self,
        assets: &[AssetRef],
        owner: &CanonicalUrl,
    ) -> HashMap<CanonicalUrl, AssetOutcome> {
        let mut pending = Vec::new();
        let mut outcomes = HashMap::with_capacity(assets.len());

        for asset in assets {
            let outcome = self.resolve_one(asset, owner, &mut pending).await;
            outcomes.insert(asset.url.clone(), outcome);
        }

        while let Some(sheet) = pending.pop() {
            self.finish_stylesheet(sheet, &mut pending).await;
        }

        outcomes
    }

    async fn resolve_one(
        &self,
        asset: &AssetRef,
        owner: &CanonicalUrl,
        pending: &mut Vec<PendingStylesheet>,
    ) -> AssetOutcome {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            cells.entry(asset.url.clone()).or_default().clone()
        };

        let mut initialized = false;
        let outcome = {
            let slot = &mut initialized;
            let pending = &mut *pending;
            cell.get_or_init(move || async move {
                *slot = true;
                self.fetch_and_place(asset, owner, pending).await
            })
            .await
            .clone()
        };

        if !initialized {
            self.store.add_owner(&asset.url, owner);
        }
        outcome
    }

    async fn fetch_and_place(
        &self,
        asset: &AssetRef,
        owner: &CanonicalUrl,
        pending: &mut Vec<PendingStylesheet>,
    ) -> AssetOutcome {
        let fetched = match fetch_with_retry(
            self.fetcher.as_ref(),
            asset.url.as_url(),
            &self.policy,
            &self.politeness,
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!("Asset {} failed: {}", asset.url, e);
                self.store.record_failed_resource(FailedResource {
                    url: asset.url.clone(),
                    kind: asset.kind,
                    reason: e.reason,
                    owners: vec![owner.clone()],
                });
                return AssetOutcome::Failed { reason: e.reason };
            }
        };

        let kind = effective_kind(asset.kind, &fetched);
        let content_hash = hex::encode(Sha256::digest(&fetched.bytes));
        // A stylesheet's stored bytes depend on where its references land, so
        // its path is keyed by URL and its hash is taken after rewriting.
        let address = if kind == ResourceKind::Stylesheet {
            hex::encode(Sha256::digest(asset.url.as_str().as_bytes()))
        } else {
            content_hash.clone()
        };
        let path = asset_path(
            &address,
            fetched.content_type.as_deref(),
            asset.url.as_url(),
            kind,
        );

        let record = ResourceRecord {
            url: asset.url.clone(),
            kind,
            content_hash,
            local_path: path.clone(),
            owners: vec![owner.clone()],
            content_type: fetched.content_type.clone(),
            size: fetched.bytes.len() as u64,
            references: Vec::new(),
        };

        if kind == ResourceKind::Stylesheet {
            pending.push(PendingStylesheet {
                record,
                text: String::from_utf8_lossy(&fetched.bytes).into_owned(),
                base: fetched.final_url,
                owner: owner.clone(),
            });
            return AssetOutcome::Stored { path };
        }

        match self.store.put_resource(record, &fetched.bytes).await {
            Ok(stored) => {
                tracing::debug!("Stored asset {} at {}", asset.url, stored.local_path);
                AssetOutcome::Stored {
                    path: stored.local_path,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to store asset {}: {}", asset.url, e);
                self.store.record_failed_resource(FailedResource {
                    url: asset.url.clone(),
                    kind,
                    reason: FailureReason::StorageError,
                    owners: vec![owner.clone()],
                });
                AssetOutcome::Failed {
                    reason: FailureReason::StorageError,
                }
            }
        }
    }

    /// Resolves a stylesheet's references, rewrites it and stores it
    async fn finish_stylesheet(&self, sheet: PendingStylesheet, pending: &mut Vec<PendingStylesheet>) {
        let PendingStylesheet {
            mut record,
            text,
            base,
            owner,
        } = sheet;

        let extraction = StylesheetDocument::new(text.as_str(), &base).extract_references();
        let mut map = ReferenceMap::new(base);

        for nested in &extraction.assets {
            let outcome = self.resolve_one(nested, &owner, pending).await;
            if let Some(path) = outcome.path() {
                map.insert(nested.url.clone(), relative_path(&record.local_path, path));
            }
            record.references.push(ReferenceRecord {
                url: nested.url.clone(),
                asset: Some(nested.kind),
                required: true,
            });
        }

        let rewritten = rewrite_css(&text, &map);
        record.content_hash = hex::encode(Sha256::digest(rewritten.as_bytes()));
        record.size = rewritten.len() as u64;
        let url = record.url.clone();
        let kind = record.kind;
        if let Err(e) = self.store.put_resource(record, rewritten.as_bytes()).await {
            tracing::warn!("Failed to store stylesheet {}: {}", url, e);
            self.store.record_failed_resource(FailedResource {
                url,
                kind,
                reason: FailureReason::StorageError,
                owners: vec![owner],
            });
        }
    }
}

/// Treats a `text/css` response as a stylesheet whatever referenced it
fn effective_kind(kind: ResourceKind, fetched: &FetchResult) -> ResourceKind {
    let is_css = fetched
        .content_type
        .as_deref()
        .map_or(false, |ct| ct.to_ascii_lowercase().starts_with("text/css"));
    if is_css {
        ResourceKind::Stylesheet
    } else {
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::FetchError;
    use crate::url::canonicalize;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves fixed bodies by URL and counts requests
    struct MapFetch {
        bodies: HashMap<String, (&'static str, &'static str)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetch for MapFetch {
        async fn fetch(&self, url: &Url) -> Result<FetchResult, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.bodies.get(url.as_str()) {
                Some((content_type, body)) => Ok(FetchResult {
                    bytes: body.as_bytes().to_vec(),
                    content_type: Some(content_type.to_string()),
                    final_url: url.clone(),
                    status: 200,
                }),
                None => Err(FetchError::new(FailureReason::NotFound, "404")),
            }
        }
    }

    fn url(path: &str) -> CanonicalUrl {
        canonicalize(path, &Url::parse("https://example.com/").unwrap()).unwrap()
    }

    async fn resolver(
        dir: &tempfile::TempDir,
        bodies: &[(&str, &'static str, &'static str)],
    ) -> (AssetResolver, Arc<Store>, Arc<MapFetch>) {
        let seed = Url::parse("https://example.com/").unwrap();
        let store = Arc::new(Store::create(dir.path(), &seed, Utc::now()).await.unwrap());
        let fetch = Arc::new(MapFetch {
            bodies: bodies
                .iter()
                .map(|(u, ct, body)| (u.to_string(), (*ct, *body)))
                .collect(),
            calls: AtomicUsize::new(0),
        });
        let policy = RetryPolicy {
            retries: 0,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        let resolver = AssetResolver::new(
            fetch.clone(),
            store.clone(),
            Arc::new(Politeness::new(Duration::ZERO)),
            policy,
        );
        (resolver, store, fetch)
    }

    #[tokio::test]
    async fn test_asset_is_fetched_once_for_two_pages() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store, fetch) =
            resolver(&dir, &[("https://example.com/logo.png", "image/png", "PNG")]).await;

        let assets = vec![AssetRef {
            url: url("/logo.png"),
            kind: ResourceKind::Image,
        }];
        let first = resolver.resolve_all(&assets, &url("/")).await;
        let second = resolver.resolve_all(&assets, &url("/about")).await;

        assert_eq!(first, second);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);

        let manifest = store.finalize(Utc::now()).await.unwrap();
        assert_eq!(manifest.resources.len(), 1);
        assert_eq!(manifest.resources[0].owners, vec![url("/"), url("/about")]);
    }

    #[tokio::test]
    async fn test_failed_asset_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store, _) = resolver(&dir, &[]).await;

        let assets = vec![AssetRef {
            url: url("/gone.js"),
            kind: ResourceKind::Script,
        }];
        let outcomes = resolver.resolve_all(&assets, &url("/")).await;
        assert_eq!(
            outcomes[&url("/gone.js")],
            AssetOutcome::Failed {
                reason: FailureReason::NotFound
            }
        );

        let manifest = store.finalize(Utc::now()).await.unwrap();
        assert!(manifest.resources.is_empty());
        assert_eq!(manifest.failed_resources[0].reason, FailureReason::NotFound);
    }

    #[tokio::test]
    async fn test_stylesheet_references_are_resolved_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store, _) = resolver(
            &dir,
            &[
                (
                    "https://example.com/css/site.css",
                    "text/css",
                    "@import \"theme.css\"; body { background: url(../img/bg.png) }",
                ),
                ("https://example.com/css/theme.css", "text/css", "h1 { color: red }"),
                ("https://example.com/img/bg.png", "image/png", "PNG"),
            ],
        )
        .await;

        let assets = vec![AssetRef {
            url: url("/css/site.css"),
            kind: ResourceKind::Stylesheet,
        }];
        let outcomes = resolver.resolve_all(&assets, &url("/")).await;
        let sheet_path = outcomes[&url("/css/site.css")].path().unwrap().to_string();

        let manifest = store.finalize(Utc::now()).await.unwrap();
        assert_eq!(manifest.resources.len(), 3);

        let sheet = manifest.resource(&url("/css/site.css")).unwrap();
        assert_eq!(sheet.local_path, sheet_path);
        assert_eq!(sheet.references.len(), 2);

        let theme = manifest.resource(&url("/css/theme.css")).unwrap();
        let bg = manifest.resource(&url("/img/bg.png")).unwrap();
        let stored = std::fs::read_to_string(store.root().join(&sheet.local_path)).unwrap();
        assert!(stored.contains(&format!("@import \"{}\"", relative_path(&sheet.local_path, &theme.local_path))));
        assert!(stored.contains(&format!("url({})", relative_path(&sheet.local_path, &bg.local_path))));
    }

    #[tokio::test]
    async fn test_identical_stylesheets_keep_their_own_references() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store, _) = resolver(
            &dir,
            &[
                ("https://example.com/a/s.css", "text/css", "p { background: url(img.png) }"),
                ("https://example.com/b/s.css", "text/css", "p { background: url(img.png) }"),
                ("https://example.com/a/img.png", "image/png", "PNG-A"),
                ("https://example.com/b/img.png", "image/png", "PNG-B"),
            ],
        )
        .await;

        let assets = vec![
            AssetRef {
                url: url("/a/s.css"),
                kind: ResourceKind::Stylesheet,
            },
            AssetRef {
                url: url("/b/s.css"),
                kind: ResourceKind::Stylesheet,
            },
        ];
        resolver.resolve_all(&assets, &url("/")).await;

        let manifest = store.finalize(Utc::now()).await.unwrap();
        let sheet_a = manifest.resource(&url("/a/s.css")).unwrap();
        let sheet_b = manifest.resource(&url("/b/s.css")).unwrap();
        assert_ne!(sheet_a.local_path, sheet_b.local_path);

        for (sheet, image) in [(sheet_a, "/a/img.png"), (sheet_b, "/b/img.png")] {
            let image = manifest.resource(&url(image)).unwrap();
            let stored = std::fs::read(store.root().join(&sheet.local_path)).unwrap();
            let text = String::from_utf8(stored.clone()).unwrap();
            assert!(text.contains(&format!("url({})", relative_path(&sheet.local_path, &image.local_path))));
            assert_eq!(sheet.content_hash, hex::encode(Sha256::digest(&stored)));
            assert_eq!(sheet.size, stored.len() as u64);
        }
    }

    #[tokio::test]
    async fn test_mutually_importing_stylesheets_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store, fetch) = resolver(
            &dir,
            &[
                ("https://example.com/a.css", "text/css", "@import \"b.css\";"),
                ("https://example.com/b.css", "text/css", "@import \"a.css\";"),
            ],
        )
        .await;

        let assets = vec![AssetRef {
            url: url("/a.css"),
            kind: ResourceKind::Stylesheet,
        }];
        resolver.resolve_all(&assets, &url("/")).await;
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 2);

        let manifest = store.finalize(Utc::now()).await.unwrap();
        assert_eq!(manifest.resources.len(), 2);
    }
}
