//! Filesystem store for one archive run
//!
//! The store owns the manifest. Workers share it behind an `Arc`; the
//! mutex around its bookkeeping is only held for lookups and inserts, never
//! across a file write.

use crate::output::REPORT_FILE;
use crate::state::FailureReason;
use crate::storage::layout::{self, ASSET_DIR};
use crate::storage::{
    FailedResource, FetchOutcome, Manifest, PageRecord, ResourceRecord, RunMetadata, StorageError,
    StorageResult,
};
use crate::url::{host_dir_name, CanonicalUrl};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Name of the manifest file at the archive root
pub const MANIFEST_FILE: &str = "manifest.json";

/// Root-level files the run writes besides pages
const RESERVED_FILES: [&str; 2] = [MANIFEST_FILE, REPORT_FILE];

/// Format of the per-run directory name
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Writes pages and assets under one archive root and builds the manifest
pub struct Store {
    root: PathBuf,
    seed: Url,
    started_at: DateTime<Utc>,
    config_hash: Option<String>,
    temp_counter: AtomicU64,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    /// Assigned page path per canonical URL
    page_paths: HashMap<CanonicalUrl, String>,

    /// Which URL claimed each page path
    path_owners: HashMap<String, CanonicalUrl>,

    /// Directories that hold at least one assigned page path
    page_dirs: HashSet<String>,

    pages: Vec<PageRecord>,
    resources: BTreeMap<CanonicalUrl, ResourceRecord>,
    failed_resources: BTreeMap<CanonicalUrl, FailedResource>,

    /// Asset files claimed for writing
    asset_files: HashSet<String>,

    /// Owners reported for assets whose record does not exist yet
    pending_owners: HashMap<CanonicalUrl, Vec<CanonicalUrl>>,

    finalized: bool,
}

impl Store {
    /// Creates the archive root `<output_root>/<host>/<timestamp>/`
    ///
    /// Two runs started within the same second get `-1`, `-2`, ... appended
    /// to the timestamp directory.
    ///
    /// # Arguments
    ///
    /// * `output_root` - Directory holding all archives
    /// * `seed` - The seed URL, which names the host directory
    /// * `started_at` - Run start time, which names the run directory
    ///
    /// # Returns
    ///
    /// * `Ok(Store)` - The archive root exists and is writable
    /// * `Err(StorageError)` - The archive root could not be created
    pub async fn create(
        output_root: &Path,
        seed: &Url,
        started_at: DateTime<Utc>,
    ) -> StorageResult<Self> {
        let host_dir = output_root.join(host_dir_name(seed));
        fs::create_dir_all(&host_dir)
            .await
            .map_err(|source| StorageError::CreateRoot {
                path: host_dir.clone(),
                source,
            })?;

        let stamp = started_at.format(RUN_TIMESTAMP_FORMAT).to_string();
        let mut attempt = 0u32;
        let root = loop {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{}-{}", stamp, attempt)
            };
            let candidate = host_dir.join(name);
            match fs::create_dir(&candidate).await {
                Ok(()) => break candidate,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
                Err(source) => {
                    return Err(StorageError::CreateRoot {
                        path: candidate,
                        source,
                    })
                }
            }
        };

        fs::create_dir_all(root.join(ASSET_DIR))
            .await
            .map_err(|source| StorageError::CreateRoot {
                path: root.clone(),
                source,
            })?;

        tracing::info!("Archive root: {}", root.display());

        Ok(Self {
            root,
            seed: seed.clone(),
            started_at,
            config_hash: None,
            temp_counter: AtomicU64::new(0),
            state: Mutex::new(StoreState::default()),
        })
    }

    /// Records the hash of the configuration file in the manifest
    pub fn with_config_hash(mut self, hash: Option<String>) -> Self {
        self.config_hash = hash;
        self
    }

    /// The archive root of this run
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the storage path assigned to a page
    ///
    /// The first URL to claim a natural path keeps it. A segment that would
    /// collide gets a hash suffix: a path another page already claimed, a
    /// file where a directory of pages exists (or the reverse), the manifest
    /// or report file, or the asset directory. Assignment is stable for the
    /// run.
    pub fn page_path(&self, url: &CanonicalUrl) -> String {
        let mut state = self.lock();
        if let Some(path) = state.page_paths.get(url) {
            return path.clone();
        }

        let natural_path = layout::page_path(url.as_url(), &self.seed);
        let natural: Vec<&str> = natural_path.split('/').collect();
        let mut parts: Vec<String> = natural.iter().map(|part| part.to_string()).collect();
        let mut salt = 0u32;
        while let Some(index) = state.clash(&parts) {
            let key = format!("{}#{}", url, salt);
            parts[index] = layout::with_suffix(natural[index], &layout::short_hash(key.as_bytes()));
            salt += 1;
        }

        let path = parts.join("/");
        for end in 1..parts.len() {
            state.page_dirs.insert(parts[..end].join("/"));
        }
        state.path_owners.insert(path.clone(), url.clone());
        state.page_paths.insert(url.clone(), path.clone());
        path
    }

    /// Writes a page to its assigned path and records it
    ///
    /// The record's `local_path` must be set. A failed write is retried once.
    pub async fn put_page(&self, record: PageRecord, content: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        let path = record
            .local_path
            .clone()
            .unwrap_or_else(|| self.page_path(&record.url));

        self.write_with_retry(&path, content).await?;

        let mut record = record;
        record.local_path = Some(path);
        self.lock().pages.push(record);
        Ok(())
    }

    /// Rewrites an already stored page in place
    pub async fn rewrite_page(&self, local_path: &str, content: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        self.write_with_retry(local_path, content).await
    }

    /// Records a page that could not be archived
    pub fn record_failure(&self, record: PageRecord) {
        self.lock().pages.push(record);
    }

    /// Records a page that redirected to another archived page
    ///
    /// Nothing is written. A successful alias shares the target's `local_path`.
    pub fn record_alias(&self, record: PageRecord) {
        self.lock().pages.push(record);
    }

    /// Writes an asset under its content hash and records it
    ///
    /// An asset URL is stored once; a second put for the same URL only adds
    /// its owners. Distinct URLs with identical content share one file.
    pub async fn put_resource(
        &self,
        record: ResourceRecord,
        bytes: &[u8],
    ) -> StorageResult<ResourceRecord> {
        self.ensure_open()?;

        let needs_write = {
            let mut state = self.lock();
            if let Some(existing) = state.resources.get_mut(&record.url) {
                merge_owners(&mut existing.owners, &record.owners);
                return Ok(existing.clone());
            }
            state.asset_files.insert(record.local_path.clone())
        };

        if needs_write {
            if let Err(e) = self.write_with_retry(&record.local_path, bytes).await {
                self.lock().asset_files.remove(&record.local_path);
                return Err(e);
            }
        } else {
            tracing::debug!("Asset {} shares stored file {}", record.url, record.local_path);
        }

        let mut record = record;
        let mut state = self.lock();
        if let Some(pending) = state.pending_owners.remove(&record.url) {
            merge_owners(&mut record.owners, &pending);
        }
        let stored = state
            .resources
            .entry(record.url.clone())
            .and_modify(|existing| merge_owners(&mut existing.owners, &record.owners))
            .or_insert(record);
        Ok(stored.clone())
    }

    /// Records an asset that could not be fetched or stored
    pub fn record_failed_resource(&self, failed: FailedResource) {
        let mut failed = failed;
        let mut state = self.lock();
        if let Some(pending) = state.pending_owners.remove(&failed.url) {
            merge_owners(&mut failed.owners, &pending);
        }
        state
            .failed_resources
            .entry(failed.url.clone())
            .and_modify(|existing| merge_owners(&mut existing.owners, &failed.owners))
            .or_insert(failed);
    }

    /// Adds an owning page to a stored or failed asset
    ///
    /// An asset still being processed keeps the owner until its record lands.
    pub fn add_owner(&self, url: &CanonicalUrl, owner: &CanonicalUrl) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let owner = std::slice::from_ref(owner);
        if let Some(record) = state.resources.get_mut(url) {
            merge_owners(&mut record.owners, owner);
        } else if let Some(failed) = state.failed_resources.get_mut(url) {
            merge_owners(&mut failed.owners, owner);
        } else {
            merge_owners(state.pending_owners.entry(url.clone()).or_default(), owner);
        }
    }

    /// Local path of every stored asset
    pub fn resource_paths(&self) -> HashMap<CanonicalUrl, String> {
        self.lock()
            .resources
            .iter()
            .map(|(url, record)| (url.clone(), record.local_path.clone()))
            .collect()
    }

    /// Snapshot of the page records so far
    pub fn pages(&self) -> Vec<PageRecord> {
        self.lock().pages.clone()
    }

    /// Moves records whose file is missing to the failure lists
    ///
    /// # Returns
    ///
    /// The number of records moved
    pub async fn prune_missing(&self) -> usize {
        let (pages, resources) = {
            let state = self.lock();
            let pages: Vec<(usize, String)> = state
                .pages
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_success())
                .filter_map(|(i, p)| p.local_path.clone().map(|path| (i, path)))
                .collect();
            let resources: Vec<(CanonicalUrl, String)> = state
                .resources
                .iter()
                .map(|(url, r)| (url.clone(), r.local_path.clone()))
                .collect();
            (pages, resources)
        };

        let mut missing_pages = Vec::new();
        for (index, path) in pages {
            if !self.exists(&path).await {
                missing_pages.push(index);
            }
        }
        let mut missing_resources = Vec::new();
        for (url, path) in resources {
            if !self.exists(&path).await {
                missing_resources.push(url);
            }
        }

        let moved = missing_pages.len() + missing_resources.len();
        let mut state = self.lock();
        for index in missing_pages {
            if let Some(page) = state.pages.get_mut(index) {
                tracing::warn!("Stored page {} is missing its file", page.url);
                page.outcome = FetchOutcome::Failure {
                    reason: FailureReason::StorageError,
                };
                page.local_path = None;
            }
        }
        for url in missing_resources {
            if let Some(record) = state.resources.remove(&url) {
                tracing::warn!("Stored asset {} is missing its file", url);
                state.failed_resources.insert(
                    url.clone(),
                    FailedResource {
                        url,
                        kind: record.kind,
                        reason: FailureReason::StorageError,
                        owners: record.owners,
                    },
                );
            }
        }
        moved
    }

    /// Produces the manifest and writes it to `manifest.json`
    ///
    /// Called once per run. Every local path in the returned manifest names
    /// a file that exists.
    pub async fn finalize(&self, finished_at: DateTime<Utc>) -> StorageResult<Manifest> {
        self.ensure_open()?;
        self.prune_missing().await;

        let manifest = {
            let mut state = self.lock();
            state.finalized = true;

            let mut pages = state.pages.clone();
            pages.sort_by_key(|p| p.sequence);

            Manifest {
                run: RunMetadata {
                    seed_url: self.seed.to_string(),
                    started_at: self.started_at,
                    finished_at,
                    archive_root: self.root.clone(),
                    config_hash: self.config_hash.clone(),
                },
                pages,
                resources: state.resources.values().cloned().collect(),
                failed_resources: state.failed_resources.values().cloned().collect(),
            }
        };

        let json = serde_json::to_vec_pretty(&manifest)?;
        self.write_with_retry(MANIFEST_FILE, &json).await?;

        tracing::info!(
            "Manifest written: {} pages, {} assets, {} failed assets",
            manifest.pages.len(),
            manifest.resources.len(),
            manifest.failed_resources.len()
        );
        Ok(manifest)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panicked worker leaves the bookkeeping consistent; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.lock().finalized {
            Err(StorageError::Finalized)
        } else {
            Ok(())
        }
    }

    async fn exists(&self, relative: &str) -> bool {
        fs::metadata(self.root.join(relative)).await.is_ok()
    }

    async fn write_with_retry(&self, relative: &str, bytes: &[u8]) -> StorageResult<()> {
        let target = self.root.join(relative);
        if let Err(first) = self.write_atomic(&target, bytes).await {
            tracing::warn!("Write to {} failed, retrying once: {}", relative, first);
            self.write_atomic(&target, bytes)
                .await
                .map_err(|source| StorageError::Write {
                    path: relative.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Writes to a temporary file in the target's directory, then renames it
    /// into place
    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let parent = target.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent).await?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let counter = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = parent.join(format!(".{}.{}.tmp", name, counter));

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, target).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        result
    }
}

impl StoreState {
    /// Index of the first segment of a candidate page path that collides
    fn clash(&self, parts: &[String]) -> Option<usize> {
        let last = parts.len().saturating_sub(1);
        let mut prefix = String::new();
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                prefix.push('/');
            }
            prefix.push_str(part);

            let at_root = index == 0;
            let taken = if index == last {
                self.path_owners.contains_key(&prefix)
                    || self.page_dirs.contains(&prefix)
                    || (at_root && RESERVED_FILES.contains(&part.as_str()))
            } else {
                self.path_owners.contains_key(&prefix) || (at_root && part == ASSET_DIR)
            };
            if taken {
                return Some(index);
            }
        }
        None
    }
}

fn merge_owners(owners: &mut Vec<CanonicalUrl>, more: &[CanonicalUrl]) {
    for owner in more {
        if !owners.contains(owner) {
            owners.push(owner.clone());
        }
    }
}
