//! Archive coordinator - main run orchestration logic
//!
//! This module contains the run loop that ties the components together:
//! - Creating the archive root and seeding the frontier
//! - A pool of workers running fetch, extract, rewrite and store per page
//! - The run deadline and cancellation of in-flight work
//! - The relink pass over stored pages
//! - Finalizing the manifest and assessing completeness

use crate::assess::{CompletenessAssessor, HttpJudgmentService, JudgmentService, Strategy};
use crate::config::{validate, AssessmentStrategy, Config};
use crate::crawler::assets::{AssetOutcome, AssetResolver};
use crate::crawler::extractor::{settle_page, SettledPage};
use crate::crawler::fetcher::{fetch_with_retry, Fetch, FetchResult, HttpFetcher, RetryPolicy};
use crate::crawler::frontier::{Frontier, FrontierEntry, InFlight};
use crate::crawler::politeness::Politeness;
use crate::crawler::progress::{ProgressEvent, ProgressSink};
use crate::crawler::rewriter::{rewrite_html, ReferenceMap};
use crate::output::{write_markdown_report, CrawlResult, RunStatus, Termination, REPORT_FILE};
use crate::state::{FailureReason, PageState};
use crate::storage::{relative_path, FetchOutcome, PageRecord, ReferenceRecord, Store, MANIFEST_FILE};
use crate::url::{canonicalize_url, normalize_seed, CanonicalUrl};
use crate::{ArchiveError, ConfigError, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Main archive coordinator structure
pub struct Coordinator {
    config: Config,
    fetcher: Arc<dyn Fetch>,
    judgment: Option<Arc<dyn JudgmentService>>,
    config_hash: Option<String>,
    progress: ProgressSink,
}

impl Coordinator {
    /// Creates a coordinator that fetches over HTTP
    ///
    /// # Arguments
    ///
    /// * `config` - The archive configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - The configuration is valid
    /// * `Err(ArchiveError)` - Invalid configuration or HTTP client setup failure
    pub fn new(config: Config) -> Result<Self> {
        validate(&config)?;
        let fetcher = Arc::new(HttpFetcher::new(&config.crawler)?);
        Self::with_fetcher(config, fetcher)
    }

    /// Creates a coordinator with a custom fetch strategy
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn Fetch>) -> Result<Self> {
        validate(&config)?;

        let judgment = match config.assessment.strategy {
            AssessmentStrategy::Structural => None,
            AssessmentStrategy::Judgment => Some(build_judgment_service(&config)?),
        };

        Ok(Self {
            config,
            fetcher,
            judgment,
            config_hash: None,
            progress: ProgressSink::default(),
        })
    }

    /// Assesses completeness with the given service instead of the configured strategy
    pub fn with_judgment_service(mut self, service: Arc<dyn JudgmentService>) -> Self {
        self.judgment = Some(service);
        self
    }

    /// Records the configuration file hash in the manifest
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Returns a channel receiving the run's progress events
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Runs the archive to completion
    ///
    /// Per-page failures end up in the result. Only an invalid seed or an
    /// archive root that cannot be created or finalized returns an error.
    pub async fn run(self) -> Result<CrawlResult> {
        let Self {
            config,
            fetcher,
            judgment,
            config_hash,
            progress,
        } = self;
        let crawl = &config.crawler;

        let seed_url = normalize_seed(&crawl.seed_url)?;
        let seed = canonicalize_url(&seed_url)?;

        let started_at = Utc::now();
        let store = Arc::new(
            Store::create(&config.output.archive_root, &seed_url, started_at)
                .await?
                .with_config_hash(config_hash),
        );
        tracing::info!(
            "Archiving {} (depth {}, up to {} pages, {} workers)",
            seed_url,
            crawl.max_depth,
            crawl.max_pages,
            crawl.max_concurrent_fetches
        );
        progress.emit(ProgressEvent::Started {
            seed: seed_url.to_string(),
            archive_root: store.root().to_path_buf(),
        });

        let politeness = Arc::new(Politeness::new(crawl.per_host_interval()));
        let policy = RetryPolicy::from_config(crawl);
        let pipeline = Arc::new(Pipeline {
            frontier: Frontier::new(seed_url.clone(), crawl),
            assets: AssetResolver::new(fetcher.clone(), store.clone(), politeness.clone(), policy.clone()),
            store: store.clone(),
            fetcher,
            politeness,
            policy,
            cancel: CancellationToken::new(),
            progress,
            retained: Mutex::new(Vec::new()),
            aliases: Mutex::new(Vec::new()),
            not_attempted: Mutex::new(Vec::new()),
            deadline_hit: AtomicBool::new(false),
            pages_done: AtomicU64::new(0),
        });

        PageState::Discovered.transition(PageState::Queued)?;
        pipeline.frontier.enqueue(seed, seed_url.to_string(), 0, None);

        let timer = crawl.run_deadline().map(|limit| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                pipeline.expire();
            })
        });

        let mut workers = JoinSet::new();
        for id in 0..crawl.max_concurrent_fetches {
            let pipeline = pipeline.clone();
            workers.spawn(async move { pipeline.work(id).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let deadline_hit = pipeline.deadline_hit.load(Ordering::SeqCst);
        pipeline.resolve_aliases();
        let pruned = store.prune_missing().await;
        if pruned > 0 {
            tracing::warn!("{} stored files went missing before relinking", pruned);
        }

        let relinked = pipeline.relink().await;
        pipeline.progress.emit(ProgressEvent::Relinked { pages: relinked });

        let manifest = store.finalize(Utc::now()).await?;

        let termination = if deadline_hit {
            Termination::Deadline
        } else if pipeline.frontier.budget_exhausted() {
            Termination::PageLimit
        } else if pipeline.frontier.depth_limited() {
            Termination::DepthLimit
        } else {
            Termination::FrontierExhausted
        };
        let status = if deadline_hit {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        pipeline.progress.emit(ProgressEvent::Assessing);
        let assessor = match judgment {
            Some(service) => CompletenessAssessor::new(Strategy::Judgment {
                service,
                timeout: config.assessment.judgment_timeout(),
            }),
            None => CompletenessAssessor::structural(),
        };
        let completeness = assessor.assess(&manifest, &seed_url).await;

        let not_attempted = std::mem::take(&mut *lock(&pipeline.not_attempted));
        let result = CrawlResult::from_manifest(
            &manifest,
            store.root().join(MANIFEST_FILE),
            status,
            termination,
            not_attempted,
            completeness,
        );

        if let Err(e) = write_markdown_report(&result, &store.root().join(REPORT_FILE)) {
            tracing::warn!("Failed to write report: {}", e);
        }

        tracing::info!(
            "Archive finished ({:?}): {} pages archived, {} broken, {} not attempted, complete: {}",
            result.termination,
            result.crawled_pages.len(),
            result.broken_links.len(),
            result.not_attempted.len(),
            result.completeness.is_complete
        );
        pipeline.progress.emit(ProgressEvent::Finished {
            crawled: result.crawled_pages.len(),
            broken: result.broken_links.len(),
        });

        Ok(result)
    }
}

/// Archives a site with the given configuration
///
/// # Example
///
/// ```no_run
/// use web_archive::{archive, Config};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let result = archive(Config::for_seed("https://example.com/")).await?;
/// println!("{} pages archived", result.crawled_pages.len());
/// # Ok(())
/// # }
/// ```
pub async fn archive(config: Config) -> Result<CrawlResult> {
    Coordinator::new(config)?.run().await
}

fn build_judgment_service(config: &Config) -> Result<Arc<dyn JudgmentService>> {
    let endpoint = config
        .assessment
        .judgment_endpoint
        .as_deref()
        .ok_or_else(|| ConfigError::Validation("judgment strategy requires judgment-endpoint".to_string()))?;
    let endpoint = Url::parse(endpoint).map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
    Ok(Arc::new(HttpJudgmentService::new(endpoint, &config.crawler.user_agent)?))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A stored page kept for the relink pass
struct RetainedPage {
    url: CanonicalUrl,
    local_path: String,
    settled: Arc<SettledPage>,

    /// Map the stored file was rewritten with
    map: ReferenceMap,
}

/// A page whose redirect landed on a URL another entry archives
struct PendingAlias {
    entry: FrontierEntry,
    target: CanonicalUrl,
    content_type: Option<String>,
}

/// Where a page's redirect, if any, leaves it
enum Redirect {
    /// Served from its own URL
    None,
    /// Redirected to a URL this page now archives
    Claimed(CanonicalUrl),
    /// Redirected to a URL another entry archives
    AliasOf(CanonicalUrl),
}

/// State shared by the workers of one run
struct Pipeline {
    frontier: Frontier,
    store: Arc<Store>,
    fetcher: Arc<dyn Fetch>,
    politeness: Arc<Politeness>,
    policy: RetryPolicy,
    assets: AssetResolver,
    cancel: CancellationToken,
    progress: ProgressSink,
    retained: Mutex<Vec<RetainedPage>>,
    aliases: Mutex<Vec<PendingAlias>>,
    not_attempted: Mutex<Vec<String>>,
    deadline_hit: AtomicBool,
    pages_done: AtomicU64,
}

impl Pipeline {
    async fn work(&self, id: usize) {
        tracing::trace!("Worker {} started", id);

        while let Some(entry) = self.frontier.dequeue_next().await {
            let in_flight = InFlight::new(&self.frontier, entry);
            let entry = in_flight.entry();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Worker {} abandoned {} at the deadline", id, entry.url);
                    lock(&self.not_attempted).push(entry.display.clone());
                }
                _ = self.process_entry(entry) => {}
            }
        }

        tracing::trace!("Worker {} finished", id);
    }

    /// Stops the run when the deadline expires
    fn expire(&self) {
        tracing::warn!("Run deadline reached, cancelling in-flight work");
        self.deadline_hit.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let drained = self.frontier.close();
        if !drained.is_empty() {
            tracing::info!("{} queued pages will not be attempted", drained.len());
        }
        lock(&self.not_attempted).extend(drained.into_iter().map(|entry| entry.display));
    }

    async fn process_entry(&self, entry: &FrontierEntry) {
        let success = match self.archive_entry(entry).await {
            Ok(success) => success,
            Err(e) => {
                tracing::error!("Failed to archive {}: {}", entry.display, e);
                self.store
                    .record_failure(page_record(entry, failure(FailureReason::StorageError)));
                false
            }
        };

        let pages_done = self.pages_done.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.emit(ProgressEvent::PageDone {
            url: entry.display.clone(),
            success,
            pages_done,
            total_estimate: self.frontier.accepted() as u64,
        });
    }

    /// Runs one entry through the pipeline
    ///
    /// Records exactly one outcome when it returns `Ok`, except for a redirect
    /// alias whose outcome waits for `resolve_aliases`. An `Err` means no
    /// outcome was recorded yet.
    async fn archive_entry(&self, entry: &FrontierEntry) -> Result<bool> {
        let state = PageState::Queued.transition(PageState::Fetching)?;
        tracing::debug!("Fetching {} (depth {})", entry.url, entry.depth);

        let fetched = match fetch_with_retry(
            self.fetcher.as_ref(),
            entry.url.as_url(),
            &self.policy,
            &self.politeness,
        )
        .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                state.transition(PageState::Failed)?;
                tracing::warn!("Failed to fetch {}: {}", entry.display, e);
                self.store.record_failure(page_record(entry, failure(e.reason)));
                return Ok(false);
            }
        };
        let state = state.transition(PageState::Fetched)?;

        let final_url = match self.claim_redirect(entry, &fetched) {
            Redirect::None => None,
            Redirect::Claimed(target) => Some(target),
            Redirect::AliasOf(target) => {
                state.transition(PageState::Stored)?;
                lock(&self.aliases).push(PendingAlias {
                    entry: entry.clone(),
                    target,
                    content_type: fetched.content_type,
                });
                return Ok(true);
            }
        };
        let local_path = self.store.page_path(&entry.url);

        let mut record = page_record(entry, FetchOutcome::Success);
        record.final_url = final_url;
        record.content_type = fetched.content_type.clone();
        record.local_path = Some(local_path.clone());

        if !fetched.is_html() {
            record.content_hash = Some(hex::encode(Sha256::digest(&fetched.bytes)));
            return self.store_page(entry, record, state, &fetched.bytes).await;
        }

        let page_url = fetched.final_url.clone();
        let bytes = fetched.bytes;
        let settled = tokio::task::spawn_blocking(move || settle_page(&bytes, &page_url))
            .await
            .map(Arc::new)
            .map_err(|e| ArchiveError::Worker(e.to_string()))?;
        let state = state.transition(PageState::Extracted)?;

        let mut map = ReferenceMap::new(settled.base.clone());
        for link in &settled.extraction.links {
            let outcome = self.frontier.enqueue(
                link.url.clone(),
                link.display.clone(),
                entry.depth + 1,
                Some(entry.url.clone()),
            );
            if outcome.is_in_archive() {
                let target = self.store.page_path(&link.url);
                map.insert(link.url.clone(), relative_path(&local_path, &target));
            }
            record.references.push(ReferenceRecord {
                url: link.url.clone(),
                asset: None,
                required: outcome.is_in_scope(),
            });
        }

        let outcomes = self.assets.resolve_all(&settled.extraction.assets, &entry.url).await;
        for asset in &settled.extraction.assets {
            if let Some(path) = outcomes.get(&asset.url).and_then(AssetOutcome::path) {
                map.insert(asset.url.clone(), relative_path(&local_path, path));
            }
            record.references.push(ReferenceRecord {
                url: asset.url.clone(),
                asset: Some(asset.kind),
                required: true,
            });
        }

        let rewritten = {
            let settled = settled.clone();
            let map = map.clone();
            tokio::task::spawn_blocking(move || rewrite_html(&settled.html, &map))
                .await
                .map_err(|e| ArchiveError::Worker(e.to_string()))?
        };
        let state = state.transition(PageState::Rewritten)?;
        record.content_hash = Some(hex::encode(Sha256::digest(settled.html.as_bytes())));

        let stored = self.store_page(entry, record, state, rewritten.as_bytes()).await?;
        if stored {
            lock(&self.retained).push(RetainedPage {
                url: entry.url.clone(),
                local_path,
                settled,
                map,
            });
        }
        Ok(stored)
    }

    /// Registers a redirect target as visited
    ///
    /// The first page to land on a target archives it. Any later page landing
    /// there stores nothing of its own.
    fn claim_redirect(&self, entry: &FrontierEntry, fetched: &FetchResult) -> Redirect {
        let Ok(final_url) = canonicalize_url(&fetched.final_url) else {
            return Redirect::None;
        };
        if final_url == entry.url {
            return Redirect::None;
        }
        if self.frontier.mark_visited(&final_url) {
            tracing::debug!("{} redirected to {}", entry.url, final_url);
            Redirect::Claimed(final_url)
        } else {
            tracing::debug!("{} redirected to already visited {}", entry.url, final_url);
            Redirect::AliasOf(final_url)
        }
    }

    /// Records each redirect alias with the outcome of the page it landed on
    ///
    /// Runs once the workers are done, when every target's outcome is known.
    /// An alias of an archived page points at that page's file.
    fn resolve_aliases(&self) {
        let aliases = std::mem::take(&mut *lock(&self.aliases));
        if aliases.is_empty() {
            return;
        }

        let pages = self.store.pages();
        for alias in aliases {
            let landed = pages
                .iter()
                .find(|p| p.url == alias.target)
                .or_else(|| pages.iter().find(|p| p.final_url.as_ref() == Some(&alias.target)));

            let Some(landed) = landed else {
                tracing::debug!("{} redirected to unattempted {}", alias.entry.url, alias.target);
                lock(&self.not_attempted).push(alias.entry.display.clone());
                continue;
            };

            let mut record = page_record(&alias.entry, landed.outcome.clone());
            record.final_url = Some(alias.target.clone());
            record.content_type = alias.content_type;
            if landed.is_success() {
                record.local_path = landed.local_path.clone();
                record.content_hash = landed.content_hash.clone();
                tracing::info!("Archived {} as an alias of {}", alias.entry.display, alias.target);
            }
            self.store.record_alias(record);
        }
    }

    /// Writes a page and records the outcome
    ///
    /// `state` is the page's state before storing.
    async fn store_page(
        &self,
        entry: &FrontierEntry,
        record: PageRecord,
        state: PageState,
        content: &[u8],
    ) -> Result<bool> {
        match self.store.put_page(record, content).await {
            Ok(()) => {
                state.transition(PageState::Stored)?;
                tracing::info!("Archived {} (depth {})", entry.display, entry.depth);
                Ok(true)
            }
            Err(e) => {
                state.transition(PageState::Failed)?;
                tracing::warn!("Failed to store {}: {}", entry.display, e);
                self.store
                    .record_failure(page_record(entry, failure(FailureReason::StorageError)));
                Ok(false)
            }
        }
    }

    /// Re-rewrites stored pages whose links changed after they were stored
    ///
    /// Pages are linked optimistically while the crawl runs. Once every
    /// outcome is known, links to failed or unattempted pages fall back to
    /// their live URL and links to redirect aliases point at the archived
    /// target.
    async fn relink(&self) -> usize {
        let pages = self.store.pages();
        let mut targets: HashMap<CanonicalUrl, String> = HashMap::new();
        // Aliases first so a page stored under its own URL wins
        for page in pages.iter().filter(|p| p.is_success()) {
            if let (Some(alias), Some(path)) = (&page.final_url, &page.local_path) {
                targets.insert(alias.clone(), path.clone());
            }
        }
        for page in pages.iter().filter(|p| p.is_success()) {
            if let Some(path) = &page.local_path {
                targets.insert(page.url.clone(), path.clone());
            }
        }
        let assets = self.store.resource_paths();

        let retained = std::mem::take(&mut *lock(&self.retained));
        let mut relinked = 0;
        for page in retained {
            if targets.get(&page.url) != Some(&page.local_path) {
                continue;
            }

            let mut map = ReferenceMap::new(page.settled.base.clone());
            for link in &page.settled.extraction.links {
                if let Some(path) = targets.get(&link.url) {
                    map.insert(link.url.clone(), relative_path(&page.local_path, path));
                }
            }
            for asset in &page.settled.extraction.assets {
                if let Some(path) = assets.get(&asset.url) {
                    map.insert(asset.url.clone(), relative_path(&page.local_path, path));
                }
            }
            if map == page.map {
                continue;
            }

            let settled = page.settled.clone();
            let rewritten = match tokio::task::spawn_blocking(move || rewrite_html(&settled.html, &map)).await {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    tracing::error!("Relink of {} failed: {}", page.url, e);
                    continue;
                }
            };
            match self.store.rewrite_page(&page.local_path, rewritten.as_bytes()).await {
                Ok(()) => {
                    tracing::debug!("Relinked {}", page.url);
                    relinked += 1;
                }
                Err(e) => tracing::warn!("Failed to relink {}: {}", page.url, e),
            }
        }

        if relinked > 0 {
            tracing::info!("Relinked {} pages", relinked);
        }
        relinked
    }
}

fn failure(reason: FailureReason) -> FetchOutcome {
    FetchOutcome::Failure { reason }
}

fn page_record(entry: &FrontierEntry, outcome: FetchOutcome) -> PageRecord {
    PageRecord {
        url: entry.url.clone(),
        display_url: entry.display.clone(),
        depth: entry.depth,
        referrer: entry.referrer.clone(),
        sequence: entry.sequence,
        outcome,
        final_url: None,
        content_type: None,
        content_hash: None,
        local_path: None,
        references: Vec::new(),
    }
}
