//! Traversal frontier
//!
//! This module owns the queue of pages to fetch and the visited-set:
//! - FIFO order, released level by level so traversal is breadth-first
//!   even with many concurrent workers
//! - Depth and page-count limits
//! - Same-origin policy
//! - Atomic check-and-insert so a URL is accepted at most once

use crate::config::CrawlConfig;
use crate::url::{same_host, CanonicalUrl};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use url::Url;

/// A page accepted into the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Identity of the page
    pub url: CanonicalUrl,

    /// URL as found in the referring document, for reporting
    pub display: String,

    /// Link distance from the seed
    pub depth: u32,

    /// Page the link was found on (`None` for the seed)
    pub referrer: Option<CanonicalUrl>,

    /// Dequeue order, assigned when the entry leaves the queue
    pub sequence: u64,
}

/// What `enqueue` did with a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Newly queued
    Accepted,

    /// Already queued, fetched or claimed as a redirect target
    AlreadyVisited,

    /// Beyond the depth limit
    TooDeep,

    /// The page budget is used up
    BudgetExhausted,

    /// Excluded by the same-origin policy
    OffOrigin,

    /// The frontier was closed by the run deadline
    Closed,
}

impl EnqueueOutcome {
    /// Whether the archive will hold (or try to hold) this page
    pub fn is_in_archive(&self) -> bool {
        matches!(self, Self::Accepted | Self::AlreadyVisited)
    }

    /// Whether the run's configuration puts this page in scope at all
    pub fn is_in_scope(&self) -> bool {
        !matches!(self, Self::TooDeep | Self::OffOrigin)
    }
}

#[derive(Default)]
struct FrontierState {
    queue: VecDeque<FrontierEntry>,
    visited: HashSet<CanonicalUrl>,

    /// In-flight entry count per depth
    in_flight: BTreeMap<u32, usize>,

    accepted: usize,
    dequeued: u64,
    budget_hit: bool,
    depth_hit: bool,
    closed: bool,
}

/// Breadth-first frontier shared by all workers
pub struct Frontier {
    seed: Url,
    max_depth: u32,
    max_pages: usize,
    same_origin_only: bool,
    state: Mutex<FrontierState>,
    changed: Notify,
}

impl Frontier {
    pub fn new(seed: Url, config: &CrawlConfig) -> Self {
        Self {
            seed,
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            same_origin_only: config.same_origin_only,
            state: Mutex::new(FrontierState::default()),
            changed: Notify::new(),
        }
    }

    /// Offers a URL to the frontier
    ///
    /// Re-discovery of a visited URL is a no-op. The visited check and
    /// insert happen under one lock, so concurrent discovery of the same
    /// URL queues it once.
    ///
    /// # Arguments
    ///
    /// * `url` - Canonical identity of the page
    /// * `display` - The URL as written, for reporting
    /// * `depth` - Link distance from the seed
    /// * `referrer` - Page the link was found on
    pub fn enqueue(
        &self,
        url: CanonicalUrl,
        display: impl Into<String>,
        depth: u32,
        referrer: Option<CanonicalUrl>,
    ) -> EnqueueOutcome {
        let mut state = self.lock();

        if state.closed {
            return EnqueueOutcome::Closed;
        }
        if state.visited.contains(&url) {
            return EnqueueOutcome::AlreadyVisited;
        }
        if depth > self.max_depth {
            state.depth_hit = true;
            return EnqueueOutcome::TooDeep;
        }
        if self.same_origin_only && !same_host(url.as_url(), &self.seed) {
            return EnqueueOutcome::OffOrigin;
        }
        if state.accepted >= self.max_pages {
            state.budget_hit = true;
            return EnqueueOutcome::BudgetExhausted;
        }

        state.visited.insert(url.clone());
        state.accepted += 1;
        state.queue.push_back(FrontierEntry {
            url,
            display: display.into(),
            depth,
            referrer,
            sequence: 0,
        });
        drop(state);

        self.changed.notify_waiters();
        EnqueueOutcome::Accepted
    }

    /// Registers a URL as visited without queueing it
    ///
    /// Used for redirect targets so they are never fetched a second time.
    ///
    /// # Returns
    ///
    /// `true` if the URL was not visited before
    pub fn mark_visited(&self, url: &CanonicalUrl) -> bool {
        self.lock().visited.insert(url.clone())
    }

    /// Takes the next entry to fetch
    ///
    /// An entry at depth `d` is released only when nothing shallower is in
    /// flight, since an in-flight page may still discover depth `d` links.
    ///
    /// # Returns
    ///
    /// * `Some(FrontierEntry)` - The next entry, now in flight
    /// * `None` - The queue is empty with nothing in flight, or the frontier is closed
    pub async fn dequeue_next(&self) -> Option<FrontierEntry> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }

                match state.queue.front().map(|e| e.depth) {
                    Some(depth) => {
                        let shallower_in_flight =
                            state.in_flight.range(..depth).any(|(_, count)| *count > 0);
                        if !shallower_in_flight {
                            if let Some(mut entry) = state.queue.pop_front() {
                                entry.sequence = state.dequeued;
                                state.dequeued += 1;
                                *state.in_flight.entry(entry.depth).or_insert(0) += 1;
                                return Some(entry);
                            }
                        }
                    }
                    None if state.in_flight.is_empty() => return None,
                    None => {}
                }
            }

            changed.await;
        }
    }

    /// Marks an in-flight entry finished
    pub fn complete(&self, entry: &FrontierEntry) {
        {
            let mut state = self.lock();
            if let Some(count) = state.in_flight.get_mut(&entry.depth) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.in_flight.remove(&entry.depth);
                }
            }
        }
        self.changed.notify_waiters();
    }

    /// Stops the frontier and discards what is still queued
    ///
    /// # Returns
    ///
    /// The entries that will never be fetched
    pub fn close(&self) -> Vec<FrontierEntry> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            state.queue.drain(..).collect()
        };
        self.changed.notify_waiters();
        drained
    }

    /// Number of entries dequeued so far
    pub fn dequeued(&self) -> u64 {
        self.lock().dequeued
    }

    /// Number of entries accepted so far
    pub fn accepted(&self) -> usize {
        self.lock().accepted
    }

    /// Number of entries waiting in the queue
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether a link was refused because the page budget ran out
    pub fn budget_exhausted(&self) -> bool {
        self.lock().budget_hit
    }

    /// Whether a link was refused for exceeding the depth limit
    pub fn depth_limited(&self) -> bool {
        self.lock().depth_hit
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Completes an in-flight entry when dropped
///
/// Keeps level gating correct even if a worker's pipeline is cancelled or
/// panics.
pub struct InFlight<'a> {
    frontier: &'a Frontier,
    entry: FrontierEntry,
}

impl<'a> InFlight<'a> {
    pub fn new(frontier: &'a Frontier, entry: FrontierEntry) -> Self {
        Self { frontier, entry }
    }

    pub fn entry(&self) -> &FrontierEntry {
        &self.entry
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.frontier.complete(&self.entry);
    }
}
