//! Per-host request spacing
//!
//! Workers fetching from the same host share one `HostState`, so their
//! requests are serialized to the configured interval. Distinct hosts never
//! wait on each other.

use crate::state::HostState;
use crate::url::extract_host;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

/// Politeness limiter keyed by host
pub struct Politeness {
    interval: Duration,
    hosts: Mutex<HashMap<String, HostState>>,
}

impl Politeness {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until a request to the URL's host may start
    ///
    /// The slot is reserved before sleeping, so dropping the returned future
    /// mid-wait still counts the slot as used.
    pub async fn wait(&self, url: &Url) {
        let Some(host) = extract_host(url) else {
            return;
        };

        let delay = {
            let mut hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
            hosts
                .entry(host.clone())
                .or_insert_with(HostState::new)
                .reserve(self.interval, Instant::now())
        };

        if !delay.is_zero() {
            tracing::trace!("Waiting {:?} before next request to {}", delay, host);
            tokio::time::sleep(delay).await;
        }
    }

    /// Records that a host answered HTTP 429
    pub fn mark_rate_limited(&self, url: &Url) {
        if let Some(host) = extract_host(url) {
            tracing::warn!("Host {} is rate limiting requests", host);
            let mut hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
            hosts.entry(host).or_insert_with(HostState::new).mark_rate_limited();
        }
    }

    /// Number of requests started against a host
    pub fn request_count(&self, host: &str) -> u32 {
        let hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
        hosts.get(host).map_or(0, |state| state.request_count)
    }
}
