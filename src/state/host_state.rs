use std::time::{Duration, Instant};

/// Tracks the politeness state of one host during an archive run
///
/// Requests to a host are handed out as time slots. Each reservation pushes
/// the next free slot forward by the configured interval, so concurrent
/// workers hitting the same origin are spaced out instead of bunching up.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Number of requests made to this host in the current run
    pub request_count: u32,

    /// Earliest instant the next request may start
    pub next_slot: Option<Instant>,

    /// Whether this host has answered HTTP 429 during the run
    pub rate_limited: bool,
}

impl HostState {
    /// Creates a new HostState with no requests recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next request slot for this host
    ///
    /// # Arguments
    ///
    /// * `interval` - Minimum spacing between requests to this host
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// How long the caller must wait before starting its request. Zero when
    /// the host is idle.
    pub fn reserve(&mut self, interval: Duration, now: Instant) -> Duration {
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };

        // A host that rate limited us gets twice the spacing
        let spacing = if self.rate_limited {
            interval * 2
        } else {
            interval
        };

        self.next_slot = Some(slot + spacing);
        self.request_count += 1;
        slot - now
    }

    /// Marks this host as rate limited
    pub fn mark_rate_limited(&mut self) {
        self.rate_limited = true;
    }

    /// Calculates the time until an unreserved request could start
    ///
    /// Returns None if a request can be made now.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        match self.next_slot {
            Some(next) if next > now => Some(next - now),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_host_state() {
        let state = HostState::new();
        assert_eq!(state.request_count, 0);
        assert!(state.next_slot.is_none());
        assert!(!state.rate_limited);
    }

    #[test]
    fn test_first_reservation_is_immediate() {
        let mut state = HostState::new();
        let now = Instant::now();

        let wait = state.reserve(Duration::from_millis(250), now);
        assert_eq!(wait, Duration::ZERO);
        assert_eq!(state.request_count, 1);
    }

    #[test]
    fn test_concurrent_reservations_are_spaced() {
        let mut state = HostState::new();
        let now = Instant::now();
        let interval = Duration::from_millis(100);

        let first = state.reserve(interval, now);
        let second = state.reserve(interval, now);
        let third = state.reserve(interval, now);

        assert_eq!(first, Duration::ZERO);
        assert_eq!(second, Duration::from_millis(100));
        assert_eq!(third, Duration::from_millis(200));
    }

    #[test]
    fn test_idle_host_does_not_carry_old_slot() {
        let mut state = HostState::new();
        let now = Instant::now();
        let interval = Duration::from_millis(100);

        state.reserve(interval, now);
        let later = now + Duration::from_millis(500);
        assert_eq!(state.reserve(interval, later), Duration::ZERO);
    }

    #[test]
    fn test_rate_limited_doubles_spacing() {
        let mut state = HostState::new();
        let now = Instant::now();
        state.mark_rate_limited();

        state.reserve(Duration::from_millis(100), now);
        assert_eq!(
            state.time_until_next_request(now),
            Some(Duration::from_millis(200))
        );
    }

    #[test]
    fn test_time_until_next_request() {
        let mut state = HostState::new();
        let now = Instant::now();
        assert!(state.time_until_next_request(now).is_none());

        state.reserve(Duration::from_millis(1000), now);
        let soon = now + Duration::from_millis(400);
        assert_eq!(
            state.time_until_next_request(soon),
            Some(Duration::from_millis(600))
        );
    }
}
