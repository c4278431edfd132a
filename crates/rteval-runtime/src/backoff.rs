//! Out-of-memory restart backoff.
//!
//! Kept as a "retry not before" instant rather than a sleep so that a
//! module's `task` stays non-blocking while it waits.

use std::time::{Duration, Instant};

/// Per-module exponential backoff for work units that hit memory pressure.
#[derive(Debug, Clone)]
pub struct OomBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
    retry_at: Option<Instant>,
    failures: u64,
}

impl OomBackoff {
    /// Backoff starting at `initial`, doubling up to `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
            retry_at: None,
            failures: 0,
        }
    }

    /// Record a failure at `now` and return the delay before the next try.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(d) => d.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        self.retry_at = Some(now + delay);
        self.failures += 1;
        delay
    }

    /// Record a unit killed for memory after running for `ran_for`.
    ///
    /// A unit that outlived the current delay ends the streak, so the
    /// next delay starts over; otherwise the delay keeps doubling.
    pub fn record_kill(&mut self, now: Instant, ran_for: Duration) -> Duration {
        if self.current.is_some_and(|delay| ran_for > delay) {
            self.reset();
        }
        self.record_failure(now)
    }

    /// Whether a restart may be attempted at `now`.
    #[must_use]
    pub fn ready(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    /// Forget the failure streak once a unit has run to completion.
    pub fn reset(&mut self) {
        self.current = None;
        self.retry_at = None;
    }

    /// Delay applied after the most recent failure, if in a streak.
    #[must_use]
    pub fn current_delay(&self) -> Option<Duration> {
        self.current
    }

    /// Total failures recorded over the module's lifetime.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_doubles_and_caps() {
        let mut backoff = OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let now = Instant::now();
        let delays: Vec<u64> = (0..7).map(|_| backoff.record_failure(now).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
        assert_eq!(backoff.failures(), 7);
    }

    #[test]
    fn test_non_decreasing_and_bounded() {
        let max = Duration::from_millis(700);
        let mut backoff = OomBackoff::new(Duration::from_millis(3), max);
        let now = Instant::now();
        let mut last = Duration::ZERO;
        for _ in 0..50 {
            let d = backoff.record_failure(now);
            assert!(d >= last);
            assert!(d <= max);
            last = d;
        }
        assert_eq!(last, max);
    }

    #[test]
    fn test_ready_gate_and_reset() {
        let mut backoff = OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let now = Instant::now();
        assert!(backoff.ready(now));

        backoff.record_failure(now);
        assert!(!backoff.ready(now + Duration::from_secs(4)));
        assert!(backoff.ready(now + Duration::from_secs(5)));

        backoff.record_failure(now);
        backoff.reset();
        assert!(backoff.ready(now));
        assert_eq!(backoff.record_failure(now), Duration::from_secs(5));
    }

    #[test]
    fn test_short_lived_kills_keep_doubling() {
        let mut backoff = OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let now = Instant::now();
        let ran_for = Duration::from_secs(1);
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.record_kill(now, ran_for).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_kill_after_long_run_starts_over() {
        let mut backoff = OomBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let now = Instant::now();
        backoff.record_kill(now, Duration::ZERO);
        assert_eq!(backoff.record_kill(now, Duration::from_secs(2)), Duration::from_secs(10));
        // outlived the 10s delay
        assert_eq!(backoff.record_kill(now, Duration::from_secs(11)), Duration::from_secs(5));
        assert_eq!(backoff.failures(), 3);
    }
}
