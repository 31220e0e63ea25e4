//! Source Manager - Per-source Health and Exponential Backoff
//!
//! Tracks consecutive failures per price source and gates sources out of
//! the fetch fan-out while they back off. A failing source waits
//! `min(base * 2^(failures - 1), max)` before it is polled again; a single
//! success clears its state.
//!
//! Owned by exactly one pair loop, so no interior locking is needed.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Backoff parameters shared by every source of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay applied after `consecutive_failures` failures in a row.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = consecutive_failures - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Health state of a single source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceState {
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Instant before which the source is skipped.
    pub backoff_until: Option<Instant>,
    /// Lifetime failure count.
    pub total_failures: u64,
    /// Lifetime success count.
    pub total_successes: u64,
}

/// Point-in-time view of a source for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub name: String,
    pub active: bool,
    pub consecutive_failures: u32,
    pub backoff_remaining: Duration,
    pub total_failures: u64,
    pub total_successes: u64,
}

/// Failure/backoff bookkeeping for the sources of one pair.
#[derive(Debug, Clone)]
pub struct SourceManager {
    /// Registration order, preserved for deterministic iteration.
    sources: Vec<String>,
    states: HashMap<String, SourceState>,
    policy: BackoffPolicy,
}

impl SourceManager {
    /// Register `sources` with a fresh state each.
    pub fn new<I, S>(sources: I, policy: BackoffPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut manager = Self {
            sources: Vec::new(),
            states: HashMap::new(),
            policy,
        };
        for source in sources {
            manager.add_source(source);
        }
        manager
    }

    /// Register a source. No-op if it is already known.
    pub fn add_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        if !self.states.contains_key(&source) {
            self.states.insert(source.clone(), SourceState::default());
            self.sources.push(source);
        }
    }

    /// Record a failed fetch and return the backoff that now applies.
    pub fn record_failure(&mut self, source: &str) -> Duration {
        self.record_failure_at(source, Instant::now())
    }

    /// [`Self::record_failure`] against an explicit clock reading.
    pub fn record_failure_at(&mut self, source: &str, now: Instant) -> Duration {
        self.add_source(source);
        let policy = self.policy;
        let state = self.state_mut(source);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.total_failures += 1;
        let delay = policy.delay(state.consecutive_failures);
        state.backoff_until = Some(now + delay);
        delay
    }

    /// Record a successful fetch: failures reset, backoff cleared.
    pub fn record_success(&mut self, source: &str) {
        self.add_source(source);
        let state = self.state_mut(source);
        state.consecutive_failures = 0;
        state.backoff_until = None;
        state.total_successes += 1;
    }

    /// Sources eligible for polling now.
    pub fn active_sources(&self) -> Vec<String> {
        self.active_sources_at(Instant::now())
    }

    /// Sources whose backoff has expired at `now`. Side-effect free.
    pub fn active_sources_at(&self, now: Instant) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| self.is_active_at(s, now))
            .cloned()
            .collect()
    }

    pub fn is_active(&self, source: &str) -> bool {
        self.is_active_at(source, Instant::now())
    }

    /// Unknown sources are never active.
    pub fn is_active_at(&self, source: &str, now: Instant) -> bool {
        self.states
            .get(source)
            .is_some_and(|state| state.backoff_until.is_none_or(|until| until <= now))
    }

    /// Time left before `source` is polled again; zero when active.
    pub fn backoff_remaining(&self, source: &str) -> Duration {
        self.backoff_remaining_at(source, Instant::now())
    }

    pub fn backoff_remaining_at(&self, source: &str, now: Instant) -> Duration {
        self.states
            .get(source)
            .and_then(|state| state.backoff_until)
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }

    pub fn state(&self, source: &str) -> Option<&SourceState> {
        self.states.get(source)
    }

    /// Status of one source, or `None` if unregistered.
    pub fn status_at(&self, source: &str, now: Instant) -> Option<SourceStatus> {
        let state = self.states.get(source)?;
        Some(SourceStatus {
            name: source.to_string(),
            active: self.is_active_at(source, now),
            consecutive_failures: state.consecutive_failures,
            backoff_remaining: self.backoff_remaining_at(source, now),
            total_failures: state.total_failures,
            total_successes: state.total_successes,
        })
    }

    pub fn status(&self, source: &str) -> Option<SourceStatus> {
        self.status_at(source, Instant::now())
    }

    /// Status of every source in registration order.
    pub fn all_status_at(&self, now: Instant) -> Vec<SourceStatus> {
        self.sources
            .iter()
            .filter_map(|s| self.status_at(s, now))
            .collect()
    }

    pub fn all_status(&self) -> Vec<SourceStatus> {
        self.all_status_at(Instant::now())
    }

    fn state_mut(&mut self, source: &str) -> &mut SourceState {
        self.states.entry(source.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SourceManager {
        SourceManager::new(["coinbase", "kraken", "bitstamp"], BackoffPolicy::default())
    }

    #[test]
    fn test_backoff_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_failure_excludes_until_expiry() {
        let mut sm = manager();
        let now = Instant::now();

        let delay = sm.record_failure_at("kraken", now);
        assert_eq!(delay, Duration::from_secs(5));
        assert_eq!(sm.active_sources_at(now), vec!["coinbase", "bitstamp"]);
        assert_eq!(
            sm.backoff_remaining_at("kraken", now + Duration::from_secs(2)),
            Duration::from_secs(3)
        );

        let later = now + Duration::from_secs(5);
        assert_eq!(sm.active_sources_at(later).len(), 3);
    }

    #[test]
    fn test_success_resets_state() {
        let mut sm = manager();
        let now = Instant::now();
        sm.record_failure_at("coinbase", now);
        sm.record_failure_at("coinbase", now);
        sm.record_success("coinbase");

        let state = sm.state("coinbase").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.backoff_until.is_none());
        assert_eq!(state.total_failures, 2);
        assert_eq!(state.total_successes, 1);
        assert!(sm.is_active_at("coinbase", now));
    }

    #[test]
    fn test_unknown_source_auto_registered() {
        let mut sm = manager();
        sm.record_failure_at("coingecko", Instant::now());
        assert_eq!(sm.all_status_at(Instant::now()).len(), 4);
        assert!(sm.state("coingecko").is_some());
    }

    #[test]
    fn test_status_snapshot() {
        let mut sm = manager();
        let now = Instant::now();
        sm.record_failure_at("kraken", now);
        let status = sm.status_at("kraken", now).unwrap();
        assert!(!status.active);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.backoff_remaining, Duration::from_secs(5));
        assert_eq!(sm.all_status_at(now).len(), 3);
        assert!(sm.status_at("missing", now).is_none());
    }
}
