//! # Fibonacci Backoff
//!
//! Per-object retry delays for the framework error policy. Delays follow the
//! Fibonacci sequence in minutes (1m, 1m, 2m, 3m, 5m, 8m, capped at 10m) and
//! reset after the next successful reconciliation of the same object.
//!
//! Optimistic-concurrency conflicts bypass the sequence: the pass is simply
//! retried shortly after.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Delay before retrying a pass that lost a write conflict
pub const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    prev_minutes: u64,
    current_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff starting at `min_minutes` and capped at `max_minutes`
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Returns the current delay and advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_minutes * 60);
        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = next_minutes.min(self.max_minutes);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Backoff state per object key (`kind/namespace/name`)
#[derive(Debug, Default)]
pub struct BackoffRegistry {
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl BackoffRegistry {
    /// Next delay for `key`, advancing its sequence
    pub fn next(&self, key: &str) -> Duration {
        match self.states.lock() {
            Ok(mut states) => states.entry(key.to_string()).or_default().next_backoff(),
            Err(_) => Duration::from_secs(60),
        }
    }

    /// Forget the failure history of `key`
    pub fn reset(&self, key: &str) {
        if let Ok(mut states) = self.states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(d: Duration) -> u64 {
        d.as_secs() / 60
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::default();
        let seq: Vec<u64> = (0..9).map(|_| minutes(backoff.next_backoff())).collect();
        assert_eq!(seq, vec![1, 1, 2, 3, 5, 8, 10, 10, 10]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::default();
        for _ in 0..4 {
            backoff.next_backoff();
        }
        backoff.reset();
        assert_eq!(minutes(backoff.next_backoff()), 1);
        assert_eq!(minutes(backoff.next_backoff()), 1);
        assert_eq!(minutes(backoff.next_backoff()), 2);
    }

    #[test]
    fn test_registry_tracks_keys_independently() {
        let registry = BackoffRegistry::default();
        assert_eq!(minutes(registry.next("Repository/ns/a")), 1);
        assert_eq!(minutes(registry.next("Repository/ns/a")), 1);
        assert_eq!(minutes(registry.next("Repository/ns/a")), 2);
        assert_eq!(minutes(registry.next("Repository/ns/b")), 1);

        registry.reset("Repository/ns/a");
        assert_eq!(minutes(registry.next("Repository/ns/a")), 1);
    }
}
