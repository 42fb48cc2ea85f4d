//! Circuit breaker guarding semantic index calls

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,   // Calls go through
    Open,     // Calls skipped
    HalfOpen, // One probe allowed
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: usize,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            opened_at: None,
        }
    }
}

/// Breaker thresholds
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::SemanticIndexConfig> for CircuitBreakerConfig {
    fn from(config: &crate::config::SemanticIndexConfig) -> Self {
        Self {
            failure_threshold: config.circuit_breaker_failures.max(1),
            reset_timeout: config.breaker_reset_timeout(),
        }
    }
}

/// Per-operation circuit breaker
pub struct CircuitBreaker {
    entries: DashMap<String, BreakerEntry>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// True if calls for `operation` should be skipped right now
    pub fn is_open(&self, operation: &str) -> bool {
        let mut entry = self.entries.entry(operation.to_string()).or_default();

        match entry.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = entry
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if elapsed {
                    entry.state = BreakerState::HalfOpen;
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn mark_success(&self, operation: &str) {
        let mut entry = self.entries.entry(operation.to_string()).or_default();
        *entry = BreakerEntry::default();
    }

    pub fn mark_failure(&self, operation: &str) {
        let mut entry = self.entries.entry(operation.to_string()).or_default();
        let now = Instant::now();

        entry.consecutive_failures += 1;
        entry.last_failure = Some(now);

        // A failed probe reopens immediately
        if entry.state == BreakerState::HalfOpen
            || entry.consecutive_failures >= self.config.failure_threshold
        {
            if entry.state != BreakerState::Open {
                tracing::warn!(
                    "Circuit opened for {} after {} failure(s)",
                    operation,
                    entry.consecutive_failures
                );
            }
            entry.state = BreakerState::Open;
            entry.opened_at = Some(now);
        }
    }

    pub fn state(&self, operation: &str) -> BreakerState {
        self.entries
            .get(operation)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn stats(&self, operation: &str) -> BreakerStats {
        self.entries
            .get(operation)
            .map(|e| BreakerStats {
                state: e.state,
                consecutive_failures: e.consecutive_failures,
                last_failure: e.last_failure,
            })
            .unwrap_or(BreakerStats {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            })
    }

    pub fn reset(&self, operation: &str) {
        self.entries.remove(operation);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Snapshot of one breaker
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub consecutive_failures: usize,
    pub last_failure: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: usize, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn test_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.is_open("search"));
        assert_eq!(breaker.state("search"), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(3, Duration::from_secs(30));

        breaker.mark_failure("search");
        breaker.mark_failure("search");
        assert!(!breaker.is_open("search"));

        breaker.mark_failure("search");
        assert!(breaker.is_open("search"));
        assert_eq!(breaker.state("search"), BreakerState::Open);
        assert!(!breaker.is_open("upsert"));
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = breaker(3, Duration::from_secs(30));
        breaker.mark_failure("search");
        breaker.mark_failure("search");
        breaker.mark_success("search");

        let stats = breaker.stats("search");
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_failure.is_none());
    }

    #[test]
    fn test_half_open_probe_then_reopen() {
        let breaker = breaker(2, Duration::from_millis(50));
        breaker.mark_failure("search");
        breaker.mark_failure("search");
        assert!(breaker.is_open("search"));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!breaker.is_open("search"));
        assert_eq!(breaker.state("search"), BreakerState::HalfOpen);

        breaker.mark_failure("search");
        assert!(breaker.is_open("search"));
    }

    #[test]
    fn test_reset() {
        let breaker = breaker(1, Duration::from_secs(30));
        breaker.mark_failure("search");
        assert!(breaker.is_open("search"));
        breaker.reset("search");
        assert!(!breaker.is_open("search"));
    }
}
