//! Per-destination circuit breaker.
//!
//! Failure-tracking state machine that fails fast when a remote instance is
//! unhealthy. Transitions:
//!
//! - CLOSED -> OPEN after `failure_threshold` consecutive failures.
//! - OPEN -> HALF_OPEN automatically once the cooldown elapses.
//! - HALF_OPEN -> CLOSED after `success_threshold` **consecutive** successes.
//! - HALF_OPEN -> OPEN immediately on any failure.
//!
//! The gradual HALF_OPEN recovery avoids oscillation under flapping remotes.
//! The registry is explicitly constructed and injected by its owner; internal
//! counters are reachable only through `check_and_transition`, `on_success`,
//! `on_failure`, and `reset`. Success and failure must be recorded exactly
//! once per attempted call.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(label)
    }
}

struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    transitioned_at: Instant,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            transitioned_at: Instant::now(),
        }
    }
}

/// Breaker map keyed by destination, owned by the scheduler and shared with
/// every client facade.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a call to `destination` may proceed. Performs the
    /// OPEN -> HALF_OPEN transition when the cooldown has elapsed, under the
    /// same lock that guards the rest of the state.
    pub fn check_and_transition(&self, destination: &str) -> bool {
        let mut entries = self.lock();
        let entry = entries
            .entry(destination.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooldown = Duration::from_secs(self.config.cooldown_seconds);
                if entry.transitioned_at.elapsed() >= cooldown {
                    entry.state = CircuitState::HalfOpen;
                    entry.consecutive_successes = 0;
                    entry.transitioned_at = Instant::now();
                    info!(destination, "Circuit half-open; probing remote");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn on_success(&self, destination: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(destination.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                entry.consecutive_successes += 1;
                if entry.consecutive_successes >= self.config.success_threshold {
                    entry.state = CircuitState::Closed;
                    entry.consecutive_failures = 0;
                    entry.consecutive_successes = 0;
                    entry.transitioned_at = Instant::now();
                    info!(destination, "Circuit closed after probation");
                }
            }
            // A success racing the open transition does not reopen anything.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self, destination: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(destination.to_string())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                entry.consecutive_successes = 0;
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.transitioned_at = Instant::now();
                    warn!(
                        destination,
                        failures = entry.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.consecutive_successes = 0;
                entry.transitioned_at = Instant::now();
                warn!(destination, "Probe failed; circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Operator-initiated reset back to CLOSED.
    pub fn reset(&self, destination: &str) {
        let mut entries = self.lock();
        entries.insert(destination.to_string(), BreakerEntry::new());
        info!(destination, "Circuit reset by operator");
    }

    /// Current state without side effects (no cooldown transition).
    pub fn state(&self, destination: &str) -> CircuitState {
        let entries = self.lock();
        entries
            .get(destination)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BreakerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
