//! Consecutive-failure circuit breaker
//!
//! Opens after `threshold` consecutive server failures and fails fast until
//! `cooldown` has passed since the last failure. There is no half-open probe:
//! the first query after the cooldown closes the breaker, and the next real
//! request's outcome is recorded as usual.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Configuration for the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub threshold: u32,
    /// Time since the last failure before the breaker closes again
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

/// Circuit breaker shared by every request through one transport
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether requests should fail fast.
    ///
    /// Closes the breaker as a side effect once the cooldown has elapsed.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        if !state.open {
            return false;
        }

        let cooled_down = state
            .last_failure
            .map_or(true, |last| last.elapsed() > self.config.cooldown);
        if !cooled_down {
            return true;
        }

        state.failures = 0;
        state.open = false;
        drop(state);
        info!("Circuit breaker closed after cooldown");
        false
    }

    /// Count a server failure. Returns true if this call opened the breaker.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Instant::now());

        let was_open = state.open;
        if state.failures >= self.config.threshold {
            state.open = true;
        }

        let opened = state.open && !was_open;
        let failures = state.failures;
        drop(state);

        if opened {
            warn!(
                failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
        opened
    }

    /// Fully close the breaker
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.failures = 0;
        state.open = false;
    }

    /// Current consecutive failure count
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn threshold(&self) -> u32 {
        self.config.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.config.cooldown
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
