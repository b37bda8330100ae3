//! Circuit breaker state machine
//!
//! The breaker itself is plain data; time is passed in by the caller so the
//! transitions are deterministic. [`super::ResilientExecutor`] owns it behind
//! a mutex.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::RetryConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected until the open period ends
    Open,
    /// Trial requests are allowed; enough successes close the circuit
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds of the breaker
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open
    pub open_duration: Duration,
    /// Successes in half-open state needed to close the circuit
    pub required_successes: u32,
}

impl From<&RetryConfig> for BreakerSettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            open_duration: config.open_duration(),
            required_successes: config.required_successes,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            open_until: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Decide whether a call may run at `now`
    ///
    /// # Returns
    /// * `Ok(())` - The call may run; an expired open circuit becomes half-open
    /// * `Err(Duration)` - The circuit is open for this much longer
    pub fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        if self.state != CircuitState::Open {
            return Ok(());
        }
        match self.open_until {
            Some(until) if now < until => Err(until - now),
            _ => {
                self.state = CircuitState::HalfOpen;
                self.half_open_successes = 0;
                info!("Circuit breaker half-open, allowing trial requests");
                Ok(())
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.settings.required_successes {
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                    self.open_until = None;
                    info!(
                        "Circuit breaker closed after {} successful requests",
                        self.half_open_successes
                    );
                }
            }
            CircuitState::Closed | CircuitState::Open => self.consecutive_failures = 0,
        }
    }

    /// Count a failed call; opens the circuit at the threshold.
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        // A failed trial request reopens at once
        let trip = self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.settings.failure_threshold;
        if trip {
            self.state = CircuitState::Open;
            self.half_open_successes = 0;
            self.open_until = Some(now + self.settings.open_duration);
            warn!(
                "Circuit breaker opened after {} consecutive failures (for {:?})",
                self.consecutive_failures, self.settings.open_duration
            );
        }
    }
}
