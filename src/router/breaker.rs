//! Per-destination circuit breakers
//!
//! A breaker isolates a failing agent: `closed` counts failures, `open`
//! blocks deliveries until a timeout elapses, `half-open` admits one
//! probe at a time until enough successes close the circuit again.

use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::config::CircuitBreakerConfig;

/// Observable breaker status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

/// Snapshot of one breaker's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub status: BreakerStatus,
    pub failures: u32,
    pub successes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            status: BreakerStatus::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            last_success_time: None,
            next_attempt: None,
        }
    }
}

/// State change produced by recording an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Opened,
    HalfOpened,
    Closed,
}

/// Admission decision for one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerAdmission {
    /// Circuit closed; deliver normally
    Allow,
    /// Circuit half-open; this delivery is a probe
    Probe,
    /// Circuit open; do not touch the transport
    Block { next_attempt: DateTime<Utc> },
}

/// One agent's circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    /// A closed breaker with the given tuning
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitBreakerState::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().expect("breaker lock poisoned")
    }

    fn timeout(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.timeout).unwrap_or_else(|_| ChronoDuration::seconds(60))
    }

    fn window(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.config.monitoring_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(120))
    }

    /// Decides whether a delivery may proceed
    ///
    /// An open circuit past its `next_attempt` moves to half-open here
    /// and admits a single probe.
    pub fn check_admission(&self) -> BreakerAdmission {
        let mut state = self.lock();
        match state.status {
            BreakerStatus::Closed => BreakerAdmission::Allow,
            BreakerStatus::HalfOpen => BreakerAdmission::Probe,
            BreakerStatus::Open => {
                let next_attempt = state.next_attempt.unwrap_or_else(Utc::now);
                if Utc::now() >= next_attempt {
                    state.status = BreakerStatus::HalfOpen;
                    state.successes = 0;
                    BreakerAdmission::Probe
                } else {
                    BreakerAdmission::Block { next_attempt }
                }
            }
        }
    }

    /// Whether the circuit currently blocks deliveries
    ///
    /// Probing transitions apply exactly as in
    /// [`CircuitBreaker::check_admission`].
    pub fn is_open(&self) -> bool {
        matches!(self.check_admission(), BreakerAdmission::Block { .. })
    }

    /// Records a successful delivery
    pub fn record_success(&self) -> Option<BreakerTransition> {
        let mut state = self.lock();
        state.last_success_time = Some(Utc::now());
        match state.status {
            BreakerStatus::Closed => {
                state.failures = 0;
                state.successes += 1;
                None
            }
            BreakerStatus::HalfOpen => {
                state.successes += 1;
                if state.successes >= self.config.success_threshold.as_u32() {
                    *state = CircuitBreakerState {
                        last_success_time: state.last_success_time,
                        ..CircuitBreakerState::new()
                    };
                    Some(BreakerTransition::Closed)
                } else {
                    None
                }
            }
            // A success while open is a late response; keep blocking
            BreakerStatus::Open => None,
        }
    }

    /// Records a failed delivery
    pub fn record_failure(&self) -> Option<BreakerTransition> {
        let now = Utc::now();
        let mut state = self.lock();

        // Failures outside the monitoring window are forgotten
        if let Some(last) = state.last_failure_time {
            if now - last > self.window() {
                state.failures = 0;
            }
        }
        state.last_failure_time = Some(now);

        match state.status {
            BreakerStatus::Closed => {
                state.failures += 1;
                if state.failures >= self.config.failure_threshold.as_u32() {
                    state.status = BreakerStatus::Open;
                    state.next_attempt = Some(now + self.timeout());
                    Some(BreakerTransition::Opened)
                } else {
                    None
                }
            }
            BreakerStatus::HalfOpen => {
                state.status = BreakerStatus::Open;
                state.failures += 1;
                state.successes = 0;
                state.next_attempt = Some(now + self.timeout());
                Some(BreakerTransition::Opened)
            }
            BreakerStatus::Open => {
                state.failures += 1;
                None
            }
        }
    }

    /// Resets the breaker to closed with zeroed counters
    pub fn reset(&self) {
        *self.lock() = CircuitBreakerState::new();
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.lock().clone()
    }
}
