//! Circuit breaker for the secondary provider.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: provider assumed down, requests go to the primary provider
//! - Half-Open: testing if the provider recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after open duration (on the next admission check)
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails
//! ```
//!
//! # Design Decisions
//! - One breaker per process, injected into the router (no statics)
//! - Every check-and-transition runs under a single mutex; the lock is never
//!   held across an upstream call
//! - Single trial in Half-Open (prevents hammering a recovering provider)
//! - Any success resets the failure counter, regardless of arrival order
//! - State is republished through `ArcSwap` after each mutation so readers
//!   never touch the mutex

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published copy of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerView {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: Instant,
}

impl BreakerView {
    /// State as callers will observe it at `now`.
    ///
    /// An open breaker whose duration has elapsed reports half-open even
    /// before the next admission check performs the transition.
    pub fn effective_state(&self, now: Instant, open_duration: Duration) -> CircuitState {
        match self.state {
            CircuitState::Open if now.saturating_duration_since(self.last_transition) >= open_duration => {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }

    /// Time left before an open breaker admits a trial.
    pub fn remaining_open(&self, now: Instant, open_duration: Duration) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_transition);
        open_duration.checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: Instant,
    trial_in_flight: bool,
}

impl Inner {
    fn view(&self) -> BreakerView {
        BreakerView {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_transition: self.last_transition,
        }
    }
}

/// Circuit breaker gating traffic to the secondary provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    open_duration: Duration,
    inner: Mutex<Inner>,
    published: ArcSwap<BreakerView>,
}

impl CircuitBreaker {
    /// Create a closed breaker. A zero threshold is treated as 1.
    pub fn new(threshold: u32, open_duration: Duration) -> Self {
        let inner = Inner {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_transition: Instant::now(),
            trial_in_flight: false,
        };
        metrics::record_breaker_state(CircuitState::Closed);
        Self {
            threshold: threshold.max(1),
            open_duration,
            published: ArcSwap::from_pointee(inner.view()),
            inner: Mutex::new(inner),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.open_duration())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn open_duration(&self) -> Duration {
        self.open_duration
    }

    /// May the secondary provider be tried now?
    ///
    /// A `true` answer while half-open claims the single trial slot; the
    /// caller must report the result through [`record_outcome`](Self::record_outcome).
    pub fn allow(&self) -> bool {
        self.try_admit().is_some()
    }

    /// Report the result of a secondary-provider attempt.
    ///
    /// While half-open the outcome is taken as the trial's result.
    pub fn record_outcome(&self, success: bool) {
        self.record(success, None);
    }

    /// Admission guard for one secondary attempt.
    ///
    /// Dropping the guard without recording (client went away, future
    /// cancelled) frees the half-open trial slot for the next request.
    pub fn admit(&self) -> Option<Admission<'_>> {
        self.try_admit().map(|trial| Admission {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Lock-free read of the last published state.
    pub fn view(&self) -> BreakerView {
        **self.published.load()
    }

    /// Returns `Some(is_trial)` when admitted.
    fn try_admit(&self) -> Option<bool> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                if Instant::now().saturating_duration_since(inner.last_transition) < self.open_duration {
                    return None;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                drop(inner);
                tracing::info!("Circuit half-open, admitting trial request to secondary provider");
                Some(true)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    /// `trial`: `Some(true)` for an admitted trial, `Some(false)` for a request
    /// admitted while closed, `None` when the caller did not say.
    fn record(&self, success: bool, trial: Option<bool>) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                if success {
                    if inner.consecutive_failures != 0 {
                        inner.consecutive_failures = 0;
                        self.publish(&inner);
                    }
                    return;
                }
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    let failures = inner.consecutive_failures;
                    drop(inner);
                    tracing::warn!(
                        failures,
                        open_secs = self.open_duration.as_secs(),
                        "Circuit OPEN, bypassing secondary provider"
                    );
                } else {
                    self.publish(&inner);
                }
            }
            CircuitState::HalfOpen => {
                // Stragglers admitted before the breaker opened do not decide the trial.
                if trial == Some(false) {
                    return;
                }
                inner.trial_in_flight = false;
                if success {
                    inner.consecutive_failures = 0;
                    self.transition(&mut inner, CircuitState::Closed);
                    drop(inner);
                    tracing::info!("Circuit closed, secondary provider recovered");
                } else {
                    inner.consecutive_failures = self.threshold;
                    self.transition(&mut inner, CircuitState::Open);
                    drop(inner);
                    tracing::warn!(
                        open_secs = self.open_duration.as_secs(),
                        "Circuit trial failed, reopening"
                    );
                }
            }
            // Outcomes of requests admitted before the trip do not shorten the open window.
            CircuitState::Open => {}
        }
    }

    /// Free the trial slot of an abandoned half-open attempt.
    fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.trial_in_flight = false;
            drop(inner);
            tracing::debug!("Half-open trial abandoned before an outcome, slot released");
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        inner.state = to;
        inner.last_transition = Instant::now();
        self.publish(inner);
        metrics::record_breaker_transition(to);
    }

    fn publish(&self, inner: &Inner) {
        self.published.store(Arc::new(inner.view()));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Permission to send one request to the secondary provider.
#[derive(Debug)]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Admission<'_> {
    /// Whether this admission is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record the attempt's outcome. Consumes the admission.
    pub fn record(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(success, Some(self.trial));
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.abandon_trial();
        }
    }
}
