//! Circuit breaker pattern for isolating repeated failures of one operation.
//!
//! A circuit breaker monitors calls to a named operation and "opens" (stops
//! allowing calls) when failures pile up, so a broken dependency is not hammered
//! by every in-flight step.
//!
//! # States
//!
//! ```text
//! Closed ──[consecutive failures >= threshold
//!           or failure rate >= rate threshold]──> Open
//!                                                  │
//!                                                  │ [recovery timeout elapsed,
//!                                                  │  observed on next read]
//!                                                  ▼
//!                                               HalfOpen
//!                                                  │
//!                 ┌────────────────────────────────┴─────────────┐
//!     [half_open_max_calls successes]                      [any failure]
//!                 ▼                                              ▼
//!               Closed                                          Open
//! ```
//!
//! The Open → `HalfOpen` transition is pull-based: it happens when the state is
//! read (by [`CircuitBreaker::state`] or at the start of a call), never on a
//! background timer.
//!
//! # Example
//!
//! ```rust
//! use warden_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
//! use warden_core::config::CircuitBreakerConfig;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .recovery_timeout(Duration::from_secs(60))
//!     .half_open_max_calls(2)
//!     .build();
//!
//! let breaker = CircuitBreaker::new("search_api", config);
//!
//! match breaker.call_async(|| async { Ok::<_, String>(42) }).await {
//!     Ok(result) => println!("Success: {result}"),
//!     Err(CircuitBreakerError::Open(rejected)) => println!("Not attempted: {rejected}"),
//!     Err(CircuitBreakerError::Inner(e)) => println!("Operation failed: {e}"),
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use thiserror::Error;
use tokio::time::Instant;
use warden_core::config::CircuitBreakerConfig;
use warden_core::error::CircuitOpenError;

/// Upper bound on the call history used for the rolling failure rate
const MAX_CALL_HISTORY: usize = 1000;

/// Upper bound on retained state transition records
const MAX_TRANSITION_LOG: usize = 100;

/// Transitions included in a stats snapshot
const RECENT_TRANSITIONS: usize = 10;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately
    Open,
    /// Circuit is half-open, trial calls test whether the operation recovered
    HalfOpen,
}

impl CircuitState {
    /// Stable identifier used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Numeric encoding for the state gauge
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from circuit breaker calls.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, the operation was not attempted
    #[error(transparent)]
    Open(CircuitOpenError),
    /// The operation ran and failed; its error is passed through unchanged
    #[error("Operation failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Whether the call was rejected without running
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// The operation's own error, if it ran
    #[must_use]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(err) => Some(err),
            Self::Open(_) => None,
        }
    }
}

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// State before the transition
    pub from: CircuitState,
    /// State after the transition
    pub to: CircuitState,
    /// Wall-clock time of the transition
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a circuit breaker, for logging and metrics export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    /// Breaker name
    pub name: String,
    /// Stored state (a pending Open → `HalfOpen` transition is not applied)
    pub state: CircuitState,
    /// Current run of consecutive failures
    pub consecutive_failures: u32,
    /// Calls attempted, including rejected ones
    pub total_calls: u64,
    /// Calls that ran and succeeded
    pub successful_calls: u64,
    /// Calls that ran and failed
    pub failed_calls: u64,
    /// Calls rejected while open
    pub rejected_calls: u64,
    /// Failure rate over the monitoring window (0.0 when empty)
    pub failure_rate: f64,
    /// Failure counts keyed by failure kind
    pub failure_reasons: BTreeMap<String, u64>,
    /// Number of state transitions since creation or reset
    pub state_changes: u64,
    /// Most recent state transitions, oldest first
    pub recent_transitions: Vec<StateChange>,
}

impl CircuitBreakerStats {
    /// Fraction of attempted calls that succeeded (1.0 when nothing ran)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.successful_calls + self.failed_calls;
        if attempted == 0 {
            return 1.0;
        }
        self.successful_calls as f64 / attempted as f64
    }
}

/// Mutable bookkeeping, guarded by one mutex.
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    half_open_calls: u32,
    call_history: VecDeque<(Instant, bool)>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    failure_reasons: BTreeMap<String, u64>,
    transitions: VecDeque<StateChange>,
    state_changes: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            half_open_calls: 0,
            call_history: VecDeque::new(),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            failure_reasons: BTreeMap::new(),
            transitions: VecDeque::new(),
            state_changes: 0,
        }
    }

    /// Calls and failures recorded within `window` of `now`
    fn window_counts(&self, now: Instant, window: std::time::Duration) -> (usize, usize) {
        self.call_history
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) < window)
            .fold((0, 0), |(calls, failures), (_, success)| {
                (calls + 1, failures + usize::from(!success))
            })
    }
}

/// Circuit breaker for one named operation.
///
/// Shared by every caller of that operation (usually behind an `Arc` handed out
/// by [`GuardRegistry`](crate::registry::GuardRegistry)). Bookkeeping is
/// serialized by a single mutex that is never held while the wrapped operation
/// runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    ///
    /// # Arguments
    ///
    /// * `name` - Resource name for logging and metrics (e.g., "`llm_api`")
    /// * `config` - Circuit breaker configuration
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        metrics::gauge!("warden_circuit_breaker_state", "name" => name.clone())
            .set(CircuitState::Closed.as_gauge());
        Self {
            name,
            config,
            state: Mutex::new(BreakerState::new()),
        }
    }

    /// Breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    ///
    /// Reading the state of an open circuit whose recovery timeout has elapsed
    /// moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.refresh(&mut state);
        state.state
    }

    /// Whether a call made now would be attempted.
    pub fn is_call_permitted(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Consecutive failures recorded so far
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Call a synchronous operation through the circuit breaker.
    ///
    /// Failures are tallied under the short type name of `E`.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit is open.
    /// Returns `CircuitBreakerError::Inner` with the operation's own error if it fails.
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.call_classified(operation, |_| failure_kind::<E>())
    }

    /// Call a synchronous operation, naming each failure with `classify`.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub fn call_classified<F, C, T, E>(
        &self,
        operation: F,
        classify: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        C: FnOnce(&E) -> String,
    {
        self.acquire_permission().map_err(CircuitBreakerError::Open)?;

        match operation() {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                self.on_failure(classify(&err));
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Call an asynchronous operation through the circuit breaker.
    ///
    /// Failures are tallied under the short type name of `E`.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit is open.
    /// Returns `CircuitBreakerError::Inner` with the operation's own error if it fails.
    pub async fn call_async<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_async_classified(operation, |_| failure_kind::<E>())
            .await
    }

    /// Call an asynchronous operation, naming each failure with `classify`.
    ///
    /// # Errors
    ///
    /// Same as [`call_async`](Self::call_async).
    pub async fn call_async_classified<F, Fut, C, T, E>(
        &self,
        operation: F,
        classify: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> String,
    {
        self.acquire_permission().map_err(CircuitBreakerError::Open)?;

        match operation().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                self.on_failure(classify(&err));
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Count the call and reject it if the circuit is open.
    fn acquire_permission(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        state.total_calls += 1;
        self.refresh(&mut state);

        if state.state == CircuitState::Open {
            state.rejected_calls += 1;
            tracing::warn!(
                name = %self.name,
                consecutive_failures = state.consecutive_failures,
                "Circuit breaker is OPEN, rejecting call"
            );
            metrics::counter!(
                "warden_circuit_breaker_calls_total",
                "name" => self.name.clone(),
                "outcome" => "rejected"
            )
            .increment(1);
            return Err(CircuitOpenError {
                name: self.name.clone(),
                consecutive_failures: state.consecutive_failures,
            });
        }
        Ok(())
    }

    /// Apply the lazy Open → `HalfOpen` transition if the timeout has elapsed.
    fn refresh(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let recovered = state
            .last_failure_time
            .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout);
        if recovered {
            state.half_open_calls = 0;
            self.transition(state, CircuitState::HalfOpen);
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        state.state_changes += 1;
        if state.transitions.len() == MAX_TRANSITION_LOG {
            state.transitions.pop_front();
        }
        state.transitions.push_back(StateChange {
            from,
            to,
            at: Utc::now(),
        });

        if to == CircuitState::Open {
            tracing::warn!(
                name = %self.name,
                %from,
                %to,
                consecutive_failures = state.consecutive_failures,
                "Circuit breaker transitioning {from} -> {to}"
            );
        } else {
            tracing::info!(name = %self.name, %from, %to, "Circuit breaker transitioning {from} -> {to}");
        }
        metrics::gauge!("warden_circuit_breaker_state", "name" => self.name.clone())
            .set(to.as_gauge());
    }

    fn record_call(state: &mut BreakerState, now: Instant, success: bool, window: std::time::Duration) {
        while state
            .call_history
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) >= window)
        {
            state.call_history.pop_front();
        }
        if state.call_history.len() == MAX_CALL_HISTORY {
            state.call_history.pop_front();
        }
        state.call_history.push_back((now, success));
    }

    /// Handle successful operation.
    fn on_success(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.consecutive_failures = 0;
        state.successful_calls += 1;
        Self::record_call(&mut state, now, true, self.config.monitoring_window);

        if state.state == CircuitState::HalfOpen {
            state.half_open_calls += 1;
            if state.half_open_calls >= self.config.half_open_max_calls {
                state.half_open_calls = 0;
                state.last_failure_time = None;
                self.transition(&mut state, CircuitState::Closed);
            }
        }

        metrics::counter!(
            "warden_circuit_breaker_calls_total",
            "name" => self.name.clone(),
            "outcome" => "success"
        )
        .increment(1);
    }

    /// Handle failed operation.
    fn on_failure(&self, kind: String) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.consecutive_failures += 1;
        state.last_failure_time = Some(now);
        state.failed_calls += 1;
        *state.failure_reasons.entry(kind).or_insert(0) += 1;
        Self::record_call(&mut state, now, false, self.config.monitoring_window);

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold
                    || self.failure_rate_exceeded(&state, now)
                {
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_calls = 0;
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Open => {
                // A call that started before the circuit opened; the new failure
                // time extends the open period.
            }
        }

        metrics::counter!(
            "warden_circuit_breaker_calls_total",
            "name" => self.name.clone(),
            "outcome" => "failure"
        )
        .increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    fn failure_rate_exceeded(&self, state: &BreakerState, now: Instant) -> bool {
        let (calls, failures) = state.window_counts(now, self.config.monitoring_window);
        if calls == 0 || calls < self.config.effective_minimum_calls() as usize {
            return false;
        }
        failures as f64 / calls as f64 >= self.config.failure_rate_threshold
    }

    /// Snapshot of counters and state. Never mutates the breaker.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        let (calls, failures) = state.window_counts(Instant::now(), self.config.monitoring_window);
        let failure_rate = if calls == 0 {
            0.0
        } else {
            failures as f64 / calls as f64
        };
        let skip = state.transitions.len().saturating_sub(RECENT_TRANSITIONS);

        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            rejected_calls: state.rejected_calls,
            failure_rate,
            failure_reasons: state.failure_reasons.clone(),
            state_changes: state.state_changes,
            recent_transitions: state.transitions.iter().skip(skip).cloned().collect(),
        }
    }

    /// Reset the circuit breaker to closed state with zeroed counters.
    ///
    /// Useful for testing or manual intervention.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = BreakerState::new();
        tracing::info!(name = %self.name, "Circuit breaker manually reset to CLOSED");
        metrics::gauge!("warden_circuit_breaker_state", "name" => self.name.clone())
            .set(CircuitState::Closed.as_gauge());
    }
}

/// Short type name of an error type, used as its failure kind.
fn failure_kind<E>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
