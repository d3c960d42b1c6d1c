//! Composition of a rate limiter and a circuit breaker around one operation.
//!
//! An execution step typically protects every outbound call the same way:
//! take rate limit quota, then call through the circuit breaker. [`Guard`]
//! packages that sequence and folds the three possible outcomes into
//! [`GuardError`].
//!
//! # Example
//!
//! ```
//! use warden_runtime::{GuardError, GuardRegistry};
//!
//! # async fn example() {
//! let registry = GuardRegistry::default();
//! let guard = registry.guard("weather_api");
//!
//! match guard.execute(|| async { Ok::<_, std::io::Error>("sunny") }).await {
//!     Ok(forecast) => println!("{forecast}"),
//!     Err(GuardError::Operation(e)) => println!("weather api failed: {e}"),
//!     Err(rejected) => println!("not attempted: {rejected}"),
//! }
//! # }
//! ```

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::rate_limiter::RateLimiter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use warden_core::error::{CircuitOpenError, RateLimitExceeded};

/// Outcome of a guarded call that did not succeed.
#[derive(Error, Debug)]
pub enum GuardError<E> {
    /// Rate limit exhausted; the operation was not attempted
    #[error(transparent)]
    RateLimited(RateLimitExceeded),
    /// Circuit open; the operation was not attempted
    #[error(transparent)]
    CircuitOpen(CircuitOpenError),
    /// The operation ran and failed
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    /// Whether a guard rejected the call before it ran
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// Backoff suggested by the rate limiter, if it rejected the call and
    /// waiting can help
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(exceeded) if exceeded.is_retryable() => Some(exceeded.retry_after),
            Self::RateLimited(_) => None,
            Self::CircuitOpen(_) | Self::Operation(_) => None,
        }
    }

    /// The operation's own error, if it ran
    #[must_use]
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            Self::RateLimited(_) | Self::CircuitOpen(_) => None,
        }
    }
}

impl<E> From<CircuitBreakerError<E>> for GuardError<E> {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::Open(open) => Self::CircuitOpen(open),
            CircuitBreakerError::Inner(inner) => Self::Operation(inner),
        }
    }
}

/// Circuit breaker with an optional rate limiter in front of it
#[derive(Debug, Clone)]
pub struct Guard {
    breaker: Arc<CircuitBreaker>,
    limiter: Option<Arc<RateLimiter>>,
    tokens: u32,
}

impl Guard {
    /// Guard calls with a circuit breaker only
    #[must_use]
    pub const fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            limiter: None,
            tokens: 1,
        }
    }

    /// Take quota from `limiter` before each call
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Quota consumed per call (default 1)
    #[must_use]
    pub const fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = tokens;
        self
    }

    /// The circuit breaker in use
    #[must_use]
    pub const fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The rate limiter in use, if any
    #[must_use]
    pub const fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// Run a synchronous operation through the guards
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::RateLimited`] or [`GuardError::CircuitOpen`] if the
    /// call was rejected, or [`GuardError::Operation`] with the operation's error.
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(self.tokens).map_err(GuardError::RateLimited)?;
        }
        self.breaker.call(operation).map_err(GuardError::from)
    }

    /// Run an asynchronous operation through the guards without waiting for quota
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call).
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(self.tokens).map_err(GuardError::RateLimited)?;
        }
        self.breaker.call_async(operation).await.map_err(GuardError::from)
    }

    /// Run an asynchronous operation, waiting up to `max_wait` for quota
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call); a rate limit rejection means quota did not
    /// free up within `max_wait`.
    pub async fn execute_waiting<F, Fut, T, E>(
        &self,
        operation: F,
        max_wait: Duration,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter
                .wait_and_acquire(self.tokens, max_wait)
                .await
                .map_err(GuardError::RateLimited)?;
        }
        self.breaker.call_async(operation).await.map_err(GuardError::from)
    }
}
