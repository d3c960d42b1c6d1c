//! Errors raised by the guards themselves.
//!
//! Only gating decisions produce new errors. A wrapped operation's own failure
//! is never converted into one of these types; the runtime hands it back
//! unchanged.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A call was rejected because the circuit is open.
///
/// The operation was never attempted. Always transient: the circuit moves to
/// half-open once its recovery timeout has elapsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{name}' is OPEN after {consecutive_failures} consecutive failures")]
pub struct CircuitOpenError {
    /// Name of the circuit breaker that rejected the call
    pub name: String,
    /// Consecutive failures recorded when the call was rejected
    pub consecutive_failures: u32,
}

/// Which quota a rate limiter ran out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Token bucket holds fewer tokens than requested
    InsufficientTokens,
    /// Sliding window per-minute quota reached
    MinuteLimit,
    /// Sliding window per-hour quota reached
    HourLimit,
    /// Sliding window per-day quota reached
    DayLimit,
    /// Fixed window quota reached
    WindowFull,
    /// Request is larger than the limiter can ever admit
    ExceedsCapacity,
}

impl RejectionReason {
    /// Stable identifier used as a stats and metrics key
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientTokens => "insufficient_tokens",
            Self::MinuteLimit => "minute_limit",
            Self::HourLimit => "hour_limit",
            Self::DayLimit => "day_limit",
            Self::WindowFull => "window_full",
            Self::ExceedsCapacity => "exceeds_capacity",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call was rejected because the rate limit is exhausted.
///
/// The operation was never attempted. `retry_after` is how long the caller
/// should back off before the same request can succeed. It is zero for
/// [`RejectionReason::ExceedsCapacity`], which no amount of waiting fixes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Rate limit exceeded for '{name}' ({reason}), retry after {retry_after:?}")]
pub struct RateLimitExceeded {
    /// Name of the rate limiter that rejected the call
    pub name: String,
    /// Quota that was exhausted
    pub reason: RejectionReason,
    /// Suggested backoff before retrying
    pub retry_after: Duration,
}

impl RateLimitExceeded {
    /// Whether the same request can succeed after waiting `retry_after`
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self.reason, RejectionReason::ExceedsCapacity)
    }
}

/// Configuration loading or validation failed.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// Path that could not be read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The TOML document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}
