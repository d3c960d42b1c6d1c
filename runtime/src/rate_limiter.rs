//! Rate Limiter with interchangeable algorithms
//!
//! Enforces a call quota for one named operation.
//!
//! ## Algorithms
//!
//! ```text
//! TokenBucket    bucket of max_tokens, refilled at calls_per_minute / 60 per second;
//!                each call consumes tokens, bursts up to burst_size
//!
//! SlidingWindow  log of request timestamps; at most calls_per_minute in any
//!                rolling 60s (and calls_per_hour / calls_per_day when set)
//!
//! FixedWindow    counter reset every 60s from the first request of the window
//! ```
//!
//! Every rejection carries a concrete `retry_after`, except a request larger
//! than the limiter can ever admit, which is rejected up front with
//! [`RejectionReason::ExceedsCapacity`]. [`RateLimiter::acquire`]
//! never blocks; [`RateLimiter::wait_and_acquire`] sleeps between attempts and
//! is the only suspension point. All state changes happen inside `acquire`
//! under one lock, so cancelling a waiting caller never corrupts the limiter.
//!
//! ## Usage
//!
//! ```ignore
//! use warden_runtime::rate_limiter::RateLimiter;
//! use warden_core::config::{RateLimiterConfig, RateLimitStrategy};
//!
//! let limiter = RateLimiter::new("search_api", RateLimiterConfig {
//!     strategy: RateLimitStrategy::SlidingWindow,
//!     calls_per_minute: 30,
//!     calls_per_hour: Some(500),
//!     ..Default::default()
//! });
//!
//! match limiter.acquire(1) {
//!     Ok(()) => execute_request().await,
//!     Err(e) => back_off(e.retry_after).await,
//! }
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use warden_core::config::{RateLimitStrategy, RateLimiterConfig};
use warden_core::error::{RateLimitExceeded, RejectionReason};

/// Shortest sleep between attempts in [`RateLimiter::wait_and_acquire`]
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_millis(10);

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Strategy-specific state
#[derive(Debug)]
enum Bucket {
    TokenBucket { tokens: f64, last_refill: Instant },
    SlidingWindow { requests: VecDeque<Instant> },
    FixedWindow { window_start: Instant, count: u32 },
}

impl Bucket {
    fn new(config: &RateLimiterConfig) -> Self {
        match config.strategy {
            RateLimitStrategy::TokenBucket => Self::TokenBucket {
                tokens: config.max_tokens(),
                last_refill: Instant::now(),
            },
            RateLimitStrategy::SlidingWindow => Self::SlidingWindow {
                requests: VecDeque::new(),
            },
            RateLimitStrategy::FixedWindow => Self::FixedWindow {
                window_start: Instant::now(),
                count: 0,
            },
        }
    }
}

/// Internal state tracking
#[derive(Debug)]
struct LimiterState {
    bucket: Bucket,
    total_requests: u64,
    allowed_requests: u64,
    rejected_requests: u64,
    rejection_reasons: BTreeMap<String, u64>,
}

impl LimiterState {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            bucket: Bucket::new(config),
            total_requests: 0,
            allowed_requests: 0,
            rejected_requests: 0,
            rejection_reasons: BTreeMap::new(),
        }
    }
}

/// Point-in-time view of a rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    /// Limiter name
    pub name: String,
    /// Algorithm in use
    pub strategy: RateLimitStrategy,
    /// Acquire calls made
    pub total_requests: u64,
    /// Acquire calls that succeeded
    pub allowed_requests: u64,
    /// Acquire calls that were rejected
    pub rejected_requests: u64,
    /// Rejection counts keyed by [`RejectionReason`]
    pub rejection_reasons: BTreeMap<String, u64>,
    /// Tokens currently in the bucket (token bucket only, as of the last refill)
    pub available_tokens: Option<f64>,
    /// Requests in the last minute (sliding window) or the current fixed window
    pub window_requests: Option<usize>,
}

/// Rate limiter for one named operation
///
/// Safe to share between any number of concurrent callers; each
/// [`acquire`](Self::acquire) is atomic.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create new rate limiter
    ///
    /// # Arguments
    ///
    /// * `name` - Name for logging (e.g., "`api_requests`", "`llm_calls`")
    /// * `config` - Rate limiter configuration
    #[must_use]
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LimiterState::new(&config)),
            config,
        }
    }

    /// Get rate limiter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get rate limiter configuration
    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Attempt to acquire `tokens` units of quota without waiting
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceeded`] with the backoff needed before the same
    /// request can succeed.
    pub fn acquire(&self, tokens: u32) -> Result<(), RateLimitExceeded> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.total_requests += 1;

        let outcome = if f64::from(tokens) > self.capacity() {
            Err((RejectionReason::ExceedsCapacity, Duration::ZERO))
        } else {
            match &mut state.bucket {
                Bucket::TokenBucket { tokens: available, last_refill } => {
                    self.take_tokens(available, last_refill, tokens, now)
                }
                Bucket::SlidingWindow { requests } => self.take_sliding(requests, tokens, now),
                Bucket::FixedWindow { window_start, count } => {
                    self.take_fixed(window_start, count, tokens, now)
                }
            }
        };

        match outcome {
            Ok(()) => {
                state.allowed_requests += 1;
                debug!(name = %self.name, tokens, "Rate limiter allowed request");
                metrics::counter!(
                    "warden_rate_limiter_requests_total",
                    "name" => self.name.clone(),
                    "outcome" => "allowed"
                )
                .increment(1);
                Ok(())
            }
            Err((reason, retry_after)) => {
                state.rejected_requests += 1;
                *state
                    .rejection_reasons
                    .entry(reason.as_str().to_string())
                    .or_insert(0) += 1;
                warn!(
                    name = %self.name,
                    %reason,
                    tokens,
                    retry_after = ?retry_after,
                    "Rate limit exceeded"
                );
                metrics::counter!(
                    "warden_rate_limiter_requests_total",
                    "name" => self.name.clone(),
                    "outcome" => "rejected"
                )
                .increment(1);
                Err(RateLimitExceeded {
                    name: self.name.clone(),
                    reason,
                    retry_after,
                })
            }
        }
    }

    /// Largest request that can ever succeed
    fn capacity(&self) -> f64 {
        match self.config.strategy {
            RateLimitStrategy::TokenBucket => self.config.max_tokens(),
            RateLimitStrategy::SlidingWindow => self
                .sliding_limits()
                .map(|(_, limit, _)| limit)
                .min()
                .map_or(f64::from(self.config.calls_per_minute), f64::from),
            RateLimitStrategy::FixedWindow => f64::from(self.config.calls_per_minute),
        }
    }

    fn take_tokens(
        &self,
        available: &mut f64,
        last_refill: &mut Instant,
        tokens: u32,
        now: Instant,
    ) -> Result<(), (RejectionReason, Duration)> {
        let refill_rate = self.config.refill_rate();
        let elapsed = now.saturating_duration_since(*last_refill).as_secs_f64();
        *available = (*available + elapsed * refill_rate).min(self.config.max_tokens());
        *last_refill = now;

        let requested = f64::from(tokens);
        if *available >= requested {
            *available -= requested;
            Ok(())
        } else {
            let deficit = requested - *available;
            // A zero refill rate never recovers; report the longest window instead
            let retry_after = Duration::try_from_secs_f64(deficit / refill_rate).unwrap_or(DAY);
            Err((RejectionReason::InsufficientTokens, retry_after))
        }
    }

    fn sliding_limits(&self) -> impl Iterator<Item = (Duration, u32, RejectionReason)> {
        [
            Some((MINUTE, self.config.calls_per_minute, RejectionReason::MinuteLimit)),
            self.config
                .calls_per_hour
                .map(|limit| (HOUR, limit, RejectionReason::HourLimit)),
            self.config
                .calls_per_day
                .map(|limit| (DAY, limit, RejectionReason::DayLimit)),
        ]
        .into_iter()
        .flatten()
    }

    fn take_sliding(
        &self,
        requests: &mut VecDeque<Instant>,
        tokens: u32,
        now: Instant,
    ) -> Result<(), (RejectionReason, Duration)> {
        let horizon = self
            .sliding_limits()
            .map(|(window, _, _)| window)
            .max()
            .unwrap_or(MINUTE);
        while requests
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= horizon)
        {
            requests.pop_front();
        }

        for (window, limit, reason) in self.sliding_limits() {
            let first_in_window =
                requests.partition_point(|at| now.saturating_duration_since(*at) >= window);
            let in_window = requests.len() - first_in_window;
            let needed = in_window + tokens as usize;
            if needed > limit as usize {
                // The request fits once enough of the oldest entries have expired
                let must_expire = needed - limit as usize;
                let retry_after = requests
                    .get(first_in_window + must_expire - 1)
                    .map_or(window, |at| (*at + window).saturating_duration_since(now));
                return Err((reason, retry_after));
            }
        }

        requests.extend(std::iter::repeat_n(now, tokens as usize));
        Ok(())
    }

    fn take_fixed(
        &self,
        window_start: &mut Instant,
        count: &mut u32,
        tokens: u32,
        now: Instant,
    ) -> Result<(), (RejectionReason, Duration)> {
        if now.saturating_duration_since(*window_start) >= MINUTE {
            *window_start = now;
            *count = 0;
        }

        if count.saturating_add(tokens) <= self.config.calls_per_minute {
            *count += tokens;
            Ok(())
        } else {
            Err((
                RejectionReason::WindowFull,
                (*window_start + MINUTE).saturating_duration_since(now),
            ))
        }
    }

    /// Acquire tokens, sleeping between attempts for at most `max_wait`
    ///
    /// Each sleep lasts the reported `retry_after` (at least
    /// [`MIN_RETRY_BACKOFF`]). Dropping the returned future cancels the wait
    /// without side effects.
    ///
    /// # Errors
    ///
    /// Returns the last [`RateLimitExceeded`] if the next sleep would end
    /// beyond `max_wait` from the start of the call, or immediately when the
    /// request exceeds the limiter's capacity.
    pub async fn wait_and_acquire(&self, tokens: u32, max_wait: Duration) -> Result<(), RateLimitExceeded> {
        let started = Instant::now();
        loop {
            match self.acquire(tokens) {
                Ok(()) => {
                    metrics::histogram!("warden_rate_limiter_wait_seconds", "name" => self.name.clone())
                        .record(started.elapsed().as_secs_f64());
                    return Ok(());
                }
                Err(exceeded) if !exceeded.is_retryable() => return Err(exceeded),
                Err(exceeded) => {
                    let backoff = exceeded.retry_after.max(MIN_RETRY_BACKOFF);
                    if started.elapsed() + backoff > max_wait {
                        return Err(exceeded);
                    }
                    debug!(
                        name = %self.name,
                        backoff = ?backoff,
                        "Waiting for rate limit"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Snapshot of counters. Never mutates the limiter.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock();
        let (available_tokens, window_requests) = match &state.bucket {
            Bucket::TokenBucket { tokens, .. } => (Some(*tokens), None),
            Bucket::SlidingWindow { requests } => {
                let now = Instant::now();
                let expired =
                    requests.partition_point(|at| now.saturating_duration_since(*at) >= MINUTE);
                (None, Some(requests.len() - expired))
            }
            Bucket::FixedWindow { count, .. } => (None, Some(*count as usize)),
        };

        RateLimiterStats {
            name: self.name.clone(),
            strategy: self.config.strategy,
            total_requests: state.total_requests,
            allowed_requests: state.allowed_requests,
            rejected_requests: state.rejected_requests,
            rejection_reasons: state.rejection_reasons.clone(),
            available_tokens,
            window_requests,
        }
    }

    /// Restore the initial state (full bucket, empty windows, zeroed counters)
    pub fn reset(&self) {
        *self.state.lock() = LimiterState::new(&self.config);
        tracing::info!(name = %self.name, strategy = self.config.strategy.as_str(), "Rate limiter reset");
    }
}

/// Execute a future once rate limit tokens are acquired
///
/// Convenience function that checks the rate limit before executing.
///
/// # Errors
///
/// Returns [`RateLimitExceeded`] without polling `f` if no quota is available.
///
/// # Example
///
/// ```ignore
/// let result = with_rate_limit(&rate_limiter, 1, async {
///     expensive_operation().await
/// }).await?;
/// ```
pub async fn with_rate_limit<F, T>(rate_limiter: &RateLimiter, tokens: u32, f: F) -> Result<T, RateLimitExceeded>
where
    F: Future<Output = T>,
{
    rate_limiter.acquire(tokens)?;
    Ok(f.await)
}
