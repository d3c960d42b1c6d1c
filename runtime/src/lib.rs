//! # Warden Runtime
//!
//! Guards for calls to unreliable, quota-limited external operations.
//!
//! ## Core Components
//!
//! - **CircuitBreaker**: stops calling an operation that keeps failing, then
//!   probes it again after a cooldown
//! - **RateLimiter**: enforces a call quota with a token bucket, a sliding
//!   window or a fixed window
//! - **GuardRegistry**: hands out one shared breaker and limiter per resource name
//! - **Guard**: runs an operation behind a limiter and a breaker in one call
//!
//! Guards never spawn tasks. Each keeps its bookkeeping behind one lock that is
//! released before the protected operation runs.
//!
//! ## Example
//!
//! ```
//! use warden_core::config::WardenConfig;
//! use warden_runtime::{GuardError, GuardRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WardenConfig::from_toml_str(
//!     r#"
//!     [limiters.llm_api]
//!     strategy = "token_bucket"
//!     calls_per_minute = 20
//!     burst_size = 5
//!     "#,
//! )?;
//! let registry = Arc::new(GuardRegistry::new(config));
//!
//! let answer = registry
//!     .guard("llm_api")
//!     .execute(|| async { Ok::<_, std::io::Error>("42") })
//!     .await;
//!
//! match answer {
//!     Ok(text) => println!("{text}"),
//!     Err(GuardError::RateLimited(e)) => println!("retry in {:?}", e.retry_after),
//!     Err(e) => println!("{e}"),
//! }
//! # Ok(())
//! # }
//! ```

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Rate limiting with token bucket, sliding window and fixed window strategies
pub mod rate_limiter;

/// Name-keyed registry of shared guards
pub mod registry;

/// Rate limiter plus circuit breaker composition
pub mod guard;

/// Prometheus metrics for observability
pub mod metrics;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStats, CircuitState, StateChange,
};
pub use guard::{Guard, GuardError};
pub use rate_limiter::{with_rate_limit, RateLimiter, RateLimiterStats, MIN_RETRY_BACKOFF};
pub use registry::GuardRegistry;
pub use warden_core::error::{CircuitOpenError, RateLimitExceeded, RejectionReason};
