//! # Warden Core
//!
//! Shared types for the Warden resilience guards.
//!
//! This crate provides the pieces every guard agrees on:
//!
//! - **Errors**: the gating errors a guard can raise on its own behalf
//!   ([`error::CircuitOpenError`], [`error::RateLimitExceeded`]) and the
//!   configuration error type
//! - **Configuration**: serde-backed settings for circuit breakers, rate
//!   limiters and cycle detectors, loadable from TOML
//! - **Environment**: the [`environment::Clock`] trait used wherever a guard
//!   records wall-clock timestamps
//!
//! ## Example
//!
//! ```
//! use warden_core::config::WardenConfig;
//!
//! let config = WardenConfig::from_toml_str(
//!     r#"
//!     [circuit_breaker]
//!     failure_threshold = 3
//!
//!     [limiters.search_api]
//!     strategy = "sliding_window"
//!     calls_per_minute = 30
//!     "#,
//! )?;
//!
//! assert_eq!(config.circuit_breaker.failure_threshold, 3);
//! assert_eq!(config.rate_limiter_for("search_api").calls_per_minute, 30);
//! # Ok::<(), warden_core::error::ConfigError>(())
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Error taxonomy shared by all guards
pub mod error;

/// Configuration for circuit breakers, rate limiters and cycle detectors
pub mod config;

/// Environment module - injected dependencies
///
/// Guards that stamp records with wall-clock time take a [`Clock`](environment::Clock)
/// so tests can control time. Monotonic timing (timeouts, windows) does not go
/// through this trait.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use warden_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by [`Utc::now`]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use config::{
    CircuitBreakerConfig, CycleDetectorConfig, RateLimitStrategy, RateLimiterConfig, WardenConfig,
};
pub use error::{CircuitOpenError, ConfigError, RateLimitExceeded, RejectionReason};
