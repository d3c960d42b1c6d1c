//! Configuration Management for Guards
//!
//! Provides typed, validated settings for every guard, loadable from TOML.
//!
//! # Features
//!
//! - Sensible defaults for every field (an empty document is valid)
//! - Per-resource overrides for circuit breakers and rate limiters
//! - Validation with clear error messages
//! - Durations expressed in milliseconds (`*_ms` keys)
//!
//! # Example
//!
//! ```no_run
//! use warden_core::config::WardenConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from the file named by WARDEN_CONFIG (defaults when unset)
//! let config = WardenConfig::from_env()?;
//!
//! let breaker = config.circuit_breaker_for("llm_api");
//! println!("Failure threshold: {}", breaker.failure_threshold);
//! # Ok(())
//! # }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "WARDEN_CONFIG";

/// Serde adapter storing a [`Duration`] as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

fn validate_fraction(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{field} must be between 0.0 and 1.0 (got {value})"
        )))
    }
}

fn validate_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Validation(format!("{field} must be > 0")))
    } else {
        Ok(())
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    #[serde(rename = "recovery_timeout_ms", with = "duration_ms")]
    pub recovery_timeout: Duration,
    /// Successes in half-open state required to close the circuit
    pub half_open_max_calls: u32,
    /// Rolling failure rate (0.0-1.0) that opens the circuit
    pub failure_rate_threshold: f64,
    /// Window over which the rolling failure rate is computed
    #[serde(rename = "monitoring_window_ms", with = "duration_ms")]
    pub monitoring_window: Duration,
    /// Calls required in the window before the failure rate is considered.
    ///
    /// Defaults to `failure_threshold` when unset.
    pub minimum_calls: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            failure_rate_threshold: 0.5,
            monitoring_window: Duration::from_secs(60),
            minimum_calls: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Calls required in the monitoring window before the failure rate applies
    #[must_use]
    pub fn effective_minimum_calls(&self) -> u32 {
        self.minimum_calls.unwrap_or(self.failure_threshold)
    }

    /// Validate circuit breaker configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive("failure_threshold", u64::from(self.failure_threshold))?;
        validate_positive("half_open_max_calls", u64::from(self.half_open_max_calls))?;
        validate_fraction("failure_rate_threshold", self.failure_rate_threshold)?;
        if self.monitoring_window.is_zero() {
            return Err(ConfigError::Validation(
                "monitoring_window_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Circuit opens after this many consecutive failures.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// How long to wait in Open state before trying `HalfOpen`.
    #[must_use]
    pub const fn recovery_timeout(mut self, duration: Duration) -> Self {
        self.config.recovery_timeout = duration;
        self
    }

    /// Number of successes in `HalfOpen` state before closing the circuit.
    #[must_use]
    pub const fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.config.half_open_max_calls = calls;
        self
    }

    /// Rolling failure rate that opens the circuit.
    #[must_use]
    pub const fn failure_rate_threshold(mut self, rate: f64) -> Self {
        self.config.failure_rate_threshold = rate;
        self
    }

    /// Window for the rolling failure rate.
    #[must_use]
    pub const fn monitoring_window(mut self, window: Duration) -> Self {
        self.config.monitoring_window = window;
        self
    }

    /// Calls required before the failure rate is considered.
    #[must_use]
    pub const fn minimum_calls(mut self, calls: u32) -> Self {
        self.config.minimum_calls = Some(calls);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Continuously refilling bucket with burst capacity
    TokenBucket,
    /// Request log over rolling minute/hour/day windows
    SlidingWindow,
    /// Counter reset on minute boundaries
    FixedWindow,
}

impl RateLimitStrategy {
    /// Stable identifier used in logs and stats
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenBucket => "token_bucket",
            Self::SlidingWindow => "sliding_window",
            Self::FixedWindow => "fixed_window",
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Algorithm used to enforce the quota
    pub strategy: RateLimitStrategy,
    /// Calls allowed per minute (also the token bucket refill rate)
    pub calls_per_minute: u32,
    /// Optional hourly quota (sliding window only)
    pub calls_per_hour: Option<u32>,
    /// Optional daily quota (sliding window only)
    pub calls_per_day: Option<u32>,
    /// Token bucket capacity; defaults to `calls_per_minute`
    pub burst_size: Option<u32>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            strategy: RateLimitStrategy::TokenBucket,
            calls_per_minute: 60,
            calls_per_hour: None,
            calls_per_day: None,
            burst_size: None,
        }
    }
}

impl RateLimiterConfig {
    /// Token bucket capacity
    #[must_use]
    pub fn max_tokens(&self) -> f64 {
        f64::from(self.burst_size.unwrap_or(self.calls_per_minute))
    }

    /// Tokens refilled per second
    #[must_use]
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.calls_per_minute) / 60.0
    }

    /// Validate rate limiter configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive("calls_per_minute", u64::from(self.calls_per_minute))?;
        if let Some(per_hour) = self.calls_per_hour {
            validate_positive("calls_per_hour", u64::from(per_hour))?;
        }
        if let Some(per_day) = self.calls_per_day {
            validate_positive("calls_per_day", u64::from(per_day))?;
        }
        if let Some(burst) = self.burst_size {
            validate_positive("burst_size", u64::from(burst))?;
        }
        Ok(())
    }
}

/// Cycle detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleDetectorConfig {
    /// Transitions kept in the rolling history
    pub max_history: usize,
    /// Shortest repeating node sequence considered a loop
    pub min_pattern_length: usize,
    /// Longest repeating node sequence considered a loop
    pub max_pattern_length: usize,
    /// Repetitions required before a pattern is reported
    pub detection_threshold: usize,
    /// Fingerprint similarity (0.0-1.0) at which states count as near-duplicates
    pub spiral_similarity_threshold: f64,
}

impl Default for CycleDetectorConfig {
    fn default() -> Self {
        Self {
            max_history: 100,
            min_pattern_length: 2,
            max_pattern_length: 10,
            detection_threshold: 2,
            spiral_similarity_threshold: 0.9,
        }
    }
}

impl CycleDetectorConfig {
    /// Validate cycle detector configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_positive("max_history", self.max_history as u64)?;
        validate_positive("detection_threshold", self.detection_threshold as u64)?;
        if self.min_pattern_length < 2 {
            return Err(ConfigError::Validation(
                "min_pattern_length must be >= 2".to_string(),
            ));
        }
        if self.max_pattern_length < self.min_pattern_length {
            return Err(ConfigError::Validation(format!(
                "max_pattern_length ({}) must be >= min_pattern_length ({})",
                self.max_pattern_length, self.min_pattern_length
            )));
        }
        validate_fraction("spiral_similarity_threshold", self.spiral_similarity_threshold)
    }
}

/// Complete guard configuration
///
/// The `circuit_breaker` and `rate_limiter` sections are the defaults for
/// every named resource; `breakers` and `limiters` hold per-name overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Default circuit breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Default rate limiter settings
    pub rate_limiter: RateLimiterConfig,
    /// Settings for each new cycle detector
    pub cycle_detector: CycleDetectorConfig,
    /// Per-resource circuit breaker overrides
    pub breakers: HashMap<String, CircuitBreakerConfig>,
    /// Per-resource rate limiter overrides
    pub limiters: HashMap<String, RateLimiterConfig>,
}

impl WardenConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&document)?;
        tracing::info!(path = %path.display(), "Loaded guard configuration");
        Ok(config)
    }

    /// Load from the file named by `WARDEN_CONFIG`, or defaults when unset
    ///
    /// # Errors
    ///
    /// Returns error if the named file cannot be loaded
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => {
                tracing::debug!("{CONFIG_PATH_ENV} not set, using default guard configuration");
                Ok(Self::default())
            }
        }
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first validation failure, prefixed with the section name
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scoped = |section: String, result: Result<(), ConfigError>| {
            result.map_err(|e| match e {
                ConfigError::Validation(msg) => ConfigError::Validation(format!("{section}: {msg}")),
                other => other,
            })
        };

        scoped("circuit_breaker".to_string(), self.circuit_breaker.validate())?;
        scoped("rate_limiter".to_string(), self.rate_limiter.validate())?;
        scoped("cycle_detector".to_string(), self.cycle_detector.validate())?;
        for (name, breaker) in &self.breakers {
            scoped(format!("breakers.{name}"), breaker.validate())?;
        }
        for (name, limiter) in &self.limiters {
            scoped(format!("limiters.{name}"), limiter.validate())?;
        }
        Ok(())
    }

    /// Circuit breaker settings for a named resource
    #[must_use]
    pub fn circuit_breaker_for(&self, name: &str) -> CircuitBreakerConfig {
        self.breakers
            .get(name)
            .unwrap_or(&self.circuit_breaker)
            .clone()
    }

    /// Rate limiter settings for a named resource
    #[must_use]
    pub fn rate_limiter_for(&self, name: &str) -> RateLimiterConfig {
        self.limiters.get(name).unwrap_or(&self.rate_limiter).clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn defaults_are_valid() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.rate_limiter.calls_per_minute, 60);
        assert_eq!(config.cycle_detector.max_history, 100);
        assert_eq!(config.cycle_detector.detection_threshold, 2);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = WardenConfig::from_toml_str("").unwrap();
        assert_eq!(config, WardenConfig::default());
    }

    #[test]
    fn parses_durations_in_millis_and_overrides() {
        let config = WardenConfig::from_toml_str(
            r#"
            [circuit_breaker]
            failure_threshold = 2
            recovery_timeout_ms = 50
            half_open_max_calls = 1

            [breakers.flaky_tool]
            failure_threshold = 10

            [limiters.search]
            strategy = "fixed_window"
            calls_per_minute = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_millis(50));
        assert_eq!(config.circuit_breaker_for("other").failure_threshold, 2);
        assert_eq!(config.circuit_breaker_for("flaky_tool").failure_threshold, 10);

        let search = config.rate_limiter_for("search");
        assert_eq!(search.strategy, RateLimitStrategy::FixedWindow);
        assert_eq!(search.calls_per_minute, 5);
        assert_eq!(
            config.rate_limiter_for("unknown").strategy,
            RateLimitStrategy::TokenBucket
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = WardenConfig::from_toml_str(
            r"
            [circuit_breaker]
            failure_rate_threshold = 1.5
            ",
        )
        .unwrap_err();
        assert!(err.to_string().contains("circuit_breaker"));
        assert!(err.to_string().contains("failure_rate_threshold"));

        let err = WardenConfig::from_toml_str(
            r"
            [limiters.api]
            calls_per_minute = 0
            ",
        )
        .unwrap_err();
        assert!(err.to_string().contains("limiters.api"));

        let err = WardenConfig::from_toml_str(
            r"
            [cycle_detector]
            min_pattern_length = 4
            max_pattern_length = 3
            ",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = WardenConfig::from_toml_str("[circuit_breaker\nfailure_threshold = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = WardenConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_millis(50))
            .half_open_max_calls(1)
            .build();

        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.recovery_timeout, Duration::from_millis(50));
        assert_eq!(config.half_open_max_calls, 1);
        assert_eq!(config.effective_minimum_calls(), 2);
        assert!((config.failure_rate_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn token_bucket_capacity_prefers_burst() {
        let mut config = RateLimiterConfig::default();
        assert!((config.max_tokens() - 60.0).abs() < f64::EPSILON);
        assert!((config.refill_rate() - 1.0).abs() < f64::EPSILON);

        config.burst_size = Some(5);
        assert!((config.max_tokens() - 5.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn fraction_validation_matches_range(rate in -2.0f64..3.0) {
            let config = CircuitBreakerConfig { failure_rate_threshold: rate, ..Default::default() };
            prop_assert_eq!(config.validate().is_ok(), (0.0..=1.0).contains(&rate));
        }
    }
}
