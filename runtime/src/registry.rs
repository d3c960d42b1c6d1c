//! Named guard registry.
//!
//! Hands out one shared [`CircuitBreaker`] and one shared [`RateLimiter`] per
//! resource name, constructing each lazily on first use.
//!
//! The registry is an explicit value: build it once at startup from a
//! [`WardenConfig`] and pass it (usually as `Arc<GuardRegistry>`) to whatever
//! executes external calls.
//!
//! # Example
//!
//! ```
//! use warden_core::config::WardenConfig;
//! use warden_runtime::GuardRegistry;
//! use std::sync::Arc;
//!
//! let registry = GuardRegistry::new(WardenConfig::default());
//!
//! let first = registry.circuit_breaker("llm_api");
//! let second = registry.circuit_breaker("llm_api");
//! assert!(Arc::ptr_eq(&first, &second));
//! ```

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::guard::Guard;
use crate::rate_limiter::{RateLimiter, RateLimiterStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use warden_core::config::{CircuitBreakerConfig, RateLimiterConfig, WardenConfig};

/// Name-keyed map with double-checked lazy construction.
///
/// Lookups take the shared lock; the exclusive lock is only taken to insert
/// a name that was missing, and the entry is re-checked under it.
#[derive(Debug)]
struct Named<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Named<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().get(name).cloned()
    }

    fn get_or_create(&self, name: &str, create: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut entries = self.entries.write();
        Arc::clone(
            entries
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    fn sorted(&self) -> Vec<(String, Arc<T>)> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Registry of shared circuit breakers and rate limiters
///
/// Manages one breaker and one limiter per resource name. Configuration for a
/// new name comes from the per-name override in [`WardenConfig`] when present,
/// otherwise from its default section.
#[derive(Debug)]
pub struct GuardRegistry {
    config: WardenConfig,
    breakers: Named<CircuitBreaker>,
    limiters: Named<RateLimiter>,
}

impl GuardRegistry {
    /// Create a registry from configuration
    #[must_use]
    pub fn new(config: WardenConfig) -> Self {
        Self {
            config,
            breakers: Named::new(),
            limiters: Named::new(),
        }
    }

    /// Configuration new guards are built from
    #[must_use]
    pub const fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Shared circuit breaker for `name`, created on first use
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name, || {
            tracing::debug!(name, "Creating circuit breaker");
            CircuitBreaker::new(name, self.config.circuit_breaker_for(name))
        })
    }

    /// Shared circuit breaker for `name`, created with `config` on first use
    ///
    /// If `name` already exists the existing breaker is returned unchanged.
    pub fn circuit_breaker_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name, || {
            tracing::debug!(name, "Creating circuit breaker with explicit config");
            CircuitBreaker::new(name, config)
        })
    }

    /// Shared rate limiter for `name`, created on first use
    pub fn rate_limiter(&self, name: &str) -> Arc<RateLimiter> {
        self.limiters.get_or_create(name, || {
            tracing::debug!(name, "Creating rate limiter");
            RateLimiter::new(name, self.config.rate_limiter_for(name))
        })
    }

    /// Shared rate limiter for `name`, created with `config` on first use
    ///
    /// If `name` already exists the existing limiter is returned unchanged.
    pub fn rate_limiter_with(&self, name: &str, config: RateLimiterConfig) -> Arc<RateLimiter> {
        self.limiters.get_or_create(name, || {
            tracing::debug!(name, "Creating rate limiter with explicit config");
            RateLimiter::new(name, config)
        })
    }

    /// Existing circuit breaker, without creating one
    #[must_use]
    pub fn get_circuit_breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name)
    }

    /// Existing rate limiter, without creating one
    #[must_use]
    pub fn get_rate_limiter(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name)
    }

    /// Rate limiter plus circuit breaker for `name`
    pub fn guard(&self, name: &str) -> Guard {
        Guard::new(self.circuit_breaker(name)).with_rate_limiter(self.rate_limiter(name))
    }

    /// Stats of every circuit breaker, ordered by name
    #[must_use]
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .sorted()
            .into_iter()
            .map(|(_, breaker)| breaker.stats())
            .collect()
    }

    /// Stats of every rate limiter, ordered by name
    #[must_use]
    pub fn limiter_stats(&self) -> Vec<RateLimiterStats> {
        self.limiters
            .sorted()
            .into_iter()
            .map(|(_, limiter)| limiter.stats())
            .collect()
    }

    /// Names of registered circuit breakers, sorted
    #[must_use]
    pub fn breaker_names(&self) -> Vec<String> {
        self.breakers.sorted().into_iter().map(|(name, _)| name).collect()
    }

    /// Names of registered rate limiters, sorted
    #[must_use]
    pub fn limiter_names(&self) -> Vec<String> {
        self.limiters.sorted().into_iter().map(|(name, _)| name).collect()
    }

    /// Number of registered guards (breakers and limiters)
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len() + self.limiters.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset every registered guard to its initial state
    pub fn reset_all(&self) {
        for (_, breaker) in self.breakers.sorted() {
            breaker.reset();
        }
        for (_, limiter) in self.limiters.sorted() {
            limiter.reset();
        }
    }
}

impl Default for GuardRegistry {
    fn default() -> Self {
        Self::new(WardenConfig::default())
    }
}
