//! # Warden Testing
//!
//! Testing utilities for the Warden guards.
//!
//! This crate provides:
//! - Mock implementations of Environment traits ([`ManualClock`])
//! - [`ScriptedOperation`]: an external call that fails or succeeds on cue
//! - [`TransitionScript`]: feeds node sequences into a cycle detector
//! - [`init_tracing`]: log output for tests, filtered by `RUST_LOG`
//!
//! ## Example
//!
//! ```
//! use warden_testing::ScriptedOperation;
//!
//! let operation = ScriptedOperation::new().fail(2, "timeout").succeed(1);
//!
//! assert!(operation.call().is_err());
//! assert!(operation.call().is_err());
//! assert!(operation.call().is_ok());
//! assert_eq!(operation.invocations(), 3);
//! ```

use chrono::{DateTime, Utc};
use warden_core::environment::Clock;

/// Scripted node sequences for cycle detector tests
pub mod transitions;

/// Mock implementations of Environment traits and external calls
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the component under test.
    ///
    /// # Example
    ///
    /// ```
    /// use warden_testing::mocks::test_clock;
    /// use warden_core::environment::Clock;
    ///
    /// let clock = test_clock();
    /// let start = clock.now();
    /// clock.advance(chrono::Duration::seconds(30));
    /// assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            *self.time.lock() += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock() = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock()
        }
    }

    /// Create a manual clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Error returned by a scripted failure
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("scripted failure: {0}")]
    pub struct ScriptedFailure(pub String);

    /// Stand-in for an unreliable external call
    ///
    /// Plays back a queue of outcomes, one per invocation, then succeeds once
    /// the queue is empty. Successful calls return their 1-based invocation
    /// number. Clones share the script and the counter.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedOperation {
        script: Arc<Mutex<VecDeque<Option<String>>>>,
        invocations: Arc<AtomicUsize>,
    }

    impl ScriptedOperation {
        /// Operation that always succeeds until scripted otherwise
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue `times` failures with `message`
        #[must_use]
        pub fn fail(self, times: usize, message: &str) -> Self {
            self.script
                .lock()
                .extend(std::iter::repeat_n(Some(message.to_string()), times));
            self
        }

        /// Queue `times` successes
        #[must_use]
        pub fn succeed(self, times: usize) -> Self {
            self.script.lock().extend(std::iter::repeat_n(None, times));
            self
        }

        /// Invoke the operation
        ///
        /// # Errors
        ///
        /// Returns [`ScriptedFailure`] when the next scripted outcome is a failure.
        pub fn call(&self) -> Result<usize, ScriptedFailure> {
            let invocation = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
            match self.script.lock().pop_front().flatten() {
                Some(message) => Err(ScriptedFailure(message)),
                None => Ok(invocation),
            }
        }

        /// Invoke the operation from async code
        ///
        /// # Errors
        ///
        /// Same as [`call`](Self::call).
        pub async fn call_async(&self) -> Result<usize, ScriptedFailure> {
            self.call()
        }

        /// Times the operation has been invoked
        #[must_use]
        pub fn invocations(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }

        /// Outcomes still queued
        #[must_use]
        pub fn remaining(&self) -> usize {
            self.script.lock().len()
        }
    }
}

/// Install a `tracing` subscriber that writes through the test harness
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// Re-export commonly used items
pub use mocks::{ManualClock, ScriptedFailure, ScriptedOperation, test_clock};
pub use transitions::TransitionScript;
