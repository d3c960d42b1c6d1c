//! Integration tests for guarded calls
//!
//! Drives circuit breakers, rate limiters and the registry the way an
//! execution step does: many calls, shared instances, paused time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready_ok};
use warden_core::config::{CircuitBreakerConfig, WardenConfig};
use warden_runtime::{
    CircuitBreaker, CircuitBreakerError, CircuitState, GuardError, GuardRegistry, RejectionReason,
};
use warden_testing::{ScriptedFailure, ScriptedOperation, init_tracing};

// ============================================================================
// Circuit breaker lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn breaker_recovers_through_half_open() {
    init_tracing();

    let breaker = CircuitBreaker::new(
        "payments",
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .recovery_timeout(Duration::from_millis(50))
            .half_open_max_calls(1)
            .build(),
    );
    let operation = ScriptedOperation::new().fail(2, "503");

    for _ in 0..2 {
        let err = breaker.call_async(|| operation.call_async()).await.unwrap_err();
        assert!(matches!(err, CircuitBreakerError::Inner(ScriptedFailure(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.call_async(|| operation.call_async()).await.unwrap_err();
    assert!(rejected.is_open());
    assert_eq!(operation.invocations(), 2, "open circuit must not invoke the operation");

    tokio::time::advance(Duration::from_millis(60)).await;

    assert_eq!(breaker.call_async(|| operation.call_async()).await.unwrap(), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);

    let stats = breaker.stats();
    let path: Vec<_> = stats.recent_transitions.iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        path,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
    assert_eq!(stats.rejected_calls, 1);
    assert_eq!(stats.failure_reasons.get("ScriptedFailure"), Some(&2));
}

#[tokio::test(start_paused = true)]
async fn failure_in_half_open_reopens() {
    let breaker = CircuitBreaker::new(
        "search",
        CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_secs(1))
            .build(),
    );
    let operation = ScriptedOperation::new().fail(2, "timeout");

    let _ = breaker.call_async(|| operation.call_async()).await;
    tokio::time::advance(Duration::from_secs(2)).await;
    let _ = breaker.call_async(|| operation.call_async()).await;

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(operation.invocations(), 2);
}

// ============================================================================
// Registry and guard composition
// ============================================================================

fn registry() -> Arc<GuardRegistry> {
    let config = WardenConfig::from_toml_str(
        r#"
        [circuit_breaker]
        failure_threshold = 3

        [limiters.llm_api]
        strategy = "token_bucket"
        calls_per_minute = 60
        burst_size = 2

        [limiters.search_api]
        strategy = "sliding_window"
        calls_per_minute = 10
        "#,
    )
    .unwrap();
    Arc::new(GuardRegistry::new(config))
}

#[tokio::test(start_paused = true)]
async fn guard_respects_burst_and_recovers_after_retry_after() {
    let registry = registry();
    let guard = registry.guard("llm_api");
    let operation = ScriptedOperation::new();

    guard.execute(|| operation.call_async()).await.unwrap();
    guard.execute(|| operation.call_async()).await.unwrap();

    let err = guard.execute(|| operation.call_async()).await.unwrap_err();
    let retry_after = err.retry_after().expect("rate limit rejection carries a backoff");
    assert!(retry_after > Duration::ZERO);
    assert!(matches!(
        &err,
        GuardError::RateLimited(e) if e.reason == RejectionReason::InsufficientTokens
    ));
    assert_eq!(operation.invocations(), 2);

    tokio::time::advance(retry_after).await;
    assert_eq!(guard.execute(|| operation.call_async()).await.unwrap(), 3);
}

#[tokio::test]
async fn concurrent_callers_share_one_quota() {
    let registry = registry();

    let attempts = (0..50).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.rate_limiter("search_api").acquire(1).is_ok() })
    });
    let allowed = futures::future::join_all(attempts)
        .await
        .into_iter()
        .filter(|outcome| *outcome.as_ref().unwrap())
        .count();

    assert_eq!(allowed, 10);
    let stats = registry.limiter_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].rejected_requests, 40);
    assert_eq!(stats[0].rejection_reasons.get("minute_limit"), Some(&40));
}

#[tokio::test]
async fn open_circuit_surfaces_through_guard() {
    let registry = registry();
    let guard = registry.guard("flaky_tool");
    let operation = ScriptedOperation::new().fail(3, "connection reset");

    for _ in 0..3 {
        let err = guard.execute(|| operation.call_async()).await.unwrap_err();
        assert_eq!(
            err.into_operation_error(),
            Some(ScriptedFailure("connection reset".to_string()))
        );
    }

    let err = guard.execute(|| operation.call_async()).await.unwrap_err();
    assert!(err.is_rejection());
    assert!(matches!(err, GuardError::CircuitOpen(ref open) if open.consecutive_failures == 3));
    assert!(err.to_string().contains("flaky_tool"));

    let stats = registry.breaker_stats();
    assert_eq!(stats[0].state, CircuitState::Open);
    assert_eq!(serde_json::to_value(&stats[0]).unwrap()["state"], "OPEN");
}

#[tokio::test(start_paused = true)]
async fn wait_and_acquire_survives_timeout_cancellation() {
    let registry = registry();
    let limiter = registry.rate_limiter("llm_api");
    limiter.acquire(2).unwrap();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        limiter.wait_and_acquire(1, Duration::from_secs(30)),
    )
    .await;
    assert!(cancelled.is_err());

    let stats = limiter.stats();
    assert_eq!(stats.allowed_requests, 1);
    limiter.wait_and_acquire(1, Duration::from_secs(30)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn waiting_caller_stays_pending_until_quota_frees() -> anyhow::Result<()> {
    let registry = registry();
    let limiter = registry.rate_limiter("llm_api");
    limiter.acquire(2)?;

    let mut waiter = tokio_test::task::spawn(limiter.wait_and_acquire(1, Duration::from_secs(30)));
    assert_pending!(waiter.poll());

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_pending!(waiter.poll());

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_ready_ok!(waiter.poll());

    assert_eq!(limiter.stats().allowed_requests, 2);
    Ok(())
}
