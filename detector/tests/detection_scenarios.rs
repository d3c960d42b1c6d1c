//! Integration tests for cycle detection
//!
//! Replays scripted workflows and checks what the detector reports and
//! whether it recommends stopping.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use warden_core::environment::Clock;
use warden_detector::{CycleDetector, CycleDetectorConfig, CycleType, StateSnapshot};
use warden_testing::{TransitionScript, init_tracing, test_clock};

#[test]
fn oscillation_between_two_nodes() {
    init_tracing();
    let mut detector = CycleDetector::default();

    let outcome = TransitionScript::new()
        .path(&["A", "B", "A", "B", "A", "B"])
        .run(&mut detector);

    let cycle = outcome.last().unwrap();
    assert_eq!(cycle.cycle_type, CycleType::Oscillation);
    assert_eq!(cycle.pattern, vec!["A", "B"]);
    assert!(!detector.should_terminate(cycle));
}

#[test]
fn frozen_state_deadlocks_and_terminates() {
    let mut detector = CycleDetector::default();
    let frozen = StateSnapshot::from_json(&json!({
        "node_visits": {"call_tool": 4},
        "pending_tool_calls": [{"id": "call_1"}],
        "messages": [{"content": "Error: tool unavailable"}]
    }));

    let outcome = TransitionScript::new()
        .from_node("call_tool")
        .repeat(&["call_tool"], 10)
        .with_static_state(frozen)
        .run(&mut detector);

    let cycle = outcome.last().unwrap();
    assert_eq!(cycle.cycle_type, CycleType::Deadlock);
    assert!((cycle.confidence - 0.8).abs() < f64::EPSILON);
    assert!(detector.should_terminate(cycle));
    assert!(outcome.first_of(CycleType::SimpleLoop).is_some());
}

#[test]
fn long_loop_confidence_grows_until_termination() {
    let mut detector = CycleDetector::default();

    let outcome = TransitionScript::new()
        .repeat(&["plan", "search", "summarize"], 6)
        .run(&mut detector);

    let loops: Vec<f64> = outcome
        .detections
        .iter()
        .flatten()
        .filter(|c| c.cycle_type == CycleType::ComplexLoop)
        .map(|c| c.confidence)
        .collect();
    assert!(!loops.is_empty());
    assert!(loops.windows(2).all(|w| w[0] <= w[1]));

    let last = outcome.last().unwrap();
    assert!(detector.should_terminate(last));
}

#[test]
fn progressing_workflow_stays_quiet() {
    let mut detector = CycleDetector::default();

    let outcome = TransitionScript::new()
        .path(&["intake", "classify", "retrieve", "draft", "review", "publish"])
        .run(&mut detector);

    assert!(outcome.is_quiet());
    assert_eq!(detector.analytics().total_cycles_detected, 0);
}

#[test]
fn timestamps_come_from_injected_clock() {
    let clock = test_clock();
    let mut detector = CycleDetector::with_clock(
        CycleDetectorConfig::default(),
        Arc::new(clock.clone()),
    );
    let start = clock.now();

    TransitionScript::new().path(&["A", "B"]).run(&mut detector);
    clock.advance(chrono::Duration::seconds(5));
    let cycle = TransitionScript::new()
        .from_node("B")
        .path(&["A", "B"])
        .with_static_state(StateSnapshot::new().with_visits("A", 9))
        .run(&mut detector)
        .last()
        .cloned()
        .unwrap();

    assert_eq!(cycle.first_occurrence, start);
    assert_eq!(cycle.last_occurrence, start + chrono::Duration::seconds(5));
    assert_eq!(detector.history().last().unwrap().timestamp, clock.now());
}

#[test]
fn analytics_serializes_for_observability() {
    let mut detector = CycleDetector::default();
    TransitionScript::new()
        .repeat(&["fetch", "parse"], 4)
        .run(&mut detector);

    let analytics = serde_json::to_value(detector.analytics()).unwrap();
    assert_eq!(analytics["total_transitions"], 8);
    assert_eq!(analytics["history_length"], 8);
    assert!(analytics["recent_cycles"].as_array().unwrap().len() <= 5);
    assert_eq!(analytics["recent_cycles"][0]["cycle_type"], "SIMPLE_LOOP");
}

proptest! {
    #[test]
    fn history_never_exceeds_max(nodes in prop::collection::vec("[a-d]", 0..120), max_history in 1usize..40) {
        let mut detector = CycleDetector::new(CycleDetectorConfig {
            max_history,
            ..Default::default()
        });
        let steps: Vec<&str> = nodes.iter().map(String::as_str).collect();
        TransitionScript::new().path(&steps).run(&mut detector);

        let analytics = detector.analytics();
        prop_assert!(analytics.history_length <= max_history);
        prop_assert!(analytics.unique_fingerprints <= analytics.history_length);
        prop_assert_eq!(analytics.total_transitions, nodes.len() as u64);
    }

    #[test]
    fn confidence_stays_in_unit_range(nodes in prop::collection::vec("[a-c]", 0..60)) {
        let mut detector = CycleDetector::default();
        let steps: Vec<&str> = nodes.iter().map(String::as_str).collect();
        let outcome = TransitionScript::new()
            .with_static_state(StateSnapshot::new())
            .path(&steps)
            .run(&mut detector);

        for cycle in outcome.detections.iter().flatten() {
            prop_assert!((0.0..=1.0).contains(&cycle.confidence));
            prop_assert!(!cycle.pattern.is_empty());
        }
    }
}
