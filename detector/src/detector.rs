//! Cycle detection over a stream of workflow transitions.
//!
//! ## Detection
//!
//! Every call to [`CycleDetector::add_transition`] runs four checks against
//! the bounded history and reports at most one cycle:
//!
//! ```text
//! Loop         the latest L destination nodes recur >= detection_threshold times
//!              (L between min_pattern_length and max_pattern_length)
//! Oscillation  a strict A,B,A,B,A run within the last 10 destination nodes
//! Spiral       near-duplicate fingerprints keep coming back
//! Deadlock     the last 10 transitions touch <= 2 nodes and <= 2 fingerprints
//! ```
//!
//! The highest-confidence finding wins, except that a deadlock always wins.
//! The detector only advises: [`CycleDetector::should_terminate`] says whether
//! a finding is serious enough to stop, and the caller decides.

use crate::snapshot::{StateSnapshot, similarity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::config::CycleDetectorConfig;
use warden_core::environment::{Clock, SystemClock};

/// Transitions inspected by the oscillation and deadlock checks
const RECENT_WINDOW: usize = 10;
/// Length of the alternating run that signals an oscillation
const OSCILLATION_RUN: usize = 5;
/// Confidence at or above which termination is recommended
const TERMINATE_CONFIDENCE: f64 = 0.8;
/// Distinct detections in one session after which termination is recommended
const TERMINATE_DISTINCT_CYCLES: usize = 3;
/// Spiral frequency after which termination is recommended
const TERMINATE_SPIRAL_FREQUENCY: usize = 20;
const LOOP_CONFIDENCE_CAP: f64 = 0.9;
const OSCILLATION_CONFIDENCE_CAP: f64 = 0.85;
const SPIRAL_CONFIDENCE: f64 = 0.7;
const DEADLOCK_CONFIDENCE: f64 = 0.8;
/// Detections included in [`CycleAnalytics::recent_cycles`]
const RECENT_CYCLES: usize = 5;

/// Kind of non-terminating behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleType {
    /// Two nodes repeating in order
    SimpleLoop,
    /// Three or more nodes repeating in order
    ComplexLoop,
    /// Strict alternation between two nodes
    Oscillation,
    /// Near-identical states recurring
    Spiral,
    /// Execution stuck on very few nodes and states
    Deadlock,
}

impl CycleType {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimpleLoop => "simple_loop",
            Self::ComplexLoop => "complex_loop",
            Self::Oscillation => "oscillation",
            Self::Spiral => "spiral",
            Self::Deadlock => "deadlock",
        }
    }
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SimpleLoop => "simple loop",
            Self::ComplexLoop => "complex loop",
            Self::Oscillation => "oscillation",
            Self::Spiral => "spiral",
            Self::Deadlock => "deadlock",
        };
        f.write_str(label)
    }
}

/// One recorded move between workflow nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    /// Node the workflow left
    pub from_node: String,
    /// Node the workflow entered
    pub to_node: String,
    /// Fingerprint of the state after the move
    pub fingerprint: String,
    /// When the transition was recorded
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A finding reported by the detector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedCycle {
    /// What kind of cycle this is
    pub cycle_type: CycleType,
    /// Node names making up the cycle, in order
    pub pattern: Vec<String>,
    /// How many times the pattern was observed
    pub frequency: usize,
    /// Timestamp of the earliest transition involved
    pub first_occurrence: DateTime<Utc>,
    /// Timestamp of the latest transition involved
    pub last_occurrence: DateTime<Utc>,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Advice that can be shown to the user
    pub suggested_action: String,
}

impl fmt::Display for DetectedCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detected {} over [{}] ({} occurrences, {:.0}% confidence). {}",
            self.cycle_type,
            self.pattern.join(" -> "),
            self.frequency,
            self.confidence * 100.0,
            self.suggested_action
        )
    }
}

/// Read-only summary of a detector session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleAnalytics {
    /// Transitions recorded this session
    pub total_transitions: u64,
    /// Cycles reported this session
    pub total_cycles_detected: u64,
    /// Cycles per transition
    pub detection_rate: f64,
    /// Node entered most often, with its visit count
    pub most_visited_node: Option<(String, u64)>,
    /// Latest detections, oldest first
    pub recent_cycles: Vec<DetectedCycle>,
    /// Distinct fingerprints in the current history
    pub unique_fingerprints: usize,
    /// Transitions currently held
    pub history_length: usize,
}

/// Session-scoped cycle detector
///
/// Owned by one execution session; methods take `&mut self` and no locking is
/// involved. Call [`reset`](Self::reset) or drop it when the session ends.
pub struct CycleDetector {
    config: CycleDetectorConfig,
    clock: Arc<dyn Clock>,
    history: VecDeque<StateTransition>,
    node_visits: HashMap<String, u64>,
    fingerprints: BTreeMap<String, VecDeque<DateTime<Utc>>>,
    detected: Vec<DetectedCycle>,
    distinct: HashSet<(CycleType, Vec<String>)>,
    total_transitions: u64,
}

impl fmt::Debug for CycleDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleDetector")
            .field("config", &self.config)
            .field("history_length", &self.history.len())
            .field("total_transitions", &self.total_transitions)
            .field("detected", &self.detected.len())
            .finish_non_exhaustive()
    }
}

impl Default for CycleDetector {
    fn default() -> Self {
        Self::new(CycleDetectorConfig::default())
    }
}

impl CycleDetector {
    /// Create a detector that stamps transitions with the system clock
    #[must_use]
    pub fn new(config: CycleDetectorConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a detector with an explicit clock
    #[must_use]
    pub fn with_clock(config: CycleDetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            history: VecDeque::new(),
            node_visits: HashMap::new(),
            fingerprints: BTreeMap::new(),
            detected: Vec::new(),
            distinct: HashSet::new(),
            total_transitions: 0,
        }
    }

    /// Detector configuration
    #[must_use]
    pub const fn config(&self) -> &CycleDetectorConfig {
        &self.config
    }

    /// Record a transition and check for cycles
    ///
    /// Returns the most significant cycle visible after this transition, if
    /// any. The same ongoing cycle is reported again on later transitions.
    pub fn add_transition(
        &mut self,
        from_node: &str,
        to_node: &str,
        snapshot: &StateSnapshot,
        metadata: Option<Value>,
    ) -> Option<DetectedCycle> {
        let timestamp = self.clock.now();
        let fingerprint = snapshot.fingerprint();

        debug!(from = from_node, to = to_node, %fingerprint, "Recording transition");

        self.fingerprints
            .entry(fingerprint.clone())
            .or_default()
            .push_back(timestamp);
        *self.node_visits.entry(to_node.to_string()).or_insert(0) += 1;
        self.history.push_back(StateTransition {
            from_node: from_node.to_string(),
            to_node: to_node.to_string(),
            fingerprint,
            timestamp,
            metadata,
        });
        self.total_transitions += 1;

        while self.history.len() > self.config.max_history.max(1) {
            if let Some(evicted) = self.history.pop_front() {
                self.forget_fingerprint(&evicted.fingerprint);
            }
        }

        let cycle = self.detect()?;
        self.record_detection(&cycle);
        Some(cycle)
    }

    /// Whether a finding warrants stopping the session
    ///
    /// True for confidence >= 0.8, any deadlock, a spiral seen 20 or more
    /// times, or once this session has produced 3 distinct findings. Findings
    /// are distinct by type and pattern, where rotations of a pattern
    /// (`[A, B, C]` and `[B, C, A]`) count as the same cycle.
    #[must_use]
    pub fn should_terminate(&self, cycle: &DetectedCycle) -> bool {
        cycle.confidence >= TERMINATE_CONFIDENCE
            || self.distinct.len() >= TERMINATE_DISTINCT_CYCLES
            || cycle.cycle_type == CycleType::Deadlock
            || (cycle.cycle_type == CycleType::Spiral
                && cycle.frequency >= TERMINATE_SPIRAL_FREQUENCY)
    }

    /// Session summary
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn analytics(&self) -> CycleAnalytics {
        let total_cycles_detected = self.detected.len() as u64;
        let detection_rate = if self.total_transitions == 0 {
            0.0
        } else {
            total_cycles_detected as f64 / self.total_transitions as f64
        };

        // Ties resolve to the alphabetically first node
        let most_visited_node = self
            .node_visits
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(node, visits)| (node.clone(), *visits));

        let skip = self.detected.len().saturating_sub(RECENT_CYCLES);

        CycleAnalytics {
            total_transitions: self.total_transitions,
            total_cycles_detected,
            detection_rate,
            most_visited_node,
            recent_cycles: self.detected[skip..].to_vec(),
            unique_fingerprints: self.fingerprints.len(),
            history_length: self.history.len(),
        }
    }

    /// Transitions currently held, oldest first
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// Every cycle reported this session, oldest first
    #[must_use]
    pub fn detected_cycles(&self) -> &[DetectedCycle] {
        &self.detected
    }

    /// Clear all session state
    pub fn reset(&mut self) {
        self.history.clear();
        self.node_visits.clear();
        self.fingerprints.clear();
        self.detected.clear();
        self.distinct.clear();
        self.total_transitions = 0;
        info!("Cycle detector reset");
    }

    fn forget_fingerprint(&mut self, fingerprint: &str) {
        if let Some(seen) = self.fingerprints.get_mut(fingerprint) {
            seen.pop_front();
            if seen.is_empty() {
                self.fingerprints.remove(fingerprint);
            }
        }
    }

    fn record_detection(&mut self, cycle: &DetectedCycle) {
        warn!(
            cycle_type = cycle.cycle_type.as_str(),
            pattern = ?cycle.pattern,
            frequency = cycle.frequency,
            confidence = cycle.confidence,
            "Cycle detected"
        );
        metrics::counter!("warden_cycles_detected_total", "type" => cycle.cycle_type.as_str())
            .increment(1);

        self.distinct
            .insert((cycle.cycle_type, canonical_rotation(&cycle.pattern)));
        self.detected.push(cycle.clone());
    }

    fn detect(&self) -> Option<DetectedCycle> {
        if let Some(deadlock) = self.detect_deadlock() {
            return Some(deadlock);
        }

        [
            self.detect_loop(),
            self.detect_oscillation(),
            self.detect_spiral(),
        ]
        .into_iter()
        .flatten()
        .fold(None, |best: Option<DetectedCycle>, candidate| match best {
            Some(current) if current.confidence >= candidate.confidence => Some(current),
            _ => Some(candidate),
        })
    }

    fn destinations(&self) -> Vec<&str> {
        self.history.iter().map(|t| t.to_node.as_str()).collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn ratio(&self, count: usize) -> f64 {
        count as f64 / self.config.detection_threshold as f64
    }

    fn detect_loop(&self) -> Option<DetectedCycle> {
        let nodes = self.destinations();
        let longest = self.config.max_pattern_length.min(nodes.len() / 2);
        let mut best: Option<DetectedCycle> = None;

        for length in self.config.min_pattern_length.max(2)..=longest {
            let candidate = &nodes[nodes.len() - length..];
            let starts: Vec<usize> = nodes
                .windows(length)
                .enumerate()
                .filter(|(_, window)| *window == candidate)
                .map(|(start, _)| start)
                .collect();

            let count = starts.len();
            if count < self.config.detection_threshold {
                continue;
            }

            let confidence = (self.ratio(count) * 0.3).min(LOOP_CONFIDENCE_CAP);
            // Equal confidence prefers the longer pattern
            if best.as_ref().is_some_and(|b| b.confidence > confidence) {
                continue;
            }

            let pattern: Vec<String> = candidate.iter().map(ToString::to_string).collect();
            let (cycle_type, suggested_action) = if length == 2 {
                (
                    CycleType::SimpleLoop,
                    format!(
                        "The workflow keeps moving between {} and {}. Change the inputs or route to a different node.",
                        pattern[0], pattern[1]
                    ),
                )
            } else {
                (
                    CycleType::ComplexLoop,
                    format!(
                        "The path {} keeps repeating. Add an exit condition or escalate to a human.",
                        pattern.join(" -> ")
                    ),
                )
            };

            best = Some(DetectedCycle {
                cycle_type,
                pattern,
                frequency: count,
                first_occurrence: self.history[starts[0]].timestamp,
                last_occurrence: self.latest_timestamp(),
                confidence,
                suggested_action,
            });
        }

        best
    }

    fn detect_oscillation(&self) -> Option<DetectedCycle> {
        let nodes = self.destinations();
        let offset = nodes.len().saturating_sub(RECENT_WINDOW);
        let recent = &nodes[offset..];

        let (a, b) = recent.windows(OSCILLATION_RUN).find_map(|run| {
            let (a, b) = (run[0], run[1]);
            let alternates = a != b
                && run
                    .iter()
                    .enumerate()
                    .all(|(i, node)| *node == if i % 2 == 0 { a } else { b });
            alternates.then_some((a, b))
        })?;

        let count = recent
            .windows(2)
            .filter(|pair| pair[0] == a && pair[1] == b)
            .count();
        if count < self.config.detection_threshold {
            return None;
        }

        Some(DetectedCycle {
            cycle_type: CycleType::Oscillation,
            pattern: vec![a.to_string(), b.to_string()],
            frequency: count,
            first_occurrence: self.history[offset].timestamp,
            last_occurrence: self.latest_timestamp(),
            confidence: (self.ratio(count) * 0.4).min(OSCILLATION_CONFIDENCE_CAP),
            suggested_action: format!(
                "The workflow alternates between {a} and {b} without settling. Commit to one outcome and continue."
            ),
        })
    }

    fn detect_spiral(&self) -> Option<DetectedCycle> {
        let threshold = self.config.detection_threshold;

        for group in self.similar_fingerprint_groups() {
            if group.len() < threshold {
                continue;
            }

            let occurrences: Vec<&DateTime<Utc>> = group
                .iter()
                .filter_map(|fp| self.fingerprints.get(*fp))
                .flatten()
                .collect();
            if occurrences.len() < threshold * 2 {
                continue;
            }

            let members: HashSet<&str> = group.iter().copied().collect();
            let mut pattern: Vec<String> = Vec::new();
            for transition in &self.history {
                if members.contains(transition.fingerprint.as_str())
                    && !pattern.contains(&transition.to_node)
                {
                    pattern.push(transition.to_node.clone());
                }
            }

            let first_occurrence = occurrences.iter().min().copied().copied()?;
            let last_occurrence = occurrences.iter().max().copied().copied()?;

            return Some(DetectedCycle {
                cycle_type: CycleType::Spiral,
                pattern,
                frequency: occurrences.len(),
                first_occurrence,
                last_occurrence,
                confidence: SPIRAL_CONFIDENCE,
                suggested_action:
                    "The workflow keeps returning to nearly the same state. Stop retrying the same approach and try a different strategy."
                        .to_string(),
            });
        }

        None
    }

    /// Greedy grouping: each ungrouped fingerprint collects every later
    /// ungrouped fingerprint similar to it.
    fn similar_fingerprint_groups(&self) -> Vec<Vec<&str>> {
        let all: Vec<&str> = self.fingerprints.keys().map(String::as_str).collect();
        let mut grouped = vec![false; all.len()];
        let mut groups = Vec::new();

        for i in 0..all.len() {
            if grouped[i] {
                continue;
            }
            grouped[i] = true;
            let mut group = vec![all[i]];
            for j in (i + 1)..all.len() {
                if !grouped[j]
                    && similarity(all[i], all[j]) >= self.config.spiral_similarity_threshold
                {
                    grouped[j] = true;
                    group.push(all[j]);
                }
            }
            groups.push(group);
        }

        groups
    }

    fn detect_deadlock(&self) -> Option<DetectedCycle> {
        if self.history.len() < RECENT_WINDOW {
            return None;
        }

        let recent: Vec<&StateTransition> =
            self.history.iter().skip(self.history.len() - RECENT_WINDOW).collect();

        let mut pattern: Vec<String> = Vec::new();
        for transition in &recent {
            for node in [&transition.from_node, &transition.to_node] {
                if !pattern.contains(node) {
                    pattern.push(node.clone());
                }
            }
        }
        let fingerprints: BTreeSet<&str> =
            recent.iter().map(|t| t.fingerprint.as_str()).collect();

        if pattern.len() > 2 || fingerprints.len() > 2 {
            return None;
        }

        Some(DetectedCycle {
            cycle_type: CycleType::Deadlock,
            pattern,
            frequency: RECENT_WINDOW,
            first_occurrence: recent[0].timestamp,
            last_occurrence: self.latest_timestamp(),
            confidence: DEADLOCK_CONFIDENCE,
            suggested_action:
                "The workflow is stuck and no longer makes progress. Stop and report the partial result."
                    .to_string(),
        })
    }

    fn latest_timestamp(&self) -> DateTime<Utc> {
        self.history
            .back()
            .map_or_else(|| self.clock.now(), |t| t.timestamp)
    }
}

/// Smallest rotation of `pattern`, so one cycle entered at different
/// nodes maps to one key
fn canonical_rotation(pattern: &[String]) -> Vec<String> {
    (0..pattern.len())
        .map(|start| {
            pattern[start..]
                .iter()
                .chain(&pattern[..start])
                .cloned()
                .collect::<Vec<_>>()
        })
        .min()
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn visits(step: u64) -> StateSnapshot {
        StateSnapshot::new().with_visits("step", step)
    }

    /// Feed `nodes` as destinations, each with a distinct state
    fn feed(detector: &mut CycleDetector, nodes: &[&str]) -> Option<DetectedCycle> {
        let mut last = None;
        let mut from = "start";
        for (i, node) in nodes.iter().enumerate() {
            last = detector.add_transition(from, node, &visits(i as u64), None);
            from = node;
        }
        last
    }

    #[test]
    fn no_cycle_for_linear_progress() {
        let mut detector = CycleDetector::default();
        assert!(feed(&mut detector, &["plan", "search", "read", "write", "review"]).is_none());
        assert!(detector.detected_cycles().is_empty());
    }

    #[test]
    fn alternation_reports_oscillation() {
        let mut detector = CycleDetector::default();
        let cycle = feed(&mut detector, &["A", "B", "A", "B", "A", "B"]).unwrap();

        assert_eq!(cycle.cycle_type, CycleType::Oscillation);
        assert_eq!(cycle.pattern, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(cycle.frequency, 3);
        assert!((cycle.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn repeated_path_reports_complex_loop() {
        let mut detector = CycleDetector::default();
        let cycle = feed(&mut detector, &["plan", "act", "check", "plan", "act", "check"]).unwrap();

        assert_eq!(cycle.cycle_type, CycleType::ComplexLoop);
        assert_eq!(cycle.pattern, vec!["plan", "act", "check"]);
        assert_eq!(cycle.frequency, 2);
        assert!((cycle.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn short_repetition_reports_simple_loop() {
        let mut detector = CycleDetector::default();
        let cycle = feed(&mut detector, &["A", "B", "A", "B"]).unwrap();

        assert_eq!(cycle.cycle_type, CycleType::SimpleLoop);
        assert_eq!(cycle.pattern, vec!["A", "B"]);
    }

    #[test]
    fn identical_transitions_report_deadlock() {
        let mut detector = CycleDetector::default();
        let state = StateSnapshot::new().with_visits("wait", 1);

        let mut last = None;
        for _ in 0..10 {
            last = detector.add_transition("wait", "wait", &state, None);
        }

        let cycle = last.unwrap();
        assert_eq!(cycle.cycle_type, CycleType::Deadlock);
        assert_eq!(cycle.confidence, 0.8);
        assert_eq!(cycle.pattern, vec!["wait"]);
        assert!(detector.should_terminate(&cycle));
    }

    #[test]
    fn spiral_groups_similar_fingerprints() {
        let mut detector = CycleDetector::new(CycleDetectorConfig {
            spiral_similarity_threshold: 0.0,
            ..Default::default()
        });

        let cycle = feed(&mut detector, &["a", "b", "c", "d"]).unwrap();
        assert_eq!(cycle.cycle_type, CycleType::Spiral);
        assert_eq!(cycle.frequency, 4);
        assert_eq!(cycle.confidence, 0.7);
        assert_eq!(cycle.pattern, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn should_terminate_rules() {
        let detector = CycleDetector::default();
        let now = Utc::now();
        let cycle = |cycle_type, frequency, confidence| DetectedCycle {
            cycle_type,
            pattern: vec!["x".to_string()],
            frequency,
            first_occurrence: now,
            last_occurrence: now,
            confidence,
            suggested_action: String::new(),
        };

        assert!(detector.should_terminate(&cycle(CycleType::SimpleLoop, 2, 0.8)));
        assert!(!detector.should_terminate(&cycle(CycleType::SimpleLoop, 2, 0.79)));
        assert!(detector.should_terminate(&cycle(CycleType::Deadlock, 10, 0.1)));
        assert!(detector.should_terminate(&cycle(CycleType::Spiral, 20, 0.7)));
        assert!(!detector.should_terminate(&cycle(CycleType::Spiral, 19, 0.7)));
    }

    #[test]
    fn three_distinct_detections_recommend_termination() {
        let mut detector = CycleDetector::default();
        feed(&mut detector, &["A", "B", "A", "B", "A"]);
        feed(&mut detector, &["C", "D", "E", "C", "D", "E"]);

        let latest = detector.detected_cycles().last().cloned().unwrap();
        assert!(latest.confidence < 0.8);
        assert!(detector.distinct.len() >= 3);
        assert!(detector.should_terminate(&latest));
    }

    #[test]
    fn rotations_of_one_loop_count_once() {
        let mut detector = CycleDetector::default();
        let latest = feed(&mut detector, &["A", "B", "C", "A", "B", "C", "A", "B", "C"]).unwrap();

        let rotations: HashSet<Vec<String>> = detector
            .detected_cycles()
            .iter()
            .filter(|c| c.cycle_type == CycleType::ComplexLoop)
            .map(|c| c.pattern.clone())
            .collect();
        assert_eq!(rotations.len(), 2);

        // SIMPLE_LOOP [A, B] plus COMPLEX_LOOP [A, B, C]
        assert_eq!(detector.distinct.len(), 2);
        assert_eq!(latest.cycle_type, CycleType::ComplexLoop);
        assert!(!detector.should_terminate(&latest));
    }

    #[test]
    fn canonical_rotation_picks_smallest_start() {
        let pattern = |nodes: &[&str]| nodes.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(canonical_rotation(&pattern(&["C", "A", "B"])), pattern(&["A", "B", "C"]));
        assert_eq!(canonical_rotation(&pattern(&["B", "A"])), pattern(&["A", "B"]));
        assert!(canonical_rotation(&[]).is_empty());
    }

    #[test]
    fn history_is_bounded_and_fingerprints_follow_it() {
        let mut detector = CycleDetector::new(CycleDetectorConfig {
            max_history: 5,
            ..Default::default()
        });
        feed(&mut detector, &["a", "b", "c", "d", "e", "f", "g", "h"]);

        let analytics = detector.analytics();
        assert_eq!(analytics.history_length, 5);
        assert_eq!(analytics.unique_fingerprints, 5);
        assert_eq!(analytics.total_transitions, 8);
        assert_eq!(detector.history().next().unwrap().to_node, "d");
    }

    #[test]
    fn analytics_is_idempotent_and_reset_clears() {
        let mut detector = CycleDetector::default();
        feed(&mut detector, &["A", "B", "A", "B", "A", "B"]);

        let first = detector.analytics();
        assert_eq!(first, detector.analytics());
        assert_eq!(first.most_visited_node, Some(("A".to_string(), 3)));
        assert!(first.detection_rate > 0.0);
        assert!(first.recent_cycles.len() <= 5);

        detector.reset();
        let cleared = detector.analytics();
        assert_eq!(cleared.total_transitions, 0);
        assert_eq!(cleared.history_length, 0);
        assert!(cleared.most_visited_node.is_none());
        assert_eq!(cleared.detection_rate, 0.0);
    }

    #[test]
    fn display_is_user_facing() {
        let mut detector = CycleDetector::default();
        let cycle = feed(&mut detector, &["A", "B", "A", "B", "A", "B"]).unwrap();
        let text = cycle.to_string();

        assert!(text.starts_with("Detected oscillation over [A -> B]"));
        assert!(text.contains("60% confidence"));
    }

    #[test]
    fn metadata_is_kept_on_transitions() {
        let mut detector = CycleDetector::default();
        detector.add_transition(
            "plan",
            "act",
            &StateSnapshot::new(),
            Some(serde_json::json!({"tool": "search"})),
        );

        let transition = detector.history().next().unwrap();
        assert_eq!(transition.metadata.as_ref().unwrap()["tool"], "search");
    }
}
