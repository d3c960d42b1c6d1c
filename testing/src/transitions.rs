//! Fluent scripts of workflow transitions.
//!
//! A [`TransitionScript`] lists destination nodes and replays them into a
//! [`CycleDetector`], building a snapshot per step. By default each snapshot
//! carries running visit counts, so every step has a fresh fingerprint the way
//! a real workflow does. Pin a single snapshot with
//! [`with_static_state`](TransitionScript::with_static_state) to simulate a
//! workflow whose state stops changing.

use warden_detector::{CycleDetector, CycleType, DetectedCycle, StateSnapshot};

/// Node sequence to replay into a detector
///
/// # Example
///
/// ```
/// use warden_detector::{CycleDetector, CycleType};
/// use warden_testing::TransitionScript;
///
/// let mut detector = CycleDetector::default();
/// let outcome = TransitionScript::new()
///     .repeat(&["draft", "review"], 3)
///     .run(&mut detector);
///
/// assert_eq!(outcome.last().unwrap().cycle_type, CycleType::Oscillation);
/// ```
#[derive(Debug, Clone)]
pub struct TransitionScript {
    start: String,
    steps: Vec<String>,
    static_state: Option<StateSnapshot>,
}

impl Default for TransitionScript {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionScript {
    /// Empty script starting at node `start`
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: "start".to_string(),
            steps: Vec::new(),
            static_state: None,
        }
    }

    /// Node the first transition leaves from
    #[must_use]
    pub fn from_node(mut self, node: &str) -> Self {
        self.start = node.to_string();
        self
    }

    /// Append destination nodes
    #[must_use]
    pub fn path(mut self, nodes: &[&str]) -> Self {
        self.steps.extend(nodes.iter().map(ToString::to_string));
        self
    }

    /// Append `nodes` `times` times over
    #[must_use]
    pub fn repeat(mut self, nodes: &[&str], times: usize) -> Self {
        for _ in 0..times {
            self = self.path(nodes);
        }
        self
    }

    /// Use the same snapshot for every step
    #[must_use]
    pub fn with_static_state(mut self, snapshot: StateSnapshot) -> Self {
        self.static_state = Some(snapshot);
        self
    }

    /// Replay the script
    pub fn run(self, detector: &mut CycleDetector) -> ScriptOutcome {
        let mut visits = StateSnapshot::new();
        let mut from = self.start;
        let mut detections = Vec::with_capacity(self.steps.len());

        for to in self.steps {
            *visits.node_visits.entry(to.clone()).or_insert(0) += 1;
            let snapshot = self.static_state.as_ref().unwrap_or(&visits);
            detections.push(detector.add_transition(&from, &to, snapshot, None));
            from = to;
        }

        ScriptOutcome { detections }
    }
}

/// What the detector reported for each scripted step
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    /// One entry per step, in order
    pub detections: Vec<Option<DetectedCycle>>,
}

impl ScriptOutcome {
    /// Detection reported for the final step
    #[must_use]
    pub fn last(&self) -> Option<&DetectedCycle> {
        self.detections.last().and_then(Option::as_ref)
    }

    /// Earliest detection of `cycle_type`
    #[must_use]
    pub fn first_of(&self, cycle_type: CycleType) -> Option<&DetectedCycle> {
        self.detections
            .iter()
            .flatten()
            .find(|cycle| cycle.cycle_type == cycle_type)
    }

    /// Whether no step reported a cycle
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.detections.iter().all(Option::is_none)
    }
}
