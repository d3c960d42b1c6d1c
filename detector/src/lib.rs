//! # Warden Detector
//!
//! Flags non-terminating behavior in an iterative workflow: repeated node
//! paths, two-node oscillation, near-duplicate states and deadlock.
//!
//! A [`CycleDetector`] belongs to one execution session. Feed it every
//! workflow transition together with a reduced [`StateSnapshot`] of the
//! workflow state, and consult [`CycleDetector::should_terminate`] whenever it
//! reports a cycle.
//!
//! ## Example
//!
//! ```
//! use warden_detector::{CycleDetector, StateSnapshot};
//! use serde_json::json;
//!
//! let mut detector = CycleDetector::default();
//!
//! for visit in 1..=10 {
//!     let state = json!({ "node_visits": { "fetch": 1 }, "pending_tool_calls": 1 });
//!     let snapshot = StateSnapshot::from_json(&state);
//!
//!     if let Some(cycle) = detector.add_transition("fetch", "fetch", &snapshot, None) {
//!         if detector.should_terminate(&cycle) {
//!             println!("stopping after {visit} transitions: {cycle}");
//!             break;
//!         }
//!     }
//! }
//! ```

/// Reduced workflow state and fingerprinting
pub mod snapshot;

/// Session-scoped cycle detection
pub mod detector;

pub use detector::{CycleAnalytics, CycleDetector, CycleType, DetectedCycle, StateTransition};
pub use snapshot::{FINGERPRINT_LEN, MessageKind, StateSnapshot, similarity};
pub use warden_core::config::CycleDetectorConfig;
