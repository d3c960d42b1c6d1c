//! Reduced view of workflow state and its fingerprint.
//!
//! Two workflow states that differ only in details the detector does not care
//! about (message text, tool arguments, timestamps) reduce to the same
//! [`StateSnapshot`] and therefore the same fingerprint.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Hex characters kept from the SHA-256 digest
pub const FINGERPRINT_LEN: usize = 16;

/// Coarse classification of the most recent message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// The message requests one or more tool calls
    ToolCall,
    /// The message reports an error
    Error,
    /// The message announces a retry
    Retry,
    /// Any other non-empty message
    Content,
    /// No message yet
    #[default]
    None,
}

impl MessageKind {
    /// Label used in fingerprints and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::Error => "error",
            Self::Retry => "retry",
            Self::Content => "content",
            Self::None => "none",
        }
    }

    /// Classify a message given as a JSON string or object
    ///
    /// Objects with a non-empty `tool_calls` array are tool calls. Otherwise the
    /// `content` text decides: mentions of "error" win over "retry", and any
    /// other non-empty text is plain content.
    #[must_use]
    pub fn classify(message: &Value) -> Self {
        let content = match message {
            Value::String(text) => text.as_str(),
            Value::Object(fields) => {
                let has_tool_calls = fields
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .is_some_and(|calls| !calls.is_empty());
                if has_tool_calls {
                    return Self::ToolCall;
                }
                fields.get("content").and_then(Value::as_str).unwrap_or_default()
            }
            _ => return Self::None,
        };

        let lowered = content.to_lowercase();
        if lowered.contains("error") {
            Self::Error
        } else if lowered.contains("retry") {
            Self::Retry
        } else if lowered.trim().is_empty() {
            Self::None
        } else {
            Self::Content
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of workflow state that identify "the same situation"
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Visits per workflow node
    pub node_visits: BTreeMap<String, u64>,
    /// Whether the workflow reports itself complete or validated
    pub is_complete: bool,
    /// Whether a result has been produced
    pub has_result: bool,
    /// External calls requested but not yet answered
    pub pending_calls: usize,
    /// Classification of the latest message
    pub last_message: MessageKind,
}

impl StateSnapshot {
    /// Empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the visit count of `node`
    #[must_use]
    pub fn with_visits(mut self, node: impl Into<String>, visits: u64) -> Self {
        self.node_visits.insert(node.into(), visits);
        self
    }

    /// Set the completion flag
    #[must_use]
    pub const fn with_complete(mut self, is_complete: bool) -> Self {
        self.is_complete = is_complete;
        self
    }

    /// Set whether a result is present
    #[must_use]
    pub const fn with_result(mut self, has_result: bool) -> Self {
        self.has_result = has_result;
        self
    }

    /// Set the number of pending external calls
    #[must_use]
    pub const fn with_pending_calls(mut self, pending_calls: usize) -> Self {
        self.pending_calls = pending_calls;
        self
    }

    /// Set the latest message classification
    #[must_use]
    pub const fn with_last_message(mut self, kind: MessageKind) -> Self {
        self.last_message = kind;
        self
    }

    /// Reduce an arbitrary JSON workflow state
    ///
    /// Recognized keys: `node_visits` (or `visit_counts`), `is_complete` (or
    /// `validated`), `result`, `pending_tool_calls` (array or count) and the
    /// last entry of `messages`. Anything else is ignored, and a non-object
    /// value reduces to the empty snapshot.
    #[must_use]
    pub fn from_json(state: &Value) -> Self {
        let Some(fields) = state.as_object() else {
            return Self::default();
        };

        let node_visits = fields
            .get("node_visits")
            .or_else(|| fields.get("visit_counts"))
            .and_then(Value::as_object)
            .map(|visits| {
                visits
                    .iter()
                    .filter_map(|(node, count)| count.as_u64().map(|c| (node.clone(), c)))
                    .collect()
            })
            .unwrap_or_default();

        let flag = |key: &str| fields.get(key).and_then(Value::as_bool).unwrap_or(false);

        let pending_calls = match fields.get("pending_tool_calls") {
            Some(Value::Array(calls)) => calls.len(),
            Some(Value::Number(count)) => count
                .as_u64()
                .and_then(|c| usize::try_from(c).ok())
                .unwrap_or(0),
            _ => 0,
        };

        let last_message = fields
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.last())
            .map_or(MessageKind::None, MessageKind::classify);

        Self {
            node_visits,
            is_complete: flag("is_complete") || flag("validated"),
            has_result: fields.get("result").is_some_and(|r| !r.is_null()),
            pending_calls,
            last_message,
        }
    }

    /// Deterministic digest of this snapshot (lowercase hex)
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (node, visits) in &self.node_visits {
            hasher.update(node.as_bytes());
            hasher.update([0]);
            hasher.update(visits.to_le_bytes());
        }
        hasher.update([0xff, u8::from(self.is_complete), u8::from(self.has_result)]);
        hasher.update((self.pending_calls as u64).to_le_bytes());
        hasher.update(self.last_message.as_str().as_bytes());

        let digest = hex::encode(hasher.finalize());
        digest[..FINGERPRINT_LEN].to_string()
    }
}

/// Fraction of character positions at which two fingerprints agree
///
/// Positions beyond the shorter string count as mismatches. Two empty strings
/// are identical.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let matching = a.bytes().zip(b.bytes()).filter(|(x, y)| x == y).count();
    matching as f64 / longest as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_messages() {
        assert_eq!(
            MessageKind::classify(&json!({"role": "assistant", "tool_calls": [{"name": "search"}]})),
            MessageKind::ToolCall
        );
        assert_eq!(
            MessageKind::classify(&json!({"content": "Error: upstream timeout"})),
            MessageKind::Error
        );
        assert_eq!(MessageKind::classify(&json!("Will retry shortly")), MessageKind::Retry);
        assert_eq!(MessageKind::classify(&json!({"content": "Here you go"})), MessageKind::Content);
        assert_eq!(MessageKind::classify(&json!({"content": "  "})), MessageKind::None);
        assert_eq!(MessageKind::classify(&json!(42)), MessageKind::None);
    }

    #[test]
    fn from_json_reads_known_keys() {
        let state = json!({
            "visit_counts": {"plan": 2, "act": 1, "bogus": "x"},
            "validated": true,
            "result": {"answer": 42},
            "pending_tool_calls": [{"id": 1}, {"id": 2}],
            "messages": [{"content": "hi"}, {"tool_calls": [{"name": "fetch"}]}],
            "scratchpad": "ignored"
        });

        let snapshot = StateSnapshot::from_json(&state);
        assert_eq!(snapshot.node_visits.len(), 2);
        assert_eq!(snapshot.node_visits["plan"], 2);
        assert!(snapshot.is_complete);
        assert!(snapshot.has_result);
        assert_eq!(snapshot.pending_calls, 2);
        assert_eq!(snapshot.last_message, MessageKind::ToolCall);
    }

    #[test]
    fn from_json_of_non_object_is_empty() {
        assert_eq!(StateSnapshot::from_json(&json!([1, 2])), StateSnapshot::default());
        let null_result = StateSnapshot::from_json(&json!({"result": null, "pending_tool_calls": 3}));
        assert!(!null_result.has_result);
        assert_eq!(null_result.pending_calls, 3);
    }

    #[test]
    fn fingerprint_ignores_irrelevant_detail() {
        let a = StateSnapshot::from_json(&json!({
            "node_visits": {"plan": 1},
            "messages": [{"content": "first draft"}],
            "scratchpad": "one"
        }));
        let b = StateSnapshot::from_json(&json!({
            "node_visits": {"plan": 1},
            "messages": [{"content": "second draft, longer"}],
            "scratchpad": "two"
        }));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), FINGERPRINT_LEN);
        assert_ne!(a.fingerprint(), a.clone().with_visits("plan", 2).fingerprint());
        assert_ne!(a.fingerprint(), a.clone().with_pending_calls(1).fingerprint());
    }

    #[test]
    fn similarity_by_position() {
        assert_eq!(similarity("abcd", "abcd"), 1.0);
        assert_eq!(similarity("abcd", "abcx"), 0.75);
        assert_eq!(similarity("ab", "abcd"), 0.5);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }
}
