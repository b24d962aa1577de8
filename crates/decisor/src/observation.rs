//! Tool observations: the structured outcome of every tool call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why a tool call failed. Encoded in the observation, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Network-level failure, 5xx, or anything else worth retrying.
    Transient,
    /// The tool answered with a definite, non-retryable refusal.
    Permanent,
    /// The call exceeded its deadline without a definite response.
    Timeout,
    /// The circuit breaker for this (workspace, tool) is open.
    CircuitOpen,
    /// The policy engine dropped the call before execution.
    PolicyDenied,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Transient => "transient",
            ToolErrorKind::Permanent => "permanent",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::CircuitOpen => "circuit_open",
            ToolErrorKind::PolicyDenied => "policy_denied",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one planned tool call. One observation is produced per planned
/// call, success or failure, so the caller can always line observations up
/// with the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolObservation {
    pub tool: String,
    pub ok: bool,
    /// Free-form result mapping. Empty object when the call failed.
    #[serde(default = "empty_object")]
    pub result: Value,
    /// Present iff `ok == false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    pub latency_ms: u64,
    pub attempts: u32,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ToolObservation {
    /// A successful observation.
    pub fn success(tool: impl Into<String>, result: Value, latency_ms: u64, attempts: u32) -> Self {
        Self {
            tool: tool.into(),
            ok: true,
            result,
            error_kind: None,
            latency_ms,
            attempts,
        }
    }

    /// A failed observation. The result mapping is left empty; renderers
    /// must not invent data for failed calls.
    pub fn failure(
        tool: impl Into<String>,
        kind: ToolErrorKind,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            tool: tool.into(),
            ok: false,
            result: empty_object(),
            error_kind: Some(kind),
            latency_ms,
            attempts,
        }
    }

    /// Fetch a string field from the result mapping.
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.result.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_carries_no_error_kind() {
        let obs = ToolObservation::success("get_business_hours", json!({"days": []}), 12, 1);
        let wire = serde_json::to_value(&obs).unwrap();
        assert_eq!(wire["ok"], json!(true));
        assert!(wire.get("error_kind").is_none());
    }

    #[test]
    fn failure_carries_error_kind_and_empty_result() {
        let obs = ToolObservation::failure("book_appointment", ToolErrorKind::CircuitOpen, 0, 0);
        let wire = serde_json::to_value(&obs).unwrap();
        assert_eq!(wire["error_kind"], json!("circuit_open"));
        assert_eq!(wire["result"], json!({}));
    }

    #[test]
    fn result_str_reads_nested_fields() {
        let obs = ToolObservation::success("book_appointment", json!({"booking_id": "bk-7"}), 80, 1);
        assert_eq!(obs.result_str("booking_id"), Some("bk-7"));
        assert_eq!(obs.result_str("missing"), None);
    }
}
