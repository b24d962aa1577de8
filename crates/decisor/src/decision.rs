//! The decision response returned to the workflow engine.
//!
//! The wire contract is strict: every field is present on every response,
//! absences are empty collections. The workflow engine maps these fields
//! positionally into its own steps and breaks on missing keys.

use crate::intent::Intent;
use crate::observation::ToolObservation;
use crate::patch::SlotPatch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Hard cap on assistant text. Generators aim much lower (~200 chars).
pub const MAX_ASSISTANT_CHARS: usize = 600;

/// Which pipeline produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Legacy,
    SlmPipeline,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Legacy => "legacy",
            Route::SlmPipeline => "slm_pipeline",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The short natural-language reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
    #[serde(default)]
    pub suggested_replies: Vec<String>,
}

/// One executed plan entry: the sanitised call plus its observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedCall {
    pub tool: String,
    pub args: Value,
    pub observation: ToolObservation,
}

/// Wall-clock milliseconds per pipeline stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub extractor: u64,
    pub planner: u64,
    pub policy: u64,
    pub broker: u64,
    pub reducer: u64,
    pub nlg: u64,
}

impl StageTimings {
    pub fn sum(&self) -> u64 {
        self.extractor + self.planner + self.policy + self.broker + self.reducer + self.nlg
    }

    pub fn max(&self) -> u64 {
        [
            self.extractor,
            self.planner,
            self.policy,
            self.broker,
            self.reducer,
            self.nlg,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Per-request telemetry attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub route: Route,
    pub intent: Intent,
    pub confidence: f64,
    pub stage_ms: StageTimings,
    pub total_ms: u64,
    /// True when the SLM pipeline crashed and Legacy answered instead.
    pub fallback: bool,
    /// True when the request ran past the total pipeline budget.
    pub budget_exceeded: bool,
}

/// The full decision: reply, executed calls, state patch, telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub assistant: AssistantReply,
    pub tool_calls: Vec<ExecutedCall>,
    pub patch: SlotPatch,
    pub telemetry: Telemetry,
}
