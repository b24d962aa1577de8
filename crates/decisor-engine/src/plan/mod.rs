//! Planner: turns an extracted intent into a bounded tool plan.
//!
//! The fast path covers every informational intent and any transactional
//! intent whose required slots are already filled; the model is only
//! consulted for partial transactions, and its output is never trusted
//! beyond the manifest: unknown tools are dropped and an empty survivor set
//! falls back to the deterministic rule table.

pub mod prompts;
pub mod rules;

use decisor::llm::LlmClient;
use decisor::manifest::ToolManifest;
use decisor::schema::PLANNER_V1;
use decisor::slots::{SlotKey, Slots};
use decisor::Intent;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Hard bound on plan length.
pub const MAX_PLAN_CALLS: usize = 3;

/// One proposed tool call, not yet vetted by policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub tool: String,
    pub args: Value,
}

/// Ordered plan plus the slots still needed to advance the intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub calls: Vec<PlannedCall>,
    pub missing_slots: BTreeSet<SlotKey>,
}

#[derive(Deserialize)]
struct WirePlan {
    #[serde(default)]
    tool_calls: Vec<WireCall>,
}

#[derive(Deserialize)]
struct WireCall {
    tool: String,
    #[serde(default)]
    args: Value,
}

/// Produce a plan for the turn.
pub async fn run(
    llm: &dyn LlmClient,
    intent: Intent,
    utterance: &str,
    slots: &Slots,
    manifest: &ToolManifest,
    budget: Duration,
) -> Plan {
    if let Some(plan) = rules::complete_fast_path(intent, utterance, slots, manifest) {
        return plan;
    }

    let prompt = prompts::planner_prompt(intent, utterance, slots, manifest);
    match llm.generate_json(&prompt, PLANNER_V1, budget).await {
        Ok(value) => from_model_output(value, intent, utterance, slots, manifest),
        Err(error) => {
            debug!(intent = %intent, kind = error.kind(), "planner model unavailable, using rule table");
            rules::default_plan(intent, utterance, slots, manifest)
        }
    }
}

/// Sanitise a schema-valid model plan: drop unknown tools, truncate, and
/// substitute the rule table if nothing survives.
fn from_model_output(
    value: Value,
    intent: Intent,
    utterance: &str,
    slots: &Slots,
    manifest: &ToolManifest,
) -> Plan {
    let wire: WirePlan = match serde_json::from_value(value) {
        Ok(wire) => wire,
        Err(error) => {
            debug!(%error, "planner output failed to decode, using rule table");
            return rules::default_plan(intent, utterance, slots, manifest);
        }
    };

    let mut calls = Vec::new();
    for call in wire.tool_calls {
        if !manifest.contains(&call.tool) {
            debug!(tool = %call.tool, "dropping plan entry for tool outside the manifest");
            continue;
        }
        let args = if call.args.is_object() {
            call.args
        } else {
            Value::Object(serde_json::Map::new())
        };
        calls.push(PlannedCall {
            tool: call.tool,
            args,
        });
    }
    calls.truncate(MAX_PLAN_CALLS);

    if calls.is_empty() {
        return rules::default_plan(intent, utterance, slots, manifest);
    }

    // The model's own missing_slots claim is ignored: the manifest's
    // argument shape is authoritative.
    Plan {
        calls,
        missing_slots: rules::missing_for_intent(intent, slots, manifest),
    }
}
