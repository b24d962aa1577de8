//! Legacy orchestrator: keyword understanding plus the fixed rule table.
//!
//! No model anywhere. Shares the policy engine, broker, reducer and
//! response generator with the SLM pipeline, so the canary compares
//! planning strategies, not plumbing.

use crate::router::Orchestrator;
use crate::slm::EngineCore;
use crate::{extract, plan, reduce, respond};
use async_trait::async_trait;
use decisor::decision::{DecisionResponse, Route, StageTimings, Telemetry};
use decisor::hash::redact;
use decisor::observation::ToolObservation;
use decisor::snapshot::ConversationSnapshot;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

pub struct LegacyOrchestrator {
    core: Arc<EngineCore>,
}

impl LegacyOrchestrator {
    pub fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Orchestrator for LegacyOrchestrator {
    #[instrument(
        name = "pipeline.legacy",
        skip(self, snapshot),
        fields(
            workspace = %snapshot.workspace_id,
            conversation = %snapshot.conversation_id,
            message = %redact(&snapshot.user_message.text),
        )
    )]
    async fn run(&self, snapshot: &ConversationSnapshot) -> anyhow::Result<DecisionResponse> {
        let core = &self.core;
        let started = Instant::now();
        let deadline = started + core.settings.total_budget;
        let mut stage_ms = StageTimings::default();

        let stage = Instant::now();
        let extraction = extract::heuristic(snapshot);
        stage_ms.extractor = stage.elapsed().as_millis() as u64;

        let mut working = snapshot.state.slots.clone();
        for (key, value) in &extraction.slots {
            working.insert(key.clone(), value.clone());
        }

        let stage = Instant::now();
        let manifest = core.manifests.manifest(&snapshot.workspace_id).await;
        let plan = plan::rules::default_plan(
            extraction.intent,
            &snapshot.user_message.text,
            &working,
            &manifest,
        );
        stage_ms.planner = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let sanitized = core.policy.vet(
            &snapshot.workspace_id,
            &snapshot.conversation_id,
            &plan,
            &manifest,
            &working,
        );
        stage_ms.policy = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let executed = core
            .broker
            .execute(&snapshot.workspace_id, &sanitized, deadline)
            .await;
        stage_ms.broker = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let observations: Vec<ToolObservation> =
            executed.iter().map(|c| c.observation.clone()).collect();
        let patch = reduce::reduce(&snapshot.state.slots, &extraction.slots, &observations);
        stage_ms.reducer = stage.elapsed().as_millis() as u64;

        let stage = Instant::now();
        let assistant = respond::generate(
            extraction.intent,
            &plan.missing_slots,
            &executed,
            &snapshot.context,
        );
        stage_ms.nlg = stage.elapsed().as_millis() as u64;

        let total = started.elapsed();
        info!(
            intent = %extraction.intent,
            calls = executed.len(),
            total_ms = total.as_millis() as u64,
            "legacy decision complete"
        );

        Ok(DecisionResponse {
            assistant,
            tool_calls: executed,
            patch,
            telemetry: Telemetry {
                route: Route::Legacy,
                intent: extraction.intent,
                confidence: extraction.confidence,
                stage_ms,
                total_ms: total.as_millis() as u64,
                fallback: false,
                budget_exceeded: total > core.settings.total_budget,
            },
        })
    }
}
