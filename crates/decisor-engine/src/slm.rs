//! SLM orchestrator: the six-stage model-assisted pipeline.
//!
//! Stages run sequentially, since each consumes the previous stage's output,
//! with wall-clock telemetry recorded around every one. The total budget is
//! soft: running past it stops new broker work and flags the response, it
//! never aborts the turn.

use crate::config::PipelineSettings;
use crate::policy::PolicyEngine;
use crate::broker::ToolBroker;
use crate::router::Orchestrator;
use crate::{extract, plan, reduce, respond};
use async_trait::async_trait;
use decisor::decision::{DecisionResponse, Route, StageTimings, Telemetry};
use decisor::hash::redact;
use decisor::llm::LlmClient;
use decisor::manifest::CachedManifestStore;
use decisor::observation::ToolObservation;
use decisor::snapshot::ConversationSnapshot;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Everything the pipelines share: one set of process-wide tables.
pub struct EngineCore {
    pub llm: Arc<dyn LlmClient>,
    pub manifests: Arc<CachedManifestStore>,
    pub policy: PolicyEngine,
    pub broker: Arc<ToolBroker>,
    pub settings: PipelineSettings,
}

pub struct SlmOrchestrator {
    core: Arc<EngineCore>,
}

impl SlmOrchestrator {
    pub fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Orchestrator for SlmOrchestrator {
    #[instrument(
        name = "pipeline.slm",
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
        let extraction = extract::run(core.llm.as_ref(), snapshot, core.settings.extractor_budget).await;
        stage_ms.extractor = stage.elapsed().as_millis() as u64;

        // Planning sees the store's slots overlaid with this turn's.
        let mut working = snapshot.state.slots.clone();
        for (key, value) in &extraction.slots {
            working.insert(key.clone(), value.clone());
        }

        let stage = Instant::now();
        let manifest = core.manifests.manifest(&snapshot.workspace_id).await;
        let plan = plan::run(
            core.llm.as_ref(),
            extraction.intent,
            &snapshot.user_message.text,
            &working,
            &manifest,
            core.settings.planner_budget,
        )
        .await;
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
        let budget_exceeded = total > core.settings.total_budget;
        if budget_exceeded {
            warn!(
                total_ms = total.as_millis() as u64,
                budget_ms = core.settings.total_budget.as_millis() as u64,
                "pipeline ran past its budget"
            );
        }
        info!(
            intent = %extraction.intent,
            confidence = extraction.confidence,
            fallback_extractor = extraction.used_fallback,
            calls = executed.len(),
            advisories = sanitized.advisories.len(),
            total_ms = total.as_millis() as u64,
            "slm decision complete"
        );

        Ok(DecisionResponse {
            assistant,
            tool_calls: executed,
            patch,
            telemetry: Telemetry {
                route: Route::SlmPipeline,
                intent: extraction.intent,
                confidence: extraction.confidence,
                stage_ms,
                total_ms: total.as_millis() as u64,
                fallback: false,
                budget_exceeded,
            },
        })
    }
}
