//! Canary router: deterministic traffic split with automatic fallback.
//!
//! The route is a pure function of (flags, conversation_id): the same
//! conversation always lands on the same side of the split while the
//! percent holds, so retries never flap between pipelines. An SLM crash is
//! converted, at most once per request, into a Legacy run tagged `fallback`.

use crate::config::{CanaryFlags, CanaryHandle};
use async_trait::async_trait;
use decisor::decision::{DecisionResponse, Route};
use decisor::hash::canary_bucket;
use decisor::snapshot::ConversationSnapshot;
use std::sync::Arc;
use tracing::warn;

/// One full pipeline: snapshot in, decision out.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, snapshot: &ConversationSnapshot) -> anyhow::Result<DecisionResponse>;
}

/// Pure routing decision.
pub fn choose_route(flags: &CanaryFlags, conversation_id: &str) -> Route {
    if !flags.enable_slm_pipeline {
        return Route::Legacy;
    }
    if canary_bucket(conversation_id) < flags.slm_canary_percent {
        Route::SlmPipeline
    } else {
        Route::Legacy
    }
}

pub struct CanaryRouter {
    flags: CanaryHandle,
    slm: Arc<dyn Orchestrator>,
    legacy: Arc<dyn Orchestrator>,
}

impl CanaryRouter {
    pub fn new(flags: CanaryHandle, slm: Arc<dyn Orchestrator>, legacy: Arc<dyn Orchestrator>) -> Self {
        Self { flags, slm, legacy }
    }

    /// The live flags handle, shared with whatever refreshes it.
    pub fn flags(&self) -> CanaryHandle {
        Arc::clone(&self.flags)
    }

    /// Route and run. Flags are read fresh per request so a rollback takes
    /// effect as soon as the refresher republishes them.
    ///
    /// Errors only when the Legacy side fails too. The caller maps that to
    /// a 5xx, and it should be rare enough to page on.
    pub async fn decide(
        &self,
        snapshot: &ConversationSnapshot,
    ) -> anyhow::Result<DecisionResponse> {
        let flags = **self.flags.load();
        match choose_route(&flags, &snapshot.conversation_id) {
            Route::SlmPipeline => match self.slm.run(snapshot).await {
                Ok(response) => Ok(response),
                Err(error) => {
                    warn!(
                        conversation = %snapshot.conversation_id,
                        %error,
                        "slm pipeline crashed, serving legacy fallback"
                    );
                    let mut response = self.legacy.run(snapshot).await?;
                    response.telemetry.fallback = true;
                    Ok(response)
                }
            },
            Route::Legacy => self.legacy.run(snapshot).await,
        }
    }
}
