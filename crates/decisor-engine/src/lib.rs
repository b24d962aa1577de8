//! The decisor decision pipeline.
//!
//! Request flow: canary router → (SLM | Legacy) orchestrator → extractor →
//! planner → policy engine → tool broker → state reducer → response
//! generator. Both orchestrators share one broker, one policy engine and
//! one manifest store, so circuit breakers, rate limits and idempotency
//! hold across the traffic split.

pub mod broker;
pub mod config;
pub mod extract;
pub mod legacy;
pub mod plan;
pub mod policy;
pub mod ratelimit;
pub mod reduce;
pub mod respond;
pub mod router;
pub mod slm;

pub use broker::ToolBroker;
pub use broker::transport::{HttpToolTransport, InProcessTransport, ToolCallError, ToolTransport};
pub use config::{CanaryFlags, CanaryHandle, PipelineSettings, canary_handle};
pub use legacy::LegacyOrchestrator;
pub use policy::PolicyEngine;
pub use router::{CanaryRouter, Orchestrator, choose_route};
pub use slm::{EngineCore, SlmOrchestrator};

use decisor::llm::LlmClient;
use decisor::manifest::{CachedManifestStore, ManifestSource};
use std::sync::Arc;

/// Wire both pipelines behind a router, sharing one engine core.
pub fn build_router(
    llm: Arc<dyn LlmClient>,
    manifest_source: Arc<dyn ManifestSource>,
    transport: Arc<dyn ToolTransport>,
    flags: CanaryHandle,
    settings: PipelineSettings,
) -> CanaryRouter {
    let core = Arc::new(EngineCore {
        llm,
        manifests: Arc::new(CachedManifestStore::new(
            manifest_source,
            CachedManifestStore::DEFAULT_TTL,
        )),
        policy: PolicyEngine::new(),
        broker: Arc::new(ToolBroker::new(transport, &settings)),
        settings,
    });
    CanaryRouter::new(
        flags,
        Arc::new(SlmOrchestrator::new(Arc::clone(&core))),
        Arc::new(LegacyOrchestrator::new(core)),
    )
}
