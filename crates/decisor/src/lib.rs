//! Core domain library for the decisor decision pipeline.
//!
//! Everything that crosses a component boundary lives here: the conversation
//! snapshot consumed per request, the decision response returned to the
//! workflow engine, the versioned schema registry, the JSON-constrained LLM
//! client and the per-workspace tool manifest. The pipeline itself lives in
//! `decisor-engine`; the HTTP surface in `decisor-service`.

pub mod decision;
pub mod hash;
pub mod intent;
pub mod llm;
pub mod manifest;
pub mod observation;
pub mod patch;
pub mod schema;
pub mod slots;
pub mod snapshot;

pub use decision::{
    AssistantReply, DecisionResponse, ExecutedCall, MAX_ASSISTANT_CHARS, Route, StageTimings,
    Telemetry,
};
pub use intent::Intent;
pub use llm::{HttpLlmClient, HttpLlmConfig, LlmClient, LlmError, ScriptedLlm};
pub use manifest::{
    ArgKind, ArgumentSpec, CachedManifestStore, ManifestSource, StaticManifestSource, ToolManifest,
    ToolManifestEntry, ToolPolicy,
};
pub use observation::{ToolErrorKind, ToolObservation};
pub use patch::SlotPatch;
pub use schema::{EXTRACTOR_V1, PLANNER_V1, RESPONSE_V1, SchemaError, SchemaRegistry, SchemaViolation};
pub use slots::{SlotKey, Slots, slot};
pub use snapshot::{ConversationSnapshot, ConversationState, MessageContext, UserMessage};
