//! HTTP decision API.
//!
//! One route does the work: `POST /orchestrator/decide` takes a snapshot
//! body plus tenant headers and returns the full decision. The wire
//! contract is strict: every response field is always present, and the
//! workflow engine gets a 200 even for degraded outcomes. Only a missing
//! workspace header or an unparseable body is a 400; a 5xx means both
//! pipelines failed, which is page-worthy.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use decisor::DecisionResponse;
use decisor::llm::{HttpLlmClient, HttpLlmConfig, LlmClient, ScriptedLlm};
use decisor::manifest::{ManifestSource, StaticManifestSource, ToolManifest};
use decisor::schema::SchemaRegistry;
use decisor::snapshot::{ConversationSnapshot, ConversationState, MessageContext, UserMessage};
use decisor_engine::{
    CanaryFlags, CanaryHandle, CanaryRouter, HttpToolTransport, InProcessTransport,
    PipelineSettings, ToolTransport, build_router, canary_handle,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared service state: the router owns everything else.
#[derive(Clone)]
pub struct AppState {
    router: Arc<CanaryRouter>,
}

impl AppState {
    pub fn new(router: CanaryRouter) -> Self {
        Self {
            router: Arc::new(router),
        }
    }

    /// The live canary flags handle, for the refresh task.
    pub fn canary_handle(&self) -> CanaryHandle {
        self.router.flags()
    }
}

/// Build the state from the process environment.
///
/// Schema compilation failure aborts startup: the service must not boot
/// without its model contracts. Absent model/tool endpoints degrade to
/// the fallback client and the in-process servicios tools, which keeps
/// local runs and smoke tests self-contained.
pub fn state_from_env() -> anyhow::Result<AppState> {
    let registry = Arc::new(SchemaRegistry::bootstrap()?);

    let llm: Arc<dyn LlmClient> = match std::env::var("DECISOR_LLM_URL") {
        Ok(base_url) => Arc::new(HttpLlmClient::new(
            HttpLlmConfig {
                base_url,
                api_key: std::env::var("DECISOR_LLM_API_KEY").ok(),
                model: std::env::var("DECISOR_LLM_MODEL")
                    .unwrap_or_else(|_| "decisor-slm".to_string()),
            },
            Arc::clone(&registry),
        )),
        Err(_) => {
            warn!("DECISOR_LLM_URL not set; extractor and planner run on their fallbacks");
            Arc::new(ScriptedLlm::new())
        }
    };

    let transport: Arc<dyn ToolTransport> = match std::env::var("DECISOR_TOOLS_URL") {
        Ok(base_url) => Arc::new(HttpToolTransport::new(base_url)),
        Err(_) => {
            warn!("DECISOR_TOOLS_URL not set; serving the in-process servicios tools");
            Arc::new(InProcessTransport::new())
        }
    };

    let manifests: Arc<dyn ManifestSource> =
        Arc::new(StaticManifestSource::new().with_default(ToolManifest::servicios_default()));

    let router = build_router(
        llm,
        manifests,
        transport,
        canary_handle(CanaryFlags::from_env()),
        PipelineSettings::from_env(),
    );
    Ok(AppState::new(router))
}

/// The axum application.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/orchestrator/decide", post(decide))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Republish canary flags from the environment on an interval so an
/// operator rollback lands within seconds, no restart needed.
pub fn spawn_canary_refresh(handle: CanaryHandle, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let fresh = CanaryFlags::from_env();
            if **handle.load() != fresh {
                info!(
                    enable = fresh.enable_slm_pipeline,
                    percent = fresh.slm_canary_percent,
                    "canary flags updated"
                );
                handle.store(Arc::new(fresh));
            }
        }
    })
}

/// Request body of `POST /orchestrator/decide`.
#[derive(Deserialize)]
pub struct DecideRequest {
    pub user_message: UserMessage,
    #[serde(default)]
    pub context: MessageContext,
    #[serde(default)]
    pub state: ConversationState,
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn decide(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<DecideRequest>, JsonRejection>,
) -> Result<Json<DecisionResponse>, (StatusCode, String)> {
    let Json(request) = body
        .map_err(|rejection| (StatusCode::BAD_REQUEST, format!("malformed body: {rejection}")))?;
    let workspace_id = required_header(&headers, "X-Workspace-Id")?;
    let conversation_id = required_header(&headers, "X-Conversation-Id")?;
    let request_id = header(&headers, "X-Request-Id")
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut context = request.context;
    if context.channel.is_empty() {
        if let Some(channel) = header(&headers, "X-Channel") {
            context.channel = channel;
        }
    }

    let mut snapshot = ConversationSnapshot {
        workspace_id,
        conversation_id,
        request_id,
        user_message: request.user_message,
        context,
        state: request.state,
    };
    snapshot.clamp();

    match state.router.decide(&snapshot).await {
        Ok(decision) => Ok(Json(decision)),
        Err(error) => {
            error!(workspace = %snapshot.workspace_id, %error, "both pipelines failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "decision pipeline unavailable".to_string(),
            ))
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, (StatusCode, String)> {
    header(headers, name).ok_or((StatusCode::BAD_REQUEST, format!("missing {name} header")))
}
