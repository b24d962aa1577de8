//! JSON-constrained LLM client.
//!
//! The model is treated as an oracle that must return a JSON object valid
//! against a registered schema, never prose. The HTTP implementation talks
//! to an OpenAI-compatible `/chat/completions` endpoint; anything that does
//! not parse or validate gets exactly one repair retry with a stricter
//! reminder before surfacing as an error.

use crate::schema::SchemaRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced from [`LlmClient::generate_json`].
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model output is not valid {schema} JSON: {reason}")]
    InvalidJson { schema: String, reason: String },

    #[error("model call exceeded {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("model transport failed: {0}")]
    Transport(String),
}

impl LlmError {
    /// Short kind tag for telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::InvalidJson { .. } => "invalid_json",
            LlmError::Timeout { .. } => "timeout",
            LlmError::Transport(_) => "transport",
        }
    }
}

/// Constrained JSON generation. Implementations must be pool-safe: one
/// instance is shared across all in-flight requests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a JSON value valid against the named registered schema,
    /// within `timeout` covering retries.
    async fn generate_json(
        &self,
        prompt: &str,
        schema_name: &str,
        timeout: Duration,
    ) -> Result<Value, LlmError>;
}

/// Appended to the prompt on the single repair retry.
const REPAIR_REMINDER: &str = "\n\nIMPORTANT: your previous answer was not valid. \
Respond with a single JSON object that validates against the schema above. \
No prose, no markdown fences, no extra keys.";

/// Connection settings for [`HttpLlmClient`].
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// OpenAI-compatible HTTP client with JSON-object response enforcement.
pub struct HttpLlmClient {
    http: reqwest::Client,
    config: HttpLlmConfig,
    registry: Arc<SchemaRegistry>,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmConfig, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            registry,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
            "response_format": {"type": "json_object"},
        });
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut request = self.http.post(url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Transport(format!("model endpoint returned {status}")));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| LlmError::Transport("response carries no message content".into()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate_json(
        &self,
        prompt: &str,
        schema_name: &str,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        let attempt = async {
            let raw = self.complete(prompt).await?;
            match parse_constrained(&self.registry, schema_name, &raw) {
                Ok(value) => Ok(value),
                Err(first_failure) => {
                    debug!(schema = schema_name, error = %first_failure, "repair retry");
                    let repair_prompt = format!("{prompt}{REPAIR_REMINDER}");
                    let raw = self.complete(&repair_prompt).await?;
                    parse_constrained(&self.registry, schema_name, &raw)
                }
            }
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Parse raw model output and validate it against a registered schema.
///
/// Markdown fences are tolerated (stripped before parsing); everything else
/// non-conforming is an [`LlmError::InvalidJson`].
pub fn parse_constrained(
    registry: &SchemaRegistry,
    schema_name: &str,
    raw: &str,
) -> Result<Value, LlmError> {
    let trimmed = strip_fences(raw);
    let value: Value = serde_json::from_str(trimmed).map_err(|e| LlmError::InvalidJson {
        schema: schema_name.to_string(),
        reason: e.to_string(),
    })?;
    let violations = registry
        .validate(schema_name, &value)
        .map_err(|e| LlmError::InvalidJson {
            schema: schema_name.to_string(),
            reason: e.to_string(),
        })?;
    if violations.is_empty() {
        Ok(value)
    } else {
        Err(LlmError::InvalidJson {
            schema: schema_name.to_string(),
            reason: violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Deterministic in-process client: hands out pre-loaded values per schema.
///
/// Used by tests and by service wirings that run without a model endpoint.
/// An empty script makes every call fail as a transport error, which the
/// extractor and planner absorb through their fallback paths.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for the given schema. Responses are consumed in
    /// FIFO order; the last one is repeated once the queue drains.
    pub fn enqueue(&self, schema_name: &str, value: Value) {
        self.responses
            .lock()
            .entry(schema_name.to_string())
            .or_default()
            .push_back(value);
    }

    fn next_for(&self, schema_name: &str) -> Option<Value> {
        let mut responses = self.responses.lock();
        let queue = responses.get_mut(schema_name)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate_json(
        &self,
        _prompt: &str,
        schema_name: &str,
        _timeout: Duration,
    ) -> Result<Value, LlmError> {
        self.next_for(schema_name)
            .ok_or_else(|| LlmError::Transport(format!("no scripted response for {schema_name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EXTRACTOR_V1;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::bootstrap().unwrap()
    }

    #[test]
    fn parse_accepts_valid_payloads_and_fences() {
        let registry = registry();
        let raw = "```json\n{\"intent\": \"greeting\", \"confidence\": 0.9}\n```";
        let value = parse_constrained(&registry, EXTRACTOR_V1, raw).unwrap();
        assert_eq!(value["intent"], "greeting");
    }

    #[test]
    fn parse_rejects_prose() {
        let registry = registry();
        let err = parse_constrained(&registry, EXTRACTOR_V1, "el usuario saluda").unwrap_err();
        assert_eq!(err.kind(), "invalid_json");
    }

    #[test]
    fn parse_rejects_schema_violations() {
        let registry = registry();
        let err =
            parse_constrained(&registry, EXTRACTOR_V1, "{\"intent\": \"greeting\"}").unwrap_err();
        assert!(matches!(err, LlmError::InvalidJson { .. }));
    }

    #[tokio::test]
    async fn scripted_llm_replays_and_repeats() {
        let llm = ScriptedLlm::new();
        llm.enqueue(EXTRACTOR_V1, serde_json::json!({"intent": "book", "confidence": 0.8}));
        let first = llm
            .generate_json("p", EXTRACTOR_V1, Duration::from_millis(50))
            .await
            .unwrap();
        let second = llm
            .generate_json("p", EXTRACTOR_V1, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn scripted_llm_without_entries_fails_as_transport() {
        let llm = ScriptedLlm::new();
        let err = llm
            .generate_json("p", EXTRACTOR_V1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
