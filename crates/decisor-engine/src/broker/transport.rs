//! Tool call transports.
//!
//! The broker speaks one uniform surface; whether a tool lives behind HTTP
//! or in-process is a wiring choice. The in-process transport serves the
//! servicios vertical deterministically and doubles as the test double.

use async_trait::async_trait;
use decisor::hash::{StableHash, canonical_json};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures, classified for retry decisions.
#[derive(Debug, Error)]
pub enum ToolCallError {
    /// Worth retrying: connection failures, 5xx, overloads.
    #[error("transient tool failure: {0}")]
    Transient(String),
    /// Definite refusal: 4xx, unknown tool, malformed args.
    #[error("permanent tool failure: {0}")]
    Permanent(String),
}

/// Uniform call surface the broker dispatches through.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(
        &self,
        tool: &str,
        args: &Value,
        timeout: Duration,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ToolCallError>;
}

/// HTTP transport: one POST per tool against a tools gateway.
pub struct HttpToolTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpToolTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn call(
        &self,
        tool: &str,
        args: &Value,
        timeout: Duration,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ToolCallError> {
        let url = format!("{}/tools/{tool}", self.base_url.trim_end_matches('/'));
        let mut request = self.http.post(url).timeout(timeout).json(args);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ToolCallError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ToolCallError::Transient(format!("tool returned {status}")));
        }
        if !status.is_success() {
            return Err(ToolCallError::Permanent(format!("tool returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| ToolCallError::Permanent(format!("tool response is not JSON: {e}")))
    }
}

/// Deterministic in-process implementation of the servicios tools.
///
/// Booking ids derive from the call arguments, so the same logical booking
/// always gets the same id, which is what the idempotency tests observe.
/// Invocation counts are tracked per tool.
#[derive(Default)]
pub struct InProcessTransport {
    invocations: Mutex<HashMap<String, u32>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a tool was actually invoked (idempotency-cache hits
    /// do not reach the transport and therefore do not count).
    pub fn invocations(&self, tool: &str) -> u32 {
        self.invocations.lock().get(tool).copied().unwrap_or(0)
    }

    fn bump(&self, tool: &str) {
        *self.invocations.lock().entry(tool.to_string()).or_insert(0) += 1;
    }

    fn booking_id(args: &Value) -> String {
        let hash = StableHash::new(canonical_json(args).as_bytes()).to_hex();
        format!("bk-{}", &hash[..8])
    }
}

#[async_trait]
impl ToolTransport for InProcessTransport {
    async fn call(
        &self,
        tool: &str,
        args: &Value,
        _timeout: Duration,
        _idempotency_key: Option<&str>,
    ) -> Result<Value, ToolCallError> {
        self.bump(tool);
        let str_arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default();
        match tool {
            "get_business_hours" => Ok(json!({
                "days": [
                    {"day": "lunes", "open": "09:00", "close": "18:00"},
                    {"day": "martes", "open": "09:00", "close": "18:00"},
                    {"day": "miércoles", "open": "09:00", "close": "18:00"},
                    {"day": "jueves", "open": "09:00", "close": "20:00"},
                    {"day": "viernes", "open": "09:00", "close": "20:00"},
                    {"day": "sábado", "open": "10:00", "close": "14:00"},
                ]
            })),
            "get_service_packages" => Ok(json!({
                "services": [
                    {"name": "Corte", "price": 9500, "currency": "ARS", "duration_min": 45},
                    {"name": "Color", "price": 18000, "currency": "ARS", "duration_min": 90},
                    {"name": "Brushing", "price": 7000, "currency": "ARS", "duration_min": 30},
                    {"name": "Tratamiento", "price": 12000, "currency": "ARS", "duration_min": 60},
                ]
            })),
            "query_knowledge_base" => Ok(json!({
                "answer": "Trabajamos con turno previo. Podés pedir corte, color, brushing o tratamiento.",
                "query": str_arg("query"),
            })),
            "check_service_availability" => Ok(json!({
                "date": str_arg("preferred_date"),
                "available": true,
                "slots": ["10:00", "15:00", "16:30"],
            })),
            "book_appointment" => Ok(json!({
                "booking_id": Self::booking_id(args),
                "date": str_arg("preferred_date"),
                "time": str_arg("preferred_time"),
                "service_type": str_arg("service_type"),
                "status": "confirmed",
            })),
            "cancel_appointment" => Ok(json!({
                "booking_id": str_arg("booking_id"),
                "status": "cancelled",
            })),
            "reschedule_appointment" => Ok(json!({
                "booking_id": str_arg("booking_id"),
                "date": str_arg("preferred_date"),
                "time": str_arg("preferred_time"),
                "status": "rescheduled",
            })),
            other => Err(ToolCallError::Permanent(format!("unknown tool: {other}"))),
        }
    }
}
