//! Versioned JSON Schema registry.
//!
//! Schemas are embedded at compile time and compiled once at startup; the
//! registry is read-only afterwards. A missing or malformed schema is a
//! startup error, never a runtime one: the service refuses to boot rather
//! than run with an unvalidated model contract.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Schema name for extractor output.
pub const EXTRACTOR_V1: &str = "extractor_v1";
/// Schema name for planner output.
pub const PLANNER_V1: &str = "planner_v1";
/// Schema name for the decision response (pinned for contract tests).
pub const RESPONSE_V1: &str = "response_v1";

/// Startup-time schema failures. Always fatal.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema not registered: {name}")]
    UnknownSchema { name: String },

    #[error("schema {name} is malformed: {reason}")]
    Malformed { name: String, reason: String },
}

/// One structured validation violation: where, and what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer into the offending instance (empty for the root).
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Compiled, immutable schema set.
pub struct SchemaRegistry {
    validators: HashMap<&'static str, jsonschema::Validator>,
}

impl SchemaRegistry {
    /// Compile the three pipeline schemas. Called once at startup.
    pub fn bootstrap() -> Result<Self, SchemaError> {
        let mut registry = Self {
            validators: HashMap::new(),
        };
        registry.register(EXTRACTOR_V1, include_str!("../schemas/extractor_v1.json"))?;
        registry.register(PLANNER_V1, include_str!("../schemas/planner_v1.json"))?;
        registry.register(RESPONSE_V1, include_str!("../schemas/response_v1.json"))?;
        Ok(registry)
    }

    fn register(&mut self, name: &'static str, raw: &str) -> Result<(), SchemaError> {
        let doc: Value = serde_json::from_str(raw).map_err(|e| SchemaError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let validator = jsonschema::validator_for(&doc).map_err(|e| SchemaError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.validators.insert(name, validator);
        Ok(())
    }

    /// Validate a value. `Ok(vec![])` means valid; a non-empty vec lists
    /// every violation found.
    pub fn validate(&self, name: &str, value: &Value) -> Result<Vec<SchemaViolation>, SchemaError> {
        let validator = self
            .validators
            .get(name)
            .ok_or_else(|| SchemaError::UnknownSchema {
                name: name.to_string(),
            })?;
        Ok(validator
            .iter_errors(value)
            .map(|err| SchemaViolation {
                path: err.instance_path.to_string(),
                message: err.to_string(),
            })
            .collect())
    }

    /// Fast validity check without collecting violations.
    pub fn is_valid(&self, name: &str, value: &Value) -> bool {
        self.validators
            .get(name)
            .map(|v| v.is_valid(value))
            .unwrap_or(false)
    }

    /// Registered schema names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.validators.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
