//! Policy engine: the gate between a plan and the broker.
//!
//! Every planned call is resolved against the workspace manifest, completed
//! from known slots, workspace-bound, rate-limited and, for writes,
//! stamped with an idempotency key. Denials never abort the plan: the call
//! is marked denied, an advisory is recorded, and the rest proceeds.

use crate::plan::Plan;
use crate::ratelimit::TokenBuckets;
use decisor::hash;
use decisor::manifest::{ToolManifest, ToolManifestEntry};
use decisor::slots::Slots;
use serde_json::{Map, Value};
use tracing::debug;

/// Why a call was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDenial {
    UnknownTool,
    MissingArgs,
    RateLimited,
}

impl PolicyDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDenial::UnknownTool => "unknown_tool",
            PolicyDenial::MissingArgs => "missing_args",
            PolicyDenial::RateLimited => "rate_limited",
        }
    }
}

/// Advisory surfaced in telemetry and logs; the plan continues without the
/// offending call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAdvisory {
    pub tool: String,
    pub denial: PolicyDenial,
    pub detail: String,
}

/// Outcome of vetting one planned call.
#[derive(Debug, Clone)]
pub enum Verdict {
    Approved {
        entry: ToolManifestEntry,
        idempotency_key: Option<String>,
    },
    Denied {
        denial: PolicyDenial,
    },
}

/// A planned call after vetting. Denied calls keep their original args so
/// the broker can still emit an observation for them in plan order.
#[derive(Debug, Clone)]
pub struct VettedCall {
    pub tool: String,
    pub args: Value,
    pub verdict: Verdict,
}

impl VettedCall {
    pub fn approved(&self) -> bool {
        matches!(self.verdict, Verdict::Approved { .. })
    }
}

/// The sanitised plan handed to the broker.
#[derive(Debug, Clone, Default)]
pub struct SanitizedPlan {
    pub calls: Vec<VettedCall>,
    pub advisories: Vec<PolicyAdvisory>,
}

/// The policy engine. Holds the process-wide token buckets.
#[derive(Default)]
pub struct PolicyEngine {
    buckets: TokenBuckets,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vet a plan for one workspace. Order is preserved; length never grows.
    pub fn vet(
        &self,
        workspace_id: &str,
        conversation_id: &str,
        plan: &Plan,
        manifest: &ToolManifest,
        slots: &Slots,
    ) -> SanitizedPlan {
        let mut sanitized = SanitizedPlan::default();
        for planned in &plan.calls {
            let vetted = self.vet_call(
                workspace_id,
                conversation_id,
                &planned.tool,
                &planned.args,
                manifest,
                slots,
                &mut sanitized.advisories,
            );
            sanitized.calls.push(vetted);
        }
        sanitized
    }

    #[allow(clippy::too_many_arguments)]
    fn vet_call(
        &self,
        workspace_id: &str,
        conversation_id: &str,
        tool: &str,
        raw_args: &Value,
        manifest: &ToolManifest,
        slots: &Slots,
        advisories: &mut Vec<PolicyAdvisory>,
    ) -> VettedCall {
        let mut deny = |args: Value, denial: PolicyDenial, detail: String| {
            debug!(tool, denial = denial.as_str(), %detail, "policy denied call");
            advisories.push(PolicyAdvisory {
                tool: tool.to_string(),
                denial,
                detail,
            });
            VettedCall {
                tool: tool.to_string(),
                args,
                verdict: Verdict::Denied { denial },
            }
        };

        let Some(entry) = manifest.get(tool) else {
            return deny(
                raw_args.clone(),
                PolicyDenial::UnknownTool,
                format!("{tool} is not in the workspace manifest"),
            );
        };

        let mut args: Map<String, Value> = match raw_args {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        // Fill required arguments from slots, then bind the workspace.
        for spec in entry.required_args() {
            if !args.contains_key(&spec.name) {
                if let Some(value) = slots.get(&spec.name) {
                    args.insert(spec.name.clone(), Value::String(value.clone()));
                }
            }
        }
        if entry.policy.requires_workspace {
            args.insert(
                "workspace_id".to_string(),
                Value::String(workspace_id.to_string()),
            );
        }

        let still_missing: Vec<String> = entry
            .required_args()
            .filter(|spec| !args.contains_key(&spec.name))
            .map(|spec| spec.name.clone())
            .collect();
        if !still_missing.is_empty() {
            return deny(
                Value::Object(args),
                PolicyDenial::MissingArgs,
                format!("missing required args: {}", still_missing.join(", ")),
            );
        }

        if !self
            .buckets
            .try_acquire(workspace_id, tool, entry.policy.max_rps_per_workspace)
        {
            return deny(
                Value::Object(args),
                PolicyDenial::RateLimited,
                format!(
                    "over {} rps for this workspace",
                    entry.policy.max_rps_per_workspace
                ),
            );
        }

        let args = Value::Object(args);
        let idempotency_key = entry
            .policy
            .write
            .then(|| hash::idempotency_key(workspace_id, conversation_id, tool, &args));

        VettedCall {
            tool: tool.to_string(),
            args,
            verdict: Verdict::Approved {
                entry: entry.clone(),
                idempotency_key,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, PlannedCall};
    use decisor::manifest::ToolManifest;
    use serde_json::json;

    fn plan_of(calls: Vec<(&str, Value)>) -> Plan {
        Plan {
            calls: calls
                .into_iter()
                .map(|(tool, args)| PlannedCall {
                    tool: tool.to_string(),
                    args,
                })
                .collect(),
            missing_slots: Default::default(),
        }
    }

    fn slots_of(pairs: &[(&str, &str)]) -> Slots {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unknown_tool_is_denied_but_plan_continues() {
        let engine = PolicyEngine::new();
        let plan = plan_of(vec![
            ("launch_rocket", json!({})),
            ("get_business_hours", json!({})),
        ]);
        let sanitized = engine.vet(
            "ws-1",
            "conv-1",
            &plan,
            &ToolManifest::servicios_default(),
            &Slots::new(),
        );
        assert_eq!(sanitized.calls.len(), 2);
        assert!(!sanitized.calls[0].approved());
        assert!(sanitized.calls[1].approved());
        assert_eq!(sanitized.advisories.len(), 1);
        assert_eq!(sanitized.advisories[0].denial, PolicyDenial::UnknownTool);
    }

    #[test]
    fn workspace_id_is_always_injected() {
        let engine = PolicyEngine::new();
        let plan = plan_of(vec![("get_business_hours", json!({}))]);
        let sanitized = engine.vet(
            "ws-42",
            "conv-1",
            &plan,
            &ToolManifest::servicios_default(),
            &Slots::new(),
        );
        assert_eq!(sanitized.calls[0].args["workspace_id"], "ws-42");
    }

    #[test]
    fn required_args_are_filled_from_slots() {
        let engine = PolicyEngine::new();
        let plan = plan_of(vec![("cancel_appointment", json!({}))]);
        let slots = slots_of(&[("booking_id", "bk-9")]);
        let sanitized = engine.vet(
            "ws-1",
            "conv-1",
            &plan,
            &ToolManifest::servicios_default(),
            &slots,
        );
        assert!(sanitized.calls[0].approved());
        assert_eq!(sanitized.calls[0].args["booking_id"], "bk-9");
    }

    #[test]
    fn missing_required_args_deny_only_that_call() {
        let engine = PolicyEngine::new();
        let plan = plan_of(vec![
            ("book_appointment", json!({})),
            ("get_service_packages", json!({})),
        ]);
        let sanitized = engine.vet(
            "ws-1",
            "conv-1",
            &plan,
            &ToolManifest::servicios_default(),
            &Slots::new(),
        );
        assert!(!sanitized.calls[0].approved());
        assert!(sanitized.calls[1].approved());
        assert_eq!(sanitized.advisories[0].denial, PolicyDenial::MissingArgs);
        assert!(sanitized.advisories[0].detail.contains("client_email"));
    }

    #[test]
    fn writes_get_an_idempotency_key_and_reads_do_not() {
        let engine = PolicyEngine::new();
        let slots = slots_of(&[
            ("service_type", "Corte"),
            ("preferred_date", "2026-08-02"),
            ("preferred_time", "15:00"),
            ("client_name", "Ana"),
            ("client_email", "a@b.com"),
        ]);
        let plan = plan_of(vec![
            ("check_service_availability", json!({"preferred_date": "2026-08-02"})),
            ("book_appointment", json!({})),
        ]);
        let sanitized = engine.vet(
            "ws-1",
            "conv-1",
            &plan,
            &ToolManifest::servicios_default(),
            &slots,
        );
        match &sanitized.calls[0].verdict {
            Verdict::Approved { idempotency_key, .. } => assert!(idempotency_key.is_none()),
            _ => panic!("read should be approved"),
        }
        match &sanitized.calls[1].verdict {
            Verdict::Approved { idempotency_key, .. } => assert!(idempotency_key.is_some()),
            _ => panic!("write should be approved"),
        }
    }

    #[test]
    fn same_logical_write_gets_the_same_key() {
        let engine = PolicyEngine::new();
        let slots = slots_of(&[("booking_id", "bk-9")]);
        let plan = plan_of(vec![("cancel_appointment", json!({}))]);
        let manifest = ToolManifest::servicios_default();
        let key = |sanitized: &SanitizedPlan| match &sanitized.calls[0].verdict {
            Verdict::Approved { idempotency_key, .. } => idempotency_key.clone().unwrap(),
            _ => panic!("expected approval"),
        };
        let first = key(&engine.vet("ws-1", "conv-1", &plan, &manifest, &slots));
        let second = key(&engine.vet("ws-1", "conv-1", &plan, &manifest, &slots));
        assert_eq!(first, second);
    }

    #[test]
    fn rate_limit_denies_the_spill_only() {
        let engine = PolicyEngine::new();
        let slots = slots_of(&[("booking_id", "bk-9")]);
        let manifest = ToolManifest::servicios_default();
        // cancel_appointment allows 2 rps; the third acquisition in the same
        // instant must be denied while other tools proceed.
        let plan = plan_of(vec![
            ("cancel_appointment", json!({})),
            ("cancel_appointment", json!({})),
            ("cancel_appointment", json!({})),
        ]);
        let sanitized = engine.vet("ws-1", "conv-1", &plan, &manifest, &slots);
        assert!(sanitized.calls[0].approved());
        assert!(sanitized.calls[1].approved());
        assert!(!sanitized.calls[2].approved());
        assert_eq!(sanitized.advisories[0].denial, PolicyDenial::RateLimited);
    }
}
