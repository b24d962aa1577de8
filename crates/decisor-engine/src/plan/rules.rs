//! Deterministic planning rules.
//!
//! One table drives three things: the per-intent fast path of the SLM
//! planner, the fallback when the model plan is unusable, and the whole of
//! the Legacy planner. Keeping them identical is what makes the canary
//! comparison meaningful.

use super::{MAX_PLAN_CALLS, Plan, PlannedCall};
use decisor::manifest::{ToolManifest, ToolManifestEntry};
use decisor::slots::{SlotKey, Slots, slot};
use decisor::Intent;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// The tool that ultimately satisfies a transactional intent.
fn primary_tool(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::Book => Some("book_appointment"),
        Intent::Cancel => Some("cancel_appointment"),
        Intent::Reschedule => Some("reschedule_appointment"),
        _ => None,
    }
}

/// Build args for a tool from the slots it declares, skipping absences.
/// The policy engine injects `workspace_id` later; it is never a slot.
pub fn args_from_slots(entry: &ToolManifestEntry, slots: &Slots) -> Value {
    let mut args = Map::new();
    for spec in &entry.args {
        if let Some(value) = slots.get(&spec.name) {
            args.insert(spec.name.clone(), Value::String(value.clone()));
        }
    }
    Value::Object(args)
}

/// Slots still needed before the intent's primary tool can run, derived
/// from the manifest's required argument shape.
pub fn missing_for_intent(intent: Intent, slots: &Slots, manifest: &ToolManifest) -> BTreeSet<SlotKey> {
    let Some(tool) = primary_tool(intent) else {
        return BTreeSet::new();
    };
    let Some(entry) = manifest.get(tool) else {
        return BTreeSet::new();
    };
    entry
        .required_args()
        .filter(|spec| !slots.contains_key(&spec.name))
        .filter_map(|spec| SlotKey::parse(&spec.name))
        .collect()
}

fn push_call(calls: &mut Vec<PlannedCall>, manifest: &ToolManifest, tool: &str, slots: &Slots) {
    if let Some(entry) = manifest.get(tool) {
        calls.push(PlannedCall {
            tool: entry.name.clone(),
            args: args_from_slots(entry, slots),
        });
    }
}

/// The rule table: a total, deterministic plan for every intent.
pub fn default_plan(intent: Intent, utterance: &str, slots: &Slots, manifest: &ToolManifest) -> Plan {
    let missing = missing_for_intent(intent, slots, manifest);
    let mut calls = Vec::new();
    match intent {
        Intent::Greeting | Intent::Chitchat | Intent::Other => {}
        Intent::InfoHours => push_call(&mut calls, manifest, "get_business_hours", slots),
        Intent::InfoPrices => push_call(&mut calls, manifest, "get_service_packages", slots),
        Intent::InfoServices => {
            if let Some(entry) = manifest.get("query_knowledge_base") {
                let mut args = Map::new();
                args.insert("query".into(), Value::String(utterance.to_string()));
                calls.push(PlannedCall {
                    tool: entry.name.clone(),
                    args: Value::Object(args),
                });
            }
        }
        Intent::Book => {
            // Availability is worth checking as soon as a date is known;
            // the booking itself waits until every required slot is in.
            if slot(slots, SlotKey::PreferredDate).is_some() {
                push_call(&mut calls, manifest, "check_service_availability", slots);
            }
            if missing.is_empty() {
                push_call(&mut calls, manifest, "book_appointment", slots);
            }
        }
        Intent::Cancel => {
            if missing.is_empty() {
                push_call(&mut calls, manifest, "cancel_appointment", slots);
            }
        }
        Intent::Reschedule => {
            if missing.is_empty() {
                push_call(&mut calls, manifest, "reschedule_appointment", slots);
            }
        }
    }
    calls.truncate(MAX_PLAN_CALLS);
    Plan {
        calls,
        missing_slots: missing,
    }
}

/// The fast path: `Some` when the intent needs no model help (informational
/// intents always, transactional ones once their required slots are in).
pub fn complete_fast_path(
    intent: Intent,
    utterance: &str,
    slots: &Slots,
    manifest: &ToolManifest,
) -> Option<Plan> {
    let transactional = matches!(intent, Intent::Book | Intent::Cancel | Intent::Reschedule);
    if transactional && !missing_for_intent(intent, slots, manifest).is_empty() {
        return None;
    }
    Some(default_plan(intent, utterance, slots, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use decisor::manifest::ToolManifest;

    fn manifest() -> ToolManifest {
        ToolManifest::servicios_default()
    }

    fn slots_of(pairs: &[(&str, &str)]) -> Slots {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn greeting_plans_nothing() {
        let plan = default_plan(Intent::Greeting, "hola", &Slots::new(), &manifest());
        assert!(plan.calls.is_empty());
        assert!(plan.missing_slots.is_empty());
    }

    #[test]
    fn info_prices_is_a_single_catalog_call() {
        let plan = default_plan(Intent::InfoPrices, "cuánto cuesta", &Slots::new(), &manifest());
        assert_eq!(plan.calls.len(), 1);
        assert_eq!(plan.calls[0].tool, "get_service_packages");
    }

    #[test]
    fn incomplete_booking_checks_availability_only() {
        let slots = slots_of(&[("preferred_date", "2026-08-02"), ("preferred_time", "15:00")]);
        let plan = default_plan(Intent::Book, "quiero turno", &slots, &manifest());
        assert_eq!(plan.calls.len(), 1);
        assert_eq!(plan.calls[0].tool, "check_service_availability");
        assert!(plan.missing_slots.contains(&SlotKey::ClientName));
        assert!(plan.missing_slots.contains(&SlotKey::ClientEmail));
        assert!(plan.missing_slots.contains(&SlotKey::ServiceType));
    }

    #[test]
    fn complete_booking_plans_availability_then_booking() {
        let slots = slots_of(&[
            ("service_type", "Corte"),
            ("preferred_date", "2026-08-02"),
            ("preferred_time", "15:00"),
            ("client_name", "Ana"),
            ("client_email", "a@b.com"),
        ]);
        let plan = default_plan(Intent::Book, "reservar", &slots, &manifest());
        let tools: Vec<&str> = plan.calls.iter().map(|c| c.tool.as_str()).collect();
        assert_eq!(tools, ["check_service_availability", "book_appointment"]);
        assert!(plan.missing_slots.is_empty());
        assert_eq!(plan.calls[1].args["client_email"], "a@b.com");
    }

    #[test]
    fn cancel_without_booking_id_plans_nothing_but_flags_the_slot() {
        let plan = default_plan(Intent::Cancel, "cancelar", &Slots::new(), &manifest());
        assert!(plan.calls.is_empty());
        assert_eq!(
            plan.missing_slots.iter().copied().collect::<Vec<_>>(),
            [SlotKey::BookingId]
        );
    }

    #[test]
    fn fast_path_skips_incomplete_transactions() {
        let slots = slots_of(&[("preferred_date", "2026-08-02")]);
        assert!(complete_fast_path(Intent::Book, "turno", &slots, &manifest()).is_none());
        assert!(complete_fast_path(Intent::InfoHours, "horarios", &slots, &manifest()).is_some());
    }

    #[test]
    fn empty_manifest_yields_empty_plans() {
        let plan = default_plan(Intent::InfoHours, "horarios", &Slots::new(), &ToolManifest::default());
        assert!(plan.calls.is_empty());
    }
}
