//! Planner prompt construction.

use decisor::Intent;
use decisor::manifest::ToolManifest;
use decisor::slots::Slots;
use minijinja::{Environment, context};

const PLANNER_TEMPLATE: &str = r#"Sos el planificador de herramientas de un asistente para negocios de servicios.
Intención detectada: {{ intent }}
Mensaje del cliente: "{{ utterance }}"
Slots conocidos:
{{ slots }}
Herramientas disponibles (solo estas, ninguna otra):
{{ tools }}

Respondé SOLO un objeto JSON válido según el esquema planner_v1:
{"tool_calls": [{"tool": "...", "args": {...}}], "missing_slots": ["..."]}
Máximo 3 llamadas, sin texto libre, sin claves extra.

Ejemplos (vertical servicios):
{{ examples }}"#;

/// Six worked examples for the servicios vertical, one line each.
const PLANNER_EXAMPLES: &str = r#"- "¿qué horarios tienen?" → {"tool_calls": [{"tool": "get_business_hours", "args": {}}], "missing_slots": []}
- "¿cuánto sale un corte?" → {"tool_calls": [{"tool": "get_service_packages", "args": {}}], "missing_slots": []}
- "¿hacen alisado permanente?" → {"tool_calls": [{"tool": "query_knowledge_base", "args": {"query": "alisado permanente"}}], "missing_slots": []}
- "quiero turno mañana" (sin nombre ni email) → {"tool_calls": [{"tool": "check_service_availability", "args": {"preferred_date": "2026-08-02"}}], "missing_slots": ["service_type", "preferred_time", "client_name", "client_email"]}
- "reservá corte mañana 15:00, soy Ana, a@b.com" → {"tool_calls": [{"tool": "check_service_availability", "args": {"preferred_date": "2026-08-02", "preferred_time": "15:00"}}, {"tool": "book_appointment", "args": {"service_type": "corte", "preferred_date": "2026-08-02", "preferred_time": "15:00", "client_name": "Ana", "client_email": "a@b.com"}}], "missing_slots": []}
- "cancelá la reserva bk-123" → {"tool_calls": [{"tool": "cancel_appointment", "args": {"booking_id": "bk-123"}}], "missing_slots": []}"#;

/// Render the planner prompt. Falls back to a minimal plain prompt if the
/// template engine rejects the inputs.
pub fn planner_prompt(
    intent: Intent,
    utterance: &str,
    slots: &Slots,
    manifest: &ToolManifest,
) -> String {
    let slot_lines = if slots.is_empty() {
        "(ninguno)".to_string()
    } else {
        slots
            .iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let tool_lines = manifest
        .iter()
        .map(|entry| {
            let args = entry
                .args
                .iter()
                .map(|a| {
                    if a.required {
                        format!("{}*", a.name)
                    } else {
                        a.name.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("- {}({args})", entry.name)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let env = Environment::new();
    env.template_from_str(PLANNER_TEMPLATE)
        .and_then(|tmpl| {
            tmpl.render(context! {
                intent => intent.as_str(),
                utterance => utterance,
                slots => slot_lines,
                tools => tool_lines,
                examples => PLANNER_EXAMPLES,
            })
        })
        .unwrap_or_else(|_| {
            format!(
                "Planificá llamadas a herramientas ({tool_lines}) para: {utterance}. \
                 Respondé SOLO JSON planner_v1."
            )
        })
}
