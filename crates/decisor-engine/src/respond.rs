//! Response generator: a short deterministic reply, no model involved.
//!
//! Decision order: ask for exactly one missing slot; otherwise render the
//! last successful observation through a per-intent template; otherwise a
//! polite degraded reply that promises nothing. The reply is never empty
//! and never blames "an error".

use decisor::decision::{AssistantReply, ExecutedCall, MAX_ASSISTANT_CHARS};
use decisor::slots::SlotKey;
use decisor::snapshot::MessageContext;
use decisor::Intent;
use serde_json::Value;
use std::collections::BTreeSet;

/// Which slot gets asked first when several are missing.
const QUESTION_PRIORITY: [SlotKey; 8] = [
    SlotKey::ServiceType,
    SlotKey::PreferredDate,
    SlotKey::PreferredTime,
    SlotKey::ClientName,
    SlotKey::ClientEmail,
    SlotKey::ClientPhone,
    SlotKey::StaffName,
    SlotKey::BookingId,
];

/// Formatter caps: listings stay scannable on a phone screen.
const MAX_HOUR_ROWS: usize = 4;
const MAX_PRICE_ROWS: usize = 3;

fn question_for(slot: SlotKey) -> &'static str {
    match slot {
        SlotKey::ServiceType => "¿Qué servicio querés reservar?",
        SlotKey::PreferredDate => "¿Para qué día te gustaría el turno?",
        SlotKey::PreferredTime => "¿A qué hora te queda bien?",
        SlotKey::ClientName => "¿A nombre de quién hago la reserva?",
        SlotKey::ClientEmail => "¿Me pasás tu email para confirmarte la reserva?",
        SlotKey::ClientPhone => "¿Me dejás un teléfono de contacto?",
        SlotKey::StaffName => "¿Con quién preferís atenderte?",
        SlotKey::BookingId => "¿Me pasás el código de tu reserva (empieza con bk-)?",
    }
}

fn fallback_text() -> String {
    "No pude completar la consulta en este momento. ¿Querés que lo intente de nuevo en un rato?"
        .to_string()
}

/// Build the reply for the turn.
pub fn generate(
    intent: Intent,
    missing_slots: &BTreeSet<SlotKey>,
    executed: &[ExecutedCall],
    context: &MessageContext,
) -> AssistantReply {
    let last_success = executed.iter().rev().find(|c| c.observation.ok);
    let any_executed = !executed.is_empty();

    // One question per turn while the intent still needs data.
    if !missing_slots.is_empty() && terminal_call(intent, executed).is_none() {
        let slot = QUESTION_PRIORITY
            .iter()
            .copied()
            .find(|s| missing_slots.contains(s))
            .unwrap_or(SlotKey::ServiceType);
        return reply(question_for(slot).to_string(), Vec::new());
    }

    if let Some(call) = last_success {
        return render_success(intent, call, context);
    }

    if any_executed {
        // Every call failed: acknowledge without inventing data.
        return reply(fallback_text(), Vec::new());
    }

    render_static(intent, context)
}

/// The call that completes a transactional intent, if it ran and succeeded.
fn terminal_call<'a>(intent: Intent, executed: &'a [ExecutedCall]) -> Option<&'a ExecutedCall> {
    let tool = match intent {
        Intent::Book => "book_appointment",
        Intent::Cancel => "cancel_appointment",
        Intent::Reschedule => "reschedule_appointment",
        _ => return None,
    };
    executed.iter().find(|c| c.tool == tool && c.observation.ok)
}

fn render_static(intent: Intent, context: &MessageContext) -> AssistantReply {
    let business = if context.business_name.is_empty() {
        "nuestro local".to_string()
    } else {
        context.business_name.clone()
    };
    match intent {
        Intent::Greeting => reply(
            format!("¡Hola! Soy el asistente de {business}. ¿En qué te puedo ayudar?"),
            vec![
                "Ver servicios".to_string(),
                "Pedir turno".to_string(),
                "Horarios".to_string(),
            ],
        ),
        Intent::Chitchat => reply(
            "¡Gracias! Cualquier cosa que necesites sobre turnos, precios u horarios, avisame."
                .to_string(),
            Vec::new(),
        ),
        _ => reply(
            format!(
                "Te puedo ayudar con turnos, precios y horarios de {business}. ¿Qué necesitás?"
            ),
            vec!["Pedir turno".to_string(), "Ver precios".to_string()],
        ),
    }
}

fn render_success(intent: Intent, call: &ExecutedCall, context: &MessageContext) -> AssistantReply {
    let result = &call.observation.result;
    let text = match call.tool.as_str() {
        "get_business_hours" => format_hours(result),
        "get_service_packages" => format_prices(result),
        "query_knowledge_base" => result
            .get("answer")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(fallback_text),
        "check_service_availability" => format_availability(result),
        "book_appointment" => format_booking(result),
        "cancel_appointment" => match result.get("booking_id").and_then(Value::as_str) {
            Some(id) => format!("Tu reserva {id} quedó cancelada. ¡Gracias por avisar!"),
            None => "Tu reserva quedó cancelada. ¡Gracias por avisar!".to_string(),
        },
        "reschedule_appointment" => format_reschedule(result),
        _ => return render_static(intent, context),
    };
    reply(text, Vec::new())
}

fn format_hours(result: &Value) -> String {
    let Some(days) = result.get("days").and_then(Value::as_array) else {
        return fallback_text();
    };
    let rows: Vec<String> = days
        .iter()
        .take(MAX_HOUR_ROWS)
        .filter_map(|d| {
            let day = d.get("day")?.as_str()?;
            let open = d.get("open")?.as_str()?;
            let close = d.get("close")?.as_str()?;
            Some(format!("{day} {open}–{close}"))
        })
        .collect();
    if rows.is_empty() {
        return fallback_text();
    }
    format!("Nuestros horarios: {}.", rows.join(" · "))
}

fn format_prices(result: &Value) -> String {
    let Some(services) = result.get("services").and_then(Value::as_array) else {
        return fallback_text();
    };
    let rows: Vec<String> = services
        .iter()
        .take(MAX_PRICE_ROWS)
        .filter_map(|s| {
            let name = s.get("name")?.as_str()?;
            let price = s.get("price")?.as_u64()?;
            Some(format!("{name} ${price}"))
        })
        .collect();
    if rows.is_empty() {
        return fallback_text();
    }
    format!("Precios: {}. ¿Querés reservar?", rows.join(" · "))
}

fn format_availability(result: &Value) -> String {
    let date = result.get("date").and_then(Value::as_str).unwrap_or("esa fecha");
    if result.get("available").and_then(Value::as_bool) == Some(false) {
        return format!("No queda lugar para el {date}. ¿Querés probar con otra fecha?");
    }
    let slots: Vec<&str> = result
        .get("slots")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).take(3).collect())
        .unwrap_or_default();
    if slots.is_empty() {
        format!("Hay lugar para el {date}. ¿Confirmo la reserva?")
    } else {
        format!(
            "Para el {date} tengo {}. ¿Confirmo la reserva?",
            slots.join(", ")
        )
    }
}

fn format_booking(result: &Value) -> String {
    let id = result.get("booking_id").and_then(Value::as_str);
    let date = result.get("date").and_then(Value::as_str);
    let time = result.get("time").and_then(Value::as_str);
    match (id, date, time) {
        (Some(id), Some(date), Some(time)) => {
            format!("¡Listo! Reserva {id} confirmada para el {date} a las {time}.")
        }
        (Some(id), _, _) => format!("¡Listo! Tu reserva {id} quedó confirmada."),
        _ => "¡Listo! Tu reserva quedó confirmada.".to_string(),
    }
}

fn format_reschedule(result: &Value) -> String {
    let id = result.get("booking_id").and_then(Value::as_str);
    let date = result.get("date").and_then(Value::as_str);
    let time = result.get("time").and_then(Value::as_str);
    match (id, date, time) {
        (Some(id), Some(date), Some(time)) => {
            format!("Reserva {id} reprogramada para el {date} a las {time}.")
        }
        _ => "Tu reserva quedó reprogramada.".to_string(),
    }
}

fn reply(text: String, suggested_replies: Vec<String>) -> AssistantReply {
    let text = if text.is_empty() { fallback_text() } else { text };
    AssistantReply {
        text: cap_chars(&text, MAX_ASSISTANT_CHARS),
        suggested_replies,
    }
}

fn cap_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
