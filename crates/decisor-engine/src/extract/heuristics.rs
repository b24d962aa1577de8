//! Keyword fallback for the extractor.
//!
//! When the model is unavailable, over budget, or not confident, intent is
//! dispatched over keyword families and slots are pulled with regexes. This
//! is also the whole of the Legacy pipeline's understanding layer.

use decisor::Intent;
use decisor::slots::{SlotKey, Slots};
use once_cell::sync::Lazy;
use regex::Regex;

const CANCEL_KEYWORDS: &[&str] = &["cancelar", "cancelá", "cancela", "anular", "dar de baja"];
const RESCHEDULE_KEYWORDS: &[&str] = &[
    "reprogramar",
    "reagendar",
    "cambiar el turno",
    "cambiar mi turno",
    "mover el turno",
    "pasar el turno",
];
const BOOK_KEYWORDS: &[&str] = &[
    "turno",
    "reserva",
    "reservar",
    "reservá",
    "agendar",
    "agendá",
    "cita",
    "sacar hora",
];
const PRICE_KEYWORDS: &[&str] = &[
    "precio", "precios", "cuánto", "cuanto", "cuesta", "sale", "vale", "tarifa", "cobran",
];
const HOURS_KEYWORDS: &[&str] = &[
    "horario", "horarios", "abren", "cierran", "atienden", "qué hora", "que hora",
];
const SERVICE_KEYWORDS: &[&str] = &["servicio", "servicios", "ofrecen", "hacen", "trabajan"];
const GREETING_KEYWORDS: &[&str] = &[
    "hola",
    "buenas",
    "buen día",
    "buen dia",
    "buenos días",
    "buenos dias",
    "buenas tardes",
    "buenas noches",
    "qué tal",
    "que tal",
];

static DATE_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\d{4}-\d{2}-\d{2}|\d{1,2}[/.]\d{1,2}(?:[/.]\d{2,4})?|pasado\s+ma[ñn]ana|ma[ñn]ana|hoy|lunes|martes|mi[eé]rcoles|jueves|viernes|s[aá]bado|domingo",
    )
    .expect("static regex")
});
static TIME_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,2}(?:[:.]\d{2})?\s*(?:hs|hrs|am|pm)\b|\b\d{1,2}:\d{2}\b|a las\s+\d{1,2}")
        .expect("static regex")
});
static EMAIL_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("static regex")
});
static NAME_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:soy|me llamo|a nombre de)\s+([A-ZÁÉÍÓÚÑ][a-záéíóúñ]+(?:\s+[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+)?)")
        .expect("static regex")
});
static BOOKING_ID_EXPR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(bk-[a-z0-9]+)\b").expect("static regex"));
static SERVICE_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(corte|color|brushing|tratamiento|manicura|pedicura|masaje|depilaci[oó]n)\b")
        .expect("static regex")
});

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// Keyword dispatch over the closed intent set. Checked most-specific
/// first so "hola, quiero cancelar el turno" cancels instead of greeting.
pub fn classify(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    if contains_any(&lowered, RESCHEDULE_KEYWORDS) {
        Intent::Reschedule
    } else if contains_any(&lowered, CANCEL_KEYWORDS) {
        Intent::Cancel
    } else if contains_any(&lowered, BOOK_KEYWORDS) {
        Intent::Book
    } else if contains_any(&lowered, PRICE_KEYWORDS) {
        Intent::InfoPrices
    } else if contains_any(&lowered, HOURS_KEYWORDS) {
        Intent::InfoHours
    } else if contains_any(&lowered, SERVICE_KEYWORDS) {
        Intent::InfoServices
    } else if contains_any(&lowered, GREETING_KEYWORDS) {
        Intent::Greeting
    } else {
        Intent::Other
    }
}

/// Best-effort slot extraction. Values come out raw; normalisation runs
/// afterwards, shared with the model path.
pub fn extract_slots(text: &str) -> Slots {
    let lowered = text.to_lowercase();
    let mut slots = Slots::new();

    if let Some(m) = DATE_EXPR.find(&lowered) {
        slots.insert(
            SlotKey::PreferredDate.as_str().to_string(),
            m.as_str().to_string(),
        );
    }
    if let Some(m) = TIME_EXPR.find(&lowered) {
        slots.insert(
            SlotKey::PreferredTime.as_str().to_string(),
            m.as_str().to_string(),
        );
    }
    if let Some(m) = EMAIL_EXPR.find(text) {
        slots.insert(
            SlotKey::ClientEmail.as_str().to_string(),
            m.as_str().to_string(),
        );
    }
    if let Some(caps) = NAME_EXPR.captures(text) {
        slots.insert(SlotKey::ClientName.as_str().to_string(), caps[1].to_string());
    }
    if let Some(caps) = BOOKING_ID_EXPR.captures(&lowered) {
        slots.insert(SlotKey::BookingId.as_str().to_string(), caps[1].to_string());
    }
    if let Some(caps) = SERVICE_EXPR.captures(&lowered) {
        slots.insert(
            SlotKey::ServiceType.as_str().to_string(),
            caps[1].to_string(),
        );
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_closed_intent_set() {
        assert_eq!(classify("hola!"), Intent::Greeting);
        assert_eq!(classify("¿cuánto cuesta un corte?"), Intent::InfoPrices);
        assert_eq!(classify("¿qué horarios tienen?"), Intent::InfoHours);
        assert_eq!(classify("¿qué servicios ofrecen?"), Intent::InfoServices);
        assert_eq!(classify("quiero turno mañana 15hs"), Intent::Book);
        assert_eq!(classify("necesito cancelar la reserva"), Intent::Cancel);
        assert_eq!(classify("quiero cambiar el turno para el jueves"), Intent::Reschedule);
        assert_eq!(classify("gracias, nos vemos"), Intent::Other);
    }

    #[test]
    fn specific_intents_beat_greetings() {
        assert_eq!(classify("hola, quiero cancelar el turno bk-12"), Intent::Cancel);
    }

    #[test]
    fn extracts_date_time_and_email() {
        let slots = extract_slots("quiero turno mañana 15hs, soy Ana, ana@mail.com");
        assert_eq!(slots["preferred_date"], "mañana");
        assert_eq!(slots["preferred_time"], "15hs");
        assert_eq!(slots["client_email"], "ana@mail.com");
        assert_eq!(slots["client_name"], "Ana");
    }

    #[test]
    fn extracts_booking_ids_and_service_types() {
        let slots = extract_slots("reservar corte el viernes, tengo la reserva bk-a1b2");
        assert_eq!(slots["service_type"], "corte");
        assert_eq!(slots["booking_id"], "bk-a1b2");
        assert_eq!(slots["preferred_date"], "viernes");
    }

    #[test]
    fn no_signal_means_no_slots() {
        assert!(extract_slots("gracias por todo").is_empty());
    }
}
