//! Extractor prompt construction: closed intent list, few-shot bank,
//! currently known slots and the target schema, rendered with MiniJinja.

use decisor::snapshot::ConversationSnapshot;
use minijinja::{Environment, context};

const EXTRACTOR_TEMPLATE: &str = r#"Sos el clasificador de mensajes de un asistente de {{ vertical }} para "{{ business }}".
Clasificá el mensaje del cliente en UNA de estas intenciones:
greeting | info_services | info_prices | info_hours | book | cancel | reschedule | chitchat | other

Slots posibles: service_type, preferred_date, preferred_time, client_name, client_email, client_phone, staff_name, booking_id.
Slots ya conocidos (no los vuelvas a pedir ni los inventes de nuevo):
{{ known_slots }}

Ejemplos:
{{ examples }}

Mensaje del cliente ({{ locale }}): "{{ text }}"

Respondé SOLO un objeto JSON válido según el esquema extractor_v1:
{"intent": "...", "confidence": 0.0, "slots": {...}}
Incluí en slots únicamente lo que aparece en el mensaje. Sin texto libre."#;

/// Few-shot bank, six examples per intent across the closed set.
const EXTRACTOR_EXAMPLES: &str = r#"- "hola" → {"intent": "greeting", "confidence": 0.98, "slots": {}}
- "buenas tardes!" → {"intent": "greeting", "confidence": 0.97, "slots": {}}
- "buen día, ¿están?" → {"intent": "greeting", "confidence": 0.9, "slots": {}}
- "hola qué tal" → {"intent": "greeting", "confidence": 0.96, "slots": {}}
- "buenas" → {"intent": "greeting", "confidence": 0.95, "slots": {}}
- "holaa" → {"intent": "greeting", "confidence": 0.93, "slots": {}}
- "¿qué servicios ofrecen?" → {"intent": "info_services", "confidence": 0.95, "slots": {}}
- "¿hacen color?" → {"intent": "info_services", "confidence": 0.88, "slots": {"service_type": "color"}}
- "¿trabajan con depilación?" → {"intent": "info_services", "confidence": 0.9, "slots": {"service_type": "depilación"}}
- "qué cosas hacen" → {"intent": "info_services", "confidence": 0.85, "slots": {}}
- "¿tienen manicura?" → {"intent": "info_services", "confidence": 0.88, "slots": {"service_type": "manicura"}}
- "info de servicios porfa" → {"intent": "info_services", "confidence": 0.9, "slots": {}}
- "¿cuánto cuesta un corte?" → {"intent": "info_prices", "confidence": 0.95, "slots": {"service_type": "corte"}}
- "precios?" → {"intent": "info_prices", "confidence": 0.93, "slots": {}}
- "¿cuánto sale el brushing?" → {"intent": "info_prices", "confidence": 0.94, "slots": {"service_type": "brushing"}}
- "¿qué tarifas manejan?" → {"intent": "info_prices", "confidence": 0.9, "slots": {}}
- "cuanto me cobran el color" → {"intent": "info_prices", "confidence": 0.92, "slots": {"service_type": "color"}}
- "pasame la lista de precios" → {"intent": "info_prices", "confidence": 0.93, "slots": {}}
- "¿a qué hora abren?" → {"intent": "info_hours", "confidence": 0.95, "slots": {}}
- "¿atienden los sábados?" → {"intent": "info_hours", "confidence": 0.92, "slots": {"preferred_date": "sábado"}}
- "horarios?" → {"intent": "info_hours", "confidence": 0.94, "slots": {}}
- "¿hasta qué hora están hoy?" → {"intent": "info_hours", "confidence": 0.9, "slots": {"preferred_date": "hoy"}}
- "¿abren el domingo?" → {"intent": "info_hours", "confidence": 0.91, "slots": {"preferred_date": "domingo"}}
- "qué horario tienen al mediodía" → {"intent": "info_hours", "confidence": 0.88, "slots": {}}
- "quiero turno mañana 15hs" → {"intent": "book", "confidence": 0.95, "slots": {"preferred_date": "mañana", "preferred_time": "15hs"}}
- "reservar corte el viernes a las 10" → {"intent": "book", "confidence": 0.94, "slots": {"service_type": "corte", "preferred_date": "viernes", "preferred_time": "a las 10"}}
- "¿me das una cita para pasado mañana?" → {"intent": "book", "confidence": 0.92, "slots": {"preferred_date": "pasado mañana"}}
- "soy Ana, quiero turno, ana@mail.com" → {"intent": "book", "confidence": 0.93, "slots": {"client_name": "Ana", "client_email": "ana@mail.com"}}
- "agendame masaje el 15/8 3pm" → {"intent": "book", "confidence": 0.94, "slots": {"service_type": "masaje", "preferred_date": "15/8", "preferred_time": "3pm"}}
- "quiero sacar hora con Lucía" → {"intent": "book", "confidence": 0.9, "slots": {"staff_name": "Lucía"}}
- "cancelar mi turno" → {"intent": "cancel", "confidence": 0.95, "slots": {}}
- "quiero dar de baja la reserva bk-3f9a" → {"intent": "cancel", "confidence": 0.94, "slots": {"booking_id": "bk-3f9a"}}
- "anulá el turno de mañana" → {"intent": "cancel", "confidence": 0.92, "slots": {"preferred_date": "mañana"}}
- "no voy a poder ir, cancelalo" → {"intent": "cancel", "confidence": 0.9, "slots": {}}
- "cancelame la cita bk-77aa" → {"intent": "cancel", "confidence": 0.95, "slots": {"booking_id": "bk-77aa"}}
- "baja del turno por favor" → {"intent": "cancel", "confidence": 0.88, "slots": {}}
- "¿puedo pasar el turno para el jueves?" → {"intent": "reschedule", "confidence": 0.93, "slots": {"preferred_date": "jueves"}}
- "necesito reprogramar bk-12ab para el lunes 10hs" → {"intent": "reschedule", "confidence": 0.95, "slots": {"booking_id": "bk-12ab", "preferred_date": "lunes", "preferred_time": "10hs"}}
- "cambiar mi turno de las 15 a las 17" → {"intent": "reschedule", "confidence": 0.9, "slots": {"preferred_time": "17"}}
- "mover el turno al viernes" → {"intent": "reschedule", "confidence": 0.92, "slots": {"preferred_date": "viernes"}}
- "reagendar para pasado mañana" → {"intent": "reschedule", "confidence": 0.92, "slots": {"preferred_date": "pasado mañana"}}
- "¿se puede correr la cita una hora?" → {"intent": "reschedule", "confidence": 0.85, "slots": {}}
- "jaja genial" → {"intent": "chitchat", "confidence": 0.85, "slots": {}}
- "gracias!!" → {"intent": "chitchat", "confidence": 0.9, "slots": {}}
- "dale, perfecto" → {"intent": "chitchat", "confidence": 0.85, "slots": {}}
- "sos un genio" → {"intent": "chitchat", "confidence": 0.85, "slots": {}}
- "ok" → {"intent": "chitchat", "confidence": 0.8, "slots": {}}
- "nos vemos!" → {"intent": "chitchat", "confidence": 0.85, "slots": {}}
- "¿me prestás plata?" → {"intent": "other", "confidence": 0.7, "slots": {}}
- "asdkjhasd" → {"intent": "other", "confidence": 0.6, "slots": {}}
- "¿venden productos?" → {"intent": "other", "confidence": 0.65, "slots": {}}
- "¿dónde queda el local?" → {"intent": "other", "confidence": 0.7, "slots": {}}
- "quiero hablar con una persona" → {"intent": "other", "confidence": 0.75, "slots": {}}
- "me equivoqué de número" → {"intent": "other", "confidence": 0.7, "slots": {}}"#;

/// Render the extractor prompt for a snapshot.
pub fn extractor_prompt(snapshot: &ConversationSnapshot) -> String {
    let known_slots = if snapshot.state.slots.is_empty() {
        "(ninguno)".to_string()
    } else {
        snapshot
            .state
            .slots
            .iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let env = Environment::new();
    env.template_from_str(EXTRACTOR_TEMPLATE)
        .and_then(|tmpl| {
            tmpl.render(context! {
                vertical => snapshot.context.vertical,
                business => snapshot.context.business_name,
                locale => snapshot.user_message.locale,
                known_slots => known_slots,
                examples => EXTRACTOR_EXAMPLES,
                text => snapshot.user_message.text,
            })
        })
        .unwrap_or_else(|_| {
            format!(
                "Clasificá el mensaje \"{}\" en una intención (greeting, info_services, \
                 info_prices, info_hours, book, cancel, reschedule, chitchat, other) y \
                 extraé slots. Respondé SOLO JSON extractor_v1.",
                snapshot.user_message.text
            )
        })
}
