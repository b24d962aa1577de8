//! End-to-end pipeline scenarios: full router → orchestrator → broker runs
//! against the in-process transport and a scripted model.

use decisor::decision::Route;
use decisor::llm::ScriptedLlm;
use decisor::manifest::{StaticManifestSource, ToolManifest};
use decisor::schema::EXTRACTOR_V1;
use decisor::snapshot::{ConversationSnapshot, ConversationState, MessageContext, UserMessage};
use decisor::Intent;
use decisor_engine::{
    CanaryFlags, CanaryRouter, InProcessTransport, PipelineSettings, build_router, canary_handle,
};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    router: CanaryRouter,
    llm: Arc<ScriptedLlm>,
    transport: Arc<InProcessTransport>,
}

fn harness(enable: bool, percent: u8) -> Harness {
    let llm = Arc::new(ScriptedLlm::new());
    let transport = Arc::new(InProcessTransport::new());
    let source = Arc::new(StaticManifestSource::new().with_default(ToolManifest::servicios_default()));
    let router = build_router(
        llm.clone(),
        source,
        transport.clone(),
        canary_handle(CanaryFlags {
            enable_slm_pipeline: enable,
            slm_canary_percent: percent,
        }),
        PipelineSettings::default(),
    );
    Harness {
        router,
        llm,
        transport,
    }
}

fn snapshot(conversation_id: &str, message_id: &str, text: &str) -> ConversationSnapshot {
    ConversationSnapshot {
        workspace_id: "ws-lumen".into(),
        conversation_id: conversation_id.into(),
        request_id: format!("req-{message_id}"),
        user_message: UserMessage {
            text: text.into(),
            message_id: message_id.into(),
            from: "+5491155550001".into(),
            to: "+5491155550000".into(),
            locale: "es-AR".into(),
            timestamp_iso: "2026-08-01T14:30:00-03:00".into(),
        },
        context: MessageContext {
            platform: "twilio".into(),
            channel: "whatsapp".into(),
            business_name: "Estudio Lumen".into(),
            vertical: "servicios".into(),
        },
        state: ConversationState::default(),
    }
}

#[tokio::test]
async fn greeting_over_the_slm_route() {
    let h = harness(true, 100);
    h.llm.enqueue(
        EXTRACTOR_V1,
        json!({"intent": "greeting", "confidence": 0.97, "slots": {}}),
    );
    let decision = h
        .router
        .decide(&snapshot("conv-saludo", "m-1", "hola"))
        .await
        .unwrap();

    assert_eq!(decision.telemetry.route, Route::SlmPipeline);
    assert_eq!(decision.telemetry.intent, Intent::Greeting);
    assert!(decision.tool_calls.is_empty());
    assert!(decision.patch.set.is_empty());
    assert!(!decision.assistant.text.is_empty());
    assert!(decision.assistant.text.chars().count() <= 200);
}

#[tokio::test]
async fn price_query_over_the_legacy_route() {
    let h = harness(true, 0);
    let decision = h
        .router
        .decide(&snapshot("conv-precio", "m-1", "cuánto cuesta un corte"))
        .await
        .unwrap();

    assert_eq!(decision.telemetry.route, Route::Legacy);
    assert_eq!(decision.telemetry.intent, Intent::InfoPrices);
    assert_eq!(decision.tool_calls.len(), 1);
    let call = &decision.tool_calls[0];
    assert_eq!(call.tool, "get_service_packages");
    assert_eq!(call.args["workspace_id"], "ws-lumen");
    assert!(call.observation.ok);
    // caps: at most three services named
    assert!(decision.assistant.text.contains("Corte"));
    assert!(!decision.assistant.text.contains("Tratamiento"));
}

#[tokio::test]
async fn incomplete_booking_checks_availability_and_asks_one_question() {
    let h = harness(true, 100);
    h.llm.enqueue(
        EXTRACTOR_V1,
        json!({
            "intent": "book",
            "confidence": 0.95,
            "slots": {"preferred_date": "mañana", "preferred_time": "15hs"}
        }),
    );
    // planner left unscripted: the model path degrades to the rule table
    let decision = h
        .router
        .decide(&snapshot("conv-turno", "m-1", "quiero turno mañana 15hs"))
        .await
        .unwrap();

    assert_eq!(decision.telemetry.intent, Intent::Book);
    let tools: Vec<&str> = decision.tool_calls.iter().map(|c| c.tool.as_str()).collect();
    assert!(tools.contains(&"check_service_availability"));
    assert!(!tools.contains(&"book_appointment"));
    // the normalised date reached the tool
    assert_eq!(
        decision.tool_calls[0].args["preferred_date"],
        "2026-08-02"
    );
    // exactly one targeted question
    assert_eq!(decision.assistant.text.matches('?').count(), 1);
}

#[tokio::test]
async fn complete_booking_executes_sequentially_and_echoes_the_booking() {
    let h = harness(true, 100);
    h.llm.enqueue(
        EXTRACTOR_V1,
        json!({
            "intent": "book",
            "confidence": 0.96,
            "slots": {
                "service_type": "corte",
                "preferred_date": "mañana",
                "preferred_time": "15hs",
                "client_name": "Ana",
                "client_email": "a@b.com"
            }
        }),
    );
    let decision = h
        .router
        .decide(&snapshot(
            "conv-reserva",
            "m-1",
            "reservar corte mañana 15hs, soy Ana a@b.com",
        ))
        .await
        .unwrap();

    let tools: Vec<&str> = decision.tool_calls.iter().map(|c| c.tool.as_str()).collect();
    assert_eq!(tools, ["check_service_availability", "book_appointment"]);
    let booking_id = decision
        .patch
        .set
        .get("booking_id")
        .expect("patch carries the booking id")
        .clone();
    assert!(decision.assistant.text.contains(&booking_id));
    assert!(decision.assistant.text.contains("2026-08-02"));
    assert!(decision.assistant.text.contains("15:00"));
    assert!(decision.assistant.text.chars().count() <= 200);
    // the booking cycle resets date and time
    assert!(decision.patch.remove.is_empty() || !decision.patch.remove.contains("booking_id"));
    assert!(decision
        .patch
        .cache_invalidation_keys
        .contains("availability:2026-08-02"));
}

#[tokio::test]
async fn routing_is_sticky_for_a_conversation() {
    let h = harness(true, 10);
    h.llm.enqueue(
        EXTRACTOR_V1,
        json!({"intent": "greeting", "confidence": 0.9, "slots": {}}),
    );
    let first = h
        .router
        .decide(&snapshot("conv-X", "m-1", "hola"))
        .await
        .unwrap();
    let second = h
        .router
        .decide(&snapshot("conv-X", "m-2", "hola de nuevo"))
        .await
        .unwrap();
    assert_eq!(first.telemetry.route, second.telemetry.route);
}

#[tokio::test]
async fn repeated_booking_message_invokes_the_write_once() {
    let h = harness(true, 100);
    h.llm.enqueue(
        EXTRACTOR_V1,
        json!({
            "intent": "book",
            "confidence": 0.96,
            "slots": {
                "service_type": "corte",
                "preferred_date": "mañana",
                "preferred_time": "15hs",
                "client_name": "Ana",
                "client_email": "a@b.com"
            }
        }),
    );
    let snap = snapshot(
        "conv-idem",
        "m-77",
        "reservar corte mañana 15hs, soy Ana a@b.com",
    );
    let first = h.router.decide(&snap).await.unwrap();
    let second = h.router.decide(&snap).await.unwrap();

    assert_eq!(h.transport.invocations("book_appointment"), 1);
    assert_eq!(
        first.patch.set.get("booking_id"),
        second.patch.set.get("booking_id")
    );
}

#[tokio::test]
async fn every_response_satisfies_the_wire_bounds() {
    let h = harness(true, 50);
    h.llm.enqueue(
        EXTRACTOR_V1,
        json!({"intent": "info_hours", "confidence": 0.9, "slots": {}}),
    );
    for (i, text) in ["hola", "cuánto sale", "horarios?", "quiero turno mañana"]
        .iter()
        .enumerate()
    {
        let decision = h
            .router
            .decide(&snapshot(&format!("conv-{i}"), "m-1", text))
            .await
            .unwrap();
        assert!(decision.tool_calls.len() <= 3);
        assert!(!decision.assistant.text.is_empty());
        assert!(decision.assistant.text.chars().count() <= 600);
        assert!(decision.assistant.suggested_replies.len() <= 5);
        assert!(decision.telemetry.total_ms >= decision.telemetry.stage_ms.max());
    }
}
