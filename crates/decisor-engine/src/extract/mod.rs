//! Extractor: utterance + snapshot → {intent, slots, confidence}.
//!
//! The model path validates against `extractor_v1` and normalises what it
//! gets back. Transport failure, invalid output after the repair retry, or
//! confidence below 0.5 all land on the keyword fallback. This stage never
//! fails.

pub mod heuristics;
pub mod normalize;
pub mod prompts;

use decisor::llm::LlmClient;
use decisor::schema::EXTRACTOR_V1;
use decisor::slots::Slots;
use decisor::snapshot::ConversationSnapshot;
use decisor::Intent;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Confidence under which the model's answer is discarded.
pub const CONFIDENCE_FLOOR: f64 = 0.5;

/// Confidence reported by the keyword fallback.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

/// What the pipeline knows after this stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub intent: Intent,
    pub confidence: f64,
    /// Newly extracted slots, already normalised.
    pub slots: Slots,
    /// True when the keyword fallback produced this extraction.
    pub used_fallback: bool,
}

#[derive(Deserialize)]
struct WireExtraction {
    intent: String,
    confidence: f64,
    #[serde(default)]
    slots: Slots,
}

/// Run the extractor within its budget.
pub async fn run(
    llm: &dyn LlmClient,
    snapshot: &ConversationSnapshot,
    budget: Duration,
) -> Extraction {
    let prompt = prompts::extractor_prompt(snapshot);
    match llm.generate_json(&prompt, EXTRACTOR_V1, budget).await {
        Ok(value) => match from_model_output(value, snapshot) {
            Some(extraction) if extraction.confidence >= CONFIDENCE_FLOOR => extraction,
            Some(extraction) => {
                debug!(
                    confidence = extraction.confidence,
                    "extractor confidence below floor, using keyword fallback"
                );
                heuristic(snapshot)
            }
            None => heuristic(snapshot),
        },
        Err(error) => {
            debug!(kind = error.kind(), "extractor model unavailable, using keyword fallback");
            heuristic(snapshot)
        }
    }
}

fn from_model_output(value: Value, snapshot: &ConversationSnapshot) -> Option<Extraction> {
    let wire: WireExtraction = serde_json::from_value(value).ok()?;
    let intent = Intent::parse(&wire.intent)?;
    let mut slots = wire.slots;
    let today = normalize::reference_date(
        snapshot.user_message.timestamp(),
        &snapshot.user_message.locale,
    );
    normalize::normalize_slots(&mut slots, today);
    Some(Extraction {
        intent,
        confidence: wire.confidence.clamp(0.0, 1.0),
        slots,
        used_fallback: false,
    })
}

/// The keyword fallback, also used directly by the Legacy pipeline.
pub fn heuristic(snapshot: &ConversationSnapshot) -> Extraction {
    let text = &snapshot.user_message.text;
    let mut slots = heuristics::extract_slots(text);
    let today = normalize::reference_date(
        snapshot.user_message.timestamp(),
        &snapshot.user_message.locale,
    );
    normalize::normalize_slots(&mut slots, today);
    Extraction {
        intent: heuristics::classify(text),
        confidence: FALLBACK_CONFIDENCE,
        slots,
        used_fallback: true,
    }
}
