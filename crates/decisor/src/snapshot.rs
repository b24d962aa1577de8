//! The conversational snapshot consumed once per request.

use crate::observation::ToolObservation;
use crate::slots::Slots;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Upper bound on inbound message text. Anything longer is cut at a char
/// boundary before entering the pipeline.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Upper bound on prior observations carried in the snapshot state.
pub const MAX_CARRIED_OBSERVATIONS: usize = 8;

/// The inbound user message as delivered by the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub locale: String,
    pub timestamp_iso: String,
}

impl UserMessage {
    /// Parse the message timestamp. Normalisation of relative dates
    /// ("mañana") is computed against this instant, never against the
    /// server clock, so results are reproducible.
    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.timestamp_iso, &Rfc3339).ok()
    }
}

/// Channel and tenant context around the message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContext {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub vertical: String,
}

/// Mutable conversation state as the collaborator store last saw it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub fsm_state: Option<String>,
    #[serde(default)]
    pub slots: Slots,
    #[serde(default)]
    pub last_k_observations: Vec<ToolObservation>,
}

/// Everything the pipeline needs for one decision. Immutable per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub workspace_id: String,
    pub conversation_id: String,
    pub request_id: String,
    pub user_message: UserMessage,
    pub context: MessageContext,
    pub state: ConversationState,
}

impl ConversationSnapshot {
    /// Enforce the snapshot bounds in place: message text capped at
    /// [`MAX_MESSAGE_BYTES`], carried observations at
    /// [`MAX_CARRIED_OBSERVATIONS`] (keeping the most recent).
    pub fn clamp(&mut self) {
        if self.user_message.text.len() > MAX_MESSAGE_BYTES {
            let mut cut = MAX_MESSAGE_BYTES;
            while !self.user_message.text.is_char_boundary(cut) {
                cut -= 1;
            }
            self.user_message.text.truncate(cut);
        }
        let carried = self.state.last_k_observations.len();
        if carried > MAX_CARRIED_OBSERVATIONS {
            self.state
                .last_k_observations
                .drain(..carried - MAX_CARRIED_OBSERVATIONS);
        }
    }
}
