//! Closed intent set for the servicios vertical.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What the user is trying to do, as classified by the extractor.
///
/// The planner's rule table, the few-shot prompt banks and the
/// `extractor_v1` schema all enumerate exactly these values. Anything the
/// model cannot place lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    InfoServices,
    InfoPrices,
    InfoHours,
    Book,
    Cancel,
    Reschedule,
    Chitchat,
    Other,
}

impl Intent {
    /// Every intent, in schema order.
    pub const ALL: [Intent; 9] = [
        Intent::Greeting,
        Intent::InfoServices,
        Intent::InfoPrices,
        Intent::InfoHours,
        Intent::Book,
        Intent::Cancel,
        Intent::Reschedule,
        Intent::Chitchat,
        Intent::Other,
    ];

    /// Wire name, matching the `extractor_v1` schema enum.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::InfoServices => "info_services",
            Intent::InfoPrices => "info_prices",
            Intent::InfoHours => "info_hours",
            Intent::Book => "book",
            Intent::Cancel => "cancel",
            Intent::Reschedule => "reschedule",
            Intent::Chitchat => "chitchat",
            Intent::Other => "other",
        }
    }

    /// Parse a wire name. Unknown names map to `None`, not `Other`; the
    /// caller decides whether an unknown intent is a defect or a fallback.
    pub fn parse(s: &str) -> Option<Intent> {
        Intent::ALL.iter().copied().find(|i| i.as_str() == s)
    }
}

impl Default for Intent {
    fn default() -> Self {
        Intent::Other
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for intent in Intent::ALL {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("order_pizza"), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Intent::InfoPrices).unwrap();
        assert_eq!(json, "\"info_prices\"");
        let back: Intent = serde_json::from_str("\"reschedule\"").unwrap();
        assert_eq!(back, Intent::Reschedule);
    }
}
