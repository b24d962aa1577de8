//! Conversation slots: the structured facts extracted from chat.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Slot storage. A `BTreeMap` so that every serialisation of the same slot
/// set is byte-identical regardless of insertion order.
pub type Slots = BTreeMap<String, String>;

/// The closed set of slot names the pipeline knows how to fill.
///
/// Snapshots may carry workspace-specific extra keys (they pass through the
/// reducer untouched); everything the extractor, planner and policy engine
/// reason about is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    ServiceType,
    PreferredDate,
    PreferredTime,
    ClientName,
    ClientEmail,
    ClientPhone,
    StaffName,
    BookingId,
}

impl SlotKey {
    /// Every known slot key, in declaration order.
    pub const ALL: [SlotKey; 8] = [
        SlotKey::ServiceType,
        SlotKey::PreferredDate,
        SlotKey::PreferredTime,
        SlotKey::ClientName,
        SlotKey::ClientEmail,
        SlotKey::ClientPhone,
        SlotKey::StaffName,
        SlotKey::BookingId,
    ];

    /// Wire name, matching the schema enums.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKey::ServiceType => "service_type",
            SlotKey::PreferredDate => "preferred_date",
            SlotKey::PreferredTime => "preferred_time",
            SlotKey::ClientName => "client_name",
            SlotKey::ClientEmail => "client_email",
            SlotKey::ClientPhone => "client_phone",
            SlotKey::StaffName => "staff_name",
            SlotKey::BookingId => "booking_id",
        }
    }

    /// Parse a wire name into a known key.
    pub fn parse(s: &str) -> Option<SlotKey> {
        SlotKey::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up a known slot in a slot map.
pub fn slot<'a>(slots: &'a Slots, key: SlotKey) -> Option<&'a str> {
    slots.get(key.as_str()).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip() {
        for key in SlotKey::ALL {
            assert_eq!(SlotKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(SlotKey::parse("favourite_colour"), None);
    }

    #[test]
    fn slot_lookup() {
        let mut slots = Slots::new();
        slots.insert("preferred_date".into(), "2026-08-02".into());
        assert_eq!(slot(&slots, SlotKey::PreferredDate), Some("2026-08-02"));
        assert_eq!(slot(&slots, SlotKey::ClientEmail), None);
    }
}
