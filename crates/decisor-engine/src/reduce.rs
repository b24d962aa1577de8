//! State reducer: folds extracted slots and tool observations into a
//! minimal, deterministic slot patch.
//!
//! Pure function of its inputs. Extracted slots apply first; observations
//! are more authoritative and win on conflict. Unchanged values never show
//! up in the patch.

use decisor::observation::ToolObservation;
use decisor::patch::SlotPatch;
use decisor::slots::{SlotKey, Slots};

/// Compute the patch for one turn.
pub fn reduce(prev: &Slots, extracted: &Slots, observations: &[ToolObservation]) -> SlotPatch {
    let mut patch = SlotPatch::default();

    for (key, value) in extracted {
        set_if_changed(&mut patch, prev, key, value);
    }

    for obs in observations.iter().filter(|o| o.ok) {
        match obs.tool.as_str() {
            "book_appointment" => {
                if let Some(id) = obs.result_str("booking_id") {
                    set_if_changed(&mut patch, prev, SlotKey::BookingId.as_str(), id);
                }
                // The booking cycle is complete: date and time start fresh,
                // and availability caches for that date are stale now.
                if let Some(date) = booked_date(obs, extracted, prev) {
                    patch
                        .cache_invalidation_keys
                        .insert(format!("availability:{date}"));
                }
                clear(&mut patch, prev, SlotKey::PreferredDate.as_str());
                clear(&mut patch, prev, SlotKey::PreferredTime.as_str());
            }
            "reschedule_appointment" => {
                if let Some(id) = obs.result_str("booking_id") {
                    set_if_changed(&mut patch, prev, SlotKey::BookingId.as_str(), id);
                }
                if let Some(date) = booked_date(obs, extracted, prev) {
                    patch
                        .cache_invalidation_keys
                        .insert(format!("availability:{date}"));
                }
                clear(&mut patch, prev, SlotKey::PreferredDate.as_str());
                clear(&mut patch, prev, SlotKey::PreferredTime.as_str());
            }
            "cancel_appointment" => {
                clear(&mut patch, prev, SlotKey::BookingId.as_str());
                if let Some(date) = obs.result_str("date") {
                    patch
                        .cache_invalidation_keys
                        .insert(format!("availability:{date}"));
                }
            }
            _ => {}
        }
    }

    patch
}

fn booked_date<'a>(
    obs: &'a ToolObservation,
    extracted: &'a Slots,
    prev: &'a Slots,
) -> Option<&'a str> {
    obs.result_str("date")
        .filter(|d| !d.is_empty())
        .or_else(|| extracted.get(SlotKey::PreferredDate.as_str()).map(String::as_str))
        .or_else(|| prev.get(SlotKey::PreferredDate.as_str()).map(String::as_str))
}

fn set_if_changed(patch: &mut SlotPatch, prev: &Slots, key: &str, value: &str) {
    if prev.get(key).map(String::as_str) == Some(value) {
        patch.set.remove(key);
        return;
    }
    patch.set.insert(key.to_string(), value.to_string());
}

/// Drop a slot: cancel any pending set, and remove it if the store has it.
fn clear(patch: &mut SlotPatch, prev: &Slots, key: &str) {
    patch.set.remove(key);
    if prev.contains_key(key) {
        patch.remove.insert(key.to_string());
    }
}
