//! Payload builders for change-request events.

use serde_json::{Value, json};
use unleash_cr_core::payload::SegmentId;

/// Payload of an `addStrategy` event.
#[must_use]
pub fn add_strategy(name: &str, segments: &[SegmentId]) -> Value {
    json!({
        "name": name,
        "constraints": [],
        "parameters": {},
        "segments": segments,
    })
}

/// Payload of an `updateStrategy` event for the persisted strategy `id`.
#[must_use]
pub fn update_strategy(id: &str, name: &str, segments: &[SegmentId]) -> Value {
    json!({
        "id": id,
        "name": name,
        "constraints": [],
        "parameters": {},
        "segments": segments,
    })
}
