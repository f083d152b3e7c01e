//! Interpretation of change-request event payloads.
//!
//! Change-request events store the proposed strategy as a JSON blob. The blob is
//! parsed once, at this boundary, into a [`StrategyChange`]; nothing downstream
//! looks at raw JSON. Payloads written by older schema versions, or that are
//! malformed, become [`StrategyChange::Ignored`] instead of errors.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Segment identifier (`segments.id`).
pub type SegmentId = i64;

/// Action tag of an event proposing a new strategy.
pub const ADD_STRATEGY: &str = "addStrategy";

/// Action tag of an event modifying a strategy.
pub const UPDATE_STRATEGY: &str = "updateStrategy";

/// Actions that can carry segment references.
pub const STRATEGY_ACTIONS: [&str; 2] = [ADD_STRATEGY, UPDATE_STRATEGY];

/// A strategy mutation proposed by a change-request event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyChange {
    /// A brand-new strategy; it has no stable identity yet.
    AddStrategy {
        /// Strategy name (e.g. `flexibleRollout`)
        strategy_name: String,
        /// Segments the proposed strategy would use
        segments: Vec<SegmentId>,
    },
    /// A change to a strategy.
    UpdateStrategy {
        /// Id of the persisted strategy being modified, when present
        strategy_id: Option<String>,
        /// Strategy name
        strategy_name: String,
        /// Segments the strategy would use after the change
        segments: Vec<SegmentId>,
    },
    /// Any other action, or a payload that could not be read.
    Ignored,
}

#[derive(Deserialize)]
struct StrategyPayload {
    #[serde(default, deserialize_with = "lenient_id")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient_name")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_segments")]
    segments: Vec<SegmentId>,
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// Only `segments` decides whether a payload references anything; a
// wrongly typed name must not hide them.
fn lenient_name<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

// `segments` from older payloads may be missing, null, a scalar, or contain
// stringified ids.
fn lenient_segments<'de, D>(deserializer: D) -> std::result::Result<Vec<SegmentId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect())
}

impl StrategyChange {
    /// Interpret a raw `(action, payload)` pair.
    ///
    /// Never fails: unsupported actions and unreadable payloads yield
    /// [`StrategyChange::Ignored`].
    #[must_use]
    pub fn interpret(action: &str, payload: &Value) -> Self {
        if !STRATEGY_ACTIONS.contains(&action) || !payload.is_object() {
            return Self::Ignored;
        }

        let parsed = match StrategyPayload::deserialize(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(action, error = %err, "Ignoring unreadable strategy payload");
                return Self::Ignored;
            }
        };

        let strategy_name = parsed.name.unwrap_or_default();
        if action == ADD_STRATEGY {
            Self::AddStrategy {
                strategy_name,
                segments: parsed.segments,
            }
        } else {
            Self::UpdateStrategy {
                strategy_id: parsed.id,
                strategy_name,
                segments: parsed.segments,
            }
        }
    }

    /// Segments referenced by the proposal (empty for ignored events).
    #[must_use]
    pub fn segments(&self) -> &[SegmentId] {
        match self {
            Self::AddStrategy { segments, .. } | Self::UpdateStrategy { segments, .. } => {
                segments.as_slice()
            }
            Self::Ignored => &[],
        }
    }

    /// Returns `true` if the proposal references `segment_id`.
    #[must_use]
    pub fn references(&self, segment_id: SegmentId) -> bool {
        self.segments().contains(&segment_id)
    }

    /// Id of the persisted strategy this proposal modifies, if any.
    #[must_use]
    pub fn existing_strategy_id(&self) -> Option<&str> {
        match self {
            Self::UpdateStrategy { strategy_id, .. } => strategy_id.as_deref(),
            Self::AddStrategy { .. } | Self::Ignored => None,
        }
    }

    /// Name of the proposed strategy.
    #[must_use]
    pub fn strategy_name(&self) -> Option<&str> {
        match self {
            Self::AddStrategy { strategy_name, .. } | Self::UpdateStrategy { strategy_name, .. } => {
                Some(strategy_name.as_str())
            }
            Self::Ignored => None,
        }
    }
}
