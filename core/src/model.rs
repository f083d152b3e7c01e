//! Records read from, and returned by, the change-request read models.

use crate::payload::{SegmentId, StrategyChange};
use crate::state::ChangeRequestState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row of `change_requests`.
///
/// `state` is kept as the raw stored string so that unknown states can be
/// detected instead of being coerced into a known one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Change request id
    pub id: i64,
    /// Owning project
    pub project: String,
    /// Target environment
    pub environment: String,
    /// Raw lifecycle state
    pub state: String,
    /// Display title
    pub title: Option<String>,
    /// Author (`users.id`)
    pub created_by: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Approvals required before it can be applied
    pub min_approvals: i32,
}

impl ChangeRequest {
    /// Create a change request in a known state.
    #[must_use]
    pub fn new(
        id: i64,
        project: impl Into<String>,
        environment: impl Into<String>,
        state: ChangeRequestState,
    ) -> Self {
        Self {
            id,
            project: project.into(),
            environment: environment.into(),
            state: state.as_str().to_string(),
            title: None,
            created_by: 1,
            created_at: Utc::now(),
            min_approvals: 1,
        }
    }

    /// Set the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Replace the stored state string, known or not.
    #[must_use]
    pub fn with_raw_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }
}

/// A row of `change_request_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequestEvent {
    /// Owning change request
    pub change_request_id: i64,
    /// Feature the event targets
    pub feature: String,
    /// Action tag (`addStrategy`, `updateStrategy`, ...)
    pub action: String,
    /// Raw payload
    pub payload: Value,
    /// Author (`users.id`)
    pub created_by: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ChangeRequestEvent {
    /// Create an event for `change_request_id`.
    #[must_use]
    pub fn new(
        change_request_id: i64,
        feature: impl Into<String>,
        action: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            change_request_id,
            feature: feature.into(),
            action: action.into(),
            payload,
            created_by: 1,
            created_at: Utc::now(),
        }
    }
}

/// A strategy event joined with the change request that owns it.
///
/// This is the unit the usage aggregation works on; the payload has already
/// been interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStrategyEvent {
    /// Owning change request
    pub change_request_id: i64,
    /// Owning change request title
    pub change_request_title: Option<String>,
    /// Raw state of the owning change request
    pub state: String,
    /// Project of the owning change request
    pub project: String,
    /// Environment of the owning change request
    pub environment: String,
    /// Feature the event targets
    pub feature: String,
    /// Interpreted payload
    pub change: StrategyChange,
}

impl PendingStrategyEvent {
    /// Join an event with its change request.
    #[must_use]
    pub fn from_parts(change_request: &ChangeRequest, event: &ChangeRequestEvent) -> Self {
        Self {
            change_request_id: change_request.id,
            change_request_title: change_request.title.clone(),
            state: change_request.state.clone(),
            project: change_request.project.clone(),
            environment: change_request.environment.clone(),
            feature: event.feature.clone(),
            change: StrategyChange::interpret(&event.action, &event.payload),
        }
    }
}

/// Reference to a change request, as shown next to a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRequestRef {
    /// Change request id
    pub id: i64,
    /// Change request title
    pub title: Option<String>,
}

/// A strategy proposed or modified by one or more active change requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestStrategy {
    /// Project of the proposing change request
    pub project_id: String,
    /// Feature the strategy belongs to
    pub feature_name: String,
    /// Strategy name
    pub strategy_name: String,
    /// Environment of the proposing change request
    pub environment: String,
    /// Persisted strategy id; absent for strategies that don't exist yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Change requests in which the strategy appears
    pub change_requests: Vec<ChangeRequestRef>,
}

impl ChangeRequestStrategy {
    /// Ids of the change requests in which the strategy appears.
    pub fn change_request_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.change_requests.iter().map(|cr| cr.id)
    }
}

/// A persisted strategy that uses a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStrategy {
    /// Strategy id
    pub id: String,
    /// Project of the feature
    pub project_id: String,
    /// Feature the strategy belongs to
    pub feature_name: String,
    /// Strategy name
    pub strategy_name: String,
    /// Environment of the strategy
    pub environment: String,
}

/// A persisted strategy–segment link on a feature that is not archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSegmentUsage {
    /// Segment id
    pub segment_id: SegmentId,
    /// Feature using the segment
    pub feature_name: String,
    /// Project of that feature
    pub project_name: String,
}

/// How widely a segment is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentUsage {
    /// Distinct features referencing the segment
    pub used_in_features: usize,
    /// Distinct projects referencing the segment
    pub used_in_projects: usize,
}

/// An environment of a project with change requests configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestEnvironment {
    /// Environment name
    pub environment: String,
    /// Approvals required for change requests in it
    pub required_approvals: i32,
}

/// A row of `dependent_features`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentFeature {
    /// Parent feature
    pub parent: String,
    /// Child feature
    pub child: String,
    /// Whether the parent must be enabled (`true`) or disabled (`false`)
    pub enabled: bool,
    /// Parent variants the child depends on; empty means any
    pub variants: Vec<String>,
}

impl DependentFeature {
    /// Child depends on `parent` being enabled, with any variant.
    #[must_use]
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            enabled: true,
            variants: Vec::new(),
        }
    }

    /// Set whether the parent must be enabled.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Restrict the dependency to specific parent variants.
    #[must_use]
    pub fn with_variants(mut self, variants: Vec<String>) -> Self {
        self.variants = variants;
        self
    }
}
