//! Caller-side guards composed from the read models.
//!
//! The usage and access read models stay independent; these helpers are how
//! segment and feature services combine them before a mutation. Each guard
//! re-queries on every call.

use crate::access::User;
use crate::error::GuardError;
use crate::model::{ChangeRequestStrategy, SegmentStrategy};
use crate::payload::SegmentId;
use crate::read_model::{
    ChangeRequestAccessReadModel, ChangeRequestSegmentUsageReadModel, SegmentStrategyReader,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Guard configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Whether change requests exist in this installation at all.
    ///
    /// When `false`, change-request usage is reported as empty and never
    /// blocks anything.
    ///
    /// Default: `true`
    pub change_requests_enabled: bool,
}

impl GuardConfig {
    /// Create a configuration with change requests enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            change_requests_enabled: true,
        }
    }

    /// Enable or disable change-request awareness.
    #[must_use]
    pub const fn with_change_requests(mut self, enabled: bool) -> Self {
        self.change_requests_enabled = enabled;
        self
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Refuse a direct mutation when change requests protect the target.
///
/// With an environment the environment rule applies; without one, the
/// project rule.
///
/// # Errors
///
/// Returns [`GuardError::SkipChangeRequest`] when the user may not bypass, or
/// [`GuardError::ReadModel`] if the decision could not be made.
pub async fn stop_when_change_requests_enabled(
    access: &dyn ChangeRequestAccessReadModel,
    project: &str,
    environment: Option<&str>,
    user: Option<&User>,
) -> Result<(), GuardError> {
    let can_bypass = match environment {
        Some(environment) => access.can_bypass_change_request(project, environment, user).await?,
        None => access.can_bypass_change_request_for_project(project, user).await?,
    };

    if can_bypass {
        return Ok(());
    }

    let err = GuardError::SkipChangeRequest {
        project: project.to_string(),
        environment: environment.map(ToString::to_string),
    };
    tracing::warn!(project, environment, user_id = user.map(|u| u.id), "Direct change blocked by change requests");
    metrics::counter!("change_requests.guard.blocked", "reason" => err.reason()).increment(1);
    Err(err)
}

/// Strategies that use a segment, persisted and proposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategiesUsingSegment {
    /// Persisted strategies
    pub strategies: Vec<SegmentStrategy>,
    /// Strategies in active change requests
    pub change_request_strategies: Vec<ChangeRequestStrategy>,
}

impl StrategiesUsingSegment {
    /// Returns `true` if nothing uses the segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty() && self.change_request_strategies.is_empty()
    }

    /// Distinct projects using the segment, sorted.
    #[must_use]
    pub fn projects(&self) -> BTreeSet<&str> {
        self.strategies
            .iter()
            .map(|s| s.project_id.as_str())
            .chain(self.change_request_strategies.iter().map(|s| s.project_id.as_str()))
            .collect()
    }

    /// Distinct features using the segment, sorted.
    #[must_use]
    pub fn features(&self) -> BTreeSet<&str> {
        self.strategies
            .iter()
            .map(|s| s.feature_name.as_str())
            .chain(self.change_request_strategies.iter().map(|s| s.feature_name.as_str()))
            .collect()
    }
}

/// Guards for segment deletion and project changes.
#[derive(Clone)]
pub struct SegmentGuard {
    strategies: Arc<dyn SegmentStrategyReader>,
    usage: Arc<dyn ChangeRequestSegmentUsageReadModel>,
    config: GuardConfig,
}

impl SegmentGuard {
    /// Create a guard over the persisted strategies and change-request usage.
    #[must_use]
    pub fn new(
        strategies: Arc<dyn SegmentStrategyReader>,
        usage: Arc<dyn ChangeRequestSegmentUsageReadModel>,
        config: GuardConfig,
    ) -> Self {
        Self {
            strategies,
            usage,
            config,
        }
    }

    /// Every strategy using the segment.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ReadModel`] if a store fails.
    pub async fn strategies_using_segment(
        &self,
        segment_id: SegmentId,
    ) -> Result<StrategiesUsingSegment, GuardError> {
        let strategies = self.strategies.get_strategies_by_segment(segment_id).await?;
        let change_request_strategies = if self.config.change_requests_enabled {
            self.usage
                .get_strategies_used_in_active_change_requests(segment_id)
                .await?
        } else {
            Vec::new()
        };

        Ok(StrategiesUsingSegment {
            strategies,
            change_request_strategies,
        })
    }

    /// Returns `true` if a persisted strategy or an active change request
    /// uses the segment.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ReadModel`] if a store fails.
    pub async fn is_in_use(&self, segment_id: SegmentId) -> Result<bool, GuardError> {
        if !self.strategies.get_strategies_by_segment(segment_id).await?.is_empty() {
            return Ok(true);
        }
        if !self.config.change_requests_enabled {
            return Ok(false);
        }
        Ok(self
            .usage
            .is_segment_used_in_active_change_requests(segment_id)
            .await?)
    }

    /// Refuse to delete a segment that is still in use.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::SegmentInUse`] listing the referencing features
    /// and change requests, or [`GuardError::ReadModel`] if a store fails.
    pub async fn ensure_segment_not_in_use(&self, segment_id: SegmentId) -> Result<(), GuardError> {
        if !self.is_in_use(segment_id).await? {
            return Ok(());
        }

        let usage = self.strategies_using_segment(segment_id).await?;
        let change_request_ids: BTreeSet<i64> = usage
            .change_request_strategies
            .iter()
            .flat_map(|s| s.change_request_ids())
            .collect();
        let err = GuardError::SegmentInUse {
            segment_id,
            features: usage.features().into_iter().map(ToString::to_string).collect(),
            change_request_ids: change_request_ids.into_iter().collect(),
        };

        tracing::warn!(segment_id, error = %err, "Segment deletion blocked");
        metrics::counter!("change_requests.guard.blocked", "reason" => err.reason()).increment(1);
        Err(err)
    }

    /// Check that a segment may be scoped to `project`.
    ///
    /// A global segment (`project` is `None`) is always allowed. A project
    /// segment is allowed only if no other project uses it.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidSegmentProject`] listing the projects in
    /// use, or [`GuardError::ReadModel`] if a store fails.
    pub async fn validate_segment_project(
        &self,
        segment_id: SegmentId,
        project: Option<&str>,
    ) -> Result<(), GuardError> {
        let Some(project) = project else {
            return Ok(());
        };

        let usage = self.strategies_using_segment(segment_id).await?;
        let projects = usage.projects();
        if projects.len() > 1 || (projects.len() == 1 && !projects.contains(project)) {
            let err = GuardError::InvalidSegmentProject {
                projects: projects.into_iter().map(ToString::to_string).collect(),
            };
            metrics::counter!("change_requests.guard.blocked", "reason" => err.reason()).increment(1);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeRequestRef;

    fn cr_strategy(project: &str, feature: &str) -> ChangeRequestStrategy {
        ChangeRequestStrategy {
            project_id: project.to_string(),
            feature_name: feature.to_string(),
            strategy_name: "default".to_string(),
            environment: "production".to_string(),
            id: None,
            change_requests: vec![ChangeRequestRef { id: 1, title: None }],
        }
    }

    #[test]
    fn projects_and_features_are_distinct_and_sorted() {
        let usage = StrategiesUsingSegment {
            strategies: vec![SegmentStrategy {
                id: "s1".to_string(),
                project_id: "web".to_string(),
                feature_name: "banner".to_string(),
                strategy_name: "default".to_string(),
                environment: "production".to_string(),
            }],
            change_request_strategies: vec![cr_strategy("default", "checkout"), cr_strategy("web", "banner")],
        };

        assert_eq!(usage.projects().into_iter().collect::<Vec<_>>(), vec!["default", "web"]);
        assert_eq!(usage.features().into_iter().collect::<Vec<_>>(), vec!["banner", "checkout"]);
        assert!(!usage.is_empty());
        assert!(StrategiesUsingSegment::default().is_empty());
    }

    #[test]
    fn config_defaults_to_enabled() {
        assert!(GuardConfig::default().change_requests_enabled);
        assert!(!GuardConfig::new().with_change_requests(false).change_requests_enabled);
    }
}
