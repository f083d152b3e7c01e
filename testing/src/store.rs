use crate::permissions::StaticPermissionChecker;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use unleash_cr_core::access::{SKIP_CHANGE_REQUEST, User, can_bypass};
use unleash_cr_core::error::{ReadModelError, Result};
use unleash_cr_core::model::{
    ChangeRequest, ChangeRequestEnvironment, ChangeRequestEvent, ChangeRequestStrategy,
    DependentFeature, PendingStrategyEvent, PersistedSegmentUsage, SegmentStrategy, SegmentUsage,
};
use unleash_cr_core::payload::{STRATEGY_ACTIONS, SegmentId};
use unleash_cr_core::read_model::{
    ChangeRequestAccessReadModel, ChangeRequestSegmentUsageReadModel, DependentFeaturesStore,
    PermissionChecker, ReadModelFuture, SegmentStrategyReader,
};
use unleash_cr_core::state::ChangeRequestState;
use unleash_cr_core::usage;

#[derive(Debug, Default)]
struct State {
    change_requests: BTreeMap<i64, ChangeRequest>,
    events: Vec<ChangeRequestEvent>,
    settings: BTreeMap<(String, String), i32>,
    project_environments: HashSet<(String, String)>,
    strategies: Vec<(SegmentStrategy, Vec<SegmentId>)>,
    archived_features: HashSet<String>,
    dependencies: BTreeMap<(String, String), DependentFeature>,
    failure: Option<ReadModelError>,
}

/// In-memory implementation of every change-request read model.
///
/// Mirrors the `PostgreSQL` stores: events of terminal change requests and
/// non-strategy actions are filtered out before aggregation, and project-level
/// questions only look at attached environments.
///
/// A failure set with [`InMemoryChangeRequestStore::fail_with`] is returned by
/// every query until cleared.
#[derive(Clone)]
pub struct InMemoryChangeRequestStore {
    state: Arc<RwLock<State>>,
    permissions: Arc<dyn PermissionChecker>,
}

impl std::fmt::Debug for InMemoryChangeRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChangeRequestStore")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryChangeRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChangeRequestStore {
    /// Create an empty store whose permission checker grants nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_permissions(Arc::new(StaticPermissionChecker::new()))
    }

    /// Create an empty store using `permissions` for bypass decisions.
    #[must_use]
    pub fn with_permissions(permissions: Arc<dyn PermissionChecker>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            permissions,
        }
    }

    /// Insert or replace a change request.
    pub fn insert_change_request(&self, change_request: ChangeRequest) {
        self.state
            .write()
            .unwrap()
            .change_requests
            .insert(change_request.id, change_request);
    }

    /// Move a change request to another state.
    pub fn set_state(&self, change_request_id: i64, state: ChangeRequestState) {
        self.set_raw_state(change_request_id, state.as_str());
    }

    /// Overwrite the stored state string of a change request.
    pub fn set_raw_state(&self, change_request_id: i64, state: &str) {
        if let Some(change_request) = self
            .state
            .write()
            .unwrap()
            .change_requests
            .get_mut(&change_request_id)
        {
            change_request.state = state.to_string();
        }
    }

    /// Append an event to the log.
    pub fn add_event(&self, event: ChangeRequestEvent) {
        self.state.write().unwrap().events.push(event);
    }

    /// Configure change requests for an environment of a project.
    pub fn enable_change_requests(&self, project: &str, environment: &str, required_approvals: i32) {
        self.state
            .write()
            .unwrap()
            .settings
            .insert((project.to_string(), environment.to_string()), required_approvals);
    }

    /// Remove the change-request configuration of an environment.
    pub fn disable_change_requests(&self, project: &str, environment: &str) {
        self.state
            .write()
            .unwrap()
            .settings
            .remove(&(project.to_string(), environment.to_string()));
    }

    /// Attach an environment to a project.
    pub fn attach_environment(&self, project: &str, environment: &str) {
        self.state
            .write()
            .unwrap()
            .project_environments
            .insert((project.to_string(), environment.to_string()));
    }

    /// Detach an environment from a project, keeping its settings.
    pub fn detach_environment(&self, project: &str, environment: &str) {
        self.state
            .write()
            .unwrap()
            .project_environments
            .remove(&(project.to_string(), environment.to_string()));
    }

    /// Persist a strategy using `segments`.
    pub fn add_strategy(&self, strategy: SegmentStrategy, segments: &[SegmentId]) {
        self.state
            .write()
            .unwrap()
            .strategies
            .push((strategy, segments.to_vec()));
    }

    /// Archive a feature; its strategies stop counting as segment usage.
    pub fn archive_feature(&self, feature: &str) {
        self.state
            .write()
            .unwrap()
            .archived_features
            .insert(feature.to_string());
    }

    /// Make every query fail with `error`, or succeed again with `None`.
    pub fn fail_with(&self, error: Option<ReadModelError>) {
        self.state.write().unwrap().failure = error;
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        let state = self.state.read().unwrap();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        Ok(f(&state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self.state.write().unwrap();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        Ok(f(&mut state))
    }

    /// Strategy events of non-terminal change requests, in log order.
    ///
    /// # Errors
    ///
    /// Returns the failure set with [`InMemoryChangeRequestStore::fail_with`].
    pub fn pending_strategy_events(&self) -> Result<Vec<PendingStrategyEvent>> {
        let terminal = ChangeRequestState::terminal_names();
        self.read(|state| {
            state
                .events
                .iter()
                .filter(|event| STRATEGY_ACTIONS.contains(&event.action.as_str()))
                .filter_map(|event| {
                    let change_request = state.change_requests.get(&event.change_request_id)?;
                    if terminal.contains(&change_request.state.as_str()) {
                        return None;
                    }
                    Some(PendingStrategyEvent::from_parts(change_request, event))
                })
                .collect()
        })
    }

    fn persisted_segment_usage(&self) -> Result<Vec<PersistedSegmentUsage>> {
        self.read(|state| {
            state
                .strategies
                .iter()
                .filter(|(strategy, _)| !state.archived_features.contains(&strategy.feature_name))
                .flat_map(|(strategy, segments)| {
                    segments.iter().map(|segment_id| PersistedSegmentUsage {
                        segment_id: *segment_id,
                        feature_name: strategy.feature_name.clone(),
                        project_name: strategy.project_id.clone(),
                    })
                })
                .collect()
        })
    }

    fn enabled(&self, project: &str, environment: &str) -> Result<bool> {
        self.read(|state| {
            state
                .settings
                .contains_key(&(project.to_string(), environment.to_string()))
        })
    }

    fn attached_settings(&self, project: &str) -> Result<Vec<ChangeRequestEnvironment>> {
        self.read(|state| {
            state
                .settings
                .iter()
                .filter(|((p, environment), _)| {
                    p == project
                        && state
                            .project_environments
                            .contains(&(p.clone(), environment.clone()))
                })
                .map(|((_, environment), required_approvals)| ChangeRequestEnvironment {
                    environment: environment.clone(),
                    required_approvals: *required_approvals,
                })
                .collect()
        })
    }

    fn dependencies_matching(&self, f: impl Fn(&DependentFeature) -> bool) -> Result<Vec<DependentFeature>> {
        self.read(|state| state.dependencies.values().filter(|d| f(d)).cloned().collect())
    }
}

impl ChangeRequestSegmentUsageReadModel for InMemoryChangeRequestStore {
    fn is_segment_used_in_active_change_requests(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, bool> {
        Box::pin(async move {
            let events = self.pending_strategy_events()?;
            Ok(usage::any_references_segment(&events, segment_id))
        })
    }

    fn get_strategies_used_in_active_change_requests(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, Vec<ChangeRequestStrategy>> {
        Box::pin(async move {
            let events = self.pending_strategy_events()?;
            Ok(usage::strategies_for_segment(&events, segment_id))
        })
    }

    fn get_segment_usage(&self) -> ReadModelFuture<'_, HashMap<SegmentId, SegmentUsage>> {
        Box::pin(async move {
            let events = self.pending_strategy_events()?;
            let persisted = self.persisted_segment_usage()?;
            Ok(usage::segment_usage_counts(&events, &persisted))
        })
    }
}

impl ChangeRequestAccessReadModel for InMemoryChangeRequestStore {
    fn is_change_requests_enabled<'a>(
        &'a self,
        project: &'a str,
        environment: &'a str,
    ) -> ReadModelFuture<'a, bool> {
        Box::pin(async move { self.enabled(project, environment) })
    }

    fn is_change_requests_enabled_for_project<'a>(
        &'a self,
        project: &'a str,
    ) -> ReadModelFuture<'a, bool> {
        Box::pin(async move { Ok(!self.attached_settings(project)?.is_empty()) })
    }

    fn can_bypass_change_request<'a>(
        &'a self,
        project: &'a str,
        environment: &'a str,
        user: Option<&'a User>,
    ) -> ReadModelFuture<'a, bool> {
        let permission_check = user.map(|user| {
            self.permissions
                .has_permission(user, SKIP_CHANGE_REQUEST, project, Some(environment))
        });
        Box::pin(can_bypass(permission_check, async move {
            self.enabled(project, environment)
        }))
    }

    fn can_bypass_change_request_for_project<'a>(
        &'a self,
        project: &'a str,
        user: Option<&'a User>,
    ) -> ReadModelFuture<'a, bool> {
        let permission_check = user.map(|user| {
            self.permissions
                .has_permission(user, SKIP_CHANGE_REQUEST, project, None)
        });
        Box::pin(can_bypass(permission_check, async move {
            Ok(!self.attached_settings(project)?.is_empty())
        }))
    }

    fn get_change_request_environments<'a>(
        &'a self,
        project: &'a str,
    ) -> ReadModelFuture<'a, Vec<ChangeRequestEnvironment>> {
        Box::pin(async move { self.attached_settings(project) })
    }
}

impl SegmentStrategyReader for InMemoryChangeRequestStore {
    fn get_strategies_by_segment(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, Vec<SegmentStrategy>> {
        Box::pin(async move {
            self.read(|state| {
                state
                    .strategies
                    .iter()
                    .filter(|(strategy, segments)| {
                        segments.contains(&segment_id)
                            && !state.archived_features.contains(&strategy.feature_name)
                    })
                    .map(|(strategy, _)| strategy.clone())
                    .collect()
            })
        })
    }
}

impl DependentFeaturesStore for InMemoryChangeRequestStore {
    fn upsert(&self, dependency: DependentFeature) -> ReadModelFuture<'_, ()> {
        Box::pin(async move {
            self.write(|state| {
                state
                    .dependencies
                    .insert((dependency.parent.clone(), dependency.child.clone()), dependency);
            })
        })
    }

    fn get_children<'a>(&'a self, parent: &'a str) -> ReadModelFuture<'a, Vec<DependentFeature>> {
        Box::pin(async move { self.dependencies_matching(|d| d.parent == parent) })
    }

    fn get_parents<'a>(&'a self, child: &'a str) -> ReadModelFuture<'a, Vec<DependentFeature>> {
        Box::pin(async move { self.dependencies_matching(|d| d.child == child) })
    }

    fn delete<'a>(&'a self, parent: &'a str, child: &'a str) -> ReadModelFuture<'a, ()> {
        Box::pin(async move {
            self.write(|state| {
                state
                    .dependencies
                    .remove(&(parent.to_string(), child.to_string()));
            })
        })
    }

    fn delete_all<'a>(&'a self, children: &'a [String]) -> ReadModelFuture<'a, ()> {
        Box::pin(async move {
            let children: BTreeSet<&str> = children.iter().map(String::as_str).collect();
            self.write(|state| {
                state
                    .dependencies
                    .retain(|(_, child), _| !children.contains(child.as_str()));
            })
        })
    }

    fn has_dependencies<'a>(&'a self, feature: &'a str) -> ReadModelFuture<'a, bool> {
        Box::pin(async move {
            self.read(|state| {
                state
                    .dependencies
                    .keys()
                    .any(|(parent, child)| parent == feature || child == feature)
            })
        })
    }
}
