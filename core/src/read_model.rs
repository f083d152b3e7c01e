//! Read-model interfaces.
//!
//! These traits are what services depend on. Each method is an independent
//! asynchronous query: nothing is cached between calls, because change requests
//! are mutated elsewhere and a stale answer is not acceptable for a guard.
//!
//! # Implementations
//!
//! - `Postgres*` (in `unleash-cr-postgres`): production, backed by `sqlx`
//! - `InMemoryChangeRequestStore` (in `unleash-cr-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`ReadModelFuture`] instead of using `async fn` so the traits
//! can be held as `Arc<dyn ...>` by services and guards.

use crate::access::User;
use crate::error::Result;
use crate::model::{
    ChangeRequestEnvironment, ChangeRequestStrategy, DependentFeature, SegmentStrategy,
    SegmentUsage,
};
use crate::payload::SegmentId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by read-model methods.
pub type ReadModelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Segment usage by active change requests.
pub trait ChangeRequestSegmentUsageReadModel: Send + Sync {
    /// Returns `true` if any active change request proposes a strategy using
    /// the segment.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn is_segment_used_in_active_change_requests(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, bool>;

    /// Strategies using the segment in active change requests.
    ///
    /// Modifications of one persisted strategy are returned once; proposals of
    /// new strategies are returned once per event.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn get_strategies_used_in_active_change_requests(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, Vec<ChangeRequestStrategy>>;

    /// Distinct feature and project counts for every used segment, combining
    /// active change requests with persisted strategies.
    ///
    /// Segments used nowhere are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn get_segment_usage(&self) -> ReadModelFuture<'_, HashMap<SegmentId, SegmentUsage>>;
}

/// Change-request enablement and bypass decisions.
pub trait ChangeRequestAccessReadModel: Send + Sync {
    /// Returns `true` if change requests are configured for the environment.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn is_change_requests_enabled<'a>(
        &'a self,
        project: &'a str,
        environment: &'a str,
    ) -> ReadModelFuture<'a, bool>;

    /// Returns `true` if change requests are configured for at least one
    /// environment still attached to the project.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn is_change_requests_enabled_for_project<'a>(
        &'a self,
        project: &'a str,
    ) -> ReadModelFuture<'a, bool>;

    /// Returns `true` if the user may skip change requests in the environment.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` or `ReadModelError::Permission`.
    fn can_bypass_change_request<'a>(
        &'a self,
        project: &'a str,
        environment: &'a str,
        user: Option<&'a User>,
    ) -> ReadModelFuture<'a, bool>;

    /// Returns `true` if the user may skip change requests in the project.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` or `ReadModelError::Permission`.
    fn can_bypass_change_request_for_project<'a>(
        &'a self,
        project: &'a str,
        user: Option<&'a User>,
    ) -> ReadModelFuture<'a, bool>;

    /// Environments attached to the project with change requests configured.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn get_change_request_environments<'a>(
        &'a self,
        project: &'a str,
    ) -> ReadModelFuture<'a, Vec<ChangeRequestEnvironment>>;
}

/// Permission lookup, implemented by the access layer.
pub trait PermissionChecker: Send + Sync {
    /// Returns `true` if the user holds `permission` on the scope.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Permission` if the check cannot be answered.
    fn has_permission<'a>(
        &'a self,
        user: &'a User,
        permission: &'a str,
        project: &'a str,
        environment: Option<&'a str>,
    ) -> ReadModelFuture<'a, bool>;
}

/// Persisted strategies by segment.
pub trait SegmentStrategyReader: Send + Sync {
    /// Strategies on non-archived features that use the segment.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn get_strategies_by_segment(
        &self,
        segment_id: SegmentId,
    ) -> ReadModelFuture<'_, Vec<SegmentStrategy>>;
}

/// Parent/child feature dependencies.
pub trait DependentFeaturesStore: Send + Sync {
    /// Insert the dependency, or replace `enabled`/`variants` of an existing one.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn upsert(&self, dependency: DependentFeature) -> ReadModelFuture<'_, ()>;

    /// Dependencies whose parent is `parent`.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn get_children<'a>(&'a self, parent: &'a str) -> ReadModelFuture<'a, Vec<DependentFeature>>;

    /// Dependencies whose child is `child`.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn get_parents<'a>(&'a self, child: &'a str) -> ReadModelFuture<'a, Vec<DependentFeature>>;

    /// Remove one dependency.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn delete<'a>(&'a self, parent: &'a str, child: &'a str) -> ReadModelFuture<'a, ()>;

    /// Remove every dependency of the given children.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn delete_all<'a>(&'a self, children: &'a [String]) -> ReadModelFuture<'a, ()>;

    /// Returns `true` if the feature is a parent or a child of any dependency.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Database` if the store fails.
    fn has_dependencies<'a>(&'a self, feature: &'a str) -> ReadModelFuture<'a, bool>;
}
