//! Change-request enablement and bypass decisions read from `PostgreSQL`.

use sqlx::postgres::PgPool;
use std::sync::Arc;
use unleash_cr_core::access::{SKIP_CHANGE_REQUEST, User, can_bypass};
use unleash_cr_core::error::{ReadModelError, Result};
use unleash_cr_core::model::ChangeRequestEnvironment;
use unleash_cr_core::read_model::{ChangeRequestAccessReadModel, PermissionChecker, ReadModelFuture};

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
    environment: String,
    required_approvals: i32,
}

/// PostgreSQL-backed [`ChangeRequestAccessReadModel`].
///
/// Enablement comes from `change_request_settings`; project-level questions
/// only consider environments still attached through `project_environments`.
/// Permission checks are delegated to the supplied [`PermissionChecker`].
///
/// # Example
///
/// ```ignore
/// let permissions = Arc::new(PostgresPermissionStore::new(pool.clone()));
/// let access = PostgresAccessReadModel::new(pool, permissions);
///
/// if !access.can_bypass_change_request("default", "production", Some(&user)).await? {
///     // route the change through a change request
/// }
/// ```
#[derive(Clone)]
pub struct PostgresAccessReadModel {
    pool: PgPool,
    permissions: Arc<dyn PermissionChecker>,
}

impl PostgresAccessReadModel {
    /// Create a read model over an existing pool and permission checker.
    #[must_use]
    pub fn new(pool: PgPool, permissions: Arc<dyn PermissionChecker>) -> Self {
        Self { pool, permissions }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn enabled(&self, project: &str, environment: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                SELECT 1 FROM change_request_settings
                WHERE project = $1 AND environment = $2
            )",
        )
        .bind(project)
        .bind(environment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ReadModelError::Database(format!("Failed to check change request settings: {e}")))?;

        tracing::debug!(project, environment, enabled = exists, "Change requests enabled");
        Ok(exists)
    }

    async fn enabled_for_project(&self, project: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                SELECT 1 FROM change_request_settings crs
                JOIN project_environments pe
                  ON pe.project_id = crs.project
                 AND pe.environment_name = crs.environment
                WHERE crs.project = $1
            )",
        )
        .bind(project)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ReadModelError::Database(format!("Failed to check change request settings: {e}")))?;

        tracing::debug!(project, enabled = exists, "Change requests enabled for project");
        Ok(exists)
    }
}

impl ChangeRequestAccessReadModel for PostgresAccessReadModel {
    fn is_change_requests_enabled<'a>(
        &'a self,
        project: &'a str,
        environment: &'a str,
    ) -> ReadModelFuture<'a, bool> {
        Box::pin(self.enabled(project, environment))
    }

    fn is_change_requests_enabled_for_project<'a>(
        &'a self,
        project: &'a str,
    ) -> ReadModelFuture<'a, bool> {
        Box::pin(self.enabled_for_project(project))
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
        Box::pin(can_bypass(permission_check, self.enabled(project, environment)))
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
        Box::pin(can_bypass(permission_check, self.enabled_for_project(project)))
    }

    fn get_change_request_environments<'a>(
        &'a self,
        project: &'a str,
    ) -> ReadModelFuture<'a, Vec<ChangeRequestEnvironment>> {
        Box::pin(async move {
            let rows: Vec<EnvironmentRow> = sqlx::query_as(
                "SELECT crs.environment, crs.required_approvals
                 FROM change_request_settings crs
                 JOIN project_environments pe
                   ON pe.project_id = crs.project
                  AND pe.environment_name = crs.environment
                 WHERE crs.project = $1
                 ORDER BY crs.environment",
            )
            .bind(project)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ReadModelError::Database(format!("Failed to load change request environments: {e}")))?;

            Ok(rows
                .into_iter()
                .map(|row| ChangeRequestEnvironment {
                    environment: row.environment,
                    required_approvals: row.required_approvals,
                })
                .collect())
        })
    }
}
