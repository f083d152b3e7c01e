//! Permission lookup over the role and group tables.

use sqlx::postgres::PgPool;
use unleash_cr_core::access::{User, UserPermission, has_permission_in};
use unleash_cr_core::error::{ReadModelError, Result};
use unleash_cr_core::read_model::{PermissionChecker, ReadModelFuture};

/// Kind of permission, from `permissions.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionType {
    /// Applies everywhere
    Root,
    /// Scoped to the project of the role binding
    Project,
    /// Scoped to the project of the binding and one environment
    Environment,
}

impl PermissionType {
    /// Get string representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Project => "project",
            Self::Environment => "environment",
        }
    }

    /// Parse from database string.
    ///
    /// Only `root` yields an unscoped grant. Any other value keeps the
    /// project scope of its binding.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "root" => Self::Root,
            "environment" => Self::Environment,
            _ => Self::Project,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PermissionRow {
    permission: String,
    permission_type: String,
    project: Option<String>,
    environment: Option<String>,
}

impl From<PermissionRow> for UserPermission {
    fn from(row: PermissionRow) -> Self {
        match PermissionType::parse(&row.permission_type) {
            PermissionType::Root => Self::root(row.permission),
            PermissionType::Project => Self {
                permission: row.permission,
                project: row.project,
                environment: None,
            },
            PermissionType::Environment => Self {
                permission: row.permission,
                project: row.project,
                environment: row.environment,
            },
        }
    }
}

/// PostgreSQL-backed [`PermissionChecker`].
///
/// A user's permissions are the union of their direct role bindings, the
/// roles of their groups (scoped to the group binding's project), and the
/// root roles of their groups. API token users are answered from the
/// permission list they carry without touching the database.
#[derive(Clone)]
pub struct PostgresPermissionStore {
    pool: PgPool,
}

impl PostgresPermissionStore {
    /// Create a permission store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every permission the user holds.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::Permission`] if the lookup fails.
    pub async fn get_permissions(&self, user: &User) -> Result<Vec<UserPermission>> {
        if let Some(permissions) = user.api_user_permissions() {
            return Ok(permissions);
        }

        let rows: Vec<PermissionRow> = sqlx::query_as(
            "SELECT p.permission, p.type AS permission_type, ru.project, rp.environment
             FROM role_user ru
             JOIN role_permission rp ON rp.role_id = ru.role_id
             JOIN permissions p ON p.permission = rp.permission
             WHERE ru.user_id = $1
             UNION ALL
             SELECT p.permission, p.type AS permission_type, gr.project, rp.environment
             FROM group_user gu
             JOIN group_role gr ON gr.group_id = gu.group_id
             JOIN role_permission rp ON rp.role_id = gr.role_id
             JOIN permissions p ON p.permission = rp.permission
             WHERE gu.user_id = $1
             UNION ALL
             SELECT p.permission, p.type AS permission_type, NULL::text AS project, rp.environment
             FROM group_user gu
             JOIN groups g ON g.id = gu.group_id
             JOIN role_permission rp ON rp.role_id = g.root_role_id
             JOIN permissions p ON p.permission = rp.permission
             WHERE gu.user_id = $1",
        )
        .bind(user.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReadModelError::Permission(format!("Failed to load permissions: {e}")))?;

        tracing::debug!(user_id = user.id, permissions = rows.len(), "Loaded user permissions");
        Ok(rows.into_iter().map(UserPermission::from).collect())
    }
}

impl PermissionChecker for PostgresPermissionStore {
    fn has_permission<'a>(
        &'a self,
        user: &'a User,
        permission: &'a str,
        project: &'a str,
        environment: Option<&'a str>,
    ) -> ReadModelFuture<'a, bool> {
        Box::pin(async move {
            let permissions = self.get_permissions(user).await?;
            Ok(has_permission_in(&permissions, permission, project, environment))
        })
    }
}
