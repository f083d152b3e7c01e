//! Users, permissions and the change-request bypass rule.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Permission allowing a user to change a protected environment directly.
pub const SKIP_CHANGE_REQUEST: &str = "SKIP_CHANGE_REQUEST";

/// Root permission that implies every other permission.
pub const ADMIN: &str = "ADMIN";

/// Wildcard project on a role binding.
pub const ALL_PROJECTS: &str = "*";

/// Wildcard environment on a role binding.
pub const ALL_ENVS: &str = "*";

/// The user a decision is made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// `users.id`
    pub id: i64,
    /// Permissions of an API token user; `None` for regular users
    pub api_permissions: Option<Vec<String>>,
}

impl User {
    /// A regular user whose permissions come from role bindings.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self {
            id,
            api_permissions: None,
        }
    }

    /// An API token user carrying an unscoped permission list.
    #[must_use]
    pub const fn api(id: i64, permissions: Vec<String>) -> Self {
        Self {
            id,
            api_permissions: Some(permissions),
        }
    }

    /// Returns `true` for API token users.
    #[must_use]
    pub const fn is_api(&self) -> bool {
        self.api_permissions.is_some()
    }

    /// Permissions of an API user, unscoped.
    #[must_use]
    pub fn api_user_permissions(&self) -> Option<Vec<UserPermission>> {
        self.api_permissions
            .as_ref()
            .map(|perms| perms.iter().map(|p| UserPermission::root(p.clone())).collect())
    }
}

/// A permission granted to a user, possibly scoped to a project/environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserPermission {
    /// Permission name
    pub permission: String,
    /// Project scope; `None` for root permissions
    pub project: Option<String>,
    /// Environment scope; `None` unless this is an environment permission
    pub environment: Option<String>,
}

impl UserPermission {
    /// An unscoped permission.
    #[must_use]
    pub fn root(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            project: None,
            environment: None,
        }
    }

    /// A permission scoped to a project.
    #[must_use]
    pub fn project(permission: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            project: Some(project.into()),
            environment: None,
        }
    }

    /// A permission scoped to a project and environment.
    #[must_use]
    pub fn environment(
        permission: impl Into<String>,
        project: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            permission: permission.into(),
            project: Some(project.into()),
            environment: Some(environment.into()),
        }
    }

    /// Returns `true` if this grant satisfies `permission` on the given scope.
    ///
    /// Unscoped or wildcard project/environment grants match any scope, and
    /// [`ADMIN`] satisfies every permission.
    #[must_use]
    pub fn grants(&self, permission: &str, project: &str, environment: Option<&str>) -> bool {
        let project_matches = self
            .project
            .as_deref()
            .is_none_or(|p| p == project || p == ALL_PROJECTS);
        let environment_matches = self
            .environment
            .as_deref()
            .is_none_or(|e| Some(e) == environment || e == ALL_ENVS);

        project_matches
            && environment_matches
            && (self.permission == permission || self.permission == ADMIN)
    }
}

/// Returns `true` if any of `permissions` grants `permission` on the scope.
#[must_use]
pub fn has_permission_in(
    permissions: &[UserPermission],
    permission: &str,
    project: &str,
    environment: Option<&str>,
) -> bool {
    permissions
        .iter()
        .any(|p| p.grants(permission, project, environment))
}

/// The bypass rule shared by every access read model.
///
/// A change request can be bypassed when the user holds
/// [`SKIP_CHANGE_REQUEST`] on the scope, or when change requests are not
/// enabled there. Without a user the permission half is `false`. The
/// enablement query only runs when the permission check didn't settle it.
///
/// # Errors
///
/// Propagates failures of either the permission check or the enablement query.
pub async fn can_bypass<P, E>(permission_check: Option<P>, enabled: E) -> Result<bool>
where
    P: Future<Output = Result<bool>>,
    E: Future<Output = Result<bool>>,
{
    if let Some(check) = permission_check {
        if check.await? {
            return Ok(true);
        }
    }
    Ok(!enabled.await?)
}
