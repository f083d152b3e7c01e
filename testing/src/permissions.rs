use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use unleash_cr_core::access::{User, UserPermission, has_permission_in};
use unleash_cr_core::error::ReadModelError;
use unleash_cr_core::read_model::{PermissionChecker, ReadModelFuture};

/// Permission checker backed by a fixed table.
///
/// API users are answered from the permissions they carry. Every call is
/// counted so tests can assert that a check did or didn't happen.
///
/// # Example
///
/// ```
/// use unleash_cr_core::{SKIP_CHANGE_REQUEST, UserPermission};
/// use unleash_cr_testing::StaticPermissionChecker;
///
/// let permissions = StaticPermissionChecker::new();
/// permissions.grant(7, UserPermission::environment(SKIP_CHANGE_REQUEST, "default", "production"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticPermissionChecker {
    grants: Arc<RwLock<HashMap<i64, Vec<UserPermission>>>>,
    failure: Arc<RwLock<Option<ReadModelError>>>,
    calls: Arc<AtomicUsize>,
}

impl StaticPermissionChecker {
    /// Create a checker that grants nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a checker whose every call fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        let checker = Self::new();
        *checker.failure.write().unwrap() = Some(ReadModelError::Permission(message.into()));
        checker
    }

    /// Grant a permission to a user.
    pub fn grant(&self, user_id: i64, permission: UserPermission) {
        self.grants
            .write()
            .unwrap()
            .entry(user_id)
            .or_default()
            .push(permission);
    }

    /// Number of permission checks answered so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PermissionChecker for StaticPermissionChecker {
    fn has_permission<'a>(
        &'a self,
        user: &'a User,
        permission: &'a str,
        project: &'a str,
        environment: Option<&'a str>,
    ) -> ReadModelFuture<'a, bool> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failure.read().unwrap().clone() {
                return Err(err);
            }

            let granted = match user.api_user_permissions() {
                Some(permissions) => has_permission_in(&permissions, permission, project, environment),
                None => self
                    .grants
                    .read()
                    .unwrap()
                    .get(&user.id)
                    .is_some_and(|permissions| has_permission_in(permissions, permission, project, environment)),
            };
            Ok(granted)
        })
    }
}
