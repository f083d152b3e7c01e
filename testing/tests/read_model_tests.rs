//! Read-model and guard behavior against the in-memory store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use proptest::prelude::*;
use std::sync::Arc;
use unleash_cr_core::access::{ADMIN, SKIP_CHANGE_REQUEST, User, UserPermission};
use unleash_cr_core::guard::{GuardConfig, SegmentGuard, stop_when_change_requests_enabled};
use unleash_cr_core::model::{
    ChangeRequest, ChangeRequestEnvironment, ChangeRequestEvent, ChangeRequestRef,
    DependentFeature, SegmentStrategy, SegmentUsage,
};
use unleash_cr_core::read_model::{
    ChangeRequestAccessReadModel, ChangeRequestSegmentUsageReadModel, DependentFeaturesStore,
};
use unleash_cr_core::state::ChangeRequestState;
use unleash_cr_core::{GuardError, ReadModelError};
use unleash_cr_testing::{InMemoryChangeRequestStore, StaticPermissionChecker, fixtures, init_test_tracing};

fn change_request(id: i64, state: ChangeRequestState) -> ChangeRequest {
    ChangeRequest::new(id, "default", "default", state).with_title(format!("Change request #{id}"))
}

fn persisted(id: &str, project: &str, feature: &str) -> SegmentStrategy {
    SegmentStrategy {
        id: id.to_string(),
        project_id: project.to_string(),
        feature_name: feature.to_string(),
        strategy_name: "flexibleRollout".to_string(),
        environment: "production".to_string(),
    }
}

fn store_with_event(state: ChangeRequestState, action: &str) -> InMemoryChangeRequestStore {
    let store = InMemoryChangeRequestStore::new();
    store.insert_change_request(change_request(1, state));
    let payload = if action == "updateStrategy" {
        fixtures::update_strategy("abc", "flexibleRollout", &[3])
    } else {
        fixtures::add_strategy("flexibleRollout", &[3])
    };
    store.add_event(ChangeRequestEvent::new(1, "checkout", action, payload));
    store
}

proptest! {
    #[test]
    fn strategy_events_count_exactly_while_active(
        state in prop::sample::select(ChangeRequestState::ALL.to_vec()),
        action in prop::sample::select(vec!["addStrategy", "updateStrategy"]),
    ) {
        let store = store_with_event(state, action);
        let used = tokio_test::block_on(store.is_segment_used_in_active_change_requests(3)).unwrap();
        prop_assert_eq!(used, state.is_active());
    }
}

#[tokio::test]
async fn rejecting_a_change_request_releases_its_segment() {
    init_test_tracing();
    let store = InMemoryChangeRequestStore::new();
    store.insert_change_request(change_request(123_456, ChangeRequestState::Draft));
    store.add_event(ChangeRequestEvent::new(
        123_456,
        "checkout",
        "addStrategy",
        fixtures::add_strategy("flexibleRollout", &[3]),
    ));

    assert!(store.is_segment_used_in_active_change_requests(3).await.unwrap());

    store.insert_change_request(change_request(123_456, ChangeRequestState::Rejected));
    assert!(!store.is_segment_used_in_active_change_requests(3).await.unwrap());
}

#[tokio::test]
async fn repeated_queries_agree() {
    let store = store_with_event(ChangeRequestState::Approved, "addStrategy");

    let first = store.is_segment_used_in_active_change_requests(3).await.unwrap();
    let second = store.is_segment_used_in_active_change_requests(3).await.unwrap();
    assert_eq!(first, second);

    let (a, b) = tokio::join!(
        store.get_strategies_used_in_active_change_requests(3),
        store.get_strategies_used_in_active_change_requests(3),
    );
    assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn other_segments_and_actions_are_ignored() {
    let store = InMemoryChangeRequestStore::new();
    store.insert_change_request(change_request(1, ChangeRequestState::Draft));
    store.add_event(ChangeRequestEvent::new(
        1,
        "checkout",
        "addStrategy",
        fixtures::add_strategy("default", &[4]),
    ));
    store.add_event(ChangeRequestEvent::new(
        1,
        "checkout",
        "updateEnabled",
        serde_json::json!({ "enabled": true, "segments": [3] }),
    ));

    assert!(!store.is_segment_used_in_active_change_requests(3).await.unwrap());
    assert!(
        store
            .get_strategies_used_in_active_change_requests(3)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn updates_of_one_strategy_collapse_across_change_requests() {
    let store = InMemoryChangeRequestStore::new();
    store.insert_change_request(change_request(1, ChangeRequestState::Draft));
    store.insert_change_request(change_request(2, ChangeRequestState::InReview));
    for id in [1, 2] {
        store.add_event(ChangeRequestEvent::new(
            id,
            "checkout",
            "updateStrategy",
            fixtures::update_strategy("abc", "flexibleRollout", &[3]),
        ));
    }

    let strategies = store.get_strategies_used_in_active_change_requests(3).await.unwrap();

    assert_eq!(strategies.len(), 1);
    assert_eq!(strategies[0].id.as_deref(), Some("abc"));
    assert_eq!(
        strategies[0].change_requests,
        vec![
            ChangeRequestRef { id: 1, title: Some("Change request #1".to_string()) },
            ChangeRequestRef { id: 2, title: Some("Change request #2".to_string()) },
        ]
    );
}

#[tokio::test]
async fn new_strategies_are_listed_per_event() {
    let store = InMemoryChangeRequestStore::new();
    store.insert_change_request(change_request(1, ChangeRequestState::Draft));
    store.insert_change_request(change_request(2, ChangeRequestState::Scheduled));
    store.insert_change_request(change_request(3, ChangeRequestState::Applied));
    for id in [1, 2, 3] {
        store.add_event(ChangeRequestEvent::new(
            id,
            "checkout",
            "addStrategy",
            fixtures::add_strategy("flexibleRollout", &[3]),
        ));
    }

    let strategies = store.get_strategies_used_in_active_change_requests(3).await.unwrap();

    assert_eq!(strategies.len(), 2);
    assert!(strategies.iter().all(|s| s.id.is_none()));
    let ids: Vec<i64> = strategies.iter().flat_map(|s| s.change_request_ids()).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn unknown_states_keep_blocking() {
    let store = store_with_event(ChangeRequestState::Draft, "addStrategy");
    store.set_raw_state(1, "Archived");

    assert!(store.is_segment_used_in_active_change_requests(3).await.unwrap());
}

#[tokio::test]
async fn store_failures_propagate() {
    let store = store_with_event(ChangeRequestState::Draft, "addStrategy");
    let failure = ReadModelError::Database("connection refused".to_string());
    store.fail_with(Some(failure.clone()));

    assert_eq!(store.is_segment_used_in_active_change_requests(3).await, Err(failure.clone()));
    assert_eq!(store.is_change_requests_enabled("default", "default").await, Err(failure));

    store.fail_with(None);
    assert!(store.is_segment_used_in_active_change_requests(3).await.unwrap());
}

#[tokio::test]
async fn segment_usage_merges_change_requests_and_persisted_strategies() {
    let store = InMemoryChangeRequestStore::new();
    store.add_strategy(persisted("s1", "web", "banner"), &[3, 5]);
    store.add_strategy(persisted("s2", "web", "archived"), &[3]);
    store.archive_feature("archived");

    store.insert_change_request(change_request(1, ChangeRequestState::Draft));
    store.add_event(ChangeRequestEvent::new(
        1,
        "checkout",
        "addStrategy",
        fixtures::add_strategy("default", &[3]),
    ));
    store.add_event(ChangeRequestEvent::new(
        1,
        "banner",
        "updateStrategy",
        fixtures::update_strategy("s1", "default", &[3]),
    ));

    let usage = store.get_segment_usage().await.unwrap();

    assert_eq!(usage.get(&3), Some(&SegmentUsage { used_in_features: 2, used_in_projects: 2 }));
    assert_eq!(usage.get(&5), Some(&SegmentUsage { used_in_features: 1, used_in_projects: 1 }));
    assert_eq!(usage.len(), 2);
}

#[tokio::test]
async fn project_enablement_follows_attached_environments() {
    let store = InMemoryChangeRequestStore::new();
    store.attach_environment("default", "production");

    assert!(!store.is_change_requests_enabled_for_project("default").await.unwrap());

    store.enable_change_requests("default", "production", 2);
    assert!(store.is_change_requests_enabled_for_project("default").await.unwrap());
    assert_eq!(
        store.get_change_request_environments("default").await.unwrap(),
        vec![ChangeRequestEnvironment { environment: "production".to_string(), required_approvals: 2 }]
    );

    store.detach_environment("default", "production");
    assert!(!store.is_change_requests_enabled_for_project("default").await.unwrap());
    assert!(store.is_change_requests_enabled("default", "production").await.unwrap());
    assert!(store.get_change_request_environments("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn bypass_requires_permission_while_enabled() {
    let permissions = StaticPermissionChecker::new();
    permissions.grant(7, UserPermission::environment(SKIP_CHANGE_REQUEST, "default", "production"));
    permissions.grant(8, UserPermission::root(ADMIN));
    let store = InMemoryChangeRequestStore::with_permissions(Arc::new(permissions.clone()));
    store.attach_environment("default", "production");

    let skipper = User::new(7);
    let admin = User::new(8);
    let plain = User::new(9);
    let api = User::api(10, vec![SKIP_CHANGE_REQUEST.to_string()]);

    // nothing enabled: everyone may bypass
    assert!(store.can_bypass_change_request("default", "production", Some(&plain)).await.unwrap());
    assert!(store.can_bypass_change_request("default", "production", None).await.unwrap());

    store.enable_change_requests("default", "production", 1);
    assert!(store.can_bypass_change_request("default", "production", Some(&skipper)).await.unwrap());
    assert!(store.can_bypass_change_request("default", "production", Some(&admin)).await.unwrap());
    assert!(store.can_bypass_change_request("default", "production", Some(&api)).await.unwrap());
    assert!(!store.can_bypass_change_request("default", "production", Some(&plain)).await.unwrap());
    assert!(!store.can_bypass_change_request("default", "production", None).await.unwrap());

    assert!(!store.can_bypass_change_request_for_project("default", Some(&skipper)).await.unwrap());
    assert!(store.can_bypass_change_request_for_project("default", Some(&admin)).await.unwrap());
}

#[tokio::test]
async fn bypass_without_user_never_checks_permissions() {
    let permissions = StaticPermissionChecker::new();
    let store = InMemoryChangeRequestStore::with_permissions(Arc::new(permissions.clone()));
    store.enable_change_requests("default", "production", 1);

    assert!(!store.can_bypass_change_request("default", "production", None).await.unwrap());
    assert_eq!(permissions.calls(), 0);
}

#[tokio::test]
async fn permission_failures_propagate() {
    let store = InMemoryChangeRequestStore::with_permissions(Arc::new(StaticPermissionChecker::failing("timeout")));
    store.enable_change_requests("default", "production", 1);

    let result = store.can_bypass_change_request("default", "production", Some(&User::new(1))).await;
    assert_eq!(result, Err(ReadModelError::Permission("timeout".to_string())));
}

#[tokio::test]
async fn direct_changes_are_stopped_when_change_requests_apply() {
    let store = InMemoryChangeRequestStore::new();
    store.attach_environment("default", "production");
    let user = User::new(1);

    assert!(stop_when_change_requests_enabled(&store, "default", Some("production"), Some(&user)).await.is_ok());

    store.enable_change_requests("default", "production", 1);
    let err = stop_when_change_requests_enabled(&store, "default", Some("production"), Some(&user))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GuardError::SkipChangeRequest {
            project: "default".to_string(),
            environment: Some("production".to_string()),
        }
    );
    assert!(stop_when_change_requests_enabled(&store, "default", None, Some(&user)).await.is_err());
}

fn segment_guard(store: &InMemoryChangeRequestStore, config: GuardConfig) -> SegmentGuard {
    SegmentGuard::new(Arc::new(store.clone()), Arc::new(store.clone()), config)
}

#[tokio::test]
async fn segments_in_active_change_requests_cannot_be_deleted() {
    let store = store_with_event(ChangeRequestState::Approved, "addStrategy");
    let guard = segment_guard(&store, GuardConfig::default());

    let err = guard.ensure_segment_not_in_use(3).await.unwrap_err();
    assert_eq!(
        err,
        GuardError::SegmentInUse {
            segment_id: 3,
            features: vec!["checkout".to_string()],
            change_request_ids: vec![1],
        }
    );
    assert!(guard.ensure_segment_not_in_use(4).await.is_ok());

    store.set_state(1, ChangeRequestState::Applied);
    assert!(guard.ensure_segment_not_in_use(3).await.is_ok());
}

#[tokio::test]
async fn malformed_strategy_name_still_blocks_deletion() {
    let store = InMemoryChangeRequestStore::new();
    store.insert_change_request(change_request(1, ChangeRequestState::Draft));
    store.add_event(ChangeRequestEvent::new(
        1,
        "checkout",
        "addStrategy",
        serde_json::json!({ "name": 42, "segments": [3] }),
    ));
    let guard = segment_guard(&store, GuardConfig::default());

    assert!(store.is_segment_used_in_active_change_requests(3).await.unwrap());
    assert!(matches!(
        guard.ensure_segment_not_in_use(3).await,
        Err(GuardError::SegmentInUse { .. })
    ));
}

#[tokio::test]
async fn change_request_usage_is_ignored_when_disabled() {
    let store = store_with_event(ChangeRequestState::Draft, "addStrategy");
    let guard = segment_guard(&store, GuardConfig::new().with_change_requests(false));

    assert!(!guard.is_in_use(3).await.unwrap());
    assert!(guard.strategies_using_segment(3).await.unwrap().is_empty());

    store.add_strategy(persisted("s1", "web", "banner"), &[3]);
    assert!(guard.is_in_use(3).await.unwrap());
}

#[tokio::test]
async fn segment_project_must_match_every_user() {
    let store = InMemoryChangeRequestStore::new();
    store.add_strategy(persisted("s1", "web", "banner"), &[3]);
    store.insert_change_request(ChangeRequest::new(1, "mobile", "production", ChangeRequestState::Draft));
    store.add_event(ChangeRequestEvent::new(
        1,
        "onboarding",
        "addStrategy",
        fixtures::add_strategy("default", &[3]),
    ));
    let guard = segment_guard(&store, GuardConfig::default());

    assert!(guard.validate_segment_project(3, None).await.is_ok());
    let err = guard.validate_segment_project(3, Some("web")).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid project. Segment is being used by strategies in other projects: mobile, web"
    );

    store.set_state(1, ChangeRequestState::Cancelled);
    assert!(guard.validate_segment_project(3, Some("web")).await.is_ok());
    assert!(guard.validate_segment_project(3, Some("mobile")).await.is_err());
}

#[tokio::test]
async fn dependency_upsert_overwrites_and_deletes() {
    let store = InMemoryChangeRequestStore::new();
    store.upsert(DependentFeature::new("parent", "child")).await.unwrap();
    store
        .upsert(
            DependentFeature::new("parent", "child")
                .with_enabled(false)
                .with_variants(vec!["blue".to_string()]),
        )
        .await
        .unwrap();
    store.upsert(DependentFeature::new("parent", "other")).await.unwrap();

    let children = store.get_children("parent").await.unwrap();
    assert_eq!(children.len(), 2);
    assert!(!children[0].enabled);
    assert_eq!(children[0].variants, vec!["blue".to_string()]);
    assert_eq!(store.get_parents("other").await.unwrap()[0].parent, "parent");
    assert!(store.has_dependencies("child").await.unwrap());

    store.delete("parent", "child").await.unwrap();
    assert!(!store.has_dependencies("child").await.unwrap());

    store.delete_all(&["other".to_string()]).await.unwrap();
    assert!(!store.has_dependencies("parent").await.unwrap());
}
