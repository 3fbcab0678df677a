//! Revision controller scenarios driven through `sync()`
//!
//! Each test builds an in-memory environment, runs one or more passes and
//! checks the resulting snapshots and status.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rollout_common::{
    find_condition, Condition, ConditionStatus, ManagementState, ObjectContent, ResourceKind,
    StatusClient,
};
use rollout_revisionmgrd::{
    ControllerError, InMemoryRecorder, RevisionController, RevisionResource, SyncState,
    CONTENT_CREATION_ERROR, FAILING_CONDITION,
};
use rollout_test::{
    source_fixtures::{app_config, serving_cert},
    ConflictingStatusClient, FlakyStore, SourceChange, StoreVerifier, TestEnv,
};

fn controller(env: &TestEnv, config_maps: Vec<RevisionResource>) -> RevisionController {
    controller_with_secrets(env, config_maps, vec![])
}

fn controller_with_secrets(
    env: &TestEnv,
    config_maps: Vec<RevisionResource>,
    secrets: Vec<RevisionResource>,
) -> RevisionController {
    RevisionController::new(
        env.namespace.clone(),
        config_maps,
        secrets,
        env.store.clone(),
        env.status.clone(),
    )
}

fn k(value: &str) -> ObjectContent {
    ObjectContent::new().with_entry("k", value)
}

/// Scenario B setup: `app-config={"k":"v1"}` published as revision 1
async fn published_v1() -> (TestEnv, RevisionController) {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;
    let ctrl = controller(&env, vec![RevisionResource::required("app-config")]);
    ctrl.sync().await.unwrap();
    (env, ctrl)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_scenario_a_missing_required_source() {
    let env = TestEnv::new();
    let ctrl = controller(&env, vec![RevisionResource::required("app-config")]);
    let verifier = StoreVerifier::new(&env);

    let err = ctrl.sync().await.unwrap_err();

    assert!(err.to_string().contains("not found"), "error was: {err}");
    assert!(matches!(err, ControllerError::Requeue { .. }));
    verifier.assert_revision(0).await.unwrap();

    let status = env.status.status().await;
    let failing = find_condition(&status.conditions, FAILING_CONDITION).unwrap();
    assert_eq!(failing.status, ConditionStatus::True);
    assert_eq!(failing.reason, CONTENT_CREATION_ERROR);
    assert!(failing.message.contains("configmap/app-config"));
    assert_eq!(ctrl.last_state(), SyncState::Failing);
}

#[tokio::test]
async fn test_scenario_b_first_revision() {
    let (env, ctrl) = published_v1().await;
    let verifier = StoreVerifier::new(&env);

    verifier
        .assert_exists(ResourceKind::ConfigMap, "revision-status-1")
        .await
        .unwrap();
    verifier
        .assert_content(ResourceKind::ConfigMap, "app-config-1", &k("v1"))
        .await
        .unwrap();
    verifier
        .assert_owned_by(ResourceKind::ConfigMap, "app-config-1", "revision-status-1")
        .await
        .unwrap();
    verifier.assert_revision(1).await.unwrap();
    verifier
        .assert_condition(FAILING_CONDITION, Some(ConditionStatus::False))
        .await
        .unwrap();
    assert_eq!(ctrl.last_state(), SyncState::Idle);
}

#[tokio::test]
async fn test_scenario_c_changed_source_cuts_next_revision() {
    let (env, ctrl) = published_v1().await;
    let verifier = StoreVerifier::new(&env);
    let first = verifier
        .assert_exists(ResourceKind::ConfigMap, "app-config-1")
        .await
        .unwrap();

    env.apply(app_config("v2")).await;
    ctrl.sync().await.unwrap();

    verifier
        .assert_content(ResourceKind::ConfigMap, "app-config-2", &k("v2"))
        .await
        .unwrap();
    verifier
        .assert_owned_by(ResourceKind::ConfigMap, "app-config-2", "revision-status-2")
        .await
        .unwrap();
    verifier.assert_revision(2).await.unwrap();

    // Revision 1 is untouched
    let after = verifier
        .assert_exists(ResourceKind::ConfigMap, "app-config-1")
        .await
        .unwrap();
    assert_eq!(first, after);
}

#[tokio::test]
async fn test_scenario_d_unchanged_source_writes_nothing() {
    let (env, ctrl) = published_v1().await;
    let verifier = StoreVerifier::new(&env);
    let checkpoint = env.checkpoint();

    ctrl.sync().await.unwrap();

    verifier.assert_no_writes_since(checkpoint).unwrap();
    verifier.assert_revision(1).await.unwrap();
    assert_eq!(ctrl.last_trace(), vec![SyncState::Idle, SyncState::Idle]);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_idempotent_after_every_revision() {
    let (env, ctrl) = published_v1().await;
    let verifier = StoreVerifier::new(&env);

    for value in ["v2", "v3"] {
        env.apply(app_config(value)).await;
        ctrl.sync().await.unwrap();

        let checkpoint = env.checkpoint();
        ctrl.sync().await.unwrap();
        ctrl.sync().await.unwrap();
        verifier.assert_no_writes_since(checkpoint).unwrap();
    }
    verifier.assert_revision(3).await.unwrap();
}

#[tokio::test]
async fn test_revision_never_decreases() {
    let env = TestEnv::new();
    let ctrl = controller(&env, vec![RevisionResource::required("app-config")]);
    let mut last = env.latest_revision().await;

    let steps = [
        Some(app_config("v1")),
        None,
        Some(SourceChange::delete(ResourceKind::ConfigMap, "app-config")),
        None,
        Some(app_config("v2")),
        Some(app_config("v3")),
        None,
    ];

    for change in steps {
        if let Some(change) = change {
            env.apply(change).await;
        }
        // Failures are expected while the source is deleted
        let _ = ctrl.sync().await;

        let now = env.latest_revision().await;
        assert!(now >= last, "revision went from {last} to {now}");
        last = now;
    }
    assert_eq!(last, 3);
}

#[tokio::test]
async fn test_single_revision_per_change() {
    let (env, ctrl) = published_v1().await;

    // Several edits land before the controller runs
    env.apply(app_config("v1.1")).await;
    env.apply(app_config("v1.2")).await;
    env.apply(app_config("v2")).await;

    for _ in 0..5 {
        ctrl.sync().await.unwrap();
    }

    StoreVerifier::new(&env).assert_revision(2).await.unwrap();
    let mut markers: Vec<_> = env
        .store
        .names(ResourceKind::ConfigMap, &env.namespace)
        .await
        .into_iter()
        .filter(|n| n.starts_with("revision-status-"))
        .collect();
    markers.sort();
    assert_eq!(markers, vec!["revision-status-1", "revision-status-2"]);
}

#[tokio::test]
async fn test_optional_absent_never_blocks() {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;
    let ctrl = controller(
        &env,
        vec![
            RevisionResource::optional("extra"),
            RevisionResource::required("app-config"),
        ],
    );
    let verifier = StoreVerifier::new(&env);

    ctrl.sync().await.unwrap();

    verifier.assert_revision(1).await.unwrap();
    verifier
        .assert_absent(ResourceKind::ConfigMap, "extra-1")
        .await
        .unwrap();
    verifier
        .assert_condition(FAILING_CONDITION, Some(ConditionStatus::False))
        .await
        .unwrap();

    // The absent optional never shows up as a change
    let checkpoint = env.checkpoint();
    ctrl.sync().await.unwrap();
    verifier.assert_no_writes_since(checkpoint).unwrap();
}

#[tokio::test]
async fn test_optional_change_cuts_full_revision() {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;
    env.apply(SourceChange::config_map("extra").with_entry("x", "1"))
        .await;
    let ctrl = controller(
        &env,
        vec![
            RevisionResource::required("app-config"),
            RevisionResource::optional("extra"),
        ],
    );
    ctrl.sync().await.unwrap();

    // Only the optional resource changes
    env.apply(SourceChange::config_map("extra").with_entry("x", "2"))
        .await;
    ctrl.sync().await.unwrap();

    let verifier = StoreVerifier::new(&env);
    verifier.assert_revision(2).await.unwrap();
    verifier
        .assert_content(ResourceKind::ConfigMap, "app-config-2", &k("v1"))
        .await
        .unwrap();
    verifier
        .assert_content(
            ResourceKind::ConfigMap,
            "extra-2",
            &ObjectContent::new().with_entry("x", "2"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_conflicting_status_write_is_reapplied() {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;

    // Another controller keeps adding its own condition under us
    let status = Arc::new(
        ConflictingStatusClient::new(env.status.clone(), 2).with_competing_write(|s| {
            rollout_common::set_condition(
                &mut s.conditions,
                Condition::new("OtherControllerDegraded", ConditionStatus::False),
            );
        }),
    );
    let ctrl = RevisionController::new(
        env.namespace.clone(),
        vec![RevisionResource::required("app-config")],
        vec![],
        env.store.clone(),
        status.clone(),
    );

    ctrl.sync().await.unwrap();

    assert_eq!(status.injected(), 2);
    let verifier = StoreVerifier::new(&env);
    verifier.assert_revision(1).await.unwrap();
    verifier
        .assert_condition("OtherControllerDegraded", Some(ConditionStatus::False))
        .await
        .unwrap();
    verifier
        .assert_condition(FAILING_CONDITION, Some(ConditionStatus::False))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lost_race_does_not_overwrite() {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;

    // A competing replica publishes revision 1 first
    let status = Arc::new(
        ConflictingStatusClient::new(env.status.clone(), 1)
            .with_competing_write(|s| s.latest_available_revision = 1),
    );
    let recorder = Arc::new(InMemoryRecorder::new());
    let ctrl = RevisionController::new(
        env.namespace.clone(),
        vec![RevisionResource::required("app-config")],
        vec![],
        env.store.clone(),
        status.clone(),
    )
    .with_recorder(recorder.clone());

    let err = ctrl.sync().await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::RevisionConflict {
            current: 1,
            attempted: 1
        }
    ));
    // The content was written but this pass did not publish it
    assert_eq!(recorder.reasons(), vec!["RevisionTriggered"]);
    assert_eq!(ctrl.last_state(), SyncState::Failing);
    StoreVerifier::new(&env).assert_revision(1).await.unwrap();

    // Next pass re-evaluates from Idle and finds revision 1 current
    let checkpoint = env.checkpoint();
    ctrl.sync().await.unwrap();
    assert_eq!(
        ctrl.last_trace(),
        vec![SyncState::Failing, SyncState::Idle, SyncState::Idle]
    );
    StoreVerifier::new(&env)
        .assert_no_writes_since(checkpoint)
        .unwrap();
}

// ============================================================================
// Recovery, kinds and management state
// ============================================================================

#[tokio::test]
async fn test_recovers_after_source_appears() {
    let env = TestEnv::new();
    let recorder = Arc::new(InMemoryRecorder::new());
    let ctrl = controller(&env, vec![RevisionResource::required("app-config")])
        .with_recorder(recorder.clone());
    let verifier = StoreVerifier::new(&env);

    ctrl.sync().await.unwrap_err();
    verifier
        .assert_condition(FAILING_CONDITION, Some(ConditionStatus::True))
        .await
        .unwrap();

    env.apply(app_config("v1")).await;
    ctrl.sync().await.unwrap();

    verifier.assert_revision(1).await.unwrap();
    verifier
        .assert_condition(FAILING_CONDITION, Some(ConditionStatus::False))
        .await
        .unwrap();
    verifier
        .assert_owned_by(ResourceKind::ConfigMap, "app-config-1", "revision-status-1")
        .await
        .unwrap();
    assert_eq!(
        recorder.reasons(),
        vec![
            "RevisionTriggered",
            "RevisionCreateFailed",
            "RevisionTriggered",
            "RevisionCreate",
        ]
    );
}

#[tokio::test]
async fn test_secrets_are_snapshotted() {
    let env = TestEnv::new();
    env.apply_all([app_config("v1"), serving_cert(b"cert-v1")]).await;
    let ctrl = controller_with_secrets(
        &env,
        vec![RevisionResource::required("app-config")],
        vec![RevisionResource::required("serving-cert")],
    );

    ctrl.sync().await.unwrap();
    env.apply(serving_cert(b"cert-v2")).await;
    ctrl.sync().await.unwrap();

    let verifier = StoreVerifier::new(&env);
    verifier.assert_revision(2).await.unwrap();
    verifier
        .assert_content(
            ResourceKind::Secret,
            "serving-cert-2",
            &ObjectContent::new().with_binary("tls.crt", b"cert-v2".to_vec()),
        )
        .await
        .unwrap();
    verifier
        .assert_owned_by(ResourceKind::Secret, "serving-cert-2", "revision-status-2")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unmanaged_does_nothing() {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;
    env.status
        .set_management_state(ManagementState::Removed)
        .await;
    let ctrl = controller(&env, vec![RevisionResource::required("app-config")]);
    let checkpoint = env.checkpoint();

    ctrl.sync().await.unwrap();

    StoreVerifier::new(&env)
        .assert_no_writes_since(checkpoint)
        .unwrap();
}

#[tokio::test]
async fn test_transport_error_is_returned_without_revision() {
    let env = TestEnv::new();
    env.apply(app_config("v1")).await;
    let flaky = Arc::new(FlakyStore::new(env.store.clone(), 1));
    let ctrl = RevisionController::new(
        env.namespace.clone(),
        vec![RevisionResource::required("app-config")],
        vec![],
        flaky.clone(),
        env.status.clone(),
    );
    let checkpoint = env.checkpoint();

    let err = ctrl.sync().await.unwrap_err();
    assert!(matches!(err, ControllerError::Store(ref e) if e.is_retryable()));
    StoreVerifier::new(&env)
        .assert_no_writes_since(checkpoint)
        .unwrap();

    ctrl.sync().await.unwrap();
    StoreVerifier::new(&env).assert_revision(1).await.unwrap();
}

#[tokio::test]
async fn test_status_read_matches_snapshot_version() {
    let (env, _ctrl) = published_v1().await;
    let snapshot = env.status.get().await.unwrap();
    assert_eq!(snapshot.version, env.status.version().await);
    assert_eq!(snapshot.status.latest_available_revision, 1);
}
