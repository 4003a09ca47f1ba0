//! End-to-end relogin workflow tests.
//!
//! These tests run complete workflows from `begin` to a terminal state and
//! check the collaborator calls and the exact event stream.

use std::time::Duration;

use tokio::time::Instant;

use relogin::instance::InstanceAction;
use relogin::workflow::{WorkflowEvent, WorkflowState};
use relogin::{Error, WorkflowOutcome};

use crate::fixtures::{
    core_id, drain, next_event, protocol_id, wait_for_artifact, wait_for_state, FakePanel,
    QrStep, TestHarness,
};

/// Test: Full happy path
/// Given a bound alias whose protocol instance produces a fresh QR code
/// When the operator confirms the login
/// Then both instances are restarted in order and the workflow finishes
#[tokio::test(start_paused = true)]
async fn test_happy_path_finishes() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(4)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    assert_eq!(ticket.targets.protocol_id, "R-drone1");
    assert_eq!(ticket.targets.core_id, "R-drone1_core");

    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;
    let content = wait_for_artifact(&mut events).await;
    assert_eq!(content, FakePanel::qr_content("R-drone1"));
    assert_eq!(
        harness.service.workflow_state("drone1"),
        Some(WorkflowState::WaitingForAuth)
    );

    harness.service.confirm("drone1").unwrap();
    assert!(matches!(
        ticket.wait().await.unwrap(),
        WorkflowOutcome::Finished
    ));

    assert_eq!(
        harness.panel.calls(),
        vec![
            (protocol_id("drone1"), InstanceAction::Restart),
            (core_id("drone1"), InstanceAction::Restart),
        ]
    );
    assert_eq!(harness.panel.reads_of("R-drone1"), 1);
}

/// Test: Event stream of a successful run
/// Given a full happy path
/// When collecting every event
/// Then exactly one artifact_ready precedes exactly one finished
#[tokio::test(start_paused = true)]
async fn test_happy_path_event_sequence() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;
    harness.service.confirm("drone1").unwrap();
    ticket.wait().await.unwrap();

    let rest: Vec<&'static str> = drain(&mut events).iter().map(|e| e.name()).collect();
    assert_eq!(rest, vec!["state_changed", "finished"]);
}

/// Test: Staleness law with a leftover file
/// Given a QR file from a previous login that predates the restart
/// When later ticks see a file written after the restart
/// Then only the fresh file is read and relayed
#[tokio::test(start_paused = true)]
async fn test_stale_artifact_is_ignored_until_fresh() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness.panel.script_qr(
        &protocol_id("drone1"),
        vec![
            QrStep::stale(0),
            QrStep {
                visible_after: Duration::from_secs(5),
                mtime_offset: chrono::Duration::seconds(5),
            },
        ],
    );

    let start = Instant::now();
    let (_ticket, mut events) = harness.begin("drone1").await.unwrap();

    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;
    let event = next_event(&mut events).await;
    let elapsed = start.elapsed();

    match event {
        WorkflowEvent::ArtifactReady { generated_at, .. } => {
            assert!(generated_at > chrono::Utc::now() - chrono::Duration::hours(1));
        }
        other => panic!("expected artifact_ready, got {:?}", other),
    }
    // Ticks at 2s and 4s see the stale file; the 6s tick sees the fresh one.
    assert!(elapsed >= Duration::from_secs(6), "relayed too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(8), "relayed too late: {:?}", elapsed);
    assert_eq!(harness.panel.reads_of("R-drone1"), 1);
    assert!(harness.panel.stats_of("R-drone1") >= 3);
}

/// Test: Key reuse after a terminal state
/// Given a workflow that finished
/// When begin is called again for the same key
/// Then a new workflow starts with a new id
#[tokio::test(start_paused = true)]
async fn test_key_available_after_finish() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);

    let (first, mut events) = harness.begin("drone1").await.unwrap();
    let first_id = first.id;
    wait_for_artifact(&mut events).await;
    harness.service.confirm("drone1").unwrap();

    // The claim is gone by the time the terminal event is observable.
    loop {
        if let WorkflowEvent::Finished { key } = next_event(&mut events).await {
            assert_eq!(key, "drone1");
            break;
        }
    }
    assert_eq!(harness.service.workflow_state("drone1"), None);

    let (second, mut events) = harness.begin("drone1").await.unwrap();
    assert_ne!(second.id, first_id);
    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;
    assert_eq!(harness.panel.restarts_of("R-drone1"), 2);
}

/// Test: Key reuse after a failure
/// Given a protocol instance whose restart fails
/// When the workflow fails
/// Then the failure is reported as upstream and the key is free
#[tokio::test(start_paused = true)]
async fn test_protocol_restart_failure_releases_key() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness.panel.fail_actions_on("R-drone1");

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    match ticket.wait().await.unwrap() {
        WorkflowOutcome::Failed(Error::Upstream(msg)) => assert!(msg.contains("R-drone1")),
        other => panic!("unexpected outcome {:?}", other),
    }
    match next_event(&mut events).await {
        WorkflowEvent::Failed { kind, reason, .. } => {
            assert_eq!(kind, relogin::ErrorKind::Upstream);
            assert!(reason.contains("broken"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(harness.begin("drone1").await.is_ok());
}

/// Test: Core restart failure
/// Given a core instance whose restart fails
/// When the operator confirms
/// Then the workflow fails after exactly one core restart attempt
#[tokio::test(start_paused = true)]
async fn test_core_restart_failure() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);
    harness.panel.fail_actions_on(&core_id("drone1"));

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;
    harness.service.confirm("drone1").unwrap();

    assert!(matches!(
        ticket.wait().await.unwrap(),
        WorkflowOutcome::Failed(Error::Upstream(_))
    ));
    assert_eq!(harness.panel.restarts_of(&core_id("drone1")), 1);
    assert_eq!(harness.service.workflow_state("drone1"), None);
}

/// Test: Raw identifiers bypass the binding store
/// Given no bindings at all
/// When begin uses id: targets
/// Then the workflow restarts exactly those instances
#[tokio::test(start_paused = true)]
async fn test_begin_with_raw_identifiers() {
    let harness = TestHarness::new().await;
    harness.panel.script_qr("P-1", vec![QrStep::fresh(2)]);

    let (notifier, mut events) = relogin::notify::ChannelNotifier::new();
    let ticket = harness
        .service
        .begin(
            relogin::BeginRequest {
                key: "adhoc".into(),
                protocol_target: "id:P-1".into(),
                core_target: "id:C-1".into(),
            },
            std::sync::Arc::new(notifier),
        )
        .await
        .unwrap();

    wait_for_artifact(&mut events).await;
    harness.service.confirm("adhoc").unwrap();
    ticket.wait().await.unwrap();
    assert_eq!(
        harness.panel.calls(),
        vec![
            ("P-1".to_string(), InstanceAction::Restart),
            ("C-1".to_string(), InstanceAction::Restart),
        ]
    );
}

/// Test: Transient stat failures
/// Given a panel whose file listing fails on the first polls
/// When a fresh QR file appears afterwards
/// Then the workflow relays it and never reports a failure
#[tokio::test(start_paused = true)]
async fn test_stat_errors_do_not_abort_polling() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(0)]);
    harness.panel.fail_stats_on(&protocol_id("drone1"), 3);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;
    assert_eq!(harness.panel.stats_of(&protocol_id("drone1")), 4);

    harness.service.confirm("drone1").unwrap();
    assert!(matches!(
        ticket.wait().await.unwrap(),
        WorkflowOutcome::Finished
    ));
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, WorkflowEvent::Failed { .. })));
}
