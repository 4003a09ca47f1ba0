//! Continue and cancel semantics.

use std::time::Duration;

use relogin::instance::InstanceAction;
use relogin::workflow::{WorkflowEvent, WorkflowState};
use relogin::{Error, WorkflowOutcome};

use crate::fixtures::{
    core_id, drain, next_event, protocol_id, wait_for_artifact, wait_for_state, QrStep,
    TestHarness,
};

fn is_cancelled_event(event: &WorkflowEvent) -> bool {
    matches!(
        event,
        WorkflowEvent::StateChanged {
            state: WorkflowState::Cancelled,
            ..
        }
    )
}

/// Test: Cancel while waiting for the QR code
/// Given a workflow polling for a QR file
/// When cancel is requested
/// Then it ends Cancelled with no further panel calls and frees the key
#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_qr() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;

    harness.service.cancel("drone1").unwrap();
    assert!(is_cancelled_event(&next_event(&mut events).await));
    assert!(matches!(ticket.wait().await.unwrap(), WorkflowOutcome::Cancelled));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(
        harness.panel.calls(),
        vec![(protocol_id("drone1"), InstanceAction::Restart)]
    );
    assert_eq!(harness.panel.stats_of(&protocol_id("drone1")), 0);
    assert_eq!(harness.service.workflow_state("drone1"), None);
    assert!(drain(&mut events).is_empty());
}

/// Test: Cancel while waiting for confirmation
/// Given a workflow that relayed its QR code
/// When cancel is requested
/// Then the core instance is never restarted
#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_auth() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;

    harness.service.cancel("drone1").unwrap();
    assert!(matches!(ticket.wait().await.unwrap(), WorkflowOutcome::Cancelled));
    assert!(is_cancelled_event(&next_event(&mut events).await));

    // A late continue finds nothing to confirm.
    assert!(matches!(
        harness.service.confirm("drone1"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(harness.panel.restarts_of(&core_id("drone1")), 0);
    assert!(harness.begin("drone1").await.is_ok());
}

/// Test: Early continue is rejected
/// Given a workflow still waiting for its QR code
/// When continue arrives
/// Then it is refused and does not pre-confirm the login
#[tokio::test(start_paused = true)]
async fn test_continue_before_qr_is_rejected() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(4)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;

    assert!(matches!(
        harness.service.confirm("drone1"),
        Err(Error::NotFound(_))
    ));

    wait_for_artifact(&mut events).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        harness.service.workflow_state("drone1"),
        Some(WorkflowState::WaitingForAuth)
    );
    assert_eq!(harness.panel.restarts_of(&core_id("drone1")), 0);

    harness.service.confirm("drone1").unwrap();
    assert!(matches!(ticket.wait().await.unwrap(), WorkflowOutcome::Finished));
}

/// Test: Duplicate continue
/// Given a workflow waiting for confirmation
/// When continue is sent twice
/// Then both are accepted and the core restarts exactly once
#[tokio::test(start_paused = true)]
async fn test_duplicate_continue_is_harmless() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;

    harness.service.confirm("drone1").unwrap();
    harness.service.confirm("drone1").unwrap();
    assert!(matches!(ticket.wait().await.unwrap(), WorkflowOutcome::Finished));
    assert_eq!(harness.panel.restarts_of(&core_id("drone1")), 1);
}

/// Test: Signals for keys without a workflow
/// Given no running workflow
/// When continue and cancel arrive
/// Then continue is NotFound and cancel is a quiet no-op
#[tokio::test(start_paused = true)]
async fn test_signals_for_unknown_key() {
    let harness = TestHarness::new().await;

    assert!(matches!(
        harness.service.confirm("ghost"),
        Err(Error::NotFound(_))
    ));
    assert!(harness.service.cancel("ghost").is_ok());
    assert!(harness.panel.calls().is_empty());
}

/// Test: Cancel after a terminal state
/// Given a workflow that already finished
/// When cancel arrives
/// Then it is accepted and nothing else happens
#[tokio::test(start_paused = true)]
async fn test_cancel_after_finish_is_noop() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;
    harness.service.confirm("drone1").unwrap();
    ticket.wait().await.unwrap();
    let before = harness.panel.calls();

    assert!(harness.service.cancel("drone1").is_ok());
    assert_eq!(harness.panel.calls(), before);
    assert!(!drain(&mut events).iter().any(is_cancelled_event));
}

/// Test: Requester goes away
/// Given a workflow waiting for its QR code
/// When the event receiver is dropped
/// Then the workflow cancels itself and frees the key
#[tokio::test(start_paused = true)]
async fn test_dropped_receiver_cancels() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(10)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;
    drop(events);

    assert!(matches!(ticket.wait().await.unwrap(), WorkflowOutcome::Cancelled));
    assert_eq!(harness.panel.reads_of(&protocol_id("drone1")), 0);
    assert_eq!(harness.service.workflow_state("drone1"), None);
}

/// Test: Service shutdown
/// Given a workflow waiting for confirmation
/// When the service shuts down
/// Then the workflow cancels and new workflows are refused
#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_waiting_workflow() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;
    harness
        .panel
        .script_qr(&protocol_id("drone1"), vec![QrStep::fresh(2)]);

    let (ticket, mut events) = harness.begin("drone1").await.unwrap();
    wait_for_artifact(&mut events).await;

    harness.service.shutdown();
    assert!(matches!(ticket.wait().await.unwrap(), WorkflowOutcome::Cancelled));
    assert!(harness.service.is_shutting_down());
    assert!(matches!(
        harness.begin("drone1").await,
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(harness.panel.restarts_of(&core_id("drone1")), 0);
}
