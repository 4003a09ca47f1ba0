//! Claim exclusivity and per-key independence.

use std::sync::Arc;

use relogin::instance::InstanceAction;
use relogin::workflow::WorkflowState;
use relogin::{Error, WorkflowOutcome};

use crate::fixtures::{
    core_id, protocol_id, wait_for_artifact, wait_for_state, QrStep, TestHarness,
};

/// Test: Concurrent begin on one key
/// Given two begin calls for the same key issued together
/// When both complete
/// Then exactly one wins and the other gets Conflict
#[tokio::test(start_paused = true)]
async fn test_concurrent_begin_same_key() {
    let harness = TestHarness::new().await;
    harness.bind_pair("drone1").await;

    let (a, b) = tokio::join!(harness.begin("drone1"), harness.begin("drone1"));
    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict(_))))
        .count();
    assert_eq!((wins, conflicts), (1, 1));

    let (_ticket, mut events) = results
        .into_iter()
        .find_map(|r| r.ok())
        .expect("one begin succeeds");
    wait_for_state(&mut events, WorkflowState::WaitingForQrCode).await;
    assert_eq!(harness.panel.restarts_of(&protocol_id("drone1")), 1);
}

/// Test: Concurrent begin across worker threads
/// Given many tasks racing to begin the same key on a multi-threaded runtime
/// When all complete
/// Then exactly one claim succeeds
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_begin_multi_thread() {
    let harness = Arc::new(TestHarness::new().await);
    harness.bind_pair("drone1").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move { harness.begin("drone1").await }));
    }

    // Winners keep their receivers so the workflow stays alive.
    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(winner) => winners.push(winner),
            Err(Error::Conflict(key)) => assert_eq!(key, "drone1"),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(
        harness.service.active_workflows().len(),
        1,
        "exactly one workflow holds the key"
    );
    harness.service.shutdown();
}

/// Test: Independent keys
/// Given workflows for two different keys
/// When one is cancelled
/// Then the other still runs to Finished
#[tokio::test(start_paused = true)]
async fn test_independent_keys() {
    let harness = TestHarness::new().await;
    harness.bind_pair("a").await;
    harness.bind_pair("b").await;
    harness
        .panel
        .script_qr(&protocol_id("a"), vec![QrStep::fresh(2)]);
    harness
        .panel
        .script_qr(&protocol_id("b"), vec![QrStep::fresh(4)]);

    let (ticket_a, mut events_a) = harness.begin("a").await.unwrap();
    let (ticket_b, mut events_b) = harness.begin("b").await.unwrap();
    let active: Vec<String> = harness
        .service
        .active_workflows()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(active, vec!["a".to_string(), "b".to_string()]);

    wait_for_artifact(&mut events_a).await;
    harness.service.cancel("a").unwrap();
    assert!(matches!(ticket_a.wait().await.unwrap(), WorkflowOutcome::Cancelled));

    wait_for_artifact(&mut events_b).await;
    harness.service.confirm("b").unwrap();
    assert!(matches!(ticket_b.wait().await.unwrap(), WorkflowOutcome::Finished));

    let calls = harness.panel.calls();
    assert!(!calls.contains(&(core_id("a"), InstanceAction::Restart)));
    assert!(calls.contains(&(core_id("b"), InstanceAction::Restart)));
    assert!(harness.service.active_workflows().is_empty());
}
