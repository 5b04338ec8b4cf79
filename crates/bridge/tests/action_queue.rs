//! Integration tests for the action queue through its public API.

mod common;

use bridge::{
    ActionId, ActionQueueService, ActionState, ApplicationError, BackgroundError, BridgeConfig,
    DispatchError, ExecutionModel,
};
use common::{echo, stays_pending, wait_until, ScriptedConnection, Step};
use serde_json::json;
use tokio::sync::oneshot;

fn suspendable() -> ActionQueueService {
    ActionQueueService::new(BridgeConfig::new(ExecutionModel::Suspendable))
}

fn id(value: &str) -> Option<ActionId> {
    ActionId::new(value)
}

// ---------------------------------------------------------------------------
// Dispatch and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submission_with_ready_connection_dispatches_immediately() {
    let service = suspendable();
    let conn = ScriptedConnection::new("bg");
    service.set_background_connection(conn.clone());

    let result = service
        .submit_request_to_background("getState", vec![json!("full")], None)
        .await;

    assert_eq!(result, Ok(json!({ "method": "getState", "args": ["full"] })));
    assert_eq!(service.pending_count(), 0);
}

#[tokio::test]
async fn test_reconnection_drains_backlog_in_submission_order() {
    let service = suspendable();
    let a = service.submit_request_to_background("a", vec![], None);
    let b = service.submit_request_to_background("b", vec![], None);
    let c = service.submit_request_to_background("c", vec![], None);

    tokio::task::yield_now().await;
    assert_eq!(service.pending_count(), 3);
    assert!(!service.is_draining());

    let conn = ScriptedConnection::new("bg");
    service.set_background_connection(conn.clone());

    assert_eq!(a.await, Ok(echo("a")));
    assert_eq!(b.await, Ok(echo("b")));
    assert_eq!(c.await, Ok(echo("c")));
    assert_eq!(conn.calls(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_fifo_preserved_across_disconnect() {
    let service = suspendable();
    let a = service.submit_request_to_background("a", vec![], id("a"));
    let b = service.submit_request_to_background("b", vec![], id("b"));
    let c = service.submit_request_to_background("c", vec![], id("c"));

    let first = ScriptedConnection::new("first");
    first.script("a", Step::Die);
    service.set_background_connection(first.clone());
    wait_until(|| !service.is_draining()).await;

    assert_eq!(first.calls(), vec!["a"]);
    assert_eq!(
        service.pending_ids(),
        vec![
            ActionId::new("a").unwrap(),
            ActionId::new("b").unwrap(),
            ActionId::new("c").unwrap()
        ]
    );

    let second = ScriptedConnection::new("second");
    service.set_background_connection(second.clone());

    assert_eq!(a.await, Ok(echo("a")));
    assert_eq!(b.await, Ok(echo("b")));
    assert_eq!(c.await, Ok(echo("c")));
    assert_eq!(second.calls(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_application_error_does_not_block_queue() {
    let service = suspendable();
    let a = service.submit_request_to_background("a", vec![], None);
    let b = service.submit_request_to_background("b", vec![], None);
    let c = service.submit_request_to_background("c", vec![], None);

    let conn = ScriptedConnection::new("bg");
    conn.fail_with("b", "invalid params");
    service.set_background_connection(conn.clone());

    assert_eq!(a.await, Ok(echo("a")));
    assert_eq!(
        b.await,
        Err(BackgroundError::Application(ApplicationError::new(
            "invalid params"
        )))
    );
    assert_eq!(c.await, Ok(echo("c")));
    assert_eq!(conn.calls(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_connection_replaced_during_call_retries_on_new_connection() {
    let service = suspendable();
    let first = ScriptedConnection::new("first");
    let release = first.hold("a");
    service.set_background_connection(first.clone());

    let a = service.submit_request_to_background("a", vec![], id("a"));
    let b = service.submit_request_to_background("b", vec![], id("b"));
    wait_until(|| service.status(&ActionId::new("a").unwrap()) == Some(ActionState::InFlight))
        .await;
    assert_eq!(
        service.status(&ActionId::new("b").unwrap()),
        Some(ActionState::Pending)
    );

    let second = ScriptedConnection::new("second");
    service.set_background_connection(second.clone());
    release
        .send(Err(DispatchError::disconnected("port closed")))
        .unwrap();

    assert_eq!(a.await, Ok(echo("a")));
    assert_eq!(b.await, Ok(echo("b")));
    assert_eq!(first.calls(), vec!["a"]);
    assert_eq!(second.calls(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_process_queue_resumes_when_readiness_returns() {
    let service = suspendable();
    let conn = ScriptedConnection::not_ready("bg");
    service.set_background_connection(conn.clone());

    let pending = service.submit_request_to_background("a", vec![], None);
    tokio::task::yield_now().await;
    assert_eq!(service.pending_count(), 1);
    assert!(conn.calls().is_empty());

    conn.set_ready(true);
    service.process_queue();
    assert_eq!(pending.await, Ok(echo("a")));
}

#[tokio::test]
async fn test_cleared_connection_holds_new_submissions() {
    let service = suspendable();
    service.set_background_connection(ScriptedConnection::new("first"));
    service.clear_background_connection();

    let pending = service.submit_request_to_background("a", vec![], None);
    tokio::task::yield_now().await;
    assert_eq!(service.pending_count(), 1);

    let second = ScriptedConnection::new("second");
    let generation = service.set_background_connection(second.clone());
    assert_eq!(generation.as_u64(), 2);
    assert_eq!(pending.await, Ok(echo("a")));
}

// ---------------------------------------------------------------------------
// Idempotent resubmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_queued_id_dispatches_once() {
    let service = suspendable();
    let first = service.submit_request_to_background("addTx", vec![json!(1)], id("tx-1"));
    let second = service.submit_request_to_background("addTx", vec![json!(1)], id("tx-1"));
    assert_eq!(service.pending_count(), 1);
    assert_eq!(first.duplicate_of(), None);
    assert_eq!(second.duplicate_of(), Some(ActionState::Pending));

    let conn = ScriptedConnection::new("bg");
    service.set_background_connection(conn.clone());

    assert_eq!(first.await, Ok(json!({ "method": "addTx", "args": [1] })));
    assert!(stays_pending(second).await);
    assert_eq!(conn.calls(), vec!["addTx"]);
}

#[tokio::test]
async fn test_resubmission_while_in_flight_is_ignored() {
    let service = suspendable();
    let conn = ScriptedConnection::new("bg");
    let release = conn.hold("addTx");
    service.set_background_connection(conn.clone());

    let first = service.submit_request_to_background("addTx", vec![], id("tx-1"));
    wait_until(|| service.status(&ActionId::new("tx-1").unwrap()) == Some(ActionState::InFlight))
        .await;

    let second = service.submit_request_to_background("addTx", vec![], id("tx-1"));
    assert_eq!(service.pending_count(), 0);
    assert_eq!(second.duplicate_of(), Some(ActionState::InFlight));

    release.send(Ok(json!("0xabc"))).unwrap();
    assert_eq!(first.await, Ok(json!("0xabc")));
    assert!(stays_pending(second).await);
    assert_eq!(conn.calls(), vec!["addTx"]);
    assert_eq!(service.status(&ActionId::new("tx-1").unwrap()), None);
}

#[tokio::test]
async fn test_id_is_reusable_after_settlement() {
    let service = suspendable();
    service.set_background_connection(ScriptedConnection::new("bg"));

    let first = service
        .submit_request_to_background("a", vec![], id("same"))
        .await;
    let second = service
        .submit_request_to_background("a", vec![], id("same"))
        .await;
    assert!(first.is_ok());
    assert!(second.is_ok());
}

// ---------------------------------------------------------------------------
// Dropping the queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_drop_queue_cancels_every_pending_record() {
    let service = suspendable();
    let pending: Vec<_> = (0..3)
        .map(|i| service.submit_request_to_background(format!("m{i}"), vec![], None))
        .collect();

    assert_eq!(service.drop_queue(false), 3);
    assert_eq!(service.pending_count(), 0);
    for p in pending {
        assert_eq!(p.await, Err(BackgroundError::Cancelled));
    }
}

#[tokio::test]
async fn test_silent_drop_settles_nothing() {
    let service = suspendable();
    let a = service.submit_request_to_background("a", vec![], None);
    let b = service.submit_request_to_background("b", vec![], None);

    assert_eq!(service.drop_queue(true), 2);
    assert_eq!(service.pending_count(), 0);

    let conn = ScriptedConnection::new("bg");
    service.set_background_connection(conn.clone());
    assert!(stays_pending(a).await);
    assert!(stays_pending(b).await);
    assert!(conn.calls().is_empty());
}

#[tokio::test]
async fn test_drop_queue_leaves_in_flight_record_alone() {
    let service = suspendable();
    let conn = ScriptedConnection::new("bg");
    let release = conn.hold("a");
    service.set_background_connection(conn.clone());

    let a = service.submit_request_to_background("a", vec![], id("a"));
    let b = service.submit_request_to_background("b", vec![], id("b"));
    wait_until(|| service.status(&ActionId::new("a").unwrap()) == Some(ActionState::InFlight))
        .await;

    assert_eq!(service.drop_queue(false), 1);
    assert_eq!(b.await, Err(BackgroundError::Cancelled));

    release.send(Ok(json!(true))).unwrap();
    assert_eq!(a.await, Ok(json!(true)));
    assert_eq!(conn.calls(), vec!["a"]);
}

// ---------------------------------------------------------------------------
// Cancelling one action
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_action_rejects_only_that_record() {
    let service = suspendable();
    let a = service.submit_request_to_background("a", vec![], id("a"));
    let b = service.submit_request_to_background("b", vec![], id("b"));
    let c = service.submit_request_to_background("c", vec![], id("c"));

    let b_id = ActionId::new("b").unwrap();
    assert!(service.cancel_action(&b_id));
    assert!(!service.cancel_action(&b_id));
    assert_eq!(b.await, Err(BackgroundError::Cancelled));
    assert_eq!(
        service.pending_ids(),
        vec![ActionId::new("a").unwrap(), ActionId::new("c").unwrap()]
    );

    let conn = ScriptedConnection::new("bg");
    service.set_background_connection(conn.clone());
    assert_eq!(a.await, Ok(echo("a")));
    assert_eq!(c.await, Ok(echo("c")));
    assert_eq!(conn.calls(), vec!["a", "c"]);
}

#[tokio::test]
async fn test_cancel_action_leaves_in_flight_record_alone() {
    let service = suspendable();
    let conn = ScriptedConnection::new("bg");
    let release = conn.hold("a");
    service.set_background_connection(conn);

    let a_id = ActionId::new("a").unwrap();
    let a = service.submit_request_to_background("a", vec![], Some(a_id.clone()));
    wait_until(|| service.status(&a_id) == Some(ActionState::InFlight)).await;

    assert!(!service.cancel_action(&a_id));
    release.send(Ok(json!("done"))).unwrap();
    assert_eq!(a.await, Ok(json!("done")));
}

// ---------------------------------------------------------------------------
// Failure containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_panicking_connection_rejects_only_that_record() {
    let service = suspendable();
    let conn = ScriptedConnection::new("bg");
    conn.script("boom", Step::Panic);
    service.set_background_connection(conn.clone());

    let boom = service.submit_request_to_background("boom", vec![], None);
    let next = service.submit_request_to_background("next", vec![], None);

    assert!(matches!(boom.await, Err(BackgroundError::Internal { .. })));
    assert_eq!(next.await, Ok(echo("next")));
    wait_until(|| !service.is_draining()).await;
}

// ---------------------------------------------------------------------------
// Persistent execution model (bypass path)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bypass_surfaces_transport_failure_without_retry() {
    let service = ActionQueueService::new(BridgeConfig::new(ExecutionModel::Persistent));
    let conn = ScriptedConnection::new("bg");
    conn.script("a", Step::Die);
    service.set_background_connection(conn.clone());

    let result = service
        .submit_request_to_background("a", vec![], None)
        .await;

    assert_eq!(
        result,
        Err(BackgroundError::Disconnected {
            reason: "bg terminated".to_string()
        })
    );
    assert_eq!(service.pending_count(), 0);
    tokio::task::yield_now().await;
    assert_eq!(conn.calls(), vec!["a"]);
}

#[tokio::test]
async fn test_bypass_without_connection_is_not_connected() {
    let service = ActionQueueService::new(BridgeConfig::new(ExecutionModel::Persistent));
    let result = service
        .submit_request_to_background("a", vec![], None)
        .await;
    assert_eq!(result, Err(BackgroundError::NotConnected));
    assert_eq!(service.pending_count(), 0);
}

#[tokio::test]
async fn test_bypass_contains_panicking_connection() {
    let service = ActionQueueService::new(BridgeConfig::new(ExecutionModel::Persistent));
    let conn = ScriptedConnection::new("bg");
    conn.script("boom", Step::Panic);
    service.set_background_connection(conn);

    let boom = service.submit_request_to_background("boom", vec![], None);
    let next = service.submit_request_to_background("next", vec![], None);

    match boom.await {
        Err(BackgroundError::Internal { message }) => {
            assert!(message.contains("scripted panic in boom"))
        }
        other => panic!("expected internal failure, got {other:?}"),
    }
    assert_eq!(next.await, Ok(echo("next")));
}

#[tokio::test]
async fn test_bypass_forwards_application_errors() {
    let service = ActionQueueService::new(BridgeConfig::new(ExecutionModel::Persistent));
    let conn = ScriptedConnection::new("bg");
    conn.fail_with("a", "locked");
    service.set_background_connection(conn);

    let result = service
        .submit_request_to_background("a", vec![], None)
        .await;
    assert_eq!(
        result,
        Err(BackgroundError::Application(ApplicationError::new("locked")))
    );
}

// ---------------------------------------------------------------------------
// Callback form
// ---------------------------------------------------------------------------

#[tokio::test]
#[allow(deprecated)]
async fn test_callback_form_matches_promise_form() {
    let service = suspendable();
    let conn = ScriptedConnection::new("bg");
    conn.fail_with("bad", "nope");
    service.set_background_connection(conn);

    let (ok_tx, ok_rx) = oneshot::channel();
    service.call_background_method(
        "good",
        vec![],
        move |outcome| {
            let _ = ok_tx.send(outcome);
        },
        None,
    );
    let (err_tx, err_rx) = oneshot::channel();
    service.call_background_method(
        "bad",
        vec![],
        move |outcome| {
            let _ = err_tx.send(outcome);
        },
        None,
    );

    assert_eq!(ok_rx.await.unwrap(), Ok(echo("good")));
    assert_eq!(
        err_rx.await.unwrap(),
        Err(BackgroundError::Application(ApplicationError::new("nope")))
    );
}

#[tokio::test]
#[allow(deprecated)]
async fn test_callback_not_invoked_after_silent_drop() {
    let service = suspendable();
    let (tx, rx) = oneshot::channel::<()>();
    service.call_background_method(
        "a",
        vec![],
        move |_| {
            let _ = tx.send(());
        },
        None,
    );

    tokio::task::yield_now().await;
    assert_eq!(service.drop_queue(true), 1);
    assert!(stays_pending(rx).await);
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let a = ActionQueueService::generate_action_id();
    let b = ActionQueueService::generate_action_id();
    assert_ne!(a, b);
}

// ---------------------------------------------------------------------------
// Multi-threaded runtime
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bypass_calls_reach_connection_in_submission_order() {
    for _ in 0..50 {
        let service = ActionQueueService::new(BridgeConfig::new(ExecutionModel::Persistent));
        let conn = ScriptedConnection::new("bg");
        service.set_background_connection(conn.clone());

        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        let pending: Vec<_> = expected
            .iter()
            .map(|m| service.submit_request_to_background(m.clone(), vec![], None))
            .collect();
        for call in pending {
            assert!(call.await.is_ok());
        }
        assert_eq!(conn.calls(), expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submissions_racing_reconnect_dispatch_once_in_order() {
    for _ in 0..50 {
        let service = suspendable();
        let conn = ScriptedConnection::new("bg");
        let expected: Vec<String> = (0..30).map(|i| format!("m{i}")).collect();

        let submitter = tokio::spawn({
            let service = service.clone();
            let methods = expected.clone();
            async move {
                methods
                    .into_iter()
                    .map(|m| service.submit_request_to_background(m, vec![], None))
                    .collect::<Vec<_>>()
            }
        });
        service.set_background_connection(conn.clone());

        for call in submitter.await.unwrap() {
            assert!(call.await.is_ok());
        }
        assert_eq!(conn.calls(), expected);
        wait_until(|| !service.is_draining()).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_each_dispatched_once() {
    let service = suspendable();
    let conn = ScriptedConnection::not_ready("bg");
    service.set_background_connection(conn.clone());

    let submitters: Vec<_> = (0..4)
        .map(|task| {
            let service = service.clone();
            tokio::spawn(async move {
                (0..25)
                    .map(|n| {
                        let method = format!("t{task}-{n}");
                        let pending = service.submit_request_to_background(
                            method.clone(),
                            vec![],
                            ActionId::new(method),
                        );
                        service.process_queue();
                        pending
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let trigger = tokio::spawn({
        let service = service.clone();
        let conn = conn.clone();
        async move {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            conn.set_ready(true);
            service.process_queue();
        }
    });

    let mut pending = Vec::new();
    for submitter in submitters {
        pending.extend(submitter.await.unwrap());
    }
    trigger.await.unwrap();
    service.process_queue();
    for call in pending {
        assert!(call.await.is_ok());
    }

    let calls = conn.calls();
    assert_eq!(calls.len(), 100);
    for task in 0..4 {
        let prefix = format!("t{task}-");
        let own: Vec<&String> = calls.iter().filter(|m| m.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..25).map(|n| format!("t{task}-{n}")).collect();
        assert_eq!(own, expected.iter().collect::<Vec<_>>());
    }
    wait_until(|| !service.is_draining()).await;
    assert_eq!(service.pending_count(), 0);
}
