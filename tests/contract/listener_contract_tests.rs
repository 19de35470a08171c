//! Contract tests for the worker listener and primary-context loop.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use appvisor::worker::listener::ListenerState;

use super::test_helpers::{builtin, exchange, raw_client, start_worker, start_worker_on};

#[tokio::test]
async fn answers_ping_with_pong() {
    let worker = start_worker().await;
    let mut client = raw_client(worker.port).await;

    assert_eq!(exchange(&mut client, r#""ping""#).await, r#""pong""#);
    worker.display.close();
}

#[tokio::test]
async fn serves_requests_in_order_on_one_connection() {
    let worker = start_worker().await;
    let mut client = raw_client(worker.port).await;

    let set = exchange(&mut client, r#"["","setInput",{"dataIn":[1,2,3]}]"#).await;
    assert_eq!(set, r#"{"ok":null}"#);

    let get = exchange(&mut client, r#"["flowchart","getOutput",null]"#).await;
    assert_eq!(get, r#"{"ok":{"dataOut":[1,2,3]}}"#);

    let node = exchange(&mut client, r#"["pass","enabled",false]"#).await;
    assert_eq!(node, r#"{"ok":true}"#);
    worker.display.close();
}

#[tokio::test]
async fn bad_frame_gets_bad_request_and_connection_survives() {
    let worker = start_worker().await;
    let mut client = raw_client(worker.port).await;

    let reply: serde_json::Value =
        serde_json::from_str(&exchange(&mut client, "not json at all").await).unwrap();
    assert_eq!(reply["err"]["kind"], json!("bad_request"));

    assert_eq!(exchange(&mut client, r#""ping""#).await, r#""pong""#);
    worker.display.close();
}

#[tokio::test]
async fn unknown_node_is_a_reply_not_a_fault() {
    let worker = start_worker().await;
    let mut client = raw_client(worker.port).await;

    let reply: serde_json::Value =
        serde_json::from_str(&exchange(&mut client, r#"["nope","x",1]"#).await).unwrap();
    assert_eq!(reply["err"]["kind"], json!("unknown_node"));

    assert_eq!(exchange(&mut client, r#""ping""#).await, r#""pong""#);
    worker.display.close();
}

#[tokio::test]
async fn accepts_a_new_connection_after_disconnect() {
    let worker = start_worker().await;

    let mut first = raw_client(worker.port).await;
    exchange(&mut first, r#"["","setInput",{"dataIn":7}]"#).await;
    drop(first);

    let mut second = raw_client(worker.port).await;
    let get = exchange(&mut second, r#"["","getOutput",null]"#).await;
    assert_eq!(get, r#"{"ok":{"dataOut":7}}"#, "state outlives the connection");
    worker.display.close();
}

#[tokio::test]
async fn state_waits_for_requests_while_connected() {
    let mut worker = start_worker().await;
    let mut client = raw_client(worker.port).await;
    exchange(&mut client, r#""ping""#).await;

    tokio::time::timeout(
        Duration::from_secs(5),
        worker
            .states
            .wait_for(|state| *state == ListenerState::AwaitingRequest),
    )
    .await
    .expect("listener settles")
    .expect("state channel open");
    worker.display.close();
}

#[tokio::test]
async fn closing_display_interrupts_listener_and_drops_connection() {
    let mut worker = start_worker().await;
    let mut client = raw_client(worker.port).await;
    exchange(&mut client, r#""ping""#).await;

    worker.display.close();

    tokio::time::timeout(Duration::from_secs(5), &mut worker.task)
        .await
        .expect("worker stops")
        .expect("worker task");
    assert_eq!(*worker.states.borrow(), ListenerState::Interrupted);

    let next = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("socket closed promptly");
    assert!(next.is_none() || next.is_some_and(|r| r.is_err()));
}

#[tokio::test]
async fn terminating_context_stops_worker() {
    let mut worker = start_worker().await;

    worker.ctx.terminate();

    tokio::time::timeout(Duration::from_secs(5), &mut worker.task)
        .await
        .expect("worker stops")
        .expect("worker task");
    assert_eq!(*worker.states.borrow(), ListenerState::Interrupted);
}

#[tokio::test]
async fn reply_over_frame_limit_becomes_a_failure_reply() {
    let worker = start_worker_on(builtin("scaled", &[json!(2)]), 0).await;
    let mut client = raw_client(worker.port).await;

    // 3M ones fit in a request frame; the scaled output (`2.0` each) does not.
    let ones = vec!["1"; 3_000_000].join(",");
    let set = exchange(&mut client, &format!(r#"["","setInput",{{"dataIn":[{ones}]}}]"#)).await;
    assert_eq!(set, r#"{"ok":null}"#);

    let reply: serde_json::Value =
        serde_json::from_str(&exchange(&mut client, r#"["","getOutput",null]"#).await).unwrap();
    assert_eq!(reply["err"]["kind"], json!("reply_too_large"));

    assert_eq!(exchange(&mut client, r#""ping""#).await, r#""pong""#);
    exchange(&mut client, r#"["","setInput",{"dataIn":[1]}]"#).await;
    let get = exchange(&mut client, r#"["","getOutput",null]"#).await;
    assert_eq!(get, r#"{"ok":{"dataOut":[2.0]}}"#, "state is readable again once it fits");
    worker.display.close();
}
