use std::time::{Duration, Instant};

use crate::harness::{is_event, is_success, message, options, spawn_server};
use interp_debug::{DebugEvent, DebuggerCall, MockDebugger};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn disconnect_succeeds_while_the_debuggee_hangs() {
    let mock = MockDebugger::new();
    mock.hang_on_wait();
    let mut opts = options();
    opts.shutdown_timeout = Duration::from_millis(100);
    let (mut client, server_task) = spawn_server(mock.clone(), opts);
    client.launch(json!({}), json!({})).await;
    client.request("configurationDone", json!({})).await;

    let started = Instant::now();
    let resp = client.request("disconnect", json!({})).await;
    assert!(is_success(&resp), "{resp}");

    server_task.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(mock.calls().contains(&DebuggerCall::Wait));

    // Let the detached wait return.
    mock.finish(None);
}

#[tokio::test]
async fn engine_termination_is_reported_and_ends_debugging() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;
    client.request("configurationDone", json!({})).await;

    assert!(mock.emit(DebugEvent::Terminated));
    client.wait_for_event("terminated").await;

    let resp = client.request("threads", json!({})).await;
    assert!(!is_success(&resp));
    assert_eq!(message(&resp), "Debug session has terminated");

    let resp = client.request("terminate", json!({})).await;
    assert!(is_success(&resp));
    let resp = client.request("disconnect", json!({})).await;
    assert!(is_success(&resp));

    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn terminate_keeps_the_connection_open() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;

    let resp = client.request("terminate", json!({})).await;
    assert!(is_success(&resp));
    assert!(mock.calls().contains(&DebuggerCall::Terminate));

    let resp = client.request("disconnect", json!({})).await;
    assert!(is_success(&resp));
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn eof_shuts_the_session_down() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;

    client.hang_up().await;
    server_task.await.unwrap().unwrap();

    assert!(mock.calls().contains(&DebuggerCall::Terminate));
    let rest = client.read_to_end().await;
    assert!(rest.iter().all(|msg| !is_event(msg, "stopped")));
}

#[tokio::test]
async fn non_request_messages_are_ignored() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock, options());

    client
        .send_message(&json!({"seq": 100, "type": "event", "event": "custom"}))
        .await;
    client
        .send_message(&json!({
            "seq": 101,
            "type": "response",
            "request_seq": 1,
            "success": true,
            "command": "runInTerminal",
        }))
        .await;

    let init = client.request("initialize", json!({})).await;
    assert!(is_success(&init));
    assert!(client.backlog().is_empty());
    let resp = client.request("disconnect", json!({})).await;
    assert!(is_success(&resp));
    server_task.await.unwrap().unwrap();
}
