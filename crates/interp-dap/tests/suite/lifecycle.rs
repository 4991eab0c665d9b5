use crate::harness::{is_success, message, options, spawn_server};
use interp_debug::{DebuggerCall, MockDebugger, StopReason};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn initialize_reports_capabilities() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock, options());

    let resp = client.request("initialize", json!({"adapterID": "interp"})).await;
    assert!(is_success(&resp));
    assert_eq!(
        resp["body"],
        json!({
            "supportsConfigurationDoneRequest": true,
            "supportsFunctionBreakpoints": true,
            "supportsTerminateRequest": true,
            "supportsConditionalBreakpoints": true,
        })
    );

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn launch_configure_and_run() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());

    client
        .launch(json!({}), json!({"stopOnEntry": true}))
        .await;
    assert!(mock.is_debugging());

    let done = client.request("configurationDone", json!({})).await;
    assert!(is_success(&done), "{done}");
    assert_eq!(message(&done), "Success");
    assert!(mock.calls().contains(&DebuggerCall::Step {
        thread_id: 1,
        reason: StopReason::Entry,
    }));

    let threads = client.request("threads", json!({})).await;
    assert_eq!(threads["body"], json!({"threads": [{"id": 1, "name": "main"}]}));

    let resp = client.request("disconnect", json!({})).await;
    assert!(is_success(&resp));
    server_task.await.unwrap().unwrap();
    assert!(mock.calls().contains(&DebuggerCall::Terminate));
}

#[tokio::test]
async fn requests_out_of_order_fail_without_ending_the_session() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock, options());

    client.request("initialize", json!({})).await;
    let early = client.request("stackTrace", json!({"threadId": 1})).await;
    assert!(!is_success(&early));
    assert_eq!(message(&early), "No program is being debugged");

    let launch = client.request("launch", json!({})).await;
    assert!(is_success(&launch));
    let again = client.request("attach", json!({})).await;
    assert_eq!(message(&again), "Already launched");

    let unknown = client.request("evaluate", json!({"expression": "1 + 1"})).await;
    assert!(!is_success(&unknown));
    assert_eq!(message(&unknown), "Unknown command \"evaluate\"");

    let threads = client.request("threads", json!({})).await;
    assert!(is_success(&threads));

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn compile_failure_reports_and_ends_the_session() {
    let mock = MockDebugger::new();
    mock.set_compile_error("main.go:3:1: expected declaration");
    let (mut client, server_task) = spawn_server(mock.clone(), options());

    client.request("initialize", json!({})).await;
    let resp = client.request("launch", json!({})).await;
    assert!(!is_success(&resp));
    assert_eq!(
        message(&resp),
        "Failed to compile: main.go:3:1: expected declaration"
    );
    assert_eq!(
        resp["body"]["error"]["format"],
        "main.go:3:1: expected declaration"
    );

    let output = client.wait_for_event("output").await;
    assert_eq!(output["body"]["category"], "stderr");
    assert_eq!(
        output["body"]["output"],
        "main.go:3:1: expected declaration\n"
    );

    server_task.await.unwrap().unwrap();
    assert!(!mock.is_debugging());
}

#[tokio::test]
async fn engine_creation_failure_ends_the_session() {
    let mock = MockDebugger::new();
    mock.set_create_error("no interpreter available");
    let (mut client, server_task) = spawn_server(mock, options());

    client.request("initialize", json!({})).await;
    let resp = client.request("launch", json!({})).await;
    assert!(!is_success(&resp));
    assert_eq!(
        message(&resp),
        "Failed to create interpreter: no interpreter available"
    );
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn debuggee_output_becomes_output_events() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;

    mock.print_stdout("hello\n").unwrap();
    mock.print_stderr("oops\n").unwrap();
    assert_eq!(mock.read_stdin().unwrap(), Vec::<u8>::new());

    let stdout = client.wait_for_event("output").await;
    assert_eq!(stdout["body"], json!({"category": "stdout", "output": "hello\n"}));
    let stderr = client.wait_for_event("output").await;
    assert_eq!(stderr["body"], json!({"category": "stderr", "output": "oops\n"}));

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn sequence_numbers_increase_across_responses_and_events() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;
    mock.print_stdout("x").unwrap();
    client.request("threads", json!({})).await;
    client.request("disconnect", json!({})).await;

    let mut seqs: Vec<i64> = client
        .read_to_end()
        .await
        .iter()
        .filter_map(|msg| msg["seq"].as_i64())
        .collect();
    let sorted = {
        let mut s = seqs.clone();
        s.sort_unstable();
        s
    };
    assert_eq!(seqs, sorted);
    seqs.dedup();
    assert_eq!(seqs.len(), sorted.len());

    server_task.await.unwrap().unwrap();
}
