use crate::harness::{is_success, message, options, spawn_server};
use interp_debug::{
    Breakpoint, BreakpointRequest, BreakpointTarget, DebuggerCall, MockDebugger, Position,
    ProgramId,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn set_breakpoint_calls(mock: &MockDebugger) -> Vec<(BreakpointTarget, Vec<BreakpointRequest>)> {
    mock.calls()
        .into_iter()
        .filter_map(|call| match call {
            DebuggerCall::SetBreakpoints { target, requests } => Some((target, requests)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn zero_based_client_lines_are_translated_both_ways() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client
        .launch(json!({"linesStartAt1": false, "columnsStartAt1": false}), json!({}))
        .await;

    let resp = client
        .request(
            "setBreakpoints",
            json!({
                "source": {"path": "/work/util.go"},
                "breakpoints": [{"line": 10}],
            }),
        )
        .await;
    assert!(is_success(&resp), "{resp}");

    assert_eq!(
        set_breakpoint_calls(&mock),
        vec![(
            BreakpointTarget::Path("/work/util.go".to_string()),
            vec![BreakpointRequest::line(11)],
        )]
    );
    // The mock resolves line breakpoints to column 1; 0 on the client side.
    assert_eq!(
        resp["body"],
        json!({"breakpoints": [{"verified": true, "line": 10, "column": 0}]})
    );

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn out_of_range_lines_do_not_break_the_session() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client
        .launch(json!({"linesStartAt1": false, "columnsStartAt1": false}), json!({}))
        .await;

    let resp = client
        .request(
            "setBreakpoints",
            json!({
                "source": {"path": "/work/util.go"},
                "breakpoints": [{"line": i64::MAX}],
            }),
        )
        .await;
    assert!(is_success(&resp), "{resp}");
    assert_eq!(
        resp["body"],
        json!({"breakpoints": [{"verified": true, "line": i64::MAX - 1, "column": 0}]})
    );

    let resp = client.request("threads", json!({})).await;
    assert!(is_success(&resp), "{resp}");

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn responses_match_request_count_and_order() {
    let mock = MockDebugger::new();
    mock.set_breakpoint_resolver(|_, request| match request {
        BreakpointRequest::Line { line, .. } if *line % 2 == 0 => {
            Breakpoint::resolved(Position::new("a.go", *line + 1, 4))
        }
        _ => Breakpoint::invalid(),
    });
    let (mut client, server_task) = spawn_server(mock, options());
    client.launch(json!({}), json!({})).await;

    let resp = client
        .request(
            "setBreakpoints",
            json!({
                "source": {"path": "a.go"},
                "breakpoints": [
                    {"line": 2},
                    {"line": 3, "condition": "i > 2"},
                    {"line": 4, "column": 2},
                ],
            }),
        )
        .await;
    assert_eq!(
        resp["body"]["breakpoints"],
        json!([
            {"verified": true, "line": 3, "column": 4},
            {"verified": false},
            {"verified": true, "line": 5, "column": 4},
        ])
    );

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn source_alias_targets_the_compiled_program() {
    let mock = MockDebugger::new();
    let mut opts = options();
    opts.source_alias = Some("/virtual/main.go".to_string());
    let (mut client, server_task) = spawn_server(mock.clone(), opts);
    client.launch(json!({}), json!({})).await;

    client
        .request(
            "setBreakpoints",
            json!({"source": {"path": "/virtual/main.go"}, "lines": [5]}),
        )
        .await;
    client
        .request(
            "setBreakpoints",
            json!({"source": {"path": "/virtual/main.go/"}, "lines": [5]}),
        )
        .await;

    let targets: Vec<BreakpointTarget> = set_breakpoint_calls(&mock)
        .into_iter()
        .map(|(target, _)| target)
        .collect();
    assert_eq!(
        targets,
        vec![
            BreakpointTarget::Program(ProgramId(1)),
            BreakpointTarget::Path("/virtual/main.go/".to_string()),
        ]
    );

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_source_path_is_a_client_error() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;

    let resp = client
        .request("setBreakpoints", json!({"source": {"name": "x"}, "lines": [1]}))
        .await;
    assert!(!is_success(&resp));
    assert_eq!(message(&resp), "Missing source");
    assert!(set_breakpoint_calls(&mock).is_empty());

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn function_breakpoints_carry_conditions() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;

    let resp = client
        .request(
            "setFunctionBreakpoints",
            json!({"breakpoints": [{"name": "main.run", "condition": "n == 0"}]}),
        )
        .await;
    assert!(is_success(&resp));
    assert_eq!(resp["body"], json!({"breakpoints": [{"verified": false}]}));
    assert_eq!(
        set_breakpoint_calls(&mock),
        vec![(
            BreakpointTarget::All,
            vec![BreakpointRequest::Function {
                name: "main.run".to_string(),
                condition: Some("n == 0".to_string()),
            }],
        )]
    );

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}
