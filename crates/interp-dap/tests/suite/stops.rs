use std::sync::Arc;

use crate::harness::{is_success, message, options, spawn_server};
use interp_debug::{
    DebugEvent, DebuggerCall, Frame, FrameScope, MockDebugger, NamedValue, Position, ProgramId,
    StopEvent, StopReason, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn frames(thread: i64) -> Vec<Frame> {
    vec![
        Frame {
            name: format!("main.worker{thread}"),
            position: Some(Position::new("<input>", 7, 2)),
            program: Some(ProgramId(1)),
            scopes: vec![
                FrameScope {
                    closure: false,
                    variables: vec![
                        NamedValue::new("n", Value::int(thread)),
                        NamedValue::new(
                            "items",
                            Value::slice("[]string", vec![Value::string("a"), Value::string("b")]),
                        ),
                    ],
                },
                FrameScope {
                    closure: true,
                    variables: vec![NamedValue::new(
                        "p",
                        Value::pointer_to("*int", Value::int(42)),
                    )],
                },
            ],
        },
        Frame {
            name: "runtime.goexit".to_string(),
            position: None,
            program: None,
            scopes: Vec::new(),
        },
    ]
}

fn stop(thread: i64, reason: StopReason) -> DebugEvent {
    DebugEvent::Stopped(StopEvent::new(reason, thread, Arc::new(frames(thread))))
}

#[tokio::test]
async fn concurrent_stops_are_tracked_per_thread() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;
    client.request("configurationDone", json!({})).await;

    let emitters: Vec<_> = [1, 2]
        .into_iter()
        .map(|thread| {
            let mock = mock.clone();
            std::thread::spawn(move || mock.emit(stop(thread, StopReason::Breakpoint)))
        })
        .collect();
    for emitter in emitters {
        assert!(emitter.join().unwrap());
    }

    let mut stopped = vec![
        client.wait_for_event("stopped").await["body"].clone(),
        client.wait_for_event("stopped").await["body"].clone(),
    ];
    stopped.sort_by_key(|body| body["threadId"].as_i64());
    assert_eq!(
        stopped,
        vec![
            json!({"reason": "breakpoint", "threadId": 1}),
            json!({"reason": "breakpoint", "threadId": 2}),
        ]
    );

    for thread in [1, 2] {
        let trace = client.request("stackTrace", json!({"threadId": thread})).await;
        assert!(is_success(&trace), "{trace}");
        assert_eq!(trace["body"]["totalFrames"], 2);
        assert_eq!(
            trace["body"]["stackFrames"][0]["name"],
            format!("main.worker{thread}")
        );
    }

    let unknown = client.request("stackTrace", json!({"threadId": 3})).await;
    assert!(!is_success(&unknown));
    assert_eq!(message(&unknown), "Invalid thread ID");

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn inspection_walks_frames_scopes_and_children() {
    let mock = MockDebugger::new();
    let mut opts = options();
    opts.source_alias = Some("/work/main.go".to_string());
    let (mut client, server_task) = spawn_server(mock.clone(), opts);
    client.launch(json!({}), json!({})).await;
    client.request("configurationDone", json!({})).await;

    assert!(mock.emit(stop(1, StopReason::StepOver)));
    let stopped = client.wait_for_event("stopped").await;
    assert_eq!(stopped["body"], json!({"reason": "step", "threadId": 1}));

    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    let top = &trace["body"]["stackFrames"][0];
    assert_eq!(top["source"], json!({"name": "main.go", "path": "/work/main.go"}));
    assert_eq!((top["line"].clone(), top["column"].clone()), (json!(7), json!(2)));
    let bottom = &trace["body"]["stackFrames"][1];
    assert_eq!(bottom.get("source"), None);
    assert_eq!(bottom["line"], 0);

    let scopes = client
        .request("scopes", json!({"frameId": top["id"].clone()}))
        .await;
    let scopes = scopes["body"]["scopes"].as_array().unwrap().clone();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0]["name"], "Locals");
    assert_eq!(scopes[1]["name"], "Closure");

    let locals = client
        .request(
            "variables",
            json!({"variablesReference": scopes[0]["variablesReference"].clone()}),
        )
        .await;
    let locals = locals["body"]["variables"].as_array().unwrap().clone();
    assert_eq!(
        locals[0],
        json!({"name": "n", "value": "1", "type": "int", "variablesReference": 0})
    );
    assert_eq!(locals[1]["value"], "[]string{\"a\",\"b\"}");

    let items = client
        .request(
            "variables",
            json!({"variablesReference": locals[1]["variablesReference"].clone()}),
        )
        .await;
    let names: Vec<_> = items["body"]["variables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["0", "1"]);

    let closure = client
        .request(
            "variables",
            json!({"variablesReference": scopes[1]["variablesReference"].clone()}),
        )
        .await;
    assert_eq!(closure["body"]["variables"][0]["value"], "*42");

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn handles_go_stale_after_the_next_stop() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;
    client.request("configurationDone", json!({})).await;

    assert!(mock.emit(stop(1, StopReason::Breakpoint)));
    client.wait_for_event("stopped").await;
    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    let frame_id = trace["body"]["stackFrames"][0]["id"].clone();
    let scopes = client.request("scopes", json!({"frameId": frame_id.clone()})).await;
    let var_ref = scopes["body"]["scopes"][0]["variablesReference"].clone();

    assert!(mock.emit(stop(2, StopReason::Pause)));
    client.wait_for_event("stopped").await;

    let stale_scopes = client.request("scopes", json!({"frameId": frame_id})).await;
    assert!(!is_success(&stale_scopes));
    assert_eq!(message(&stale_scopes), "Invalid frame ID");

    let stale_vars = client
        .request("variables", json!({"variablesReference": var_ref}))
        .await;
    assert!(!is_success(&stale_vars));
    assert_eq!(message(&stale_vars), "Invalid variable reference");

    // The first thread's stop is still retained; only its handles were invalidated.
    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    assert!(is_success(&trace));

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn resuming_releases_the_stop() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;
    client.request("configurationDone", json!({})).await;

    assert!(mock.emit(stop(1, StopReason::Breakpoint)));
    client.wait_for_event("stopped").await;

    let resp = client.request("next", json!({"threadId": 1})).await;
    assert!(is_success(&resp));
    assert!(mock.calls().contains(&DebuggerCall::Step {
        thread_id: 1,
        reason: StopReason::StepOver,
    }));
    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    assert_eq!(message(&trace), "Invalid thread ID");

    assert!(mock.emit(stop(1, StopReason::StepOver)));
    client.wait_for_event("stopped").await;
    let trace = client.request("stackTrace", json!({"threadId": 1})).await;
    assert!(is_success(&trace));

    let resp = client.request("continue", json!({"threadId": 1})).await;
    assert_eq!(resp["body"], json!({"allThreadsContinued": false}));

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn thread_lifecycle_events_are_forwarded() {
    let mock = MockDebugger::new();
    let (mut client, server_task) = spawn_server(mock.clone(), options());
    client.launch(json!({}), json!({})).await;

    assert!(mock.emit(DebugEvent::ThreadStarted(5)));
    assert!(mock.emit(DebugEvent::ThreadExited(5)));

    let started = client.wait_for_event("thread").await;
    assert_eq!(started["body"], json!({"reason": "started", "threadId": 5}));
    let exited = client.wait_for_event("thread").await;
    assert_eq!(exited["body"], json!({"reason": "exited", "threadId": 5}));

    client.request("disconnect", json!({})).await;
    server_task.await.unwrap().unwrap();
}
