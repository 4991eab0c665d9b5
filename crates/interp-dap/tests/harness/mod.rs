use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use interp_dap::dap::codec::{DapReader, DapWriter};
use interp_dap::{server, AdapterOptions, AdapterResult};
use interp_debug::{EngineFactory, MockDebugger, MockInterpreter, ProgramSource};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn options() -> AdapterOptions {
    let mut options = AdapterOptions::new(Some(ProgramSource::Source(
        "package main\n\nfunc main() {}\n".to_string(),
    )));
    options.shutdown_timeout = Duration::from_millis(200);
    options
}

/// Start a server over an in-memory pipe, backed by `mock`.
pub fn spawn_server(
    mock: Arc<MockDebugger>,
    options: AdapterOptions,
) -> (TestClient, JoinHandle<AdapterResult<()>>) {
    let (client, server_stream) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_stream);
    let factory: Arc<dyn EngineFactory> = Arc::new(MockInterpreter::factory(mock));
    let server_task =
        tokio::spawn(async move { server::run(server_read, server_write, factory, options).await });

    let (client_read, client_write) = tokio::io::split(client);
    let client = TestClient {
        reader: DapReader::new(client_read),
        writer: client_write,
        seq: 0,
        backlog: VecDeque::new(),
    };
    (client, server_task)
}

pub fn is_event(msg: &Value, name: &str) -> bool {
    msg.get("type").and_then(|v| v.as_str()) == Some("event")
        && msg.get("event").and_then(|v| v.as_str()) == Some(name)
}

pub fn is_success(msg: &Value) -> bool {
    msg.get("success").and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn message(msg: &Value) -> &str {
    msg.get("message").and_then(|v| v.as_str()).unwrap_or("")
}

pub struct TestClient {
    reader: DapReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    seq: i64,
    /// Events read while waiting for a response, in arrival order.
    backlog: VecDeque<Value>,
}

impl TestClient {
    pub async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        let msg = json!({
            "seq": self.seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.send_message(&msg).await;
        self.seq
    }

    pub async fn send_message(&mut self, msg: &Value) {
        DapWriter::new(&mut self.writer)
            .write_value(msg)
            .await
            .unwrap();
    }

    /// Next message from the server, or `None` once the server closed its side.
    pub async fn try_read(&mut self) -> Option<Value> {
        tokio::time::timeout(READ_TIMEOUT, self.reader.read_value())
            .await
            .expect("timed out waiting for a DAP message")
            .unwrap()
    }

    pub async fn read_next(&mut self) -> Value {
        self.try_read().await.expect("server closed the stream")
    }

    /// Send a request and wait for its response. Events seen on the way are kept for
    /// [`TestClient::wait_for_event`].
    pub async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        loop {
            let msg = self.read_next().await;
            if msg.get("type").and_then(|v| v.as_str()) == Some("response")
                && msg.get("request_seq").and_then(|v| v.as_i64()) == Some(seq)
            {
                return msg;
            }
            self.backlog.push_back(msg);
        }
    }

    pub async fn wait_for_event(&mut self, name: &str) -> Value {
        if let Some(pos) = self.backlog.iter().position(|msg| is_event(msg, name)) {
            return self.backlog.remove(pos).unwrap();
        }
        loop {
            let msg = self.read_next().await;
            if is_event(&msg, name) {
                return msg;
            }
            self.backlog.push_back(msg);
        }
    }

    pub fn backlog(&self) -> &VecDeque<Value> {
        &self.backlog
    }

    /// `initialize` followed by `launch`.
    pub async fn launch(&mut self, initialize: Value, launch: Value) -> Value {
        let init = self.request("initialize", initialize).await;
        assert!(is_success(&init), "initialize failed: {init}");
        let resp = self.request("launch", launch).await;
        assert!(is_success(&resp), "launch failed: {resp}");
        self.wait_for_event("initialized").await;
        init
    }

    /// Close the client's write side; the server sees EOF.
    pub async fn hang_up(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    /// Drain everything until the server closes the stream.
    pub async fn read_to_end(&mut self) -> Vec<Value> {
        let mut rest: Vec<Value> = self.backlog.drain(..).collect();
        while let Some(msg) = self.try_read().await {
            rest.push(msg);
        }
        rest
    }
}
