use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dap::codec::DapWriter;
use crate::dap::messages::{make_event, make_response, Request};
use crate::dap::types::OutputEventBody;
use crate::error::TransportError;

struct State {
    next_seq: i64,
    tx: Option<mpsc::UnboundedSender<Value>>,
}

/// The single outbound channel to the client.
///
/// Cloned into the dispatcher, the event pump and the debuggee output writers. Sequence
/// numbers are allocated under the same lock that enqueues the message, so the client sees
/// them strictly increasing no matter which context sent.
#[derive(Clone)]
pub struct Outbox {
    state: Arc<Mutex<State>>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            state: Arc::new(Mutex::new(State {
                next_seq: 1,
                tx: Some(tx),
            })),
        };
        (outbox, rx)
    }

    /// Create an outbox whose messages are written to `writer` by a dedicated task.
    ///
    /// The task ends once the outbox is closed and its queue drained, or on the first write
    /// error.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, mut rx) = Self::channel();
        let task = tokio::spawn(async move {
            let mut writer = DapWriter::new(writer);
            while let Some(msg) = rx.recv().await {
                if let Err(err) = writer.write_value(&msg).await {
                    tracing::warn!(
                        target: "interp.dap",
                        error = %err,
                        "failed to write DAP message"
                    );
                    break;
                }
            }
        });
        (outbox, task)
    }

    fn send_with(
        &self,
        build: impl FnOnce(i64) -> Result<Value, serde_json::Error>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        let value = build(seq)?;
        let Some(tx) = state.tx.as_ref() else {
            return Err(TransportError::Closed);
        };
        tx.send(value).map_err(|_| TransportError::Closed)?;
        state.next_seq += 1;
        Ok(())
    }

    pub fn send_response(
        &self,
        request: &Request,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> Result<(), TransportError> {
        self.send_with(|seq| {
            serde_json::to_value(make_response(seq, request, success, message, body))
        })
    }

    pub fn send_event(&self, event: &str, body: Option<Value>) -> Result<(), TransportError> {
        self.send_with(|seq| serde_json::to_value(make_event(seq, event, body)))
    }

    pub fn send_event_body<B: Serialize>(
        &self,
        event: &str,
        body: &B,
    ) -> Result<(), TransportError> {
        let body = serde_json::to_value(body)?;
        self.send_event(event, Some(body))
    }

    /// Stop accepting messages. Already queued messages are still written.
    pub fn close(&self) {
        self.state.lock().tx = None;
    }
}

/// Debuggee stdout/stderr sink that forwards every write as an `output` event.
pub struct OutputWriter {
    outbox: Outbox,
    category: &'static str,
}

impl OutputWriter {
    pub fn stdout(outbox: Outbox) -> Self {
        Self {
            outbox,
            category: "stdout",
        }
    }

    pub fn stderr(outbox: Outbox) -> Self {
        Self {
            outbox,
            category: "stderr",
        }
    }
}

impl io::Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let body = OutputEventBody {
            category: self.category.to_string(),
            output: String::from_utf8_lossy(buf).into_owned(),
            data: None,
        };
        self.outbox
            .send_event_body("output", &body)
            .map_err(|err| io::Error::new(io::ErrorKind::BrokenPipe, err))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
