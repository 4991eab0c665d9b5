use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel as channel;
use interp_debug::{DebugEvent, EventCallback, StopEvent, ThreadId};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::adapter::SessionTables;
use crate::dap::types::{StoppedEventBody, ThreadEventBody};
use crate::error::TransportError;
use crate::outbox::Outbox;

/// Stop events retained per thread until a resume-class command releases them.
#[derive(Default)]
pub struct EventTracker {
    retained: Mutex<HashMap<ThreadId, StopEvent>>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(&self, event: StopEvent) {
        self.retain_after(event, || {});
    }

    /// Retain `event` after running `invalidate`, both under the tracker lock, so a reader
    /// using [`EventTracker::get_with`] never pairs the new stop with state from before
    /// `invalidate`, or the reverse.
    pub fn retain_after(&self, event: StopEvent, invalidate: impl FnOnce()) {
        let thread_id = event.thread_id;
        let mut retained = self.retained.lock();
        invalidate();
        if let Some(previous) = retained.insert(thread_id, event) {
            // The engine stopped a thread the client never resumed.
            tracing::warn!(
                target: "interp.dap",
                thread_id,
                previous = ?previous.reason,
                "replacing unreleased stop event"
            );
        }
    }

    pub fn release(&self, thread_id: ThreadId) -> Option<StopEvent> {
        self.retained.lock().remove(&thread_id)
    }

    pub fn get(&self, thread_id: ThreadId) -> Option<StopEvent> {
        self.retained.lock().get(&thread_id).cloned()
    }

    /// Run `f` on the retained stop of `thread_id` while holding the tracker lock.
    pub fn get_with<R>(&self, thread_id: ThreadId, f: impl FnOnce(&StopEvent) -> R) -> Option<R> {
        self.retained.lock().get(&thread_id).map(f)
    }

    pub fn clear(&self) {
        self.retained.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.retained.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Callback handed to the engine. It only enqueues; all table and outbox work happens on the
/// pump thread.
pub fn event_callback(tx: channel::Sender<DebugEvent>) -> EventCallback {
    Arc::new(move |event| {
        if let Err(err) = tx.send(event) {
            tracing::debug!(
                target: "interp.dap",
                event = ?err.0,
                "event pump has stopped; dropping engine event"
            );
        }
    })
}

/// Single consumer of engine events.
pub struct EventPump {
    tables: Arc<SessionTables>,
    outbox: Outbox,
    terminated: CancellationToken,
    errors: Option<channel::Sender<TransportError>>,
}

impl EventPump {
    pub fn new(
        tables: Arc<SessionTables>,
        outbox: Outbox,
        terminated: CancellationToken,
        errors: Option<channel::Sender<TransportError>>,
    ) -> Self {
        Self {
            tables,
            outbox,
            terminated,
            errors,
        }
    }

    /// Run the pump on its own thread until the engine terminates, every event sender is
    /// gone, or `shutdown` is signalled (or dropped).
    pub fn spawn(
        self,
        events: channel::Receiver<DebugEvent>,
        shutdown: channel::Receiver<()>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || self.run(events, shutdown))
    }

    fn run(self, events: channel::Receiver<DebugEvent>, shutdown: channel::Receiver<()>) {
        loop {
            channel::select! {
                recv(shutdown) -> _ => break,
                recv(events) -> msg => {
                    let Ok(event) = msg else {
                        break;
                    };
                    if self.handle(event).is_break() {
                        break;
                    }
                },
            }
        }
        tracing::debug!(target: "interp.dap", "event pump stopped");
    }

    pub fn handle(&self, event: DebugEvent) -> ControlFlow<()> {
        match event {
            DebugEvent::ThreadStarted(thread_id) => {
                self.notify_thread("started", thread_id);
                ControlFlow::Continue(())
            }
            DebugEvent::ThreadExited(thread_id) => {
                self.notify_thread("exited", thread_id);
                ControlFlow::Continue(())
            }
            DebugEvent::Terminated => {
                self.tables.purge();
                self.tables.events.clear();
                let sent = self.outbox.send_event("terminated", None);
                self.report(sent);
                self.terminated.cancel();
                ControlFlow::Break(())
            }
            DebugEvent::Stopped(event) => {
                let body = StoppedEventBody {
                    reason: event.reason.as_dap_reason().to_string(),
                    thread_id: event.thread_id,
                };
                tracing::debug!(
                    target: "interp.dap",
                    thread_id = event.thread_id,
                    reason = body.reason.as_str(),
                    "thread stopped"
                );
                self.tables.record_stop(event);
                let sent = self.outbox.send_event_body("stopped", &body);
                self.report(sent);
                ControlFlow::Continue(())
            }
        }
    }

    fn notify_thread(&self, reason: &str, thread_id: ThreadId) {
        let body = ThreadEventBody {
            reason: reason.to_string(),
            thread_id,
        };
        let sent = self.outbox.send_event_body("thread", &body);
        self.report(sent);
    }

    fn report(&self, result: Result<(), TransportError>) {
        let Err(err) = result else {
            return;
        };
        tracing::warn!(target: "interp.dap", error = %err, "failed to send notification");
        if let Some(errors) = &self.errors {
            let _ = errors.try_send(err);
        }
    }
}
