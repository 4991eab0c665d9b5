use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as channel;
use interp_config::DebugConfig;
use interp_debug::{
    Breakpoint as EngineBreakpoint, BreakpointTarget, DebugOptions, DebuggeeIo, Debugger,
    EngineFactory, Frame, Interpreter, Program, ProgramSource, StopEvent, StopReason, ThreadId,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::breakpoints::{BreakpointTranslator, LineBase};
use crate::dap::codec::sanitize_json_error_message;
use crate::dap::messages::Request;
use crate::dap::types::{
    BreakpointsResponseBody, Capabilities, ContinueResponseBody, ErrorResponseBody,
    InitializeArguments, LaunchArguments, Message, OutputEventBody, Scope, ScopesArguments,
    ScopesResponseBody, SetBreakpointsArguments, SetFunctionBreakpointsArguments,
    StackTraceArguments, StackTraceResponseBody, Thread, ThreadArguments, ThreadsResponseBody,
    VariablesArguments, VariablesResponseBody,
};
use crate::error::{AdapterResult, TransportError};
use crate::events::{event_callback, EventPump, EventTracker};
use crate::handles::{Epoch, HandleTable};
use crate::outbox::{Outbox, OutputWriter};
use crate::variables::{VariableScope, VariableTable};

/// The engine numbers the program's first thread 1.
const MAIN_THREAD: ThreadId = 1;

const NOT_LAUNCHED: &str = "No program is being debugged";
const ALREADY_LAUNCHED: &str = "Already launched";
const SESSION_TERMINATED: &str = "Debug session has terminated";

// Each retry follows a purge by another thread's stop.
const STACK_TRACE_ATTEMPTS: usize = 4;

const COMMANDS: &[&str] = &[
    "launch",
    "attach",
    "setBreakpoints",
    "setFunctionBreakpoints",
    "configurationDone",
    "continue",
    "stepIn",
    "next",
    "stepOut",
    "pause",
    "threads",
    "stackTrace",
    "scopes",
    "variables",
    "terminate",
    "disconnect",
];

/// Per-session state shared between the dispatcher and the event pump.
///
/// Each member has its own lock. The only nesting is tracker, then handle tables, in
/// [`SessionTables::record_stop`] and [`SessionTables::retained`].
pub struct SessionTables {
    pub frames: HandleTable<Frame>,
    pub variables: VariableTable,
    pub events: EventTracker,
}

impl SessionTables {
    pub fn new(max_value_length: usize, max_key_length: usize) -> Self {
        Self {
            frames: HandleTable::new(),
            variables: VariableTable::new(max_value_length, max_key_length),
            events: EventTracker::new(),
        }
    }

    /// Invalidate every frame and variable handle issued so far.
    pub fn purge(&self) {
        self.frames.purge();
        self.variables.purge();
    }

    /// Purge both tables and retain `event` as one step.
    pub fn record_stop(&self, event: StopEvent) {
        self.events.retain_after(event, || self.purge());
    }

    /// The retained stop of `thread_id` and the frame epoch it belongs to.
    pub fn retained(&self, thread_id: ThreadId) -> Option<(StopEvent, Epoch)> {
        self.events.get_with(thread_id, |event| (event.clone(), self.frames.epoch()))
    }
}

#[derive(Clone)]
pub struct AdapterOptions {
    /// Program compiled on `launch` unless the request names one.
    pub source: Option<ProgramSource>,
    pub stop_at_entry: bool,
    pub source_alias: Option<String>,
    pub max_value_length: usize,
    pub max_key_length: usize,
    pub event_queue_capacity: usize,
    pub shutdown_timeout: Duration,
    /// Receives non-fatal errors raised while forwarding engine events.
    pub errors: Option<channel::Sender<TransportError>>,
}

impl AdapterOptions {
    pub fn new(source: Option<ProgramSource>) -> Self {
        Self::from_config(source, &DebugConfig::default())
    }

    pub fn from_config(source: Option<ProgramSource>, config: &DebugConfig) -> Self {
        Self {
            source,
            stop_at_entry: config.stop_at_entry,
            source_alias: config.source_alias.clone(),
            max_value_length: config.max_value_length,
            max_key_length: config.max_key_length,
            event_queue_capacity: config.event_queue_capacity.max(1),
            shutdown_timeout: config.shutdown_timeout(),
            errors: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Configuring,
    Running,
    Terminated,
}

/// Whether the server loop should keep reading requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

struct Reply {
    success: bool,
    message: Option<String>,
    body: Option<Value>,
    flow: Flow,
}

impl Reply {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            body: None,
            flow: Flow::Continue,
        }
    }

    fn body<B: Serialize>(body: &B) -> AdapterResult<Self> {
        Ok(Self {
            body: Some(serde_json::to_value(body)?),
            ..Self::ok()
        })
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            body: None,
            flow: Flow::Continue,
        }
    }

    fn stop(mut self) -> Self {
        self.flow = Flow::Stop;
        self
    }
}

struct Session {
    // Owns the engine for as long as the session lives.
    _interpreter: Box<dyn Interpreter>,
    program: Program,
    debugger: Arc<dyn Debugger>,
    shutdown_tx: channel::Sender<()>,
    pump: JoinHandle<()>,
}

/// The Session Dispatcher: turns one decoded request into engine calls and exactly one
/// response.
pub struct Adapter {
    factory: Arc<dyn EngineFactory>,
    options: AdapterOptions,
    outbox: Outbox,
    tables: Arc<SessionTables>,
    translator: BreakpointTranslator,
    stop_at_entry: bool,
    phase: Phase,
    terminated: CancellationToken,
    session: Option<Session>,
}

impl Adapter {
    pub fn new(factory: Arc<dyn EngineFactory>, options: AdapterOptions, outbox: Outbox) -> Self {
        let tables = Arc::new(SessionTables::new(
            options.max_value_length,
            options.max_key_length,
        ));
        let translator =
            BreakpointTranslator::new(LineBase::default(), options.source_alias.clone());
        Self {
            factory,
            stop_at_entry: options.stop_at_entry,
            options,
            outbox,
            tables,
            translator,
            phase: Phase::Uninitialized,
            terminated: CancellationToken::new(),
            session: None,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.terminated.is_cancelled() {
            Phase::Terminated
        } else {
            self.phase
        }
    }

    /// Cancelled once the engine reports that the debuggee terminated.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    pub fn tables(&self) -> &Arc<SessionTables> {
        &self.tables
    }

    /// Record the client's numbering base and report what the adapter supports.
    pub fn initialize(&mut self, args: &InitializeArguments) -> Capabilities {
        tracing::debug!(
            target: "interp.dap",
            client = args.client_id.as_deref().unwrap_or("<unknown>"),
            "initialize"
        );
        self.translator = BreakpointTranslator::new(
            LineBase::from_initialize(args),
            self.options.source_alias.clone(),
        );
        Capabilities {
            supports_configuration_done_request: true,
            supports_function_breakpoints: true,
            supports_terminate_request: true,
            supports_conditional_breakpoints: true,
        }
    }

    /// Handle one request and send its response.
    ///
    /// Only transport failures are returned as errors; everything the client got wrong is
    /// reported in a failed response.
    pub fn process(&mut self, request: &Request) -> AdapterResult<Flow> {
        tracing::debug!(
            target: "interp.dap",
            command = request.command.as_str(),
            seq = request.seq,
            "request"
        );
        let reply = self.dispatch(request)?;
        let message = reply.message.unwrap_or_else(|| {
            if reply.success { "Success" } else { "Failure" }.to_string()
        });
        self.outbox
            .send_response(request, reply.success, Some(message), reply.body)?;
        Ok(reply.flow)
    }

    fn dispatch(&mut self, request: &Request) -> AdapterResult<Reply> {
        let command = request.command.as_str();
        if !COMMANDS.contains(&command) {
            tracing::warn!(target: "interp.dap", command, "unknown command");
            return Ok(Reply::fail(format!("Unknown command {command:?}")));
        }

        match (self.phase(), command) {
            (_, "terminate" | "disconnect") => {}
            (Phase::Terminated, _) => return Ok(Reply::fail(SESSION_TERMINATED)),
            (Phase::Uninitialized, "launch" | "attach") => {}
            (_, "launch" | "attach") => return Ok(Reply::fail(ALREADY_LAUNCHED)),
            (Phase::Uninitialized, _) => return Ok(Reply::fail(NOT_LAUNCHED)),
            _ => {}
        }

        match command {
            "launch" | "attach" => self.launch(request),
            "setBreakpoints" => self.set_breakpoints(request),
            "setFunctionBreakpoints" => self.set_function_breakpoints(request),
            "configurationDone" => Ok(self.configuration_done()),
            "continue" => self.resume(request),
            "stepIn" => self.step(request, StopReason::StepInto),
            "next" => self.step(request, StopReason::StepOver),
            "stepOut" => self.step(request, StopReason::StepOut),
            "pause" => self.pause(request),
            "threads" => self.threads(),
            "stackTrace" => self.stack_trace(request),
            "scopes" => self.scopes(request),
            "variables" => self.variables(request),
            "terminate" => Ok(self.terminate()),
            "disconnect" => Ok(self.terminate().stop()),
            _ => Ok(Reply::fail(format!("Unknown command {command:?}"))),
        }
    }

    fn launch(&mut self, request: &Request) -> AdapterResult<Reply> {
        let args: LaunchArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let source = match args.program {
            Some(program) => ProgramSource::Path(PathBuf::from(program)),
            None => match self.options.source.clone() {
                Some(source) => source,
                None => return Ok(Reply::fail("No program to debug")),
            },
        };
        if let Some(stop_on_entry) = args.stop_on_entry {
            self.stop_at_entry = stop_on_entry;
        }

        let io = DebuggeeIo {
            stdin: Box::new(io::empty()),
            stdout: Box::new(OutputWriter::stdout(self.outbox.clone())),
            stderr: Box::new(OutputWriter::stderr(self.outbox.clone())),
        };
        let mut interpreter = match self.factory.create(io) {
            Ok(interpreter) => interpreter,
            Err(err) => {
                let message = format!("Failed to create interpreter: {err}");
                self.report_launch_failure(&message)?;
                return Ok(Reply::fail(message).stop());
            }
        };

        let program = match interpreter.compile(&source) {
            Ok(program) => program,
            Err(err) => {
                self.report_launch_failure(&err.to_string())?;
                let mut reply = Reply::fail(format!("Failed to compile: {err}")).stop();
                reply.body = Some(serde_json::to_value(ErrorResponseBody {
                    error: Message {
                        id: 1,
                        format: err.to_string(),
                    },
                })?);
                return Ok(reply);
            }
        };
        tracing::info!(target: "interp.dap", program = program.name.as_str(), "compiled program");

        let (events_tx, events_rx) = channel::bounded(self.options.event_queue_capacity);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);
        let pump = EventPump::new(
            self.tables.clone(),
            self.outbox.clone(),
            self.terminated.clone(),
            self.options.errors.clone(),
        )
        .spawn(events_rx, shutdown_rx);

        let options = DebugOptions {
            halt_at_entry: true,
            threads_start_at_1: true,
        };
        let debugger = match interpreter.debug(&program, event_callback(events_tx), options) {
            Ok(debugger) => debugger,
            Err(err) => {
                drop(shutdown_tx);
                if pump.join().is_err() {
                    tracing::warn!(target: "interp.dap", "event pump panicked");
                }
                let message = format!("Failed to start debugging: {err}");
                self.report_launch_failure(&message)?;
                return Ok(Reply::fail(message).stop());
            }
        };

        self.session = Some(Session {
            _interpreter: interpreter,
            program,
            debugger,
            shutdown_tx,
            pump,
        });
        self.phase = Phase::Configuring;
        self.outbox.send_event("initialized", None)?;
        Ok(Reply::ok())
    }

    fn report_launch_failure(&mut self, message: &str) -> AdapterResult<()> {
        tracing::error!(target: "interp.dap", error = message, "launch failed");
        self.phase = Phase::Terminated;
        self.outbox.send_event_body(
            "output",
            &OutputEventBody {
                category: "stderr".to_string(),
                output: format!("{message}\n"),
                data: None,
            },
        )?;
        Ok(())
    }

    fn debugger(&self) -> Option<Arc<dyn Debugger>> {
        self.session.as_ref().map(|session| session.debugger.clone())
    }

    fn configuration_done(&mut self) -> Reply {
        if self.phase() != Phase::Configuring {
            return Reply::fail("Configuration already done");
        }
        let Some(debugger) = self.debugger() else {
            return Reply::fail(NOT_LAUNCHED);
        };

        let result = if self.stop_at_entry {
            debugger.step(MAIN_THREAD, StopReason::Entry)
        } else {
            debugger.resume(MAIN_THREAD)
        };
        match result {
            Ok(()) => {
                self.phase = Phase::Running;
                Reply::ok()
            }
            Err(err) => Reply::fail(format!("thread {MAIN_THREAD}: failed to start: {err}")),
        }
    }

    fn resume(&mut self, request: &Request) -> AdapterResult<Reply> {
        let args: ThreadArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let Some(debugger) = self.debugger() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };

        self.tables.events.release(args.thread_id);
        match debugger.resume(args.thread_id) {
            Ok(()) => Reply::body(&ContinueResponseBody {
                all_threads_continued: false,
            }),
            Err(err) => Ok(Reply::fail(format!(
                "thread {}: failed to continue: {err}",
                args.thread_id
            ))),
        }
    }

    fn step(&mut self, request: &Request, reason: StopReason) -> AdapterResult<Reply> {
        let args: ThreadArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let Some(debugger) = self.debugger() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };

        self.tables.events.release(args.thread_id);
        Ok(match debugger.step(args.thread_id, reason) {
            Ok(()) => Reply::ok(),
            Err(err) => Reply::fail(format!("thread {}: failed to step: {err}", args.thread_id)),
        })
    }

    fn pause(&mut self, request: &Request) -> AdapterResult<Reply> {
        let args: ThreadArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let Some(debugger) = self.debugger() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };

        self.tables.events.release(args.thread_id);
        Ok(if debugger.interrupt(args.thread_id, StopReason::Pause) {
            Reply::ok()
        } else {
            Reply::fail(format!("thread {}: failed to pause", args.thread_id))
        })
    }

    fn threads(&self) -> AdapterResult<Reply> {
        let Some(debugger) = self.debugger() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };
        let threads = debugger
            .threads()
            .into_iter()
            .map(|thread| Thread {
                id: thread.id,
                name: thread.name,
            })
            .collect();
        Reply::body(&ThreadsResponseBody { threads })
    }

    fn stack_trace(&self, request: &Request) -> AdapterResult<Reply> {
        let args: StackTraceArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let Some(session) = self.session.as_ref() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };

        // A stop of another thread purges the frame table without releasing this thread's
        // stop; registering again in the new epoch is then correct.
        for _ in 0..STACK_TRACE_ATTEMPTS {
            let Some((event, epoch)) = self.tables.retained(args.thread_id) else {
                return Ok(Reply::fail("Invalid thread ID"));
            };
            if let Some(body) = self.stack_frames(&args, &event, epoch, &session.program) {
                return Reply::body(&body);
            }
        }
        Ok(Reply::fail("Invalid thread ID"))
    }

    fn stack_frames(
        &self,
        args: &StackTraceArguments,
        event: &StopEvent,
        epoch: Epoch,
        program: &Program,
    ) -> Option<StackTraceResponseBody> {
        let total = event.frames.depth();
        let start = args
            .start_frame
            .and_then(|start| usize::try_from(start).ok())
            .unwrap_or(0);
        let end = match args.levels.and_then(|levels| usize::try_from(levels).ok()) {
            Some(levels) if levels > 0 => start.saturating_add(levels),
            _ => total,
        };

        let stack_frames = event
            .frames
            .frames(start, end)
            .into_iter()
            .map(|frame| {
                let id = self.tables.frames.add_in(epoch, frame.clone())?;
                Some(self.translator.stack_frame(id, &frame, program))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(StackTraceResponseBody {
            stack_frames,
            total_frames: Some(i64::try_from(total).unwrap_or(i64::MAX)),
        })
    }

    fn scopes(&self, request: &Request) -> AdapterResult<Reply> {
        let args: ScopesArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        // Taken before the frame lookup so a frame from a purged epoch cannot register scopes
        // in the next one.
        let epoch = self.tables.variables.epoch();
        let Some(frame) = self.tables.frames.get(args.frame_id) else {
            return Ok(Reply::fail("Invalid frame ID"));
        };

        let scopes = frame
            .scopes
            .into_iter()
            .map(|scope| {
                let closure = scope.closure;
                let variables_reference = self
                    .tables
                    .variables
                    .add_in(epoch, VariableScope::Frame(scope))?;
                Some(Scope {
                    name: if closure { "Closure" } else { "Locals" }.to_string(),
                    presentation_hint: Some("locals".to_string()),
                    variables_reference,
                    expensive: false,
                })
            })
            .collect::<Option<Vec<_>>>();
        match scopes {
            Some(scopes) => Reply::body(&ScopesResponseBody { scopes }),
            None => Ok(Reply::fail("Invalid frame ID")),
        }
    }

    fn variables(&self, request: &Request) -> AdapterResult<Reply> {
        let args: VariablesArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        match self.tables.variables.expand(args.variables_reference) {
            Some(variables) => Reply::body(&VariablesResponseBody { variables }),
            None => Ok(Reply::fail("Invalid variable reference")),
        }
    }

    fn set_breakpoints(&self, request: &Request) -> AdapterResult<Reply> {
        let args: SetBreakpointsArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let Some(path) = args.source.path.as_deref() else {
            return Ok(Reply::fail("Missing source"));
        };
        let Some(session) = self.session.as_ref() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };

        let target = self.translator.target(path, &session.program);
        let requests = self.translator.line_requests(&args);
        let results = resolve(session.debugger.as_ref(), &target, &requests);
        Reply::body(&BreakpointsResponseBody {
            breakpoints: self.translator.responses(&results),
        })
    }

    fn set_function_breakpoints(&self, request: &Request) -> AdapterResult<Reply> {
        let args: SetFunctionBreakpointsArguments = match parse_arguments(request) {
            Ok(args) => args,
            Err(reply) => return Ok(reply),
        };
        let Some(debugger) = self.debugger() else {
            return Ok(Reply::fail(NOT_LAUNCHED));
        };

        let requests = self.translator.function_requests(&args.breakpoints);
        let results = resolve(debugger.as_ref(), &BreakpointTarget::All, &requests);
        Reply::body(&BreakpointsResponseBody {
            breakpoints: self.translator.responses(&results),
        })
    }

    /// Ask the engine to stop the debuggee. Always succeeds; the engine may need time to
    /// reach a point where its threads can stop.
    fn terminate(&mut self) -> Reply {
        if let Some(debugger) = self.debugger() {
            tracing::info!(target: "interp.dap", "terminating debuggee");
            debugger.terminate();
        }
        Reply::ok()
    }

    /// Tear down the session: terminate the engine and wait for it, bounded by the
    /// configured shutdown timeout.
    ///
    /// Termination is cooperative. When the timeout expires the adapter gives up waiting,
    /// and debuggee threads the engine could not stop may keep running.
    pub async fn shutdown(&mut self) {
        self.phase = Phase::Terminated;
        let Some(session) = self.session.take() else {
            return;
        };

        session.debugger.terminate();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let debugger = session.debugger.clone();
        std::thread::spawn(move || {
            let _ = tx.send(debugger.wait());
        });

        let timeout = self.options.shutdown_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => {
                tracing::debug!(target: "interp.dap", result = ?result, "debuggee finished")
            }
            Ok(Ok(Err(err))) => {
                tracing::warn!(
                    target: "interp.dap",
                    error = %err,
                    "debuggee finished with an error"
                )
            }
            Ok(Err(_)) => tracing::warn!(target: "interp.dap", "engine wait was abandoned"),
            Err(_) => tracing::warn!(
                target: "interp.dap",
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "debuggee did not stop in time; its threads may still be running"
            ),
        }

        drop(session.shutdown_tx);
        if session.pump.is_finished() {
            let _ = session.pump.join();
        }
        self.tables.purge();
        self.tables.events.clear();
    }
}

fn parse_arguments<T: DeserializeOwned>(request: &Request) -> Result<T, Reply> {
    request.arguments().map_err(|err| {
        Reply::fail(format!(
            "Invalid arguments: {}",
            sanitize_json_error_message(&err.to_string())
        ))
    })
}

/// One engine result per request, in request order.
fn resolve(
    debugger: &dyn Debugger,
    target: &BreakpointTarget,
    requests: &[interp_debug::BreakpointRequest],
) -> Vec<EngineBreakpoint> {
    let mut results = debugger.set_breakpoints(target, requests);
    if results.len() != requests.len() {
        tracing::warn!(
            target: "interp.dap",
            requested = requests.len(),
            resolved = results.len(),
            "engine returned a mismatched breakpoint count"
        );
        results.resize(requests.len(), EngineBreakpoint::invalid());
    }
    results
}
