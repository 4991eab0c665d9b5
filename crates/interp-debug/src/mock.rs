use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::{
    Breakpoint, BreakpointRequest, BreakpointTarget, DebugEvent, DebugOptions, DebuggeeIo,
    Debugger, EngineError, EngineFactory, EventCallback, Interpreter, Position, Program,
    ProgramId, ProgramSource, StopReason, ThreadId, ThreadInfo, Value,
};

/// A call received by [`MockDebugger`], in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebuggerCall {
    Step {
        thread_id: ThreadId,
        reason: StopReason,
    },
    Resume(ThreadId),
    Interrupt {
        thread_id: ThreadId,
        reason: StopReason,
    },
    Terminate,
    Wait,
    SetBreakpoints {
        target: BreakpointTarget,
        requests: Vec<BreakpointRequest>,
    },
    Threads,
}

type Resolver = Arc<dyn Fn(&BreakpointTarget, &BreakpointRequest) -> Breakpoint + Send + Sync>;

struct State {
    calls: Vec<DebuggerCall>,
    compiled: Vec<ProgramSource>,
    program_name: String,
    compile_error: Option<String>,
    create_error: Option<String>,
    threads: Vec<ThreadInfo>,
    failing_threads: BTreeSet<ThreadId>,
    interrupt_result: bool,
    resolver: Option<Resolver>,
    callback: Option<EventCallback>,
    options: Option<DebugOptions>,
    hang_on_wait: bool,
    finished: bool,
    exit_value: Option<Value>,
}

/// Deterministic, in-memory debug engine test double.
///
/// One instance plays both the interpreter and the debugger side so tests can
/// drive events and inspect the calls the adapter made.
pub struct MockDebugger {
    state: Mutex<State>,
    io: Mutex<Option<DebuggeeIo>>,
    done: Condvar,
}

impl Default for MockDebugger {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                calls: Vec::new(),
                compiled: Vec::new(),
                program_name: "main.go".to_string(),
                compile_error: None,
                create_error: None,
                threads: vec![ThreadInfo {
                    id: 1,
                    name: "main".to_string(),
                }],
                failing_threads: BTreeSet::new(),
                interrupt_result: true,
                resolver: None,
                callback: None,
                options: None,
                hang_on_wait: false,
                finished: false,
                exit_value: None,
            }),
            io: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

impl MockDebugger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_program_name(&self, name: impl Into<String>) {
        self.state.lock().program_name = name.into();
    }

    pub fn set_compile_error(&self, message: impl Into<String>) {
        self.state.lock().compile_error = Some(message.into());
    }

    pub fn set_create_error(&self, message: impl Into<String>) {
        self.state.lock().create_error = Some(message.into());
    }

    pub fn set_threads(&self, threads: Vec<ThreadInfo>) {
        self.state.lock().threads = threads;
    }

    /// `step`/`resume` on this thread fail with [`EngineError::UnknownThread`].
    pub fn fail_thread(&self, thread_id: ThreadId) {
        self.state.lock().failing_threads.insert(thread_id);
    }

    pub fn set_interrupt_result(&self, result: bool) {
        self.state.lock().interrupt_result = result;
    }

    pub fn set_breakpoint_resolver<F>(&self, resolver: F)
    where
        F: Fn(&BreakpointTarget, &BreakpointRequest) -> Breakpoint + Send + Sync + 'static,
    {
        self.state.lock().resolver = Some(Arc::new(resolver));
    }

    /// Make `wait` ignore `terminate` until [`MockDebugger::finish`] is called.
    pub fn hang_on_wait(&self) {
        self.state.lock().hang_on_wait = true;
    }

    /// Let every pending and future `wait` return `value`.
    pub fn finish(&self, value: Option<Value>) {
        let mut state = self.state.lock();
        state.finished = true;
        state.exit_value = value;
        self.done.notify_all();
    }

    pub fn calls(&self) -> Vec<DebuggerCall> {
        self.state.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<DebuggerCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    pub fn compiled(&self) -> Vec<ProgramSource> {
        self.state.lock().compiled.clone()
    }

    pub fn options(&self) -> Option<DebugOptions> {
        self.state.lock().options
    }

    pub fn is_debugging(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    /// Deliver `event` through the registered callback, as an engine thread would.
    ///
    /// Returns `false` when no debug session has been started yet.
    pub fn emit(&self, event: DebugEvent) -> bool {
        let callback = self.state.lock().callback.clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    /// Write to the debuggee's stdout as the running program would.
    pub fn print_stdout(&self, text: &str) -> std::io::Result<()> {
        let mut io = self.io.lock();
        match io.as_mut() {
            Some(io) => {
                io.stdout.write_all(text.as_bytes())?;
                io.stdout.flush()
            }
            None => Ok(()),
        }
    }

    pub fn print_stderr(&self, text: &str) -> std::io::Result<()> {
        let mut io = self.io.lock();
        match io.as_mut() {
            Some(io) => {
                io.stderr.write_all(text.as_bytes())?;
                io.stderr.flush()
            }
            None => Ok(()),
        }
    }

    /// Read from the debuggee's stdin until EOF.
    pub fn read_stdin(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(io) = self.io.lock().as_mut() {
            io.stdin.read_to_end(&mut buf)?;
        }
        Ok(buf)
    }

    fn record(&self, call: DebuggerCall) {
        self.state.lock().calls.push(call);
    }

    fn check_thread(&self, thread_id: ThreadId) -> Result<(), EngineError> {
        let state = self.state.lock();
        if state.failing_threads.contains(&thread_id) {
            return Err(EngineError::UnknownThread(thread_id));
        }
        if state.finished {
            return Err(EngineError::Terminated);
        }
        Ok(())
    }
}

fn default_resolution(
    program_name: &str,
    target: &BreakpointTarget,
    request: &BreakpointRequest,
) -> Breakpoint {
    match request {
        BreakpointRequest::Line { line, column, .. } => {
            let file = match target {
                BreakpointTarget::Program(_) | BreakpointTarget::All => program_name.to_string(),
                BreakpointTarget::Path(path) => path.clone(),
            };
            Breakpoint::resolved(Position::new(file, *line, column.unwrap_or(1)))
        }
        BreakpointRequest::Function { .. } => Breakpoint::invalid(),
    }
}

impl Debugger for MockDebugger {
    fn step(&self, thread_id: ThreadId, reason: StopReason) -> Result<(), EngineError> {
        self.record(DebuggerCall::Step { thread_id, reason });
        self.check_thread(thread_id)
    }

    fn resume(&self, thread_id: ThreadId) -> Result<(), EngineError> {
        self.record(DebuggerCall::Resume(thread_id));
        self.check_thread(thread_id)
    }

    fn interrupt(&self, thread_id: ThreadId, reason: StopReason) -> bool {
        self.record(DebuggerCall::Interrupt { thread_id, reason });
        self.state.lock().interrupt_result
    }

    fn terminate(&self) {
        let mut state = self.state.lock();
        state.calls.push(DebuggerCall::Terminate);
        if !state.hang_on_wait {
            state.finished = true;
            self.done.notify_all();
        }
    }

    fn wait(&self) -> Result<Option<Value>, EngineError> {
        let mut state = self.state.lock();
        state.calls.push(DebuggerCall::Wait);
        while !state.finished {
            self.done.wait(&mut state);
        }
        Ok(state.exit_value.clone())
    }

    fn set_breakpoints(
        &self,
        target: &BreakpointTarget,
        requests: &[BreakpointRequest],
    ) -> Vec<Breakpoint> {
        let (resolver, program_name) = {
            let mut state = self.state.lock();
            state.calls.push(DebuggerCall::SetBreakpoints {
                target: target.clone(),
                requests: requests.to_vec(),
            });
            (state.resolver.clone(), state.program_name.clone())
        };
        requests
            .iter()
            .map(|request| match &resolver {
                Some(resolve) => resolve(target, request),
                None => default_resolution(&program_name, target, request),
            })
            .collect()
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        let mut state = self.state.lock();
        state.calls.push(DebuggerCall::Threads);
        state.threads.clone()
    }
}

/// Interpreter half of the mock, sharing state with a [`MockDebugger`].
pub struct MockInterpreter {
    debugger: Arc<MockDebugger>,
}

impl MockInterpreter {
    pub fn new(debugger: Arc<MockDebugger>) -> Self {
        Self { debugger }
    }

    /// An [`EngineFactory`] that hands the debuggee streams to `debugger`.
    pub fn factory(debugger: Arc<MockDebugger>) -> impl EngineFactory {
        move |io: DebuggeeIo| -> Result<Box<dyn Interpreter>, EngineError> {
            if let Some(message) = debugger.state.lock().create_error.clone() {
                return Err(EngineError::Other(message));
            }
            *debugger.io.lock() = Some(io);
            Ok(Box::new(MockInterpreter::new(debugger.clone())))
        }
    }
}

impl Interpreter for MockInterpreter {
    fn compile(&mut self, source: &ProgramSource) -> Result<Program, EngineError> {
        let mut state = self.debugger.state.lock();
        state.compiled.push(source.clone());
        if let Some(message) = state.compile_error.clone() {
            return Err(EngineError::Compile(message));
        }
        let name = match source {
            ProgramSource::Source(_) => state.program_name.clone(),
            ProgramSource::Path(path) => path.display().to_string(),
        };
        Ok(Program {
            id: ProgramId(1),
            name,
        })
    }

    fn debug(
        &mut self,
        _program: &Program,
        on_event: EventCallback,
        options: DebugOptions,
    ) -> Result<Arc<dyn Debugger>, EngineError> {
        let mut state = self.debugger.state.lock();
        state.callback = Some(on_event);
        state.options = Some(options);
        drop(state);
        Ok(self.debugger.clone())
    }
}
