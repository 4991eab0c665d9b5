//! Debug engine contract for `interp-dap`.
//!
//! The adapter never executes debuggee code itself. It compiles and drives a
//! program through the [`Interpreter`] and [`Debugger`] traits, and it receives
//! [`DebugEvent`]s from the engine's own execution threads through an
//! [`EventCallback`].
//!
//! Positions reported by an engine are always 1-based; the adapter owns every
//! conversion to the client's numbering base.

mod mock;
mod value;

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub use mock::{DebuggerCall, MockDebugger, MockInterpreter};
pub use value::{NamedValue, Reference, Value, ValueKind};

/// Engine-assigned execution thread identifier.
pub type ThreadId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

/// A compiled program handed out by [`Interpreter::compile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub id: ProgramId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramSource {
    /// Source text compiled as a synthetic in-memory file.
    Source(String),
    /// Path to a file or package on disk.
    Path(PathBuf),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub file: String,
    pub line: i64,
    pub column: i64,
}

impl Position {
    pub fn new(file: impl Into<String>, line: i64, column: i64) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StopReason {
    Breakpoint,
    StepInto,
    StepOver,
    StepOut,
    Entry,
    Pause,
}

impl StopReason {
    /// Reason string used by the DAP `stopped` event.
    pub fn as_dap_reason(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::StepInto | StopReason::StepOver | StopReason::StepOut => "step",
            StopReason::Entry => "entry",
            StopReason::Pause => "pause",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameScope {
    /// `true` for variables captured by a closure, `false` for plain locals.
    pub closure: bool,
    pub variables: Vec<NamedValue>,
}

#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub name: String,
    /// `None` for frames without source information (native/runtime frames).
    pub position: Option<Position>,
    /// Program the frame's code belongs to, when it was compiled by this engine.
    pub program: Option<ProgramId>,
    pub scopes: Vec<FrameScope>,
}

/// The frozen stack of a stopped thread.
pub trait FrameStack: Send + Sync {
    fn depth(&self) -> usize;

    /// Frames in `start..end`, innermost first. Out-of-range bounds are clamped.
    fn frames(&self, start: usize, end: usize) -> Vec<Frame>;
}

impl FrameStack for Vec<Frame> {
    fn depth(&self) -> usize {
        self.len()
    }

    fn frames(&self, start: usize, end: usize) -> Vec<Frame> {
        let end = end.min(self.len());
        let start = start.min(end);
        self[start..end].to_vec()
    }
}

#[derive(Clone)]
pub struct StopEvent {
    pub reason: StopReason,
    pub thread_id: ThreadId,
    pub frames: Arc<dyn FrameStack>,
}

impl StopEvent {
    pub fn new(reason: StopReason, thread_id: ThreadId, frames: Arc<dyn FrameStack>) -> Self {
        Self {
            reason,
            thread_id,
            frames,
        }
    }
}

impl fmt::Debug for StopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopEvent")
            .field("reason", &self.reason)
            .field("thread_id", &self.thread_id)
            .field("depth", &self.frames.depth())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum DebugEvent {
    ThreadStarted(ThreadId),
    ThreadExited(ThreadId),
    Terminated,
    Stopped(StopEvent),
}

/// Invoked by the engine, possibly concurrently from several debuggee threads.
pub type EventCallback = Arc<dyn Fn(DebugEvent) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreakpointTarget {
    Program(ProgramId),
    Path(String),
    /// Every program known to the engine (function breakpoints).
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreakpointRequest {
    Line {
        line: i64,
        column: Option<i64>,
        condition: Option<String>,
    },
    Function {
        name: String,
        condition: Option<String>,
    },
}

impl BreakpointRequest {
    pub fn line(line: i64) -> Self {
        BreakpointRequest::Line {
            line,
            column: None,
            condition: None,
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        BreakpointRequest::Function {
            name: name.into(),
            condition: None,
        }
    }
}

/// Engine answer for one [`BreakpointRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    pub valid: bool,
    pub position: Option<Position>,
}

impl Breakpoint {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            position: None,
        }
    }

    pub fn resolved(position: Position) -> Self {
        Self {
            valid: true,
            position: Some(position),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugOptions {
    /// Keep the main thread suspended until the first `resume`/`step` call.
    pub halt_at_entry: bool,
    /// Number threads from 1 instead of 0.
    pub threads_start_at_1: bool,
}

/// Standard streams handed to a freshly created interpreter.
pub struct DebuggeeIo {
    pub stdin: Box<dyn Read + Send>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Compile(String),
    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),
    #[error("thread is not running")]
    NotRunning,
    #[error("program has terminated")]
    Terminated,
    #[error("{0}")]
    Other(String),
}

pub trait Interpreter: Send {
    fn compile(&mut self, source: &ProgramSource) -> Result<Program, EngineError>;

    /// Start a debug session for `program`. Execution begins on engine-owned
    /// threads; `on_event` is called for every lifecycle and stop event.
    fn debug(
        &mut self,
        program: &Program,
        on_event: EventCallback,
        options: DebugOptions,
    ) -> Result<Arc<dyn Debugger>, EngineError>;
}

/// Control surface of a running debug session.
///
/// Termination is cooperative: [`Debugger::terminate`] asks every debuggee
/// thread to stop, but an engine that cannot preempt a running computation may
/// keep threads alive until they reach a safe point. [`Debugger::wait`] blocks
/// until the engine has actually finished.
pub trait Debugger: Send + Sync {
    fn step(&self, thread_id: ThreadId, reason: StopReason) -> Result<(), EngineError>;
    fn resume(&self, thread_id: ThreadId) -> Result<(), EngineError>;
    fn interrupt(&self, thread_id: ThreadId, reason: StopReason) -> bool;
    fn terminate(&self);
    fn wait(&self) -> Result<Option<Value>, EngineError>;

    /// Replace the breakpoints of `target`. Returns one result per request, in order.
    fn set_breakpoints(
        &self,
        target: &BreakpointTarget,
        requests: &[BreakpointRequest],
    ) -> Vec<Breakpoint>;

    fn threads(&self) -> Vec<ThreadInfo>;
}

/// Creates the interpreter for a session, wired to the debuggee's streams.
pub trait EngineFactory: Send + Sync {
    fn create(&self, io: DebuggeeIo) -> Result<Box<dyn Interpreter>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(DebuggeeIo) -> Result<Box<dyn Interpreter>, EngineError> + Send + Sync,
{
    fn create(&self, io: DebuggeeIo) -> Result<Box<dyn Interpreter>, EngineError> {
        self(io)
    }
}
