use std::path::Path;

use interp_debug::{
    Breakpoint as EngineBreakpoint, BreakpointRequest, BreakpointTarget, Frame, Program,
};

use crate::dap::types::{
    Breakpoint, FunctionBreakpoint, InitializeArguments, SetBreakpointsArguments, Source,
    StackFrame,
};

/// Line and column numbering declared by the client in `initialize`.
///
/// The engine is always 1-based; this is the only place the +1/-1 happens. Conversions
/// saturate at the `i64` bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineBase {
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
}

impl Default for LineBase {
    fn default() -> Self {
        Self {
            lines_start_at1: true,
            columns_start_at1: true,
        }
    }
}

impl LineBase {
    pub fn from_initialize(args: &InitializeArguments) -> Self {
        Self {
            lines_start_at1: args.lines_start_at1.unwrap_or(true),
            columns_start_at1: args.columns_start_at1.unwrap_or(true),
        }
    }

    pub fn line_to_engine(self, line: i64) -> i64 {
        if self.lines_start_at1 {
            line
        } else {
            line.saturating_add(1)
        }
    }

    pub fn line_to_client(self, line: i64) -> i64 {
        if self.lines_start_at1 {
            line
        } else {
            line.saturating_sub(1)
        }
    }

    pub fn column_to_engine(self, column: i64) -> i64 {
        if self.columns_start_at1 {
            column
        } else {
            column.saturating_add(1)
        }
    }

    pub fn column_to_client(self, column: i64) -> i64 {
        if self.columns_start_at1 {
            column
        } else {
            column.saturating_sub(1)
        }
    }
}

/// Converts breakpoint requests and reported positions between the client and the engine.
///
/// `source_alias` is the client-visible path of the compiled program. A client path equal
/// to it (exact string comparison) targets the program itself, and frames belonging to the
/// program are reported under it.
#[derive(Debug, Clone)]
pub struct BreakpointTranslator {
    base: LineBase,
    source_alias: Option<String>,
}

impl BreakpointTranslator {
    pub fn new(base: LineBase, source_alias: Option<String>) -> Self {
        Self { base, source_alias }
    }

    pub fn target(&self, path: &str, program: &Program) -> BreakpointTarget {
        match self.source_alias.as_deref() {
            Some(alias) if alias == path => BreakpointTarget::Program(program.id),
            _ => BreakpointTarget::Path(path.to_string()),
        }
    }

    /// Engine requests for a `setBreakpoints` call. The deprecated `lines` form is used only
    /// when `breakpoints` is absent.
    pub fn line_requests(&self, args: &SetBreakpointsArguments) -> Vec<BreakpointRequest> {
        if let Some(breakpoints) = &args.breakpoints {
            return breakpoints
                .iter()
                .map(|bp| BreakpointRequest::Line {
                    line: self.base.line_to_engine(bp.line),
                    column: bp.column.map(|column| self.base.column_to_engine(column)),
                    condition: bp.condition.clone(),
                })
                .collect();
        }

        args.lines
            .iter()
            .flatten()
            .map(|&line| BreakpointRequest::line(self.base.line_to_engine(line)))
            .collect()
    }

    pub fn function_requests(&self, breakpoints: &[FunctionBreakpoint]) -> Vec<BreakpointRequest> {
        breakpoints
            .iter()
            .map(|bp| BreakpointRequest::Function {
                name: bp.name.clone(),
                condition: bp.condition.clone(),
            })
            .collect()
    }

    /// Client view of the engine results, one entry per result and in the same order.
    pub fn responses(&self, results: &[EngineBreakpoint]) -> Vec<Breakpoint> {
        results
            .iter()
            .map(|result| match (&result.position, result.valid) {
                (Some(position), true) => Breakpoint {
                    verified: true,
                    line: Some(self.base.line_to_client(position.line)),
                    column: Some(self.base.column_to_client(position.column)),
                },
                _ => Breakpoint {
                    verified: false,
                    line: None,
                    column: None,
                },
            })
            .collect()
    }

    /// Source reported for a frame. Frames of the debugged program use the alias when one
    /// is configured.
    pub fn frame_source(&self, frame: &Frame, program: &Program) -> Option<Source> {
        if frame.program == Some(program.id) {
            if let Some(alias) = &self.source_alias {
                return Some(Source {
                    name: Some(basename(alias)),
                    path: Some(alias.clone()),
                });
            }
        }

        let position = frame.position.as_ref()?;
        Some(Source {
            name: Some(basename(&position.file)),
            path: Some(position.file.clone()),
        })
    }

    pub fn stack_frame(&self, id: i64, frame: &Frame, program: &Program) -> StackFrame {
        let (line, column) = match &frame.position {
            Some(position) => (
                self.base.line_to_client(position.line),
                self.base.column_to_client(position.column),
            ),
            None => (0, 0),
        };
        StackFrame {
            id,
            name: frame.name.clone(),
            source: frame
                .position
                .as_ref()
                .and_then(|_| self.frame_source(frame, program)),
            line,
            column,
        }
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
