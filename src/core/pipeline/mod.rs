// Pipeline module - Operator input parsing and ordered command execution
pub mod context;
pub mod parser;
pub mod pipeline;

pub use context::ConsoleContext;
pub use parser::{contains_emergency_stop, parse_line, Builtin, Input, JobsAction, BUILTIN_HELP};
pub use pipeline::{
    CommandPipeline, CommandReport, Outcome, PipelineState, ScriptFailure, ScriptReport, METHOD_GCODE_SCRIPT,
};
