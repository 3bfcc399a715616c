//! JS Playground runtime
//!
//! Execution tracking, host instrumentation and run orchestration for the
//! playground. The host environment (console, network, DOM, timers, heap
//! introspection) is injected through [`HostContext`].

pub mod analyzer;
pub mod error;
pub mod eval;
pub mod host;
pub mod instrument;
pub mod runner;
pub mod safety;
mod source;
pub mod tracker;

pub use analyzer::{AnalysisSummary, CodeAnalyzer, SyntaxAnalyzer};
pub use error::{RunError, ScriptError};
pub use eval::{EvalLimits, Evaluator, SnippetEvaluator};
pub use host::{
    ConsoleHost, DomError, DomHost, HeapProbe, HostContext, LocalBoxFuture, LogLevel, NetworkError,
    NetworkHost, NodeId, Request, Response, TimerHost, TimerId,
};
pub use instrument::{instrument_runtime, InstrumentationSession};
pub use runner::{ConsoleEntry, ExecutionRunner, PlaygroundContext, RunConfig, RunReport, RunStatus};
pub use safety::{check_safety, RedFlag, RedFlagKind, SafetyViolation};
pub use tracker::{
    AsyncKind, ExecutionRunSnapshot, ExecutionTracker, NetworkKind, RunMetrics, RunState,
    SessionState, SharedTracker, TimelineEvent, TimelineKind,
};
