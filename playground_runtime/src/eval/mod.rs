//! Snippet evaluation.
//!
//! Source is parsed with tree-sitter, lowered into an owned tree and run by
//! an async interpreter against whatever capabilities the [`HostContext`]
//! currently exposes.

mod ast;
mod interp;
mod value;

use serde::Deserialize;

use crate::error::ScriptError;
use crate::host::{HostContext, LocalBoxFuture};

/// Evaluates user source against a host.
pub trait Evaluator {
    fn evaluate<'a>(
        &'a self,
        source: &'a str,
        host: &'a HostContext,
    ) -> LocalBoxFuture<'a, Result<(), ScriptError>>;
}

/// Interpreter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvalLimits {
    /// Loop iterations between cooperative yields.
    pub yield_every: u32,
    /// Total loop iterations allowed per evaluation.
    pub max_loop_iterations: u64,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            yield_every: 1024,
            max_loop_iterations: 1_000_000,
        }
    }
}

/// The built-in evaluator for the supported JavaScript subset.
#[derive(Debug, Clone, Default)]
pub struct SnippetEvaluator {
    limits: EvalLimits,
}

impl SnippetEvaluator {
    pub fn new(limits: EvalLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> EvalLimits {
        self.limits
    }
}

impl Evaluator for SnippetEvaluator {
    fn evaluate<'a>(
        &'a self,
        source: &'a str,
        host: &'a HostContext,
    ) -> LocalBoxFuture<'a, Result<(), ScriptError>> {
        Box::pin(async move {
            let program = ast::parse_program(source)?;
            log::trace!("Evaluating {} top-level statements", program.len());
            interp::Interpreter::new(host, self.limits).run(&program).await
        })
    }
}
