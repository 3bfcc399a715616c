//! Run orchestration.
//!
//! One run goes through analysis, the safety check, instrumented evaluation
//! raced against a wall-clock timeout, and cleanup. Cleanup always happens:
//! the console capture and the instrumentation session restore the host on
//! drop, and the tracker's run is finished exactly once even when the run
//! future itself is dropped half way.

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use playground_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalysisSummary, CodeAnalyzer, SyntaxAnalyzer};
use crate::error::RunError;
use crate::eval::{EvalLimits, Evaluator, SnippetEvaluator};
use crate::host::{ConsoleHost, HeapProbe, HostContext, LogLevel};
use crate::instrument::instrument_runtime;
use crate::safety::check_safety;
use crate::tracker::{ExecutionRunSnapshot, ExecutionTracker, SharedTracker};

/// Run settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock limit for one evaluation.
    pub timeout_ms: u64,
    pub yield_every: u32,
    pub max_loop_iterations: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            yield_every: 1024,
            max_loop_iterations: 1_000_000,
        }
    }
}

impl RunConfig {
    pub fn eval_limits(&self) -> EvalLimits {
        EvalLimits {
            yield_every: self.yield_every,
            max_loop_iterations: self.max_loop_iterations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Succeeded,
    Failed,
    TimedOut,
    /// Refused by the safety check; nothing was executed.
    Rejected,
}

/// One line of console output produced during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: f64,
}

/// Everything the render layer needs about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub status: RunStatus,
    /// The frozen tracker snapshot. `None` when the run was rejected.
    pub snapshot: Option<ExecutionRunSnapshot>,
    pub console: Vec<ConsoleEntry>,
    pub analysis: AnalysisSummary,
    pub error: Option<RunError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Process-lifetime state shared by runs: the active tracker and the
/// duration of the last execution.
pub struct PlaygroundContext {
    clock: Rc<dyn Clock>,
    heap: Option<Rc<dyn HeapProbe>>,
    tracker: OnceCell<SharedTracker>,
    last_execution_ms: Cell<Option<f64>>,
}

impl PlaygroundContext {
    pub fn new(clock: Rc<dyn Clock>, heap: Option<Rc<dyn HeapProbe>>) -> Self {
        Self {
            clock,
            heap,
            tracker: OnceCell::new(),
            last_execution_ms: Cell::new(None),
        }
    }

    /// The active tracker, created on first use.
    pub fn tracker(&self) -> SharedTracker {
        self.tracker
            .get_or_init(|| {
                log::debug!("Creating execution tracker");
                ExecutionTracker::shared(self.clock.clone(), self.heap.clone())
            })
            .clone()
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Duration of the last finished run in milliseconds.
    pub fn last_execution_time(&self) -> Option<f64> {
        self.last_execution_ms.get()
    }

    pub fn reset_session(&self) {
        if let Some(tracker) = self.tracker.get() {
            tracker.borrow_mut().reset_session();
        }
        self.last_execution_ms.set(None);
    }
}

impl Default for PlaygroundContext {
    fn default() -> Self {
        Self::new(Rc::new(SystemClock::new()), None)
    }
}

struct CaptureConsole {
    entries: RefCell<Vec<ConsoleEntry>>,
    clock: Rc<dyn Clock>,
    forward: Option<Rc<dyn ConsoleHost>>,
}

impl ConsoleHost for CaptureConsole {
    fn write(&self, level: LogLevel, message: &str) {
        self.entries.borrow_mut().push(ConsoleEntry {
            level,
            message: message.to_string(),
            timestamp: self.clock.now_ms(),
        });
        if let Some(forward) = &self.forward {
            forward.write(level, message);
        }
    }
}

/// Collects console output for the report while a run is active.
///
/// Installed beneath the instrumentation so captured lines are also
/// counted by the tracker. Puts the previous console back on drop.
struct ConsoleCapture {
    host: Rc<HostContext>,
    sink: Rc<CaptureConsole>,
    previous: Option<Option<Rc<dyn ConsoleHost>>>,
}

impl ConsoleCapture {
    fn install(host: &Rc<HostContext>, clock: Rc<dyn Clock>) -> Self {
        let forward = host.console();
        let sink = Rc::new(CaptureConsole {
            entries: RefCell::new(Vec::new()),
            clock,
            forward,
        });
        let previous = host.set_console(Some(sink.clone()));
        Self {
            host: host.clone(),
            sink,
            previous: Some(previous),
        }
    }

    /// Adds an entry without forwarding it.
    fn push(&self, level: LogLevel, message: String) {
        let timestamp = self.sink.clock.now_ms();
        self.sink.entries.borrow_mut().push(ConsoleEntry {
            level,
            message,
            timestamp,
        });
    }

    fn restore(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.host.set_console(previous);
        }
    }

    fn finish(mut self) -> Vec<ConsoleEntry> {
        self.restore();
        self.sink.entries.take()
    }
}

impl Drop for ConsoleCapture {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Keeps `begin_run`/`finish_run` paired.
struct RunGuard {
    tracker: SharedTracker,
    clock: Rc<dyn Clock>,
    started_at: f64,
    finished: bool,
}

impl RunGuard {
    fn begin(tracker: SharedTracker, clock: Rc<dyn Clock>, source: &str) -> (Self, u64) {
        let run_id = tracker.borrow_mut().begin_run(source);
        let started_at = clock.now_ms();
        let guard = Self {
            tracker,
            clock,
            started_at,
            finished: false,
        };
        (guard, run_id)
    }

    fn elapsed(&self) -> f64 {
        (self.clock.now_ms() - self.started_at).max(0.0)
    }

    fn finish(mut self, failed: bool) -> (Option<ExecutionRunSnapshot>, f64) {
        self.finished = true;
        let duration = self.elapsed();
        let snapshot = self.tracker.borrow_mut().finish_run(duration, failed);
        (snapshot, duration)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let duration = self.elapsed();
        match self.tracker.try_borrow_mut() {
            Ok(mut tracker) => {
                tracker.finish_run(duration, true);
            }
            Err(_) => log::warn!("Tracker busy, abandoned run left unfinished"),
        }
    }
}

/// Drives runs of user code.
pub struct ExecutionRunner<E: Evaluator = SnippetEvaluator> {
    evaluator: E,
    config: RunConfig,
    analyzer: Box<dyn CodeAnalyzer>,
}

impl ExecutionRunner<SnippetEvaluator> {
    pub fn new(config: RunConfig) -> Self {
        Self::with_evaluator(SnippetEvaluator::new(config.eval_limits()), config)
    }
}

impl Default for ExecutionRunner<SnippetEvaluator> {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

impl<E: Evaluator> ExecutionRunner<E> {
    pub fn with_evaluator(evaluator: E, config: RunConfig) -> Self {
        Self {
            evaluator,
            config,
            analyzer: Box::new(SyntaxAnalyzer),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn CodeAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs `source` against `host`.
    ///
    /// Never fails: every outcome, including rejection and timeout, is
    /// described by the returned report.
    ///
    /// The timeout is cooperative. When it fires, the evaluation future is
    /// dropped at its current suspension point: an `await` in the script or
    /// one of the evaluator's periodic yields inside loops (see
    /// [`RunConfig::yield_every`]). Work between two suspension points runs
    /// to completion, and host requests already handed off are not recalled.
    pub async fn run(
        &self,
        ctx: &PlaygroundContext,
        host: &Rc<HostContext>,
        source: &str,
    ) -> RunReport {
        let analysis = self.analyzer.analyze(source);

        if let Err(violation) = check_safety(source) {
            log::warn!("{}", violation);
            let error = RunError::Rejected(violation);
            let console = vec![ConsoleEntry {
                level: LogLevel::Error,
                message: error.format_entry(),
                timestamp: ctx.clock.now_ms(),
            }];
            return RunReport {
                status: RunStatus::Rejected,
                snapshot: None,
                console,
                analysis,
                error: Some(error),
            };
        }

        let tracker = ctx.tracker();
        let (guard, run_id) = RunGuard::begin(tracker.clone(), ctx.clock.clone(), source);
        log::info!("Run {} started", run_id);

        let capture = ConsoleCapture::install(host, ctx.clock.clone());
        let session = instrument_runtime(host, &tracker);

        let limit = Duration::from_millis(self.config.timeout_ms);
        let outcome = tokio::time::timeout(limit, self.evaluator.evaluate(source, host)).await;
        drop(session);

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(script)) => Some(RunError::Script(script)),
            Err(_) => Some(RunError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }),
        };
        if let Some(error) = &error {
            tracker.borrow_mut().record_error(&error.as_script_error());
            capture.push(LogLevel::Error, error.format_entry());
        }
        let console = capture.finish();

        let (snapshot, duration) = guard.finish(error.is_some());
        ctx.last_execution_ms.set(Some(duration));

        let status = match &error {
            None => RunStatus::Succeeded,
            Some(RunError::Timeout { .. }) => RunStatus::TimedOut,
            Some(_) => RunStatus::Failed,
        };
        log::info!("Run {} finished: {:?} in {:.1}ms", run_id, status, duration);

        RunReport {
            status,
            snapshot,
            console,
            analysis,
            error,
        }
    }
}
