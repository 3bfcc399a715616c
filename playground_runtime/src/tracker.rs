//! Per-run execution tracking.
//!
//! A tracker owns the session-wide counters and the snapshot of the current
//! run. A snapshot is created by [`ExecutionTracker::begin_run`], fed by the
//! `record_*` methods while the run is active, and frozen by
//! [`ExecutionTracker::finish_run`].

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use playground_core::Clock;
use serde::Serialize;

use crate::error::ScriptError;
use crate::host::{HeapProbe, LogLevel};

/// Maximum timeline events kept per run. Oldest are evicted first.
pub const TIMELINE_CAPACITY: usize = 200;

/// Timeline events included in [`ExecutionTracker::get_metrics`].
pub const METRICS_TIMELINE_LEN: usize = 50;

/// Tracker shared between the orchestrator and instrumentation wrappers.
pub type SharedTracker = Rc<RefCell<ExecutionTracker>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Fetch,
    Xhr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncKind {
    Timeout,
    Interval,
    Raf,
    Promise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimelineKind {
    RunStart,
    RunComplete,
    Log,
    Network,
    DomMutation,
    Async,
    UiAction,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    #[serde(rename = "type")]
    pub kind: TimelineKind,
    pub detail: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkCounts {
    pub total: u64,
    pub fetch: u64,
    pub xhr: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AsyncCounts {
    pub timeout: u64,
    pub interval: u64,
    pub raf: u64,
    pub promise: u64,
}

/// Heap usage in bytes. All zero means the host could not tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub start: u64,
    pub end: u64,
    pub delta: i64,
}

/// Everything recorded about one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRunSnapshot {
    pub run_id: u64,
    pub code_size: usize,
    pub started_at: f64,
    pub duration: f64,
    pub failed: bool,
    pub logs: BTreeMap<LogLevel, u64>,
    pub dom_mutations: u64,
    pub network: NetworkCounts,
    pub async_ops: AsyncCounts,
    pub ui_actions: BTreeMap<String, u64>,
    pub errors: u64,
    pub memory: MemoryUsage,
    pub timeline: VecDeque<TimelineEvent>,
}

impl ExecutionRunSnapshot {
    fn new(run_id: u64, code_size: usize, started_at: f64, heap_start: u64) -> Self {
        Self {
            run_id,
            code_size,
            started_at,
            duration: 0.0,
            failed: false,
            logs: BTreeMap::new(),
            dom_mutations: 0,
            network: NetworkCounts::default(),
            async_ops: AsyncCounts::default(),
            ui_actions: BTreeMap::new(),
            errors: 0,
            memory: MemoryUsage {
                start: heap_start,
                end: 0,
                delta: 0,
            },
            timeline: VecDeque::with_capacity(TIMELINE_CAPACITY),
        }
    }

    /// Number of `console.<level>` calls recorded.
    pub fn log_count(&self, level: LogLevel) -> u64 {
        self.logs.get(&level).copied().unwrap_or(0)
    }

    fn push_event(&mut self, kind: TimelineKind, detail: String, timestamp: f64) {
        if self.timeline.len() == TIMELINE_CAPACITY {
            self.timeline.pop_front();
        }
        self.timeline.push_back(TimelineEvent {
            kind,
            detail,
            timestamp,
        });
    }
}

/// Counters that outlive individual runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_runs: u64,
    pub session_ui_actions: BTreeMap<String, u64>,
}

/// A detached copy of the tracker state for the render layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub state: RunState,
    /// The current run with its timeline cut to the last
    /// [`METRICS_TIMELINE_LEN`] events.
    pub run: Option<ExecutionRunSnapshot>,
    pub session: SessionState,
}

pub struct ExecutionTracker {
    clock: Rc<dyn Clock>,
    heap: Option<Rc<dyn HeapProbe>>,
    state: RunState,
    session: SessionState,
    current: Option<ExecutionRunSnapshot>,
}

impl ExecutionTracker {
    pub fn new(clock: Rc<dyn Clock>, heap: Option<Rc<dyn HeapProbe>>) -> Self {
        Self {
            clock,
            heap,
            state: RunState::Idle,
            session: SessionState::default(),
            current: None,
        }
    }

    /// Wraps a new tracker for sharing.
    pub fn shared(clock: Rc<dyn Clock>, heap: Option<Rc<dyn HeapProbe>>) -> SharedTracker {
        Rc::new(RefCell::new(Self::new(clock, heap)))
    }

    /// Starts a fresh run, discarding the previous snapshot whatever its
    /// outcome. Returns the run id.
    pub fn begin_run(&mut self, source: &str) -> u64 {
        if self.state == RunState::Running {
            log::warn!("Run started while another run was still active");
        }
        self.session.session_runs += 1;
        let run_id = self.session.session_runs;
        let now = self.clock.now_ms();
        let mut snapshot =
            ExecutionRunSnapshot::new(run_id, source.chars().count(), now, self.heap_bytes());
        snapshot.push_event(TimelineKind::RunStart, format!("{} chars", snapshot.code_size), now);
        self.current = Some(snapshot);
        self.state = RunState::Running;
        log::debug!("Run {} started", run_id);
        run_id
    }

    /// Stamps the outcome and freezes the snapshot.
    ///
    /// Returns a copy of the frozen snapshot, or `None` if no run is active.
    pub fn finish_run(&mut self, duration_ms: f64, failed: bool) -> Option<ExecutionRunSnapshot> {
        if self.state != RunState::Running {
            log::warn!("finish_run called without an active run");
            return None;
        }
        let now = self.clock.now_ms();
        let heap_end = self.heap_bytes();
        let snapshot = self.current.as_mut()?;
        snapshot.duration = duration_ms.max(0.0);
        snapshot.failed = failed;
        snapshot.memory.end = heap_end;
        snapshot.memory.delta = heap_end as i64 - snapshot.memory.start as i64;
        let outcome = if failed { "failed" } else { "succeeded" };
        snapshot.push_event(
            TimelineKind::RunComplete,
            format!("{} in {:.1}ms", outcome, snapshot.duration),
            now,
        );
        self.state = if failed {
            RunState::Failed
        } else {
            RunState::Succeeded
        };
        log::debug!("Run {} {}", snapshot.run_id, outcome);
        Some(snapshot.clone())
    }

    pub fn record_log(&mut self, level: LogLevel, message: &str) {
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("log") {
            *run.logs.entry(level).or_insert(0) += 1;
            run.push_event(TimelineKind::Log, format!("{}: {}", level, message), now);
        }
    }

    pub fn record_network_request(&mut self, kind: NetworkKind, url: &str) {
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("network request") {
            run.network.total += 1;
            match kind {
                NetworkKind::Fetch => run.network.fetch += 1,
                NetworkKind::Xhr => run.network.xhr += 1,
            }
            let label = match kind {
                NetworkKind::Fetch => "fetch",
                NetworkKind::Xhr => "xhr",
            };
            run.push_event(TimelineKind::Network, format!("{} {}", label, url), now);
        }
    }

    /// Timeline-only: the request is counted when it is sent.
    pub fn record_xhr_open(&mut self, method: &str, url: &str) {
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("xhr open") {
            run.push_event(TimelineKind::Network, format!("xhr open {} {}", method, url), now);
        }
    }

    pub fn record_dom_mutation(&mut self, operation: &str) {
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("DOM mutation") {
            run.dom_mutations += 1;
            run.push_event(TimelineKind::DomMutation, operation.to_string(), now);
        }
    }

    pub fn record_async(&mut self, kind: AsyncKind) {
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("async operation") {
            let (counter, label) = match kind {
                AsyncKind::Timeout => (&mut run.async_ops.timeout, "setTimeout"),
                AsyncKind::Interval => (&mut run.async_ops.interval, "setInterval"),
                AsyncKind::Raf => (&mut run.async_ops.raf, "requestAnimationFrame"),
                AsyncKind::Promise => (&mut run.async_ops.promise, "promise"),
            };
            *counter += 1;
            run.push_event(TimelineKind::Async, label.to_string(), now);
        }
    }

    /// Counts a UI action. Session totals are kept even between runs.
    pub fn record_ui_action(&mut self, action: &str) {
        *self
            .session
            .session_ui_actions
            .entry(action.to_string())
            .or_insert(0) += 1;
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("UI action") {
            *run.ui_actions.entry(action.to_string()).or_insert(0) += 1;
            run.push_event(TimelineKind::UiAction, action.to_string(), now);
        }
    }

    pub fn record_error(&mut self, error: &ScriptError) {
        let now = self.clock.now_ms();
        if let Some(run) = self.active_run("error") {
            run.errors += 1;
            run.push_event(TimelineKind::Error, error.format_entry(), now);
        }
    }

    /// Detached copy of the current state.
    pub fn get_metrics(&self) -> RunMetrics {
        let run = self.current.as_ref().map(|snapshot| {
            let mut copy = snapshot.clone();
            let excess = copy.timeline.len().saturating_sub(METRICS_TIMELINE_LEN);
            copy.timeline.drain(..excess);
            copy
        });
        RunMetrics {
            state: self.state,
            run,
            session: self.session.clone(),
        }
    }

    /// The current or last finished run.
    pub fn snapshot(&self) -> Option<&ExecutionRunSnapshot> {
        self.current.as_ref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn reset_session(&mut self) {
        self.session = SessionState::default();
    }

    fn active_run(&mut self, what: &str) -> Option<&mut ExecutionRunSnapshot> {
        if self.state != RunState::Running {
            log::debug!("Ignoring {} outside of a run", what);
            return None;
        }
        self.current.as_mut()
    }

    fn heap_bytes(&self) -> u64 {
        self.heap
            .as_ref()
            .and_then(|probe| probe.used_heap_bytes())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playground_core::ManualClock;
    use std::cell::Cell;

    struct FakeHeap(Cell<u64>);

    impl HeapProbe for FakeHeap {
        fn used_heap_bytes(&self) -> Option<u64> {
            Some(self.0.get())
        }
    }

    fn tracker() -> (ExecutionTracker, ManualClock) {
        let clock = ManualClock::new();
        (ExecutionTracker::new(Rc::new(clock.clone()), None), clock)
    }

    #[test]
    fn test_lifecycle_counts_match_records() {
        let (mut t, clock) = tracker();
        assert_eq!(t.state(), RunState::Idle);
        t.begin_run("console.log(1)");
        assert!(t.is_running());

        t.record_log(LogLevel::Log, "1");
        t.record_log(LogLevel::Log, "2");
        t.record_log(LogLevel::Warn, "careful");
        t.record_network_request(NetworkKind::Fetch, "/a");
        t.record_network_request(NetworkKind::Xhr, "/b");
        t.record_dom_mutation("appendChild");
        t.record_async(AsyncKind::Timeout);
        t.record_async(AsyncKind::Promise);
        t.record_ui_action("run");
        t.record_error(&ScriptError::type_error("boom"));
        clock.advance(12.0);

        let snap = t.finish_run(12.0, true).unwrap();
        assert_eq!(snap.log_count(LogLevel::Log), 2);
        assert_eq!(snap.log_count(LogLevel::Warn), 1);
        assert_eq!(snap.log_count(LogLevel::Error), 0);
        assert_eq!(
            snap.network,
            NetworkCounts {
                total: 2,
                fetch: 1,
                xhr: 1
            }
        );
        assert_eq!(snap.dom_mutations, 1);
        assert_eq!(snap.async_ops.timeout, 1);
        assert_eq!(snap.async_ops.promise, 1);
        assert_eq!(snap.ui_actions.get("run"), Some(&1));
        assert_eq!(snap.errors, 1);
        assert!(snap.failed);
        assert_eq!(snap.duration, 12.0);
        assert_eq!(snap.code_size, 14);

        // run-start + 10 records + run-complete
        assert_eq!(snap.timeline.len(), 12);
        assert_eq!(snap.timeline.front().unwrap().kind, TimelineKind::RunStart);
        assert_eq!(snap.timeline.back().unwrap().kind, TimelineKind::RunComplete);
        assert_eq!(t.state(), RunState::Failed);
    }

    #[test]
    fn test_timeline_evicts_oldest() {
        let (mut t, clock) = tracker();
        t.begin_run("");
        for i in 0..250 {
            clock.advance(1.0);
            t.record_log(LogLevel::Log, &i.to_string());
        }
        let snap = t.snapshot().unwrap();
        assert_eq!(snap.timeline.len(), TIMELINE_CAPACITY);
        assert_eq!(snap.log_count(LogLevel::Log), 250);
        // run-start and the first 50 logs were dropped.
        assert_eq!(snap.timeline.front().unwrap().detail, "log: 50");
        assert_eq!(snap.timeline.back().unwrap().detail, "log: 249");
        let stamps: Vec<f64> = snap.timeline.iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_snapshot_frozen_after_finish() {
        let (mut t, _clock) = tracker();
        t.begin_run("x");
        t.finish_run(1.0, false).unwrap();
        t.record_log(LogLevel::Log, "late");
        t.record_dom_mutation("appendChild");
        let snap = t.snapshot().unwrap();
        assert!(snap.logs.is_empty());
        assert_eq!(snap.dom_mutations, 0);
        assert_eq!(t.state(), RunState::Succeeded);
        assert!(t.finish_run(2.0, true).is_none());
    }

    #[test]
    fn test_begin_resets_snapshot() {
        let (mut t, _clock) = tracker();
        t.begin_run("a");
        t.record_log(LogLevel::Info, "x");
        t.finish_run(1.0, true);
        t.begin_run("bb");
        let snap = t.snapshot().unwrap();
        assert_eq!(snap.run_id, 2);
        assert!(snap.logs.is_empty());
        assert!(!snap.failed);
        assert_eq!(t.session().session_runs, 2);
    }

    #[test]
    fn test_metrics_copy_is_detached() {
        let (mut t, _clock) = tracker();
        t.begin_run("");
        for i in 0..80 {
            t.record_dom_mutation(&format!("op{}", i));
        }
        let metrics = t.get_metrics();
        let run = metrics.run.as_ref().unwrap();
        assert_eq!(run.timeline.len(), METRICS_TIMELINE_LEN);
        assert_eq!(run.timeline.back().unwrap().detail, "op79");

        t.record_dom_mutation("later");
        assert_eq!(run.dom_mutations, 80);
        assert_eq!(t.snapshot().unwrap().dom_mutations, 81);
    }

    #[test]
    fn test_session_ui_actions_survive_runs() {
        let (mut t, _clock) = tracker();
        t.record_ui_action("copy");
        t.begin_run("");
        t.record_ui_action("copy");
        t.finish_run(0.0, false);
        assert_eq!(t.session().session_ui_actions.get("copy"), Some(&2));
        assert_eq!(t.snapshot().unwrap().ui_actions.get("copy"), Some(&1));

        t.reset_session();
        assert_eq!(t.session().session_runs, 0);
        assert!(t.session().session_ui_actions.is_empty());
    }

    #[test]
    fn test_memory_sampling() {
        let clock = ManualClock::new();
        let heap = Rc::new(FakeHeap(Cell::new(1_000)));
        let mut t = ExecutionTracker::new(Rc::new(clock), Some(heap.clone()));
        t.begin_run("");
        heap.0.set(600);
        let snap = t.finish_run(0.0, false).unwrap();
        assert_eq!(snap.memory, MemoryUsage { start: 1_000, end: 600, delta: -400 });

        let (mut t, _clock) = tracker();
        t.begin_run("");
        let snap = t.finish_run(0.0, false).unwrap();
        assert_eq!(snap.memory, MemoryUsage::default());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let (mut t, _clock) = tracker();
        t.begin_run("let a");
        t.record_log(LogLevel::Log, "hi");
        let snap = t.finish_run(3.0, false).unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["codeSize"], 5);
        assert_eq!(json["logs"]["log"], 1);
        assert_eq!(json["timeline"][0]["type"], "run-start");
        assert_eq!(json["asyncOps"]["raf"], 0);
    }
}
