//! Sync coordinator.
//!
//! Batches view synchronization work (content, cursor, scroll, line
//! numbers) and drains it under a throttle gate and a per-frame time
//! budget. Work that does not fit the current frame stays queued and a new
//! animation frame is requested from the host.
//!
//! The coordinator can be paused while another subsystem owns the editor
//! (paste, code execution, clear). Pausing blocks new jobs and draining
//! but never interrupts a job already running.

use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::perf::{RollingStats, DEFAULT_WINDOW};

/// What a sync job refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncJobKind {
    Content,
    Cursor,
    Scroll,
    LineNumbers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    #[default]
    Normal,
    High,
}

/// One unit of deferred synchronization work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncJob {
    pub kind: SyncJobKind,
    pub priority: SyncPriority,
    /// Clock time at which the job was queued.
    pub timestamp: f64,
}

/// Performs the actual view updates.
pub trait SyncHandler {
    fn execute(&mut self, job: &SyncJob);
}

/// Requests a callback on the host's next animation frame. The host
/// answers by calling [`SyncCoordinator::process_sync_queue`].
pub trait FrameScheduler {
    fn request_frame(&self);
}

/// Throttle and budget settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum time between two batches (~60fps).
    pub sync_throttle_ms: f64,
    /// Maximum time a single batch may spend before yielding.
    pub max_frame_budget_ms: f64,
    /// Average batch cost above which the coordinator reports unhealthy.
    pub slow_batch_warn_ms: f64,
    /// Number of batch samples kept for statistics.
    pub stats_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_throttle_ms: 16.0,
            max_frame_budget_ms: 8.0,
            slow_batch_warn_ms: 5.0,
            stats_window: DEFAULT_WINDOW,
        }
    }
}

/// Batch cost statistics for external health checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub average_ms: f64,
    pub max_ms: f64,
    pub samples: usize,
    pub batches: u64,
    pub jobs_executed: u64,
    pub queued: usize,
}

/// Priority queue of sync jobs drained under a frame budget.
pub struct SyncCoordinator<H: SyncHandler> {
    handler: H,
    queue: VecDeque<SyncJob>,
    config: SyncConfig,
    clock: Rc<dyn Clock>,
    frames: Rc<dyn FrameScheduler>,
    stats: RollingStats,
    last_batch_at: Option<f64>,
    frame_requested: bool,
    paused: bool,
    destroyed: bool,
    jobs_executed: u64,
}

impl<H: SyncHandler> SyncCoordinator<H> {
    pub fn new(
        handler: H,
        config: SyncConfig,
        clock: Rc<dyn Clock>,
        frames: Rc<dyn FrameScheduler>,
    ) -> Self {
        Self {
            handler,
            queue: VecDeque::new(),
            stats: RollingStats::new(config.stats_window),
            config,
            clock,
            frames,
            last_batch_at: None,
            frame_requested: false,
            paused: false,
            destroyed: false,
            jobs_executed: 0,
        }
    }

    /// Queues a job. High priority jumps to the front of the queue; normal
    /// priority is FIFO. Jobs of the same kind are never merged.
    ///
    /// Returns false (and drops the job) while paused or destroyed.
    pub fn queue_sync(&mut self, kind: SyncJobKind, priority: SyncPriority) -> bool {
        if self.paused || self.destroyed {
            log::debug!("Dropping {:?} sync job: coordinator inactive", kind);
            return false;
        }
        let job = SyncJob {
            kind,
            priority,
            timestamp: self.clock.now_ms(),
        };
        match priority {
            SyncPriority::High => self.queue.push_front(job),
            SyncPriority::Normal => self.queue.push_back(job),
        }
        self.schedule_frame();
        true
    }

    /// Queues a high-priority content job, used after operations that may
    /// have invalidated several views at once.
    pub fn trigger_full_sync(&mut self) -> bool {
        self.queue_sync(SyncJobKind::Content, SyncPriority::High)
    }

    /// Drains queued jobs for one frame. Returns the number executed.
    ///
    /// If the previous batch started less than `sync_throttle_ms` ago, no
    /// job runs and another frame is requested. Otherwise jobs run in queue
    /// order until the batch has used `max_frame_budget_ms`; whatever is
    /// left waits for the next frame.
    pub fn process_sync_queue(&mut self) -> usize {
        self.frame_requested = false;
        if self.paused || self.destroyed || self.queue.is_empty() {
            return 0;
        }

        let start = self.clock.now_ms();
        if let Some(last) = self.last_batch_at {
            if start - last < self.config.sync_throttle_ms {
                self.schedule_frame();
                return 0;
            }
        }

        let mut executed = 0;
        while let Some(job) = self.queue.pop_front() {
            self.handler.execute(&job);
            executed += 1;
            if self.clock.now_ms() - start >= self.config.max_frame_budget_ms {
                break;
            }
        }

        self.finish_batch(start, executed);
        if !self.queue.is_empty() {
            log::debug!("Frame budget spent, {} sync jobs deferred", self.queue.len());
            self.schedule_frame();
        }
        executed
    }

    /// Drains the whole queue now, ignoring throttle and budget.
    pub fn flush(&mut self) -> usize {
        if self.paused || self.destroyed || self.queue.is_empty() {
            return 0;
        }
        let start = self.clock.now_ms();
        let mut executed = 0;
        while let Some(job) = self.queue.pop_front() {
            self.handler.execute(&job);
            executed += 1;
        }
        self.finish_batch(start, executed);
        executed
    }

    fn finish_batch(&mut self, start: f64, executed: usize) {
        let elapsed = self.clock.now_ms() - start;
        self.stats.record(elapsed);
        self.last_batch_at = Some(start);
        self.jobs_executed += executed as u64;
    }

    fn schedule_frame(&mut self) {
        if !self.frame_requested {
            self.frame_requested = true;
            self.frames.request_frame();
        }
    }

    /// Stops draining and enqueueing. An in-flight job is not interrupted.
    pub fn pause(&mut self) {
        if !self.paused {
            log::debug!("Sync paused with {} jobs queued", self.queue.len());
        }
        self.paused = true;
    }

    /// Resumes and immediately drains whatever is queued.
    pub fn resume(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        self.paused = false;
        if self.queue.is_empty() {
            0
        } else {
            self.process_sync_queue()
        }
    }

    /// Drops the queue and shuts the coordinator down. Safe to call twice.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.queue.clear();
        log::debug!("Sync coordinator destroyed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queued jobs in execution order.
    pub fn queued(&self) -> impl Iterator<Item = &SyncJob> {
        self.queue.iter()
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            average_ms: self.stats.average_ms(),
            max_ms: self.stats.max_ms(),
            samples: self.stats.count(),
            batches: self.stats.total(),
            jobs_executed: self.jobs_executed,
            queued: self.queue.len(),
        }
    }

    /// True while the average batch cost stays under `slow_batch_warn_ms`.
    pub fn is_healthy(&self) -> bool {
        self.stats.average_ms() <= self.config.slow_batch_warn_ms
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;

    /// Records executed jobs and advances the clock by a fixed cost.
    struct CostlyHandler {
        clock: ManualClock,
        cost_ms: f64,
        executed: Vec<SyncJobKind>,
    }

    impl SyncHandler for CostlyHandler {
        fn execute(&mut self, job: &SyncJob) {
            self.clock.advance(self.cost_ms);
            self.executed.push(job.kind);
        }
    }

    #[derive(Default)]
    struct FrameCounter {
        requests: Cell<usize>,
    }

    impl FrameScheduler for FrameCounter {
        fn request_frame(&self) {
            self.requests.set(self.requests.get() + 1);
        }
    }

    fn coordinator(
        cost_ms: f64,
    ) -> (SyncCoordinator<CostlyHandler>, ManualClock, Rc<FrameCounter>) {
        let clock = ManualClock::new();
        let frames = Rc::new(FrameCounter::default());
        let handler = CostlyHandler {
            clock: clock.clone(),
            cost_ms,
            executed: Vec::new(),
        };
        let coordinator = SyncCoordinator::new(
            handler,
            SyncConfig::default(),
            Rc::new(clock.clone()),
            frames.clone(),
        );
        (coordinator, clock, frames)
    }

    #[test]
    fn test_high_priority_jumps_queue() {
        let (mut sync, _, _) = coordinator(0.0);
        sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
        sync.queue_sync(SyncJobKind::Scroll, SyncPriority::Normal);
        sync.trigger_full_sync();

        let order: Vec<_> = sync.queued().map(|j| j.kind).collect();
        assert_eq!(order, vec![SyncJobKind::Content, SyncJobKind::Cursor, SyncJobKind::Scroll]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let (mut sync, _, _) = coordinator(0.0);
        for _ in 0..3 {
            sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
        }
        assert_eq!(sync.pending(), 3);
        assert_eq!(sync.process_sync_queue(), 3);
        assert_eq!(sync.handler().executed.len(), 3);
    }

    #[test]
    fn test_queue_drains_across_frames() {
        let (mut sync, clock, frames) = coordinator(3.0);
        let kinds = [
            SyncJobKind::Content,
            SyncJobKind::Cursor,
            SyncJobKind::Scroll,
            SyncJobKind::LineNumbers,
            SyncJobKind::Cursor,
            SyncJobKind::Content,
            SyncJobKind::Scroll,
        ];
        for kind in kinds {
            sync.queue_sync(kind, SyncPriority::Normal);
        }
        assert_eq!(frames.requests.get(), 1);

        let mut frames_run = 0;
        while sync.pending() > 0 {
            sync.process_sync_queue();
            clock.advance(16.7);
            frames_run += 1;
            assert!(frames_run < 20, "queue never drained");
        }
        assert_eq!(sync.handler().executed, kinds.to_vec());
        assert_eq!(sync.stats().jobs_executed, kinds.len() as u64);
        assert!(frames_run > 1);
    }

    #[test]
    fn test_frame_budget_defers_remaining_jobs() {
        let (mut sync, _, frames) = coordinator(4.0);
        for _ in 0..5 {
            sync.queue_sync(SyncJobKind::Content, SyncPriority::Normal);
        }
        let before = frames.requests.get();

        // Two 4ms jobs reach the 8ms budget.
        assert_eq!(sync.process_sync_queue(), 2);
        assert_eq!(sync.pending(), 3);
        assert_eq!(frames.requests.get(), before + 1);
        assert_eq!(sync.stats().max_ms, 8.0);
    }

    #[test]
    fn test_throttle_gate_reschedules() {
        let (mut sync, clock, frames) = coordinator(1.0);
        sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
        assert_eq!(sync.process_sync_queue(), 1);

        clock.advance(5.0);
        sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
        let before = frames.requests.get();
        assert_eq!(sync.process_sync_queue(), 0);
        assert_eq!(frames.requests.get(), before + 1);

        clock.advance(16.0);
        assert_eq!(sync.process_sync_queue(), 1);
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let (mut sync, clock, _) = coordinator(1.0);
        sync.queue_sync(SyncJobKind::Content, SyncPriority::Normal);
        sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
        sync.pause();

        assert!(!sync.queue_sync(SyncJobKind::Scroll, SyncPriority::Normal));
        assert_eq!(sync.process_sync_queue(), 0);
        assert_eq!(sync.flush(), 0);
        assert!(sync.handler().executed.is_empty());

        clock.advance(20.0);
        assert_eq!(sync.resume(), 2);
        assert_eq!(
            sync.handler().executed,
            vec![SyncJobKind::Content, SyncJobKind::Cursor]
        );
        assert!(!sync.is_paused());
    }

    #[test]
    fn test_flush_ignores_budget() {
        let (mut sync, _, _) = coordinator(5.0);
        for _ in 0..6 {
            sync.queue_sync(SyncJobKind::LineNumbers, SyncPriority::Normal);
        }
        assert_eq!(sync.flush(), 6);
        assert_eq!(sync.pending(), 0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (mut sync, _, _) = coordinator(0.0);
        sync.queue_sync(SyncJobKind::Content, SyncPriority::Normal);
        sync.destroy();
        sync.destroy();
        assert!(sync.is_destroyed());
        assert_eq!(sync.pending(), 0);
        assert!(!sync.trigger_full_sync());
        assert_eq!(sync.resume(), 0);
        assert_eq!(sync.process_sync_queue(), 0);
    }

    #[test]
    fn test_health_check() {
        let (mut sync, clock, _) = coordinator(7.0);
        sync.queue_sync(SyncJobKind::Content, SyncPriority::Normal);
        sync.process_sync_queue();
        assert!(!sync.is_healthy());

        sync.handler_mut().cost_ms = 0.5;
        for _ in 0..20 {
            clock.advance(17.0);
            sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
            sync.process_sync_queue();
        }
        assert!(sync.is_healthy());
        assert_eq!(sync.stats().max_ms, 7.0);
    }
}
