//! The playground: editor views plus the code runner.
//!
//! User interactions arrive as method calls. Each one edits the canonical
//! buffer and queues the view updates it invalidated; the host drives
//! [`PlaygroundApp::animation_frame`] whenever a frame was requested.
//! Paste, clear and run take the editor over for a while, so the sync
//! coordinator is paused around them and a full sync follows.

use std::rc::Rc;

use playground_core::{
    Clock, CursorMetrics, Language, LayoutHost, Selection, SyncCoordinator, SyncJobKind,
    SyncPriority, SyncStats,
};
use playground_runtime::{
    ConsoleEntry, ExecutionRunner, HeapProbe, HostContext, PlaygroundContext, RunMetrics, RunReport,
};

use crate::config::PlaygroundConfig;
use crate::hosts::FrameRequests;
use crate::views::EditorViews;

pub struct PlaygroundApp {
    sync: SyncCoordinator<EditorViews>,
    runner: ExecutionRunner,
    context: PlaygroundContext,
    host: Rc<HostContext>,
    frames: Rc<FrameRequests>,
    console: Vec<ConsoleEntry>,
    last_report: Option<RunReport>,
}

impl PlaygroundApp {
    pub fn new(
        config: PlaygroundConfig,
        layout: Box<dyn LayoutHost>,
        host: HostContext,
        clock: Rc<dyn Clock>,
        heap: Option<Rc<dyn HeapProbe>>,
    ) -> Self {
        let frames = Rc::new(FrameRequests::new());
        let views = EditorViews::new(layout, config.highlight, clock.clone());
        let sync = SyncCoordinator::new(views, config.sync, clock.clone(), frames.clone());
        Self {
            sync,
            runner: ExecutionRunner::new(config.run),
            context: PlaygroundContext::new(clock, heap),
            host: Rc::new(host),
            frames,
            console: Vec::new(),
            last_report: None,
        }
    }

    /// Replaces the document, e.g. when a snippet is opened.
    pub fn load_text(&mut self, text: &str) {
        let views = self.sync.handler_mut();
        views.buffer.replace_all(text);
        views.selection = Selection::new(0);
        views.refresh_highlight(true);
        self.sync.trigger_full_sync();
        self.sync.queue_sync(SyncJobKind::LineNumbers, SyncPriority::Normal);
    }

    /// Switches the highlight grammar and re-renders.
    pub fn set_language(&mut self, language: Language) {
        let views = self.sync.handler_mut();
        views.set_language(language);
        views.refresh_highlight(true);
    }

    /// Types `text` at the caret, replacing the selection if there is one.
    ///
    /// Newlines and tabs refresh the highlight immediately; anything else
    /// waits for the debounce.
    pub fn input(&mut self, text: &str) {
        let views = self.sync.handler_mut();
        let selection = views.selection.clamped(views.buffer.len_chars());
        let (start, end) = selection.range();
        views.buffer.remove(start, end);
        views.buffer.insert(start, text);
        views.selection = Selection::new(start + inserted_chars(text));

        let structural = text.contains('\n') || text.contains('\t');
        views.refresh_highlight(structural);
        self.queue_edit_jobs(text.contains('\n'));
    }

    /// Backspace: removes the selection or the character before the caret.
    pub fn delete_backward(&mut self) {
        let views = self.sync.handler_mut();
        let selection = views.selection.clamped(views.buffer.len_chars());
        let (start, end) = if selection.has_selection() {
            selection.range()
        } else if selection.cursor > 0 {
            (selection.cursor - 1, selection.cursor)
        } else {
            return;
        };
        let removed_newline = views
            .buffer
            .text()
            .chars()
            .skip(start)
            .take(end - start)
            .any(|c| c == '\n');
        views.buffer.remove(start, end);
        views.selection = Selection::new(start);
        views.refresh_highlight(removed_newline);
        self.queue_edit_jobs(removed_newline);
    }

    pub fn set_selection(&mut self, selection: Selection) {
        let views = self.sync.handler_mut();
        views.selection = selection.clamped(views.buffer.len_chars());
        self.sync.queue_sync(SyncJobKind::Cursor, SyncPriority::High);
        self.sync.queue_sync(SyncJobKind::Scroll, SyncPriority::Normal);
    }

    pub fn focus(&mut self, focused: bool) {
        self.sync.handler_mut().focused = focused;
        self.sync.queue_sync(SyncJobKind::Cursor, SyncPriority::High);
    }

    /// The user scrolled the editor.
    pub fn scroll(&mut self, top: f32, left: f32) {
        self.sync.handler_mut().set_scroll(top, left);
        self.sync.queue_sync(SyncJobKind::LineNumbers, SyncPriority::Normal);
    }

    /// Inserts pasted text as one bulk edit with a single highlight pass.
    pub fn paste(&mut self, text: &str) {
        self.sync.pause();
        let views = self.sync.handler_mut();
        views.begin_bulk_edit();
        let selection = views.selection.clamped(views.buffer.len_chars());
        let (start, end) = selection.range();
        views.buffer.remove(start, end);
        views.buffer.insert(start, text);
        views.selection = Selection::new(start + inserted_chars(text));
        views.end_bulk_edit();
        self.sync.resume();
        self.sync.trigger_full_sync();
    }

    /// Empties the editor and the console.
    pub fn clear(&mut self) {
        self.sync.flush();
        self.sync.pause();
        let views = self.sync.handler_mut();
        views.buffer.replace_all("");
        views.selection = Selection::new(0);
        views.refresh_highlight(true);
        self.console.clear();
        self.context.tracker().borrow_mut().record_ui_action("clear");
        self.sync.resume();
        self.sync.trigger_full_sync();
    }

    /// Runs the document. The console is cleared first and receives the
    /// run's output.
    pub async fn run(&mut self) -> &RunReport {
        self.context.tracker().borrow_mut().record_ui_action("run");
        self.console.clear();
        self.sync.flush();
        self.sync.pause();

        let source = self.sync.handler().buffer.text();
        let report = self.runner.run(&self.context, &self.host, &source).await;
        self.console.extend(report.console.iter().cloned());

        self.sync.resume();
        self.sync.trigger_full_sync();
        self.last_report.insert(report)
    }

    /// Animation frame callback: deferred highlight, then queued sync work.
    /// Returns the number of sync jobs executed.
    pub fn animation_frame(&mut self) -> usize {
        self.frames.take();
        self.sync.handler_mut().poll_highlight();
        self.sync.process_sync_queue()
    }

    /// True if the app asked for an animation frame since the last one.
    pub fn wants_frame(&self) -> bool {
        self.frames.is_pending()
    }

    pub fn destroy(&mut self) {
        self.sync.destroy();
    }

    pub fn views(&self) -> &EditorViews {
        self.sync.handler()
    }

    pub fn text(&self) -> String {
        self.sync.handler().buffer.text()
    }

    pub fn cursor_metrics(&self) -> CursorMetrics {
        self.sync.handler().metrics()
    }

    /// Tracker state for the metrics panel.
    pub fn metrics(&self) -> RunMetrics {
        self.context.tracker().borrow().get_metrics()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn pending_sync(&self) -> usize {
        self.sync.pending()
    }

    pub fn is_sync_healthy(&self) -> bool {
        self.sync.is_healthy()
    }

    pub fn console(&self) -> &[ConsoleEntry] {
        &self.console
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    pub fn last_execution_time(&self) -> Option<f64> {
        self.context.last_execution_time()
    }

    pub fn host(&self) -> &Rc<HostContext> {
        &self.host
    }

    fn queue_edit_jobs(&mut self, lines_changed: bool) {
        self.sync.queue_sync(SyncJobKind::Content, SyncPriority::Normal);
        self.sync.queue_sync(SyncJobKind::Cursor, SyncPriority::Normal);
        self.sync.queue_sync(SyncJobKind::Scroll, SyncPriority::Normal);
        if lines_changed {
            self.sync.queue_sync(SyncJobKind::LineNumbers, SyncPriority::Normal);
        }
    }
}

/// Length of `text` once stored in the buffer.
fn inserted_chars(text: &str) -> usize {
    playground_core::normalize_text(text).chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::{MemoryConsole, MonospaceLayout};
    use playground_core::ManualClock;
    use playground_runtime::{LogLevel, RunStatus};

    fn app() -> (PlaygroundApp, ManualClock) {
        let clock = ManualClock::new();
        let host = HostContext::new().with_console(Rc::new(MemoryConsole::new()));
        let app = PlaygroundApp::new(
            PlaygroundConfig::default(),
            Box::new(MonospaceLayout::default()),
            host,
            Rc::new(clock.clone()),
            None,
        );
        (app, clock)
    }

    /// Advances past the throttle and runs one frame.
    fn frame(app: &mut PlaygroundApp, clock: &ManualClock) -> usize {
        clock.advance(20.0);
        app.animation_frame()
    }

    #[test]
    fn test_typing_updates_metrics_after_frame() {
        let (mut app, clock) = app();
        app.focus(true);
        app.input("let a");
        assert!(app.wants_frame());
        assert_eq!(app.cursor_metrics(), CursorMetrics::default());

        frame(&mut app, &clock);
        let metrics = app.cursor_metrics();
        assert_eq!((metrics.line, metrics.column, metrics.char_count), (1, 6, 5));
        assert_eq!(app.pending_sync(), 0);
    }

    #[test]
    fn test_newline_highlights_immediately() {
        let (mut app, _) = app();
        app.input("a");
        assert_eq!(app.views().highlight_count(), 0);
        assert!(app.views().highlight_pending());

        app.input("\n");
        assert_eq!(app.views().highlight_count(), 1);
        assert!(!app.views().highlight_pending());
        assert_eq!(app.text(), "a\n");
    }

    #[test]
    fn test_debounced_highlight_runs_on_frame() {
        let (mut app, clock) = app();
        app.input("x");
        clock.advance(60.0);
        app.animation_frame();
        assert_eq!(app.views().highlight_count(), 1);
    }

    #[test]
    fn test_deferred_highlight_keeps_range_selection() {
        let (mut app, clock) = app();
        app.focus(true);
        app.input("hello world");
        app.set_selection(Selection::with_range(0, 11));
        clock.advance(60.0);
        app.animation_frame();

        assert_eq!(app.views().highlight_count(), 1);
        assert_eq!(app.views().selection, Selection::with_range(0, 11));
        assert_eq!(app.cursor_metrics().selection_length, 11);
    }

    #[test]
    fn test_paste_highlights_once_and_syncs() {
        let (mut app, clock) = app();
        app.focus(true);
        frame(&mut app, &clock);

        app.paste("const a = 1;\r\nconst b = 2;\n");
        assert_eq!(app.views().highlight_count(), 1);
        assert_eq!(app.text(), "const a = 1;\nconst b = 2;\n");
        assert_eq!(app.views().selection, Selection::new(26));

        frame(&mut app, &clock);
        assert_eq!(app.views().gutter_line_count(), 2);
        assert_eq!(app.cursor_metrics().char_count, 26);
    }

    #[test]
    fn test_input_replaces_selection() {
        let (mut app, _) = app();
        app.load_text("hello world");
        app.set_selection(Selection::with_range(0, 5));
        app.input("bye");
        assert_eq!(app.text(), "bye world");
        assert_eq!(app.views().selection, Selection::new(3));
    }

    #[test]
    fn test_delete_backward() {
        let (mut app, _) = app();
        app.load_text("ab\nc");
        app.set_selection(Selection::new(3));
        app.delete_backward();
        assert_eq!(app.text(), "abc");
        app.set_selection(Selection::new(0));
        app.delete_backward();
        assert_eq!(app.text(), "abc");
    }

    #[test]
    fn test_clear_resets_editor_and_console() {
        let (mut app, clock) = app();
        app.load_text("console.log(1)");
        frame(&mut app, &clock);
        app.clear();

        assert_eq!(app.text(), "");
        assert!(app.console().is_empty());
        assert_eq!(app.metrics().session.session_ui_actions.get("clear"), Some(&1));
        frame(&mut app, &clock);
        assert_eq!(app.views().gutter_line_count(), 1);
    }

    #[test]
    fn test_destroy_stops_sync() {
        let (mut app, clock) = app();
        app.input("a");
        app.destroy();
        app.input("b");
        assert_eq!(frame(&mut app, &clock), 0);
        assert_eq!(app.pending_sync(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_fills_console_and_syncs_after() {
        let (mut app, clock) = app();
        app.load_text("console.log('hi');\nconsole.warn('careful');");
        let report = app.run().await;
        assert_eq!(report.status, RunStatus::Succeeded);

        let levels: Vec<LogLevel> = app.console().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Log, LogLevel::Warn]);
        assert_eq!(app.console()[0].message, "hi");
        assert!(app.last_execution_time().is_some());
        assert_eq!(app.metrics().session.session_runs, 1);

        assert!(app.pending_sync() > 0);
        frame(&mut app, &clock);
        assert_eq!(app.views().gutter_line_count(), 2);
    }
}
