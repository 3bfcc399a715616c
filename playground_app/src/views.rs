//! Editor views kept in sync with the canonical text.

use std::collections::HashMap;
use std::rc::Rc;

use playground_core::{
    get_cursor_metrics, scroll_to_cursor, Clock, CursorMetrics, GutterRow, HighlightConfig,
    HighlightLine, HighlightScheduler, HighlightSurface, Language, LayoutHost, LineGutter,
    Selection, SyncHandler, SyncJob, SyncJobKind, TextBuffer,
};

/// The editable region, its gutter, its highlight overlay and the status
/// bar metrics.
pub struct EditorViews {
    pub buffer: TextBuffer,
    pub selection: Selection,
    pub focused: bool,
    gutter: LineGutter,
    highlight: HighlightScheduler,
    layout: Box<dyn LayoutHost>,
    overlay: Vec<HighlightLine>,
    metrics: CursorMetrics,
    executed: HashMap<SyncJobKind, u64>,
}

/// The overlay as the highlighter sees it: the rendered lines plus the
/// live selection.
struct OverlaySurface<'a> {
    overlay: &'a mut Vec<HighlightLine>,
    selection: &'a mut Selection,
    focused: bool,
}

impl HighlightSurface for OverlaySurface<'_> {
    fn caret_selection(&self) -> Option<Selection> {
        self.focused.then_some(*self.selection)
    }

    fn replace_overlay(&mut self, lines: &[HighlightLine]) {
        self.overlay.clear();
        self.overlay.extend_from_slice(lines);
    }

    fn restore_caret(&mut self, selection: Selection) {
        *self.selection = selection;
    }
}

impl EditorViews {
    pub fn new(
        layout: Box<dyn LayoutHost>,
        highlight: HighlightConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            buffer: TextBuffer::new(),
            selection: Selection::default(),
            focused: false,
            gutter: LineGutter::new(),
            highlight: HighlightScheduler::new(highlight, clock),
            layout,
            overlay: Vec::new(),
            metrics: CursorMetrics::default(),
            executed: HashMap::new(),
        }
    }

    /// Requests a highlight refresh. Returns true if it rendered now.
    pub fn refresh_highlight(&mut self, immediate: bool) -> bool {
        let mut surface = OverlaySurface {
            overlay: &mut self.overlay,
            selection: &mut self.selection,
            focused: self.focused,
        };
        self.highlight
            .schedule_highlight_refresh(immediate, &self.buffer, &mut surface)
    }

    /// Runs a deferred highlight refresh whose deadline has passed.
    pub fn poll_highlight(&mut self) -> bool {
        let mut surface = OverlaySurface {
            overlay: &mut self.overlay,
            selection: &mut self.selection,
            focused: self.focused,
        };
        self.highlight.poll(&self.buffer, &mut surface)
    }

    pub fn set_language(&mut self, language: Language) {
        self.highlight.set_language(language);
    }

    pub fn begin_bulk_edit(&mut self) {
        self.highlight.begin_bulk_edit();
    }

    pub fn end_bulk_edit(&mut self) {
        let mut surface = OverlaySurface {
            overlay: &mut self.overlay,
            selection: &mut self.selection,
            focused: self.focused,
        };
        self.highlight.end_bulk_edit(&self.buffer, &mut surface);
    }

    pub fn highlight_pending(&self) -> bool {
        self.highlight.is_pending()
    }

    /// Number of highlight renders so far.
    pub fn highlight_count(&self) -> u64 {
        self.highlight.refresh_count()
    }

    pub fn overlay(&self) -> &[HighlightLine] {
        &self.overlay
    }

    pub fn gutter_rows(&self) -> Vec<GutterRow> {
        self.gutter.rows().collect()
    }

    pub fn gutter_line_count(&self) -> usize {
        self.gutter.line_count()
    }

    /// Status bar metrics as of the last content or cursor sync.
    pub fn metrics(&self) -> CursorMetrics {
        self.metrics
    }

    pub fn layout(&self) -> &dyn LayoutHost {
        self.layout.as_ref()
    }

    /// Scroll position changed by the user.
    pub fn set_scroll(&mut self, top: f32, left: f32) {
        self.layout.set_scroll(top, left);
    }

    /// How many jobs of `kind` have run.
    pub fn executed(&self, kind: SyncJobKind) -> u64 {
        self.executed.get(&kind).copied().unwrap_or(0)
    }

    fn sync_gutter(&mut self) {
        let text = self.buffer.text();
        let update = self.gutter.sync(&text, self.layout.as_ref());
        if update.measured < update.line_count {
            log::debug!(
                "Measured {} of {} gutter lines",
                update.measured,
                update.line_count
            );
        }
    }

    fn sync_metrics(&mut self) {
        self.selection = self.selection.clamped(self.buffer.len_chars());
        self.metrics = get_cursor_metrics(&self.buffer, &self.selection, self.focused);
    }
}

impl SyncHandler for EditorViews {
    fn execute(&mut self, job: &SyncJob) {
        match job.kind {
            SyncJobKind::Content => {
                self.sync_gutter();
                self.sync_metrics();
            }
            SyncJobKind::Cursor => self.sync_metrics(),
            SyncJobKind::Scroll => {
                scroll_to_cursor(self.layout.as_mut(), &self.buffer, &self.selection);
            }
            SyncJobKind::LineNumbers => self.sync_gutter(),
        }
        *self.executed.entry(job.kind).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::MonospaceLayout;
    use playground_core::{ManualClock, SyncPriority};

    fn views() -> (EditorViews, ManualClock) {
        let clock = ManualClock::new();
        let views = EditorViews::new(
            Box::new(MonospaceLayout::new(20.0, 10.0, 100.0, 40.0)),
            HighlightConfig::default(),
            Rc::new(clock.clone()),
        );
        (views, clock)
    }

    fn job(kind: SyncJobKind) -> SyncJob {
        SyncJob {
            kind,
            priority: SyncPriority::Normal,
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_content_job_updates_gutter_and_metrics() {
        let (mut views, _) = views();
        views.buffer.replace_all("let a = 1;\nlet b = 2;\n");
        views.selection = Selection::new(13);
        views.focused = true;
        views.execute(&job(SyncJobKind::Content));

        assert_eq!(views.gutter_line_count(), 2);
        assert_eq!(views.metrics().line, 2);
        assert_eq!(views.metrics().column, 3);
        assert_eq!(views.executed(SyncJobKind::Content), 1);
    }

    #[test]
    fn test_unfocused_metrics_are_zero() {
        let (mut views, _) = views();
        views.buffer.replace_all("abc");
        views.execute(&job(SyncJobKind::Cursor));
        assert_eq!(views.metrics(), CursorMetrics::default());
    }

    #[test]
    fn test_scroll_job_follows_caret() {
        let (mut views, _) = views();
        views.buffer.replace_all("1\n2\n3\n4\n5\n6");
        views.selection = Selection::new(10);
        views.execute(&job(SyncJobKind::Scroll));
        assert!(views.layout().viewport().scroll_top > 0.0);
    }

    #[test]
    fn test_highlight_restores_caret() {
        let (mut views, clock) = views();
        views.buffer.replace_all("const x = 1;");
        views.focused = true;
        views.selection = Selection::new(5);

        assert!(!views.refresh_highlight(false));
        assert!(views.highlight_pending());
        assert!(!views.poll_highlight());

        clock.advance(60.0);
        assert!(views.poll_highlight());
        assert_eq!(views.overlay().len(), 1);
        assert_eq!(views.selection, Selection::new(5));
        assert_eq!(views.highlight_count(), 1);
    }
}
