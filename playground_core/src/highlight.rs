//! Debounced highlight refresh.
//!
//! The highlight overlay is regenerated wholesale, so the scheduler
//! captures the selection's text offsets (anchor and caret) before
//! re-tokenizing and restores them afterwards. Refreshes are coalesced
//! behind a single debounce timer; latency-sensitive edits such as paste or
//! Enter request an immediate one.

use std::rc::Rc;

use serde::Deserialize;

use crate::buffer::TextBuffer;
use crate::clock::Clock;
use crate::cursor::Selection;
use crate::syntax::{HighlightLine, Language, SyntaxHighlighter};

/// Default debounce delay for deferred refreshes.
pub const DEFAULT_DEBOUNCE_MS: f64 = 50.0;

/// Highlight scheduling settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub debounce_ms: f64,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// A single-shot timer handle. At most one deadline is pending; scheduling
/// again pushes it back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Debouncer {
    delay_ms: f64,
    deadline: Option<f64>,
}

impl Debouncer {
    pub fn new(delay_ms: f64) -> Self {
        Self {
            delay_ms: delay_ms.max(0.0),
            deadline: None,
        }
    }

    /// (Re)starts the timer from `now`.
    pub fn schedule(&mut self, now: f64) {
        self.deadline = Some(now + self.delay_ms);
    }

    /// Drops the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Consumes the pending deadline without waiting for it. Returns true
    /// if one was pending.
    pub fn flush(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Returns true exactly once when the deadline has passed.
    pub fn poll(&mut self, now: f64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<f64> {
        self.deadline
    }
}

/// The overlay surface the highlighter renders into.
pub trait HighlightSurface {
    /// The live selection in canonical text offsets, if the caret is in
    /// the editor.
    fn caret_selection(&self) -> Option<Selection>;

    /// Replaces the whole overlay.
    fn replace_overlay(&mut self, lines: &[HighlightLine]);

    /// Puts the selection back after the overlay was replaced.
    fn restore_caret(&mut self, selection: Selection);
}

/// Coalesces highlight refresh requests.
pub struct HighlightScheduler {
    highlighter: SyntaxHighlighter,
    debouncer: Debouncer,
    clock: Rc<dyn Clock>,
    bulk_edit: bool,
    refreshes: u64,
}

impl HighlightScheduler {
    pub fn new(config: HighlightConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            highlighter: SyntaxHighlighter::new(),
            debouncer: Debouncer::new(config.debounce_ms),
            clock,
            bulk_edit: false,
            refreshes: 0,
        }
    }

    pub fn set_language(&mut self, language: Language) {
        self.highlighter.set_language(language);
    }

    /// Requests a refresh.
    ///
    /// `immediate` cancels any pending deferred refresh and renders now;
    /// otherwise the debounce timer is restarted. Requests are ignored while
    /// a bulk edit is in progress. Returns true if a render happened.
    pub fn schedule_highlight_refresh<S: HighlightSurface + ?Sized>(
        &mut self,
        immediate: bool,
        buffer: &TextBuffer,
        surface: &mut S,
    ) -> bool {
        if self.bulk_edit {
            log::debug!("Highlight refresh ignored during bulk edit");
            return false;
        }
        if immediate {
            self.debouncer.cancel();
            self.render(buffer, surface);
            true
        } else {
            self.debouncer.schedule(self.clock.now_ms());
            false
        }
    }

    /// Runs the deferred refresh if its deadline has passed.
    pub fn poll<S: HighlightSurface + ?Sized>(
        &mut self,
        buffer: &TextBuffer,
        surface: &mut S,
    ) -> bool {
        if self.bulk_edit {
            return false;
        }
        if self.debouncer.poll(self.clock.now_ms()) {
            self.render(buffer, surface);
            true
        } else {
            false
        }
    }

    /// Marks the start of a paste or other large programmatic insert.
    pub fn begin_bulk_edit(&mut self) {
        self.bulk_edit = true;
        self.debouncer.cancel();
    }

    /// Ends the bulk edit and renders exactly once.
    pub fn end_bulk_edit<S: HighlightSurface + ?Sized>(
        &mut self,
        buffer: &TextBuffer,
        surface: &mut S,
    ) {
        if !self.bulk_edit {
            return;
        }
        self.bulk_edit = false;
        self.schedule_highlight_refresh(true, buffer, surface);
    }

    /// Drops any pending refresh.
    pub fn cancel(&mut self) {
        self.debouncer.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn in_bulk_edit(&self) -> bool {
        self.bulk_edit
    }

    /// Number of renders performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes
    }

    pub fn lines(&self) -> &[HighlightLine] {
        self.highlighter.lines()
    }

    fn render<S: HighlightSurface + ?Sized>(&mut self, buffer: &TextBuffer, surface: &mut S) {
        let caret = surface.caret_selection();
        let text = buffer.text();
        let lines = self.highlighter.refresh(&text, buffer.logical_line_count());
        surface.replace_overlay(lines);
        if let Some(selection) = caret {
            surface.restore_caret(selection.clamped(buffer.len_chars()));
        }
        self.refreshes += 1;
    }
}
