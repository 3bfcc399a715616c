//! Selection model, cursor metrics and caret scrolling.

use serde::Serialize;

use crate::buffer::TextBuffer;
use crate::geometry::LayoutHost;

/// Pixels kept between the caret and the viewport edge when scrolling.
const CARET_SCROLL_MARGIN: f32 = 8.0;

/// Auto-scroll is skipped when the selection covers more than this share
/// of the document.
const SELECT_ALL_RATIO: f64 = 0.5;

/// A text selection with an anchor and a cursor position.
/// When anchor == cursor, there is no active selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    /// The anchor point (where selection started).
    pub anchor: usize,
    /// The cursor position (where selection ends / caret is).
    pub cursor: usize,
}

impl Selection {
    /// Creates a collapsed selection at the given position.
    pub fn new(pos: usize) -> Self {
        Self {
            anchor: pos,
            cursor: pos,
        }
    }

    /// Creates a selection from anchor to cursor.
    pub fn with_range(anchor: usize, cursor: usize) -> Self {
        Self { anchor, cursor }
    }

    /// Returns true if there's an active selection (anchor != cursor).
    pub fn has_selection(&self) -> bool {
        self.anchor != self.cursor
    }

    /// Returns the start and end of the selection (ordered).
    pub fn range(&self) -> (usize, usize) {
        if self.anchor <= self.cursor {
            (self.anchor, self.cursor)
        } else {
            (self.cursor, self.anchor)
        }
    }

    /// Number of selected characters.
    pub fn len(&self) -> usize {
        let (start, end) = self.range();
        end - start
    }

    pub fn is_empty(&self) -> bool {
        !self.has_selection()
    }

    /// Clamps both ends to a buffer length.
    pub fn clamped(&self, len: usize) -> Self {
        Self {
            anchor: self.anchor.min(len),
            cursor: self.cursor.min(len),
        }
    }
}

/// Caret position projected onto the buffer.
///
/// Line and column are 1-based. The all-zero default means "editor not
/// focused" and tells the UI to hide its cursor indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMetrics {
    pub line: usize,
    pub column: usize,
    pub char_count: usize,
    pub selection_length: usize,
}

/// Projects the live selection onto the buffer.
pub fn get_cursor_metrics(
    buffer: &TextBuffer,
    selection: &Selection,
    focused: bool,
) -> CursorMetrics {
    if !focused {
        return CursorMetrics::default();
    }
    let selection = selection.clamped(buffer.len_chars());
    let (line, col) = buffer.char_to_line_col(selection.cursor);
    CursorMetrics {
        line: line + 1,
        column: col + 1,
        char_count: buffer.len_chars(),
        selection_length: selection.len(),
    }
}

/// Nudges the scroll position so the caret is visible.
///
/// Scrolling is immediate, never animated. Nothing happens when the
/// selection spans more than half of the document, or when the host cannot
/// report a caret rectangle. Returns true if the scroll position changed.
pub fn scroll_to_cursor<H: LayoutHost + ?Sized>(
    host: &mut H,
    buffer: &TextBuffer,
    selection: &Selection,
) -> bool {
    let document_len = buffer.len_chars();
    if document_len > 0 && selection.len() as f64 > document_len as f64 * SELECT_ALL_RATIO {
        log::debug!("Skipping auto-scroll for large selection");
        return false;
    }

    let rect = match host.selection_rect(buffer, selection) {
        Ok(Some(rect)) => rect,
        Ok(None) => return false,
        Err(e) => {
            log::warn!("Caret measurement failed: {}", e);
            return false;
        }
    };

    let view = host.viewport();
    let mut top = view.scroll_top;
    let mut left = view.scroll_left;

    if rect.y < view.scroll_top {
        top = (rect.y - CARET_SCROLL_MARGIN).max(0.0);
    } else if rect.bottom() > view.scroll_top + view.height {
        top = rect.bottom() - view.height + CARET_SCROLL_MARGIN;
    }

    if rect.x < view.scroll_left {
        left = (rect.x - CARET_SCROLL_MARGIN).max(0.0);
    } else if rect.right() > view.scroll_left + view.width {
        left = rect.right() - view.width + CARET_SCROLL_MARGIN;
    }

    if top != view.scroll_top || left != view.scroll_left {
        host.set_scroll(top, left);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::test_support::FakeLayout;
    use crate::geometry::{Rect, Viewport};

    #[test]
    fn test_selection_range() {
        let sel = Selection::with_range(7, 3);
        assert!(sel.has_selection());
        assert_eq!(sel.range(), (3, 7));
        assert_eq!(sel.len(), 4);
        assert!(Selection::new(2).is_empty());
    }

    #[test]
    fn test_metrics_focused() {
        let buf = TextBuffer::from_str("let a = 1;\nlet b = 2;");
        let metrics = get_cursor_metrics(&buf, &Selection::with_range(11, 15), true);
        assert_eq!(metrics.line, 2);
        assert_eq!(metrics.column, 5);
        assert_eq!(metrics.char_count, 21);
        assert_eq!(metrics.selection_length, 4);
    }

    #[test]
    fn test_metrics_unfocused_is_zero() {
        let buf = TextBuffer::from_str("abc");
        let metrics = get_cursor_metrics(&buf, &Selection::new(2), false);
        assert_eq!(metrics, CursorMetrics::default());
    }

    #[test]
    fn test_metrics_clamps_stale_selection() {
        let buf = TextBuffer::from_str("ab");
        let metrics = get_cursor_metrics(&buf, &Selection::with_range(0, 40), true);
        assert_eq!(metrics.column, 3);
        assert_eq!(metrics.selection_length, 2);
    }

    fn viewport() -> Viewport {
        Viewport {
            scroll_top: 100.0,
            scroll_left: 0.0,
            width: 400.0,
            height: 200.0,
        }
    }

    fn doc() -> TextBuffer {
        TextBuffer::from_str(&"x".repeat(100))
    }

    #[test]
    fn test_scroll_down_to_caret() {
        let mut host = FakeLayout::new(18.0);
        host.viewport = viewport();
        host.selection = Some(Rect::new(10.0, 330.0, 1.0, 18.0));
        assert!(scroll_to_cursor(&mut host, &doc(), &Selection::new(50)));
        assert_eq!(host.viewport.scroll_top, 330.0 + 18.0 - 200.0 + CARET_SCROLL_MARGIN);
    }

    #[test]
    fn test_scroll_up_to_caret() {
        let mut host = FakeLayout::new(18.0);
        host.viewport = viewport();
        host.selection = Some(Rect::new(10.0, 40.0, 1.0, 18.0));
        assert!(scroll_to_cursor(&mut host, &doc(), &Selection::new(5)));
        assert_eq!(host.viewport.scroll_top, 32.0);
    }

    #[test]
    fn test_caret_visible_no_scroll() {
        let mut host = FakeLayout::new(18.0);
        host.viewport = viewport();
        host.selection = Some(Rect::new(10.0, 150.0, 1.0, 18.0));
        assert!(!scroll_to_cursor(&mut host, &doc(), &Selection::new(5)));
        assert!(host.scroll_calls.borrow().is_empty());
    }

    #[test]
    fn test_select_all_skips_scroll() {
        let mut host = FakeLayout::new(18.0);
        host.viewport = viewport();
        host.selection = Some(Rect::new(10.0, 900.0, 1.0, 18.0));
        assert!(!scroll_to_cursor(&mut host, &doc(), &Selection::with_range(0, 60)));
        assert!(host.scroll_calls.borrow().is_empty());
    }
}
