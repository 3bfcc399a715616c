//! Line geometry and gutter synchronization.
//!
//! Offsets are computed from the canonical text alone. The layout host is
//! only asked for pixel measurements, and a failing measurement never stops
//! a sync pass: the affected line keeps its last known height.

use thiserror::Error;

use crate::buffer::TextBuffer;
use crate::cursor::Selection;

/// Errors a layout host may report while measuring.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeasureError {
    #[error("range {start}..{end} is outside the laid out content")]
    OutOfRange { start: usize, end: usize },
    #[error("layout node is detached")]
    Detached,
    #[error("layout measurement failed: {0}")]
    Other(String),
}

/// Axis-aligned rectangle in content pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }
}

/// The visible window of the scroll container.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_top: f32,
    pub scroll_left: f32,
    pub width: f32,
    pub height: f32,
}

/// Measurement and scrolling services of the host's layout engine.
pub trait LayoutHost {
    /// Height in pixels of the laid out text between two character offsets.
    fn measure_range(&self, start: usize, end: usize) -> Result<f32, MeasureError>;

    /// Bounding rectangle of the caret or selection, if it is laid out.
    fn selection_rect(
        &self,
        buffer: &TextBuffer,
        selection: &Selection,
    ) -> Result<Option<Rect>, MeasureError>;

    /// Current scroll viewport.
    fn viewport(&self) -> Viewport;

    /// Sets the scroll position directly, without animation.
    fn set_scroll(&mut self, top: f32, left: f32);
}

/// Geometry of one logical line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineGeometry {
    /// Character offset of the first character of the line.
    pub start_offset: usize,
    /// Length in characters, excluding the newline.
    pub length: usize,
    /// Measured height; `None` means the renderer uses its default.
    pub pixel_height: Option<f32>,
}

impl LineGeometry {
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.length
    }
}

/// Splits text into logical lines.
///
/// One entry per line, with `start_offset[i + 1] == start_offset[i] + length[i] + 1`.
/// A single trailing newline does not produce an extra empty line.
pub fn compute_line_offsets(text: &str) -> Vec<LineGeometry> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    let mut lines = Vec::new();
    let mut start = 0usize;
    for line in body.split('\n') {
        let length = line.chars().count();
        lines.push(LineGeometry {
            start_offset: start,
            length,
            pixel_height: None,
        });
        start += length + 1;
    }
    lines
}

/// Measures every non-empty line through the layout host.
///
/// Empty lines are always unset. A failing measurement is logged and leaves
/// that line's current height in place. Returns the number of lines
/// measured.
pub fn measure_line_heights<H: LayoutHost + ?Sized>(
    host: &H,
    geometry: &mut [LineGeometry],
) -> usize {
    let mut measured = 0;
    for (index, line) in geometry.iter_mut().enumerate() {
        if line.length == 0 {
            line.pixel_height = None;
            continue;
        }
        match host.measure_range(line.start_offset, line.end_offset()) {
            Ok(height) if height > 0.0 => {
                line.pixel_height = Some(height);
                measured += 1;
            }
            Ok(_) => line.pixel_height = None,
            Err(e) => {
                log::warn!("Line {} measurement failed: {}", index + 1, e);
            }
        }
    }
    measured
}

/// Copies heights from `old` into the lines of `fresh` that sit in the
/// untouched prefix or suffix of the text.
fn carry_unchanged_heights(old: &[LineGeometry], fresh: &mut [LineGeometry]) {
    let prefix = old
        .iter()
        .zip(fresh.iter())
        .take_while(|(a, b)| a.start_offset == b.start_offset && a.length == b.length)
        .count();
    for (line, previous) in fresh.iter_mut().zip(old).take(prefix) {
        line.pixel_height = previous.pixel_height;
    }

    let old_end = old.last().map_or(0, LineGeometry::end_offset);
    let fresh_end = fresh.last().map_or(0, LineGeometry::end_offset);
    let limit = old.len().min(fresh.len()) - prefix;
    for k in 1..=limit {
        let (a, b) = (&old[old.len() - k], &fresh[fresh.len() - k]);
        if a.length != b.length || old_end - a.start_offset != fresh_end - b.start_offset {
            break;
        }
        let height = a.pixel_height;
        let index = fresh.len() - k;
        fresh[index].pixel_height = height;
    }
}

/// One row of the line-number gutter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GutterRow {
    /// 1-based line number.
    pub number: usize,
    pub height: Option<f32>,
}

/// Outcome of a gutter sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GutterUpdate {
    /// The line count changed and the gutter numbers were rebuilt.
    pub rebuilt: bool,
    pub line_count: usize,
    pub measured: usize,
}

/// Keeps the line-number gutter aligned with the text.
#[derive(Debug, Clone, Default)]
pub struct LineGutter {
    geometry: Vec<LineGeometry>,
}

impl LineGutter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes offsets and re-measures heights.
    ///
    /// A line that is unchanged since the previous pass starts from its old
    /// height, which survives only if re-measuring it fails. Edited lines
    /// start unset.
    pub fn sync<H: LayoutHost + ?Sized>(&mut self, text: &str, host: &H) -> GutterUpdate {
        let mut fresh = compute_line_offsets(text);
        let rebuilt = fresh.len() != self.geometry.len();
        carry_unchanged_heights(&self.geometry, &mut fresh);
        let measured = measure_line_heights(host, &mut fresh);
        self.geometry = fresh;
        if rebuilt {
            log::debug!("Gutter rebuilt for {} lines", self.geometry.len());
        }
        GutterUpdate {
            rebuilt,
            line_count: self.geometry.len(),
            measured,
        }
    }

    pub fn line_count(&self) -> usize {
        self.geometry.len()
    }

    pub fn geometry(&self) -> &[LineGeometry] {
        &self.geometry
    }

    /// Rows for the render layer.
    pub fn rows(&self) -> impl Iterator<Item = GutterRow> + '_ {
        self.geometry.iter().enumerate().map(|(i, g)| GutterRow {
            number: i + 1,
            height: g.pixel_height,
        })
    }

    /// Forgets all geometry.
    pub fn clear(&mut self) {
        self.geometry.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeLayout;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_line_offsets_basic() {
        let lines = compute_line_offsets("ab\n\ncde");
        assert_eq!(lines.len(), 3);
        assert_eq!((lines[0].start_offset, lines[0].length), (0, 2));
        assert_eq!((lines[1].start_offset, lines[1].length), (3, 0));
        assert_eq!((lines[2].start_offset, lines[2].length), (4, 3));
    }

    #[test]
    fn test_line_offsets_trailing_newline() {
        assert_eq!(compute_line_offsets("a\n").len(), 1);
        assert_eq!(compute_line_offsets("a\n\n").len(), 2);
        assert_eq!(compute_line_offsets("").len(), 1);
    }

    #[test]
    fn test_measure_skips_empty_and_survives_failures() {
        let mut host = FakeLayout::new(18.0);
        host.fail_from = Some(4);
        let mut lines = compute_line_offsets("ab\n\ncde");
        let measured = measure_line_heights(&host, &mut lines);
        assert_eq!(measured, 1);
        assert_eq!(lines[0].pixel_height, Some(18.0));
        assert_eq!(lines[1].pixel_height, None);
        assert_eq!(lines[2].pixel_height, None);
    }

    #[test]
    fn test_gutter_keeps_last_known_height() {
        let mut host = FakeLayout::new(20.0);
        let mut gutter = LineGutter::new();
        let first = gutter.sync("one\ntwo", &host);
        assert!(first.rebuilt);
        assert_eq!(first.line_count, 2);

        host.fail_from = Some(0);
        let second = gutter.sync("one!\ntwo", &host);
        assert!(!second.rebuilt);
        assert_eq!(second.measured, 0);
        let rows: Vec<_> = gutter.rows().collect();
        assert_eq!(rows[0].number, 1);
        assert_eq!(rows[1].height, Some(20.0));
        assert_eq!(gutter.geometry()[1].start_offset, 5);
    }

    #[test]
    fn test_inserted_empty_line_stays_unset() {
        let host = FakeLayout::new(20.0);
        let mut gutter = LineGutter::new();
        gutter.sync("abc\ndef", &host);
        let update = gutter.sync("abc\n\ndef", &host);
        assert!(update.rebuilt);
        assert_eq!(update.measured, 2);
        let heights: Vec<_> = gutter.rows().map(|r| r.height).collect();
        assert_eq!(heights, vec![Some(20.0), None, Some(20.0)]);
    }

    #[test]
    fn test_failed_sync_carries_heights_around_inserted_line() {
        let mut host = FakeLayout::new(20.0);
        let mut gutter = LineGutter::new();
        gutter.sync("abc\ndef", &host);

        host.fail_from = Some(0);
        let update = gutter.sync("abc\n\ndef", &host);
        assert_eq!(update.measured, 0);
        let heights: Vec<_> = gutter.rows().map(|r| r.height).collect();
        assert_eq!(heights, vec![Some(20.0), None, Some(20.0)]);
    }

    #[test]
    fn test_edited_line_loses_height_on_failure() {
        let mut host = FakeLayout::new(20.0);
        let mut gutter = LineGutter::new();
        gutter.sync("one\ntwo\nsix", &host);

        host.fail_from = Some(0);
        gutter.sync("one\ntwo, three\nsix", &host);
        let heights: Vec<_> = gutter.rows().map(|r| r.height).collect();
        assert_eq!(heights, vec![Some(20.0), None, Some(20.0)]);
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec(prop_oneof!["[a-z ]{0,6}", Just("\n".to_string())], 0..30)
            .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn prop_line_offsets_invariant(text in text_strategy()) {
            let lines = compute_line_offsets(&text);
            let body = text.strip_suffix('\n').unwrap_or(&text);
            prop_assert_eq!(lines.len(), body.split('\n').count());

            for pair in lines.windows(2) {
                prop_assert!(pair[1].start_offset > pair[0].start_offset);
                prop_assert_eq!(pair[1].start_offset, pair[0].start_offset + pair[0].length + 1);
            }
            let last = lines.last().unwrap();
            prop_assert_eq!(last.end_offset(), body.chars().count());
        }
    }
}
