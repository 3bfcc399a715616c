//! Playground Core - Editor synchronization engine.
//!
//! This crate keeps the editor's derived views (highlight overlay, line
//! gutter, caret overlay) consistent with the text buffer. It has no
//! dependency on a concrete UI toolkit: layout measurement, animation
//! frames and time are injected through small host traits.

pub mod buffer;
pub mod clock;
pub mod cursor;
pub mod geometry;
pub mod highlight;
pub mod perf;
pub mod region;
pub mod sync;
pub mod syntax;

pub use buffer::TextBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cursor::{get_cursor_metrics, scroll_to_cursor, CursorMetrics, Selection};
pub use geometry::{
    compute_line_offsets, measure_line_heights, GutterRow, GutterUpdate, LayoutHost,
    LineGeometry, LineGutter, MeasureError, Rect, Viewport,
};
pub use highlight::{Debouncer, HighlightConfig, HighlightScheduler, HighlightSurface};
pub use perf::RollingStats;
pub use region::{
    get_plain_text, normalize_text, text_offset_to_range, text_offset_to_range_clamped,
    EditableRegion, NodePosition, SegmentId,
};
pub use sync::{
    FrameScheduler, SyncConfig, SyncCoordinator, SyncHandler, SyncJob, SyncJobKind, SyncPriority,
    SyncStats,
};
pub use syntax::{HighlightLine, HighlightSpan, Language, SyntaxHighlighter, TokenStyle};
