//! Read projection of the editable region.
//!
//! The host mirrors the text nodes of its editable surface into an
//! [`EditableRegion`]: an ordered list of text segments in document order.
//! Nothing here mutates the region; these functions only project it onto
//! the canonical buffer string and back.

/// Zero-width space, used by hosts as an empty-line layout placeholder.
const ZERO_WIDTH_SPACE: char = '\u{200B}';
/// Non-breaking space, produced by editable surfaces for runs of spaces.
const NO_BREAK_SPACE: char = '\u{00A0}';

/// Stable identifier of a text segment inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    id: SegmentId,
    text: String,
}

/// Text segments of the editable surface, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditableRegion {
    segments: Vec<Segment>,
    next_id: u32,
}

impl EditableRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a region from raw segment texts.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut region = Self::new();
        for text in segments {
            region.push(text);
        }
        region
    }

    /// Appends a segment and returns its id.
    pub fn push(&mut self, text: impl Into<String>) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        self.segments.push(Segment {
            id,
            text: text.into(),
        });
        id
    }

    /// Removes every segment.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates `(id, raw text)` pairs in document order.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentId, &str)> {
        self.segments.iter().map(|s| (s.id, s.text.as_str()))
    }
}

/// A position inside one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePosition {
    pub segment: SegmentId,
    /// Character offset inside the segment's normalized text.
    pub local_offset: usize,
}

/// Normalizes raw surface text into canonical buffer text.
///
/// CRLF and lone CR become LF, non-breaking spaces become spaces and
/// zero-width placeholders are dropped. Applying it twice is a no-op.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            NO_BREAK_SPACE => out.push(' '),
            ZERO_WIDTH_SPACE => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Returns the canonical plain text of the region.
pub fn get_plain_text(region: &EditableRegion) -> String {
    let raw: String = region.segments().map(|(_, text)| text).collect();
    normalize_text(&raw)
}

/// Normalized length of every segment, in document order.
///
/// A CRLF split across two segments collapses to one LF owned by the
/// segment holding the CR; the next segment's leading LF then counts for
/// nothing.
fn normalized_lengths(region: &EditableRegion) -> Vec<(SegmentId, usize)> {
    let mut pending_cr = false;
    region
        .segments()
        .map(|(id, raw)| {
            let mut len = normalize_text(raw).chars().count();
            if pending_cr && raw.starts_with('\n') {
                len -= 1;
            }
            if !raw.is_empty() {
                pending_cr = raw.ends_with('\r');
            }
            (id, len)
        })
        .collect()
}

/// Maps a canonical text offset to a segment position.
///
/// Offsets are counted in characters of the normalized text. An offset that
/// lands exactly on a boundary between two segments resolves to the end of
/// the earlier one. Returns `None` when the offset is past the end of the
/// content; callers place the caret at the end in that case.
pub fn text_offset_to_range(region: &EditableRegion, offset: usize) -> Option<NodePosition> {
    let mut consumed = 0usize;
    for (id, len) in normalized_lengths(region) {
        if offset <= consumed + len {
            return Some(NodePosition {
                segment: id,
                local_offset: offset - consumed,
            });
        }
        consumed += len;
    }
    None
}

/// Like [`text_offset_to_range`] but clamps past-the-end offsets to the end
/// of the last segment.
pub fn text_offset_to_range_clamped(
    region: &EditableRegion,
    offset: usize,
) -> Option<NodePosition> {
    text_offset_to_range(region, offset).or_else(|| {
        let (segment, len) = normalized_lengths(region).pop()?;
        Some(NodePosition {
            segment,
            local_offset: len,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_normalization() {
        let region = EditableRegion::from_segments(["let a\r\n", "=\u{00A0}1;", "\u{200B}"]);
        assert_eq!(get_plain_text(&region), "let a\n= 1;");
    }

    #[test]
    fn test_plain_text_is_idempotent() {
        let region = EditableRegion::from_segments(["a\r\nb", "\u{00A0}c\r"]);
        let first = get_plain_text(&region);
        let second = get_plain_text(&region);
        assert_eq!(first, second);
        assert_eq!(normalize_text(&first), first);
    }

    #[test]
    fn test_offset_to_range_walks_segments() {
        let region = EditableRegion::from_segments(["abc", "de", "fgh"]);
        let ids: Vec<_> = region.segments().map(|(id, _)| id).collect();

        let pos = text_offset_to_range(&region, 4).unwrap();
        assert_eq!(pos.segment, ids[1]);
        assert_eq!(pos.local_offset, 1);

        let boundary = text_offset_to_range(&region, 3).unwrap();
        assert_eq!(boundary.segment, ids[0]);
        assert_eq!(boundary.local_offset, 3);

        let end = text_offset_to_range(&region, 8).unwrap();
        assert_eq!(end.segment, ids[2]);
        assert_eq!(end.local_offset, 3);
    }

    #[test]
    fn test_offset_past_end() {
        let region = EditableRegion::from_segments(["ab", "c"]);
        assert!(text_offset_to_range(&region, 10).is_none());

        let clamped = text_offset_to_range_clamped(&region, 10).unwrap();
        assert_eq!(clamped.local_offset, 1);
        assert_eq!(Some(clamped.segment), region.segments().last().map(|(id, _)| id));
    }

    #[test]
    fn test_offset_counts_normalized_chars() {
        // "\r\n" collapses to one character.
        let region = EditableRegion::from_segments(["a\r\nb"]);
        let pos = text_offset_to_range(&region, 3).unwrap();
        assert_eq!(pos.local_offset, 3);
        assert!(text_offset_to_range(&region, 4).is_none());
    }

    #[test]
    fn test_empty_region() {
        let region = EditableRegion::new();
        assert_eq!(get_plain_text(&region), "");
        assert!(text_offset_to_range(&region, 0).is_none());
        assert!(text_offset_to_range_clamped(&region, 0).is_none());
    }

    #[test]
    fn test_crlf_split_across_segments() {
        let region = EditableRegion::from_segments(["a\r", "\nb"]);
        let ids: Vec<_> = region.segments().map(|(id, _)| id).collect();
        assert_eq!(get_plain_text(&region), "a\nb");

        let pos = text_offset_to_range(&region, 3).unwrap();
        assert_eq!(pos.segment, ids[1]);
        assert_eq!(pos.local_offset, 1);
        assert!(text_offset_to_range(&region, 4).is_none());

        let clamped = text_offset_to_range_clamped(&region, 9).unwrap();
        assert_eq!(clamped.segment, ids[1]);
        assert_eq!(clamped.local_offset, 1);
    }

    #[test]
    fn test_crlf_split_across_empty_segment() {
        let region = EditableRegion::from_segments(["a\r", "", "\nb"]);
        assert_eq!(get_plain_text(&region), "a\nb");
        assert!(text_offset_to_range(&region, 4).is_none());
    }
}
