//! Canonical text buffer backed by ropey.
//!
//! The buffer is the single source of truth for offset math. It is kept
//! up to date incrementally from input events; the editable region is only
//! consulted to normalize what the user typed or pasted.

use ropey::Rope;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;

use crate::region::normalize_text;

/// A text buffer backed by a rope data structure.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    rope: Rope,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextBuffer {
    /// Creates a new empty text buffer.
    pub fn new() -> Self {
        Self { rope: Rope::new() }
    }

    /// Creates a text buffer from a string, normalizing line endings and
    /// layout placeholders.
    pub fn from_str(text: &str) -> Self {
        Self {
            rope: Rope::from_str(&normalize_text(text)),
        }
    }

    /// Loads a text buffer from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let rope = Rope::from_reader(BufReader::new(file))?;
        let text = rope.to_string();
        Ok(Self::from_str(&text))
    }

    /// Returns the total number of characters in the buffer.
    pub fn len_chars(&self) -> usize {
        self.rope.len_chars()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    /// Number of lines as the gutter shows them.
    ///
    /// A single trailing newline does not open a new line, so `"a\n"` has
    /// one line and `"a\n\n"` has two. An empty buffer has one line.
    pub fn logical_line_count(&self) -> usize {
        let raw = self.rope.len_lines();
        if raw > 1 && self.ends_with_newline() {
            raw - 1
        } else {
            raw
        }
    }

    fn ends_with_newline(&self) -> bool {
        let len = self.len_chars();
        len > 0 && self.rope.char(len - 1) == '\n'
    }

    /// Inserts a string at the given character index.
    pub fn insert(&mut self, char_idx: usize, text: &str) {
        let idx = char_idx.min(self.len_chars());
        self.rope.insert(idx, &normalize_text(text));
    }

    /// Removes text in the given character range.
    pub fn remove(&mut self, start: usize, end: usize) {
        let start = start.min(self.len_chars());
        let end = end.min(self.len_chars());
        if start < end {
            self.rope.remove(start..end);
        }
    }

    /// Replaces the whole content.
    pub fn replace_all(&mut self, text: &str) {
        self.rope = Rope::from_str(&normalize_text(text));
    }

    /// Converts a character index to a (line, column) position.
    /// Both line and column are 0-indexed.
    pub fn char_to_line_col(&self, char_idx: usize) -> (usize, usize) {
        let char_idx = char_idx.min(self.len_chars());
        let line = self.rope.char_to_line(char_idx);
        let line_start = self.rope.line_to_char(line);
        (line, char_idx - line_start)
    }

    /// Converts a (line, column) position to a character index.
    pub fn line_col_to_char(&self, line: usize, col: usize) -> usize {
        if line >= self.rope.len_lines() {
            return self.len_chars();
        }
        let line_start = self.rope.line_to_char(line);
        line_start + col.min(self.line_len_chars(line))
    }

    /// Returns the length of a line in characters (excluding newline).
    pub fn line_len_chars(&self, line: usize) -> usize {
        if line >= self.rope.len_lines() {
            return 0;
        }
        let slice = self.rope.line(line);
        let len = slice.len_chars();
        if len > 0 && slice.char(len - 1) == '\n' {
            len - 1
        } else {
            len
        }
    }

    /// Returns the line at the given index without its newline.
    pub fn line(&self, line: usize) -> Option<String> {
        if line >= self.logical_line_count() {
            return None;
        }
        let mut s = self.rope.line(line).to_string();
        if s.ends_with('\n') {
            s.pop();
        }
        Some(s)
    }

    /// Returns the entire buffer as a string.
    pub fn text(&self) -> String {
        self.rope.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer() {
        let buf = TextBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.logical_line_count(), 1);
    }

    #[test]
    fn test_trailing_newline_is_not_a_line() {
        assert_eq!(TextBuffer::from_str("a").logical_line_count(), 1);
        assert_eq!(TextBuffer::from_str("a\n").logical_line_count(), 1);
        assert_eq!(TextBuffer::from_str("a\n\n").logical_line_count(), 2);
        assert_eq!(TextBuffer::from_str("a\nb").logical_line_count(), 2);
        assert_eq!(TextBuffer::from_str("\n").logical_line_count(), 1);
    }

    #[test]
    fn test_from_str_normalizes() {
        let buf = TextBuffer::from_str("a\r\nb\u{00A0}c\u{200B}");
        assert_eq!(buf.text(), "a\nb c");
    }

    #[test]
    fn test_insert_and_remove() {
        let mut buf = TextBuffer::new();
        buf.insert(0, "hello");
        buf.insert(5, " world");
        assert_eq!(buf.text(), "hello world");
        buf.remove(5, 11);
        assert_eq!(buf.text(), "hello");
        buf.remove(3, 100);
        assert_eq!(buf.text(), "hel");
    }

    #[test]
    fn test_line_operations() {
        let buf = TextBuffer::from_str("line1\nline2\n");
        assert_eq!(buf.line(0), Some("line1".to_string()));
        assert_eq!(buf.line(1), Some("line2".to_string()));
        assert_eq!(buf.line(2), None);
        assert_eq!(buf.line_len_chars(1), 5);
    }

    #[test]
    fn test_char_to_line_col_round_trip() {
        let buf = TextBuffer::from_str("abc\ndefgh");
        assert_eq!(buf.char_to_line_col(3), (0, 3));
        assert_eq!(buf.char_to_line_col(6), (1, 2));
        assert_eq!(buf.line_col_to_char(1, 2), 6);
        assert_eq!(buf.line_col_to_char(0, 99), 3);
    }
}
