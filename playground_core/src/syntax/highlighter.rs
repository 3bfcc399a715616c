//! Syntax highlighter using tree-sitter.
//!
//! Produces per-line styled spans for the highlight overlay. The overlay
//! is rebuilt wholesale on every refresh, so only full parses are needed.

use super::language::Language;
use serde::Serialize;
use tree_sitter::{Node, Parser, Tree, TreeCursor};

/// Token style categories for syntax highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStyle {
    Keyword,
    ControlFlow,
    String,
    Number,
    Boolean,
    Constant,
    Comment,
    Function,
    Type,
    Property,
    Regex,
}

impl TokenStyle {
    /// Class name the render layer attaches to the span.
    pub fn css_class(&self) -> &'static str {
        match self {
            TokenStyle::Keyword => "tok-keyword",
            TokenStyle::ControlFlow => "tok-control",
            TokenStyle::String => "tok-string",
            TokenStyle::Number => "tok-number",
            TokenStyle::Boolean => "tok-boolean",
            TokenStyle::Constant => "tok-constant",
            TokenStyle::Comment => "tok-comment",
            TokenStyle::Function => "tok-function",
            TokenStyle::Type => "tok-type",
            TokenStyle::Property => "tok-property",
            TokenStyle::Regex => "tok-regex",
        }
    }

    /// Styles whose children are never styled separately.
    fn is_opaque(&self) -> bool {
        matches!(self, TokenStyle::String | TokenStyle::Comment | TokenStyle::Regex)
    }
}

/// A styled run of characters within one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HighlightSpan {
    pub start_col: usize,
    pub end_col: usize,
    pub style: TokenStyle,
}

/// Highlight spans of one line, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HighlightLine {
    spans: Vec<HighlightSpan>,
}

impl HighlightLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_span(&mut self, start_col: usize, end_col: usize, style: TokenStyle) {
        self.spans.push(HighlightSpan {
            start_col,
            end_col,
            style,
        });
    }

    /// Returns the style for a given column, or None if no highlight.
    pub fn style_at(&self, col: usize) -> Option<TokenStyle> {
        self.spans
            .iter()
            .find(|s| col >= s.start_col && col < s.end_col)
            .map(|s| s.style)
    }

    pub fn spans(&self) -> &[HighlightSpan] {
        &self.spans
    }
}

/// Syntax highlighter using tree-sitter.
pub struct SyntaxHighlighter {
    parser: Parser,
    tree: Option<Tree>,
    language: Language,
    lines: Vec<HighlightLine>,
}

impl SyntaxHighlighter {
    /// Creates a highlighter for JavaScript.
    pub fn new() -> Self {
        let mut highlighter = Self {
            parser: Parser::new(),
            tree: None,
            language: Language::PlainText,
            lines: Vec::new(),
        };
        highlighter.set_language(Language::JavaScript);
        highlighter
    }

    /// Sets the language and configures the parser.
    pub fn set_language(&mut self, language: Language) {
        if self.language == language {
            return;
        }
        self.language = language;
        self.tree = None;

        if let Some(ts_lang) = language.tree_sitter_language() {
            if let Err(e) = self.parser.set_language(&ts_lang) {
                log::warn!("Failed to load {} grammar: {}", language.name(), e);
                self.language = Language::PlainText;
            }
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Parses the source and rebuilds the per-line highlights.
    pub fn refresh(&mut self, source: &str, line_count: usize) -> &[HighlightLine] {
        self.tree = if self.language.has_highlighting() {
            self.parser.parse(source, None)
        } else {
            None
        };
        self.build_lines(source, line_count);
        &self.lines
    }

    fn build_lines(&mut self, source: &str, line_count: usize) {
        self.lines.clear();
        self.lines.resize_with(line_count, HighlightLine::new);

        let Some(tree) = &self.tree else {
            return;
        };

        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        let mut highlights = Vec::new();
        let mut cursor = tree.walk();
        collect_highlights(&mut cursor, source, &line_starts, line_count, &mut highlights);

        for (row, start_col, end_col, style) in highlights {
            if let Some(line) = self.lines.get_mut(row) {
                line.add_span(start_col, end_col, style);
            }
        }
    }

    /// Highlights of the last refresh.
    pub fn lines(&self) -> &[HighlightLine] {
        &self.lines
    }

    pub fn has_highlighting(&self) -> bool {
        self.language.has_highlighting() && self.tree.is_some()
    }
}

impl Default for SyntaxHighlighter {
    fn default() -> Self {
        Self::new()
    }
}

type RawHighlight = (usize, usize, usize, TokenStyle);

fn collect_highlights(
    cursor: &mut TreeCursor,
    source: &str,
    line_starts: &[usize],
    line_count: usize,
    highlights: &mut Vec<RawHighlight>,
) {
    loop {
        let node = cursor.node();
        let style = node_style(&node);

        if let Some(style) = style {
            add_node_highlights(&node, style, source, line_starts, line_count, highlights);
        }

        let descend = !style.map(|s| s.is_opaque()).unwrap_or(false);
        if descend && cursor.goto_first_child() {
            collect_highlights(cursor, source, line_starts, line_count, highlights);
            cursor.goto_parent();
        }

        if !cursor.goto_next_sibling() {
            break;
        }
    }
}

/// Determines style for JavaScript/TypeScript nodes.
fn node_style(node: &Node) -> Option<TokenStyle> {
    match node.kind() {
        "function" | "const" | "let" | "var" | "class" | "extends" | "import" | "export"
        | "default" | "from" | "as" | "new" | "this" | "super" | "static" | "get" | "set"
        | "async" | "await" | "typeof" | "instanceof" | "void" | "delete" | "in" | "of" => {
            Some(TokenStyle::Keyword)
        }

        "type" | "interface" | "enum" | "namespace" | "declare" | "readonly" | "abstract"
        | "implements" | "private" | "protected" | "public" => Some(TokenStyle::Keyword),

        "if" | "else" | "for" | "while" | "do" | "switch" | "case" | "break" | "continue"
        | "return" | "throw" | "try" | "catch" | "finally" | "yield" => {
            Some(TokenStyle::ControlFlow)
        }

        "string" | "template_string" => Some(TokenStyle::String),
        "regex" => Some(TokenStyle::Regex),
        "number" => Some(TokenStyle::Number),
        "true" | "false" => Some(TokenStyle::Boolean),
        "null" | "undefined" => Some(TokenStyle::Constant),
        "comment" => Some(TokenStyle::Comment),
        "type_identifier" | "predefined_type" => Some(TokenStyle::Type),

        "identifier" | "property_identifier" => {
            let parent = node.parent()?;
            match parent.kind() {
                "function_declaration" | "method_definition" | "function_expression"
                | "class_declaration" => {
                    (parent.child_by_field_name("name") == Some(*node))
                        .then_some(TokenStyle::Function)
                }
                "call_expression" => {
                    (parent.child_by_field_name("function") == Some(*node))
                        .then_some(TokenStyle::Function)
                }
                "member_expression" => {
                    let is_property = parent.child_by_field_name("property") == Some(*node);
                    let is_call = parent
                        .parent()
                        .map(|g| g.kind() == "call_expression")
                        .unwrap_or(false);
                    match (is_property, is_call) {
                        (true, true) => Some(TokenStyle::Function),
                        (true, false) => Some(TokenStyle::Property),
                        _ => None,
                    }
                }
                _ => None,
            }
        }

        _ => None,
    }
}

/// Splits a node into per-line character spans.
fn add_node_highlights(
    node: &Node,
    style: TokenStyle,
    source: &str,
    line_starts: &[usize],
    line_count: usize,
    highlights: &mut Vec<RawHighlight>,
) {
    let start_byte = node.start_byte();
    let end_byte = node.end_byte();
    let start_row = node.start_position().row;
    let end_row = node.end_position().row;

    for row in start_row..=end_row {
        if row >= line_count {
            break;
        }

        let line_start = line_starts.get(row).copied().unwrap_or(0);
        let line_end = line_starts
            .get(row + 1)
            .map(|&s| s.saturating_sub(1))
            .unwrap_or(source.len());

        let span_start = start_byte.max(line_start);
        let span_end = end_byte.min(line_end);

        if span_start < span_end {
            let line_text = &source[line_start..line_end.min(source.len())];
            let start_col = line_text[..(span_start - line_start).min(line_text.len())]
                .chars()
                .count();
            let end_col = line_text[..(span_end - line_start).min(line_text.len())]
                .chars()
                .count();
            highlights.push((row, start_col, end_col, style));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_javascript_highlighting() {
        let mut highlighter = SyntaxHighlighter::new();
        let source = "const x = 42;\nconsole.log(\"hi\");";
        let lines = highlighter.refresh(source, 2);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].style_at(0), Some(TokenStyle::Keyword));
        assert_eq!(lines[0].style_at(10), Some(TokenStyle::Number));
        assert_eq!(lines[1].style_at(8), Some(TokenStyle::Function));
        assert_eq!(lines[1].style_at(13), Some(TokenStyle::String));
        assert!(highlighter.has_highlighting());
    }

    #[test]
    fn test_multiline_comment_spans_lines() {
        let mut highlighter = SyntaxHighlighter::new();
        let lines = highlighter.refresh("/* a\nb */ let y;", 2);
        assert_eq!(lines[0].style_at(0), Some(TokenStyle::Comment));
        assert_eq!(lines[1].style_at(0), Some(TokenStyle::Comment));
        assert_eq!(lines[1].style_at(5), Some(TokenStyle::Keyword));
    }

    #[test]
    fn test_plain_text() {
        let mut highlighter = SyntaxHighlighter::new();
        highlighter.set_language(Language::PlainText);
        let lines = highlighter.refresh("const x = 1;", 1);
        assert!(lines[0].spans().is_empty());
        assert!(!highlighter.has_highlighting());
    }

    #[test]
    fn test_css_class() {
        assert_eq!(TokenStyle::Keyword.css_class(), "tok-keyword");
        assert_eq!(TokenStyle::Comment.css_class(), "tok-comment");
    }
}
