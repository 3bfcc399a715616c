//! Syntax highlighting module.
//!
//! Provides syntax highlighting for snippets using tree-sitter.

mod highlighter;
mod language;

pub use highlighter::{HighlightLine, HighlightSpan, SyntaxHighlighter, TokenStyle};
pub use language::Language;
