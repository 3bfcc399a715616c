//! Snippet languages and their tree-sitter grammars.

use std::path::Path;

/// Languages the playground can highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    JavaScript,
    TypeScript,
    PlainText,
}

impl Language {
    /// Detects language from a file path based on extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::PlainText)
    }

    /// Detects language from a file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            _ => Self::PlainText,
        }
    }

    /// Returns the display name of the language.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
            Self::PlainText => "Plain Text",
        }
    }

    /// Returns whether this language supports syntax highlighting.
    pub fn has_highlighting(&self) -> bool {
        !matches!(self, Self::PlainText)
    }

    /// Returns the tree-sitter language, if available.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Self::PlainText => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_extension() {
        assert_eq!(Language::from_extension("js"), Language::JavaScript);
        assert_eq!(Language::from_extension("MJS"), Language::JavaScript);
        assert_eq!(Language::from_extension("ts"), Language::TypeScript);
        assert_eq!(Language::from_extension("txt"), Language::PlainText);
    }

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path(Path::new("snippet.js")), Language::JavaScript);
        assert_eq!(Language::from_path(Path::new("README")), Language::PlainText);
    }

    #[test]
    fn test_tree_sitter_language() {
        assert!(Language::JavaScript.tree_sitter_language().is_some());
        assert!(Language::TypeScript.tree_sitter_language().is_some());
        assert!(Language::PlainText.tree_sitter_language().is_none());
    }
}
