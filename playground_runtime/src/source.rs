//! Shared tree-sitter plumbing for source inspection.

use tree_sitter::{Node, Parser, Tree};

/// Parses JavaScript source. Returns `None` if the grammar fails to load.
pub(crate) fn parse_javascript(source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_javascript::LANGUAGE.into()) {
        log::warn!("Failed to load JavaScript grammar: {}", e);
        return None;
    }
    parser.parse(source, None)
}

/// Visits every node in document order.
pub(crate) fn visit_nodes<'t>(tree: &'t Tree, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = tree.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Source text covered by a node.
pub(crate) fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or("")
}

/// 1-based line of a node's first character.
pub(crate) fn node_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}
