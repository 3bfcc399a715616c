//! Static code summary shown next to a run.

use serde::Serialize;

use crate::source::{node_text, parse_javascript, visit_nodes};

/// Aggregate counts for a snippet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub functions: usize,
    pub loops: usize,
    pub async_ops: usize,
}

/// Pure function of the source text.
pub trait CodeAnalyzer {
    fn analyze(&self, code: &str) -> AnalysisSummary;
}

/// Counts constructs on the tree-sitter syntax tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxAnalyzer;

const ASYNC_CALLEES: &[&str] = &[
    "setTimeout",
    "setInterval",
    "requestAnimationFrame",
    "fetch",
    "queueMicrotask",
];

impl CodeAnalyzer for SyntaxAnalyzer {
    fn analyze(&self, code: &str) -> AnalysisSummary {
        let mut summary = AnalysisSummary::default();
        let Some(tree) = parse_javascript(code) else {
            return summary;
        };
        visit_nodes(&tree, |node| match node.kind() {
            "function_declaration"
            | "function_expression"
            | "generator_function_declaration"
            | "generator_function"
            | "arrow_function"
            | "method_definition" => summary.functions += 1,
            "for_statement" | "for_in_statement" | "while_statement" | "do_statement" => {
                summary.loops += 1
            }
            "await_expression" => summary.async_ops += 1,
            "call_expression" => {
                let Some(callee) = node.child_by_field_name("function") else {
                    return;
                };
                let is_async = match callee.kind() {
                    "identifier" => ASYNC_CALLEES.contains(&node_text(callee, code)),
                    "member_expression" => callee
                        .child_by_field_name("property")
                        .map(|p| matches!(node_text(p, code), "then" | "catch" | "finally"))
                        .unwrap_or(false),
                    _ => false,
                };
                if is_async {
                    summary.async_ops += 1;
                }
            }
            _ => {}
        });
        summary
    }
}
