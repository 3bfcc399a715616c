//! Pre-flight check for obviously runaway code.
//!
//! This is a guard against accidents, not a sandbox. It only recognizes a
//! handful of syntactic patterns: a literal `while (true)`, an empty
//! `for (;;)` header, calls to `eval`, and the `Function` constructor.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tree_sitter::Node;

use crate::source::{node_line, node_text, parse_javascript, visit_nodes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RedFlagKind {
    InfiniteWhile,
    InfiniteFor,
    Eval,
    FunctionConstructor,
}

impl RedFlagKind {
    pub fn description(&self) -> &'static str {
        match self {
            Self::InfiniteWhile => "infinite loop `while (true)`",
            Self::InfiniteFor => "infinite loop `for (;;)`",
            Self::Eval => "dynamic evaluation with `eval(...)`",
            Self::FunctionConstructor => "dynamic evaluation with the `Function` constructor",
        }
    }
}

/// One matched pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RedFlag {
    pub kind: RedFlagKind,
    pub line: usize,
}

impl fmt::Display for RedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.kind.description(), self.line)
    }
}

/// Code refused by the safety check.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Potentially unsafe code blocked: {}", describe(.flags))]
pub struct SafetyViolation {
    pub flags: Vec<RedFlag>,
}

fn describe(flags: &[RedFlag]) -> String {
    flags
        .iter()
        .map(|flag| flag.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Scans the source and returns every red flag, in document order.
pub fn scan(source: &str) -> Vec<RedFlag> {
    let Some(tree) = parse_javascript(source) else {
        return Vec::new();
    };
    let mut flags = Vec::new();
    visit_nodes(&tree, |node| {
        if let Some(kind) = classify(node, source) {
            flags.push(RedFlag {
                kind,
                line: node_line(node),
            });
        }
    });
    flags
}

/// Rejects code containing any red flag.
pub fn check_safety(source: &str) -> Result<(), SafetyViolation> {
    let flags = scan(source);
    if flags.is_empty() {
        Ok(())
    } else {
        Err(SafetyViolation { flags })
    }
}

fn classify(node: Node<'_>, source: &str) -> Option<RedFlagKind> {
    match node.kind() {
        "while_statement" | "do_statement" => {
            let condition = node.child_by_field_name("condition")?;
            let text = compact(node_text(condition, source));
            (text.trim_start_matches('(').trim_end_matches(')') == "true")
                .then_some(RedFlagKind::InfiniteWhile)
        }
        "for_statement" => {
            let body = node.child_by_field_name("body")?;
            let header = source.get(node.start_byte()..body.start_byte())?;
            (compact(header) == "for(;;)").then_some(RedFlagKind::InfiniteFor)
        }
        "call_expression" => {
            let callee = node.child_by_field_name("function")?;
            if callee.kind() != "identifier" {
                return None;
            }
            match node_text(callee, source) {
                "eval" => Some(RedFlagKind::Eval),
                "Function" => Some(RedFlagKind::FunctionConstructor),
                _ => None,
            }
        }
        "new_expression" => {
            let constructor = node.child_by_field_name("constructor")?;
            (constructor.kind() == "identifier" && node_text(constructor, source) == "Function")
                .then_some(RedFlagKind::FunctionConstructor)
        }
        _ => None,
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<RedFlagKind> {
        scan(source).into_iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_flags_bare_infinite_loops() {
        assert_eq!(kinds("while(true){}"), vec![RedFlagKind::InfiniteWhile]);
        assert_eq!(kinds("while ( true ) { x++; }"), vec![RedFlagKind::InfiniteWhile]);
        assert_eq!(kinds("for (;;) {}"), vec![RedFlagKind::InfiniteFor]);
        assert_eq!(kinds("do { x++ } while (true);"), vec![RedFlagKind::InfiniteWhile]);
    }

    #[test]
    fn test_flags_dynamic_evaluation() {
        assert_eq!(kinds("eval('1 + 1')"), vec![RedFlagKind::Eval]);
        assert_eq!(
            kinds("const f = new Function('return 1');\nFunction('x')"),
            vec![RedFlagKind::FunctionConstructor, RedFlagKind::FunctionConstructor]
        );
    }

    #[test]
    fn test_ordinary_code_passes() {
        assert!(check_safety("for (let i = 0; i < 3; i++) { console.log(i) }").is_ok());
        assert!(check_safety("while (i < 10) { i++ }").is_ok());
        assert!(check_safety("// while(true) {}\nconst s = 'eval(x)';").is_ok());
        assert!(check_safety("obj.eval(1)").is_ok());
    }

    #[test]
    fn test_violation_message_names_pattern_and_line() {
        let err = check_safety("let a = 1;\nwhile(true){}").unwrap_err();
        assert_eq!(err.flags, vec![RedFlag { kind: RedFlagKind::InfiniteWhile, line: 2 }]);
        let message = err.to_string();
        assert!(message.contains("infinite loop"));
        assert!(message.contains("line 2"));
    }
}
