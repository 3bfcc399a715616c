//! Owned syntax tree for the interpreter, lowered from tree-sitter.
//!
//! Anything outside the supported subset is rejected here with a
//! `SyntaxError`, before a single statement runs.

use std::rc::Rc;

use tree_sitter::{Node, Tree};

use crate::error::ScriptError;
use crate::source::{node_line, node_text, parse_javascript, visit_nodes};

pub(crate) struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

pub(crate) enum StmtKind {
    Empty,
    Expr(Expr),
    Declare {
        mutable: bool,
        bindings: Vec<(String, Option<Expr>)>,
    },
    Function(Rc<FunctionDef>),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    /// `for (x of items)` or, with `keys`, `for (k in object)`.
    ForEach {
        name: String,
        declared: bool,
        mutable: bool,
        keys: bool,
        iterable: Expr,
        body: Box<Stmt>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    Try {
        block: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Throw(Expr),
    Return(Option<Expr>),
    Break,
    Continue,
}

pub(crate) struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub is_async: bool,
}

pub(crate) enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

pub(crate) enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

pub(crate) enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
    Nullish,
}

pub(crate) enum Expr {
    Literal(Literal),
    Template(Vec<TemplatePart>),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        constructor: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Await(Box<Expr>),
}

/// Parses and lowers a whole snippet.
pub(crate) fn parse_program(source: &str) -> Result<Vec<Stmt>, ScriptError> {
    let tree = parse_javascript(source)
        .ok_or_else(|| ScriptError::syntax("JavaScript grammar is unavailable"))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(first_syntax_error(&tree, source));
    }
    Lowerer { source }.statements(root)
}

fn first_syntax_error(tree: &Tree, source: &str) -> ScriptError {
    let mut found: Option<ScriptError> = None;
    visit_nodes(tree, |node| {
        if found.is_some() {
            return;
        }
        if node.is_missing() {
            let error = ScriptError::syntax(format!("Missing `{}`", node.kind()));
            found = Some(error.at_line(node_line(node)));
        } else if node.is_error() {
            let token = node_text(node, source).lines().next().unwrap_or("").trim();
            let error = ScriptError::syntax(format!("Unexpected token `{}`", token));
            found = Some(error.at_line(node_line(node)));
        }
    });
    found.unwrap_or_else(|| ScriptError::syntax("Unexpected end of input"))
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

fn starts_with_token(node: Node<'_>, token: &str) -> bool {
    node.child(0).map(|c| c.kind() == token).unwrap_or(false)
}

struct Lowerer<'s> {
    source: &'s str,
}

impl<'s> Lowerer<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(node, self.source)
    }

    fn unsupported(&self, node: Node<'_>) -> ScriptError {
        ScriptError::syntax(format!("Unsupported syntax: {}", node.kind().replace('_', " ")))
            .at_line(node_line(node))
    }

    fn field<'t>(&self, node: Node<'t>, name: &str) -> Result<Node<'t>, ScriptError> {
        node.child_by_field_name(name)
            .ok_or_else(|| self.unsupported(node))
    }

    fn first_named<'t>(&self, node: Node<'t>) -> Result<Node<'t>, ScriptError> {
        named_children(node)
            .into_iter()
            .next()
            .ok_or_else(|| self.unsupported(node))
    }

    fn identifier(&self, node: Node<'_>) -> Result<String, ScriptError> {
        if node.kind() == "identifier" {
            Ok(self.text(node).to_string())
        } else {
            Err(self.unsupported(node))
        }
    }

    fn statements(&self, parent: Node<'_>) -> Result<Vec<Stmt>, ScriptError> {
        named_children(parent)
            .into_iter()
            .filter(|n| n.kind() != "hash_bang_line")
            .map(|n| self.statement(n))
            .collect()
    }

    fn statement(&self, node: Node<'_>) -> Result<Stmt, ScriptError> {
        let line = node_line(node);
        let kind = match node.kind() {
            "empty_statement" => StmtKind::Empty,
            "expression_statement" => StmtKind::Expr(self.expression(self.first_named(node)?)?),
            "lexical_declaration" | "variable_declaration" => self.declaration(node)?,
            "function_declaration" => StmtKind::Function(Rc::new(self.function(node)?)),
            "statement_block" => StmtKind::Block(self.statements(node)?),
            "if_statement" => {
                let test = self.expression(self.field(node, "condition")?)?;
                let consequent = Box::new(self.statement(self.field(node, "consequence")?)?);
                let alternate = match node.child_by_field_name("alternative") {
                    Some(clause) if clause.kind() == "else_clause" => {
                        Some(Box::new(self.statement(self.first_named(clause)?)?))
                    }
                    Some(other) => Some(Box::new(self.statement(other)?)),
                    None => None,
                };
                StmtKind::If {
                    test,
                    consequent,
                    alternate,
                }
            }
            "for_statement" => self.for_statement(node, line)?,
            "for_in_statement" => self.for_in_statement(node)?,
            "while_statement" => StmtKind::While {
                test: self.expression(self.field(node, "condition")?)?,
                body: Box::new(self.statement(self.field(node, "body")?)?),
            },
            "do_statement" => StmtKind::DoWhile {
                body: Box::new(self.statement(self.field(node, "body")?)?),
                test: self.expression(self.field(node, "condition")?)?,
            },
            "try_statement" => {
                let block = self.statements(self.field(node, "body")?)?;
                let (param, handler) = match node.child_by_field_name("handler") {
                    Some(clause) => {
                        let param = clause
                            .child_by_field_name("parameter")
                            .map(|p| self.identifier(p))
                            .transpose()?;
                        (param, Some(self.statements(self.field(clause, "body")?)?))
                    }
                    None => (None, None),
                };
                let finalizer = node
                    .child_by_field_name("finalizer")
                    .map(|clause| self.field(clause, "body").and_then(|body| self.statements(body)))
                    .transpose()?;
                StmtKind::Try {
                    block,
                    param,
                    handler,
                    finalizer,
                }
            }
            "throw_statement" => StmtKind::Throw(self.expression(self.first_named(node)?)?),
            "return_statement" => StmtKind::Return(
                named_children(node)
                    .into_iter()
                    .next()
                    .map(|n| self.expression(n))
                    .transpose()?,
            ),
            "break_statement" | "continue_statement" if !named_children(node).is_empty() => {
                return Err(self.unsupported(node));
            }
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            _ => return Err(self.unsupported(node)),
        };
        Ok(Stmt { kind, line })
    }

    fn declaration(&self, node: Node<'_>) -> Result<StmtKind, ScriptError> {
        let mutable = !starts_with_token(node, "const");
        let mut bindings = Vec::new();
        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                return Err(self.unsupported(declarator));
            }
            let name = self.identifier(self.field(declarator, "name")?)?;
            let init = declarator
                .child_by_field_name("value")
                .map(|v| self.expression(v))
                .transpose()?;
            bindings.push((name, init));
        }
        Ok(StmtKind::Declare { mutable, bindings })
    }

    fn for_statement(&self, node: Node<'_>, line: usize) -> Result<StmtKind, ScriptError> {
        let init = match node.child_by_field_name("initializer") {
            Some(n) if n.is_named() => match n.kind() {
                "empty_statement" => None,
                "lexical_declaration" | "variable_declaration" | "expression_statement" => {
                    Some(Box::new(self.statement(n)?))
                }
                _ => Some(Box::new(Stmt {
                    kind: StmtKind::Expr(self.expression(n)?),
                    line,
                })),
            },
            _ => None,
        };
        let test = match node.child_by_field_name("condition") {
            Some(n) if n.is_named() => match n.kind() {
                "empty_statement" => None,
                "expression_statement" => Some(self.expression(self.first_named(n)?)?),
                _ => Some(self.expression(n)?),
            },
            _ => None,
        };
        let update = node
            .child_by_field_name("increment")
            .filter(|n| n.is_named())
            .map(|n| self.expression(n))
            .transpose()?;
        Ok(StmtKind::For {
            init,
            test,
            update,
            body: Box::new(self.statement(self.field(node, "body")?)?),
        })
    }

    fn for_in_statement(&self, node: Node<'_>) -> Result<StmtKind, ScriptError> {
        if node.child(1).map(|c| c.kind() == "await").unwrap_or(false) {
            return Err(self.unsupported(node));
        }
        let kind = node.child_by_field_name("kind");
        let keys = node
            .child_by_field_name("operator")
            .map(|op| self.text(op) == "in")
            .unwrap_or(true);
        Ok(StmtKind::ForEach {
            name: self.identifier(self.field(node, "left")?)?,
            declared: kind.is_some(),
            mutable: kind.map(|k| self.text(k) != "const").unwrap_or(true),
            keys,
            iterable: self.expression(self.field(node, "right")?)?,
            body: Box::new(self.statement(self.field(node, "body")?)?),
        })
    }

    fn function(&self, node: Node<'_>) -> Result<FunctionDef, ScriptError> {
        let name = node.child_by_field_name("name").map(|n| self.text(n).to_string());
        let params = match (
            node.child_by_field_name("parameters"),
            node.child_by_field_name("parameter"),
        ) {
            (Some(list), _) => named_children(list)
                .into_iter()
                .map(|p| self.identifier(p))
                .collect::<Result<Vec<_>, _>>()?,
            (None, Some(single)) => vec![self.identifier(single)?],
            (None, None) => Vec::new(),
        };
        let body = self.field(node, "body")?;
        let body = if body.kind() == "statement_block" {
            FunctionBody::Block(self.statements(body)?)
        } else {
            FunctionBody::Expr(Box::new(self.expression(body)?))
        };
        Ok(FunctionDef {
            name,
            params,
            body,
            is_async: starts_with_token(node, "async"),
        })
    }

    fn expression(&self, node: Node<'_>) -> Result<Expr, ScriptError> {
        let expr = match node.kind() {
            "parenthesized_expression" => return self.expression(self.first_named(node)?),
            "number" => Expr::Literal(Literal::Number(self.number(node)?)),
            "string" => Expr::Literal(Literal::Str(self.string(node)?)),
            "template_string" => Expr::Template(self.template(node)?),
            "true" => Expr::Literal(Literal::Bool(true)),
            "false" => Expr::Literal(Literal::Bool(false)),
            "null" => Expr::Literal(Literal::Null),
            "undefined" => Expr::Literal(Literal::Undefined),
            "identifier" => Expr::Ident(self.text(node).to_string()),
            "array" => Expr::Array(
                named_children(node)
                    .into_iter()
                    .map(|n| self.expression(n))
                    .collect::<Result<_, _>>()?,
            ),
            "object" => Expr::Object(self.object(node)?),
            "function_expression" | "function" | "arrow_function" => {
                Expr::Function(Rc::new(self.function(node)?))
            }
            "member_expression" => {
                let property = self.field(node, "property")?;
                if property.kind() != "property_identifier" {
                    return Err(self.unsupported(property));
                }
                Expr::Member {
                    object: Box::new(self.expression(self.field(node, "object")?)?),
                    property: self.text(property).to_string(),
                }
            }
            "subscript_expression" => Expr::Index {
                object: Box::new(self.expression(self.field(node, "object")?)?),
                index: Box::new(self.expression(self.field(node, "index")?)?),
            },
            "call_expression" => {
                let arguments = self.field(node, "arguments")?;
                if arguments.kind() != "arguments" {
                    return Err(self.unsupported(node));
                }
                Expr::Call {
                    callee: Box::new(self.expression(self.field(node, "function")?)?),
                    args: self.arguments(arguments)?,
                }
            }
            "new_expression" => {
                let constructor = self.identifier(self.field(node, "constructor")?)?;
                let args = match node.child_by_field_name("arguments") {
                    Some(list) => self.arguments(list)?,
                    None => Vec::new(),
                };
                Expr::New { constructor, args }
            }
            "await_expression" => Expr::Await(Box::new(self.expression(self.first_named(node)?)?)),
            "unary_expression" => {
                let op = match self.text(self.field(node, "operator")?) {
                    "!" => UnaryOp::Not,
                    "-" => UnaryOp::Neg,
                    "+" => UnaryOp::Plus,
                    "typeof" => UnaryOp::TypeOf,
                    "void" => UnaryOp::Void,
                    _ => return Err(self.unsupported(node)),
                };
                Expr::Unary {
                    op,
                    arg: Box::new(self.expression(self.field(node, "argument")?)?),
                }
            }
            "binary_expression" => {
                let op = binary_op(self.text(self.field(node, "operator")?))
                    .ok_or_else(|| self.unsupported(node))?;
                Expr::Binary {
                    op,
                    left: Box::new(self.expression(self.field(node, "left")?)?),
                    right: Box::new(self.expression(self.field(node, "right")?)?),
                }
            }
            "update_expression" => {
                let operator = self.text(self.field(node, "operator")?);
                Expr::Update {
                    increment: operator == "++",
                    prefix: matches!(node.child(0).map(|c| c.kind()), Some("++") | Some("--")),
                    target: Box::new(self.target(self.field(node, "argument")?)?),
                }
            }
            "assignment_expression" => Expr::Assign {
                op: None,
                target: Box::new(self.target(self.field(node, "left")?)?),
                value: Box::new(self.expression(self.field(node, "right")?)?),
            },
            "augmented_assignment_expression" => {
                let operator = self.text(self.field(node, "operator")?);
                let op = operator
                    .strip_suffix('=')
                    .and_then(binary_op)
                    .ok_or_else(|| self.unsupported(node))?;
                Expr::Assign {
                    op: Some(op),
                    target: Box::new(self.target(self.field(node, "left")?)?),
                    value: Box::new(self.expression(self.field(node, "right")?)?),
                }
            }
            "ternary_expression" => Expr::Conditional {
                test: Box::new(self.expression(self.field(node, "condition")?)?),
                consequent: Box::new(self.expression(self.field(node, "consequence")?)?),
                alternate: Box::new(self.expression(self.field(node, "alternative")?)?),
            },
            _ => return Err(self.unsupported(node)),
        };
        Ok(expr)
    }

    fn target(&self, node: Node<'_>) -> Result<Expr, ScriptError> {
        match node.kind() {
            "identifier" | "member_expression" | "subscript_expression" => self.expression(node),
            "parenthesized_expression" => self.target(self.first_named(node)?),
            _ => Err(self.unsupported(node)),
        }
    }

    fn arguments(&self, list: Node<'_>) -> Result<Vec<Expr>, ScriptError> {
        named_children(list)
            .into_iter()
            .map(|n| self.expression(n))
            .collect()
    }

    fn object(&self, node: Node<'_>) -> Result<Vec<(String, Expr)>, ScriptError> {
        let mut props = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "pair" => {
                    let key = self.field(child, "key")?;
                    let name = match key.kind() {
                        "property_identifier" => self.text(key).to_string(),
                        "string" => self.string(key)?,
                        "number" => crate::eval::value::format_number(self.number(key)?),
                        _ => return Err(self.unsupported(key)),
                    };
                    props.push((name, self.expression(self.field(child, "value")?)?));
                }
                "shorthand_property_identifier" => {
                    let name = self.text(child).to_string();
                    props.push((name.clone(), Expr::Ident(name)));
                }
                "method_definition" => {
                    let name = self.text(self.field(child, "name")?).to_string();
                    props.push((name, Expr::Function(Rc::new(self.function(child)?))));
                }
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(props)
    }

    fn number(&self, node: Node<'_>) -> Result<f64, ScriptError> {
        let text = self.text(node).replace('_', "");
        let parse_radix = |radix: u32| {
            text.get(2..)
                .and_then(|digits| u64::from_str_radix(digits, radix).ok())
                .map(|v| v as f64)
        };
        let lower = text.to_ascii_lowercase();
        let value = if lower.starts_with("0x") {
            parse_radix(16)
        } else if lower.starts_with("0b") {
            parse_radix(2)
        } else if lower.starts_with("0o") {
            parse_radix(8)
        } else {
            text.parse::<f64>().ok()
        };
        value.ok_or_else(|| self.unsupported(node))
    }

    fn string(&self, node: Node<'_>) -> Result<String, ScriptError> {
        let mut out = String::new();
        for child in named_children(node) {
            match child.kind() {
                "string_fragment" => out.push_str(self.text(child)),
                "escape_sequence" => out.push_str(&unescape(self.text(child))),
                _ => return Err(self.unsupported(child)),
            }
        }
        Ok(out)
    }

    fn template(&self, node: Node<'_>) -> Result<Vec<TemplatePart>, ScriptError> {
        let mut parts = Vec::new();
        let end = node.end_byte().saturating_sub(1);
        let mut pos = node.start_byte() + 1;
        let raw = |from: usize, to: usize| self.source.get(from..to).unwrap_or("").to_string();
        for child in named_children(node) {
            if child.start_byte() > pos {
                parts.push(TemplatePart::Text(raw(pos, child.start_byte())));
            }
            match child.kind() {
                "template_substitution" => {
                    parts.push(TemplatePart::Expr(self.expression(self.first_named(child)?)?));
                }
                "escape_sequence" => parts.push(TemplatePart::Text(unescape(self.text(child)))),
                "string_fragment" => parts.push(TemplatePart::Text(self.text(child).to_string())),
                _ => return Err(self.unsupported(child)),
            }
            pos = child.end_byte();
        }
        if end > pos {
            parts.push(TemplatePart::Text(raw(pos, end)));
        }
        Ok(parts)
    }
}

fn binary_op(operator: &str) -> Option<BinaryOp> {
    let op = match operator {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "**" => BinaryOp::Pow,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::NotEq,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNotEq,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "<=" => BinaryOp::LtEq,
        ">=" => BinaryOp::GtEq,
        "&&" => BinaryOp::And,
        "||" => BinaryOp::Or,
        "??" => BinaryOp::Nullish,
        _ => return None,
    };
    Some(op)
}

/// Decodes one escape sequence, backslash included.
fn unescape(sequence: &str) -> String {
    let body = sequence.strip_prefix('\\').unwrap_or(sequence);
    let mut chars = body.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let rest = chars.as_str();
    let decoded = match first {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        'b' => '\u{8}',
        'f' => '\u{c}',
        'v' => '\u{b}',
        '0' if rest.is_empty() => '\0',
        '\n' | '\r' | '\u{2028}' | '\u{2029}' => return String::new(),
        'x' | 'u' => {
            let hex = rest.trim_start_matches('{').trim_end_matches('}');
            return u32::from_str_radix(hex, 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| sequence.to_string());
        }
        other => other,
    };
    decoded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("\\n"), "\n");
        assert_eq!(unescape("\\'"), "'");
        assert_eq!(unescape("\\u0041"), "A");
        assert_eq!(unescape("\\u{1F600}"), "\u{1F600}");
        assert_eq!(unescape("\\x41"), "A");
    }

    #[test]
    fn test_lowers_supported_subset() {
        let program = parse_program(
            "const a = [1, 2];\nlet s = `n=${a.length}`;\n\
             for (let i = 0; i < 3; i++) { if (i % 2) continue; }\n",
        )
        .unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(program[0].kind, StmtKind::Declare { mutable: false, .. }));
        assert!(matches!(program[1].kind, StmtKind::Declare { mutable: true, .. }));
        assert!(matches!(program[2].kind, StmtKind::For { .. }));
        assert_eq!(program[2].line, 3);
    }

    #[test]
    fn test_rejects_unsupported_syntax() {
        let err = parse_program("let x = 1;\nclass A {}").err().unwrap();
        assert_eq!(err.name, "SyntaxError");
        assert_eq!(err.line, Some(2));
        assert!(err.message.contains("class declaration"));
    }

    #[test]
    fn test_reports_parse_errors() {
        let err = parse_program("let = ;").err().unwrap();
        assert_eq!(err.name, "SyntaxError");
        assert_eq!(err.line, Some(1));
    }
}
