//! Runtime values of the snippet interpreter.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::host::{NodeId, Response};

use super::ast::FunctionDef;

#[derive(Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<BTreeMap<String, Value>>>),
    Error(Rc<ErrorValue>),
    Function(Rc<Closure>),
    Builtin(Builtin),
    Node(NodeId),
    Response(Rc<Response>),
    Xhr(Rc<RefCell<XhrState>>),
    /// An already settled promise.
    Promise(Rc<Result<Value, Value>>),
}

pub(crate) struct ErrorValue {
    pub name: String,
    pub message: String,
}

pub(crate) struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Rc<Scope>,
}

/// Global namespace objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Console,
    Document,
    Math,
    Json,
}

#[derive(Default)]
pub(crate) struct XhrState {
    pub method: String,
    pub url: String,
    pub opened: bool,
    pub done: bool,
    pub status: u16,
    pub response_text: String,
    pub handlers: BTreeMap<String, Value>,
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(props: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(props)))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Value::Error(Rc::new(ErrorValue {
            name: name.into(),
            message: message.into(),
        }))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            _ => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_))
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// `String(value)`.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Error(e) => format_error(e),
            Value::Function(f) => format_function(f),
            Value::Builtin(b) => format!("[object {}]", builtin_name(*b)),
            Value::Node(_) => "[object HTMLElement]".to_string(),
            Value::Response(_) => "[object Response]".to_string(),
            Value::Xhr(_) => "[object XMLHttpRequest]".to_string(),
            Value::Promise(_) => "[object Promise]".to_string(),
        }
    }

    /// Rendering used by `console.*`.
    pub fn display(&self) -> String {
        self.display_nested(0)
    }

    fn display_nested(&self, depth: usize) -> String {
        match self {
            Value::Str(s) if depth > 0 => format!("'{}'", s),
            Value::Array(_) | Value::Object(_) if depth > 2 => match self {
                Value::Array(_) => "[Array]".to_string(),
                _ => "[Object]".to_string(),
            },
            Value::Array(items) => {
                let inner: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(|v| v.display_nested(depth + 1))
                    .collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Object(props) => {
                let props = props.borrow();
                if props.is_empty() {
                    return "{}".to_string();
                }
                let inner: Vec<String> = props
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display_nested(depth + 1)))
                    .collect();
                format!("{{ {} }}", inner.join(", "))
            }
            Value::Node(id) => format!("<element #{}>", id.0),
            Value::Promise(settled) => match &**settled {
                Ok(v) => format!("Promise {{ {} }}", v.display_nested(depth + 1)),
                Err(e) => format!("Promise {{ <rejected> {} }}", e.display_nested(depth + 1)),
            },
            other => other.to_js_string(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Response(a), Value::Response(b)) => Rc::ptr_eq(a, b),
            (Value::Xhr(a), Value::Xhr(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                serde_json::Value::Number(serde_json::Number::from(*n as i64))
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.borrow().iter().map(Value::to_json).collect())
            }
            Value::Object(props) => serde_json::Value::Object(
                props
                    .borrow()
                    .iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            _ => serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
            }
        }
    }
}

/// JavaScript `Number.prototype.toString` for the common cases.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        n.to_string()
    }
}

fn format_error(e: &ErrorValue) -> String {
    if e.message.is_empty() {
        e.name.clone()
    } else {
        format!("{}: {}", e.name, e.message)
    }
}

fn format_function(f: &Closure) -> String {
    match &f.def.name {
        Some(name) => format!("[Function: {}]", name),
        None => "[Function (anonymous)]".to_string(),
    }
}

fn builtin_name(b: Builtin) -> &'static str {
    match b {
        Builtin::Console => "console",
        Builtin::Document => "HTMLDocument",
        Builtin::Math => "Math",
        Builtin::Json => "JSON",
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// Why an assignment was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignError {
    Undeclared,
    Constant,
}

/// A lexical scope.
pub(crate) struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Err(AssignError::Constant);
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(AssignError::Undeclared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_coercions() {
        assert_eq!(Value::Str(" 42 ".into()).to_number(), 42.0);
        assert!(Value::Str("x".into()).to_number().is_nan());
        assert_eq!(Value::array(vec![Value::Number(1.0), Value::Null]).to_js_string(), "1,");
        assert!(Value::Number(1.0).loose_equals(&Value::Str("1".into())));
        assert!(!Value::Number(1.0).strict_equals(&Value::Str("1".into())));
        assert!(Value::Null.loose_equals(&Value::Undefined));
    }

    #[test]
    fn test_console_display() {
        let mut props = BTreeMap::new();
        props.insert("a".to_string(), Value::Number(1.0));
        props.insert("b".to_string(), Value::array(vec![Value::Str("x".into())]));
        assert_eq!(Value::object(props).display(), "{ a: 1, b: ['x'] }");
        assert_eq!(Value::Str("plain".into()).display(), "plain");
    }

    #[test]
    fn test_scope_chain() {
        let root = Scope::root();
        root.declare("a", Value::Number(1.0), true);
        root.declare("k", Value::Number(2.0), false);
        let inner = Scope::child(&root);
        assert!(inner.assign("a", Value::Number(5.0)).is_ok());
        assert_eq!(root.lookup("a").map(|v| v.to_number()), Some(5.0));
        assert_eq!(inner.assign("k", Value::Null), Err(AssignError::Constant));
        assert_eq!(inner.assign("zz", Value::Null), Err(AssignError::Undeclared));
    }
}
