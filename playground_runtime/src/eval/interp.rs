//! Async tree-walking interpreter over the lowered syntax tree.
//!
//! Every host interaction goes through the [`HostContext`] slots, so an
//! instrumented host observes exactly what the snippet does. Loops yield to
//! the scheduler every `yield_every` iterations and each `await` is a real
//! suspension point; a dropped evaluation stops at the next one.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::ScriptError;
use crate::host::{
    DomError, DomHost, HostContext, LocalBoxFuture, LogLevel, NodeId, Request, Response, TimerId,
};

use super::ast::{BinaryOp, Expr, FunctionBody, Literal, Stmt, StmtKind, TemplatePart, UnaryOp};
use super::value::{format_number, AssignError, Builtin, Closure, Scope, Value, XhrState};
use super::EvalLimits;

const MAX_CALL_DEPTH: usize = 64;

/// Upper bound on characters produced by `String.prototype.repeat` and
/// on array growth through index assignment.
const MAX_GROWTH: usize = 10_000_000;

/// A thrown JavaScript value.
pub(crate) struct Thrown {
    value: Value,
    line: Option<usize>,
}

impl Thrown {
    fn new(value: Value) -> Self {
        Self { value, line: None }
    }

    fn error(name: &str, message: impl Into<String>) -> Self {
        Self::new(Value::error(name, message))
    }

    fn type_error(message: impl Into<String>) -> Self {
        Self::error("TypeError", message)
    }

    fn reference(name: &str) -> Self {
        Self::error("ReferenceError", format!("{} is not defined", name))
    }

    fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    fn into_script_error(self) -> ScriptError {
        let error = match &self.value {
            Value::Error(e) => ScriptError::new(e.name.clone(), e.message.clone()),
            other => ScriptError::new("Error", other.display()),
        };
        match self.line {
            Some(line) => error.at_line(line),
            None => error,
        }
    }
}

type Flow<T> = Result<T, Thrown>;

enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

fn not_a_function(owner: &str, method: &str) -> Thrown {
    Thrown::type_error(format!("{}.{} is not a function", owner, method))
}

fn dom_error(e: DomError) -> Thrown {
    let name = match e {
        DomError::UnknownNode(_) | DomError::NotAChild { .. } => "NotFoundError",
        DomError::HierarchyRequest(_) => "HierarchyRequestError",
    };
    Thrown::error(name, e.to_string())
}

fn arg_string(args: &[Value], index: usize) -> String {
    args.get(index).map(Value::to_js_string).unwrap_or_default()
}

fn arg_number(args: &[Value], index: usize) -> f64 {
    args.get(index).map(Value::to_number).unwrap_or(f64::NAN)
}

fn expect_node(args: &[Value], index: usize, method: &str) -> Flow<NodeId> {
    match args.get(index) {
        Some(Value::Node(id)) => Ok(*id),
        _ => Err(Thrown::type_error(format!(
            "Failed to execute '{}': parameter {} is not of type 'Node'",
            method,
            index + 1
        ))),
    }
}

fn request_method(options: Option<&Value>) -> String {
    match options {
        Some(Value::Object(props)) => props
            .borrow()
            .get("method")
            .map(|m| m.to_js_string().to_ascii_uppercase())
            .unwrap_or_else(|| "GET".to_string()),
        _ => "GET".to_string(),
    }
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Undefined => Value::Undefined,
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_)
    )
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let numeric = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
    match op {
        BinaryOp::Add => {
            if left.is_string()
                || right.is_string()
                || !is_primitive(left)
                || !is_primitive(right)
            {
                Value::Str(left.to_js_string() + &right.to_js_string())
            } else {
                numeric(|a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(|a, b| a - b),
        BinaryOp::Mul => numeric(|a, b| a * b),
        BinaryOp::Div => numeric(|a, b| a / b),
        BinaryOp::Rem => numeric(|a, b| a % b),
        BinaryOp::Pow => numeric(f64::powf),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let result = match ordering {
                Some(ord) => match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Gt => ord.is_gt(),
                    BinaryOp::LtEq => ord.is_le(),
                    _ => ord.is_ge(),
                },
                None => false,
            };
            Value::Bool(result)
        }
        BinaryOp::And => (if left.truthy() { right } else { left }).clone(),
        BinaryOp::Or => (if left.truthy() { left } else { right }).clone(),
        BinaryOp::Nullish => (if left.is_nullish() { right } else { left }).clone(),
    }
}

fn math_call(method: &str, args: &[Value], seed: &mut u64) -> Flow<Value> {
    let x = arg_number(args, 0);
    let result = match method {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => (x + 0.5).floor(),
        "trunc" => x.trunc(),
        "abs" => x.abs(),
        "sign" => {
            if x == 0.0 || x.is_nan() {
                x
            } else {
                x.signum()
            }
        }
        "sqrt" => x.sqrt(),
        "pow" => x.powf(arg_number(args, 1)),
        "max" => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, f64::max),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, f64::min),
        "random" => {
            // xorshift64*
            *seed ^= *seed >> 12;
            *seed ^= *seed << 25;
            *seed ^= *seed >> 27;
            (seed.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64 / (1u64 << 53) as f64
        }
        _ => return Err(not_a_function("Math", method)),
    };
    Ok(Value::Number(result))
}

fn json_call(method: &str, args: &[Value]) -> Flow<Value> {
    match method {
        "stringify" => {
            let Some(value) = args
                .first()
                .filter(|v| !matches!(v, Value::Undefined | Value::Function(_)))
            else {
                return Ok(Value::Undefined);
            };
            let json = value.to_json();
            let pretty = args.get(2).map(|v| v.to_number() > 0.0).unwrap_or(false);
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map(Value::Str).map_err(|e| Thrown::type_error(e.to_string()))
        }
        "parse" => serde_json::from_str::<serde_json::Value>(&arg_string(args, 0))
            .map(|json| Value::from_json(&json))
            .map_err(|e| Thrown::error("SyntaxError", e.to_string())),
        _ => Err(not_a_function("JSON", method)),
    }
}

fn response_call(response: &Response, method: &str) -> Flow<Value> {
    let settled = match method {
        "text" => Ok(Value::Str(response.body.clone())),
        "json" => serde_json::from_str::<serde_json::Value>(&response.body)
            .map(|json| Value::from_json(&json))
            .map_err(|e| Value::error("SyntaxError", e.to_string())),
        _ => return Err(not_a_function("Response", method)),
    };
    Ok(Value::Promise(Rc::new(settled)))
}

fn char_index(len: usize, position: f64) -> usize {
    if position.is_nan() {
        0
    } else if position < 0.0 {
        len.saturating_sub((-position) as usize)
    } else {
        (position as usize).min(len)
    }
}

fn string_call(s: &str, method: &str, args: &[Value]) -> Flow<Value> {
    let value = match method {
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::Str(s.trim().to_string()),
        "includes" => Value::Bool(s.contains(arg_string(args, 0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(arg_string(args, 0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(arg_string(args, 0).as_str())),
        "charAt" => {
            let index = arg_number(args, 0);
            let index = if index.is_nan() { 0 } else { index as usize };
            Value::Str(s.chars().nth(index).map(String::from).unwrap_or_default())
        }
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = char_index(chars.len(), args.first().map(Value::to_number).unwrap_or(0.0));
            let end = match args.get(1) {
                Some(v) if !matches!(v, Value::Undefined) => char_index(chars.len(), v.to_number()),
                _ => chars.len(),
            };
            Value::Str(
                chars
                    .get(start..end.max(start))
                    .map(|c| c.iter().collect())
                    .unwrap_or_default(),
            )
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::Str(s.to_string())],
                Some(sep) => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect()
                    }
                }
            };
            Value::array(parts)
        }
        "repeat" => {
            let count = arg_number(args, 0);
            if count < 0.0
                || count.is_infinite()
                || (count as usize).saturating_mul(s.len()) > MAX_GROWTH
            {
                let message = format!("Invalid count value: {}", format_number(count));
                return Err(Thrown::error("RangeError", message));
            }
            Value::Str(s.repeat(if count.is_nan() { 0 } else { count as usize }))
        }
        _ => return Err(not_a_function("string", method)),
    };
    Ok(value)
}

pub(crate) struct Interpreter<'h> {
    host: &'h HostContext,
    limits: EvalLimits,
    globals: Rc<Scope>,
    scope: Rc<Scope>,
    iterations: u64,
    depth: usize,
    seed: u64,
}

impl<'h> Interpreter<'h> {
    pub(crate) fn new(host: &'h HostContext, limits: EvalLimits) -> Self {
        let globals = Scope::root();
        Self {
            host,
            limits,
            scope: globals.clone(),
            globals,
            iterations: 0,
            depth: 0,
            seed: 0x9E37_79B9_7F4A_7C15,
        }
    }

    /// Runs a program to completion.
    pub(crate) async fn run(&mut self, program: &[Stmt]) -> Result<(), ScriptError> {
        self.hoist(program);
        for stmt in program {
            match self.exec(stmt).await {
                Ok(Completion::Normal) => {}
                Ok(_) => break,
                Err(thrown) => return Err(thrown.into_script_error()),
            }
        }
        Ok(())
    }

    fn exec<'a>(&'a mut self, stmt: &'a Stmt) -> LocalBoxFuture<'a, Flow<Completion>> {
        Box::pin(async move {
            let line = stmt.line;
            self.exec_inner(stmt).await.map_err(|thrown| thrown.at_line(line))
        })
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> LocalBoxFuture<'a, Flow<Value>> {
        Box::pin(self.eval_inner(expr))
    }

    async fn exec_inner(&mut self, stmt: &Stmt) -> Flow<Completion> {
        match &stmt.kind {
            StmtKind::Empty | StmtKind::Function(_) => Ok(Completion::Normal),
            StmtKind::Expr(expr) => {
                self.eval(expr).await?;
                Ok(Completion::Normal)
            }
            StmtKind::Declare { mutable, bindings } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::Undefined,
                    };
                    self.scope.declare(name, value, *mutable);
                }
                Ok(Completion::Normal)
            }
            StmtKind::Block(body) => self.exec_block(body).await,
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test).await?.truthy() {
                    self.exec(consequent).await
                } else if let Some(alternate) = alternate {
                    self.exec(alternate).await
                } else {
                    Ok(Completion::Normal)
                }
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let saved = self.enter_scope();
                let result = self
                    .run_for(init.as_deref(), test.as_ref(), update.as_ref(), body)
                    .await;
                self.scope = saved;
                result
            }
            StmtKind::ForEach {
                name,
                declared,
                mutable,
                keys,
                iterable,
                body,
            } => {
                let collection = self.eval(iterable).await?;
                let items = iteration_items(&collection, *keys)?;
                let saved = self.scope.clone();
                let result = self.run_for_each(name, *declared, *mutable, items, body).await;
                self.scope = saved;
                result
            }
            StmtKind::While { test, body } => {
                while self.eval(test).await?.truthy() {
                    self.tick().await?;
                    match self.exec(body).await? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::DoWhile { body, test } => {
                loop {
                    self.tick().await?;
                    match self.exec(body).await? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test).await?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let outcome = match (self.exec_block(block).await, handler) {
                    (Err(thrown), Some(handler)) => {
                        let saved = self.enter_scope();
                        if let Some(param) = param {
                            self.scope.declare(param, thrown.value, true);
                        }
                        let result = self.exec_sequence(handler).await;
                        self.scope = saved;
                        result
                    }
                    (outcome, _) => outcome,
                };
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer).await? {
                        Completion::Normal => {}
                        other => return Ok(other),
                    }
                }
                outcome
            }
            StmtKind::Throw(expr) => {
                let value = self.eval(expr).await?;
                Err(Thrown::new(value))
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr).await?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            StmtKind::Break => Ok(Completion::Break),
            StmtKind::Continue => Ok(Completion::Continue),
        }
    }

    async fn run_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Flow<Completion> {
        if let Some(init) = init {
            self.exec(init).await?;
        }
        loop {
            if let Some(test) = test {
                if !self.eval(test).await?.truthy() {
                    break;
                }
            }
            self.tick().await?;
            match self.exec(body).await? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update).await?;
            }
        }
        Ok(Completion::Normal)
    }

    async fn run_for_each(
        &mut self,
        name: &str,
        declared: bool,
        mutable: bool,
        items: Vec<Value>,
        body: &Stmt,
    ) -> Flow<Completion> {
        let outer = self.scope.clone();
        for item in items {
            self.tick().await?;
            self.scope = Scope::child(&outer);
            if declared {
                self.scope.declare(name, item, mutable);
            } else {
                self.assign_name(name, item)?;
            }
            match self.exec(body).await? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    async fn exec_block(&mut self, body: &[Stmt]) -> Flow<Completion> {
        let saved = self.enter_scope();
        let result = self.exec_sequence(body).await;
        self.scope = saved;
        result
    }

    async fn exec_sequence(&mut self, body: &[Stmt]) -> Flow<Completion> {
        self.hoist(body);
        for stmt in body {
            match self.exec(stmt).await? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    /// Binds function declarations before the block runs.
    fn hoist(&mut self, body: &[Stmt]) {
        for stmt in body {
            if let StmtKind::Function(def) = &stmt.kind {
                if let Some(name) = &def.name {
                    let closure = Closure {
                        def: def.clone(),
                        env: self.scope.clone(),
                    };
                    self.scope.declare(name, Value::Function(Rc::new(closure)), true);
                }
            }
        }
    }

    /// Replaces the current scope with a child and returns the old one.
    fn enter_scope(&mut self) -> Rc<Scope> {
        let child = Scope::child(&self.scope);
        std::mem::replace(&mut self.scope, child)
    }

    /// Accounts for one loop iteration.
    async fn tick(&mut self) -> Flow<()> {
        self.iterations += 1;
        if self.iterations > self.limits.max_loop_iterations {
            return Err(Thrown::error(
                "RangeError",
                format!("Loop iteration limit of {} exceeded", self.limits.max_loop_iterations),
            ));
        }
        let every = u64::from(self.limits.yield_every.max(1));
        if self.iterations % every == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn eval_inner(&mut self, expr: &Expr) -> Flow<Value> {
        match expr {
            Expr::Literal(lit) => Ok(literal(lit)),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            out.push_str(&self.eval(expr).await?.to_js_string())
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Ident(name) => self.lookup(name),
            Expr::Array(items) => {
                let values = self.eval_args(items).await?;
                Ok(Value::array(values))
            }
            Expr::Object(props) => {
                let mut map = BTreeMap::new();
                for (key, expr) in props {
                    let value = self.eval(expr).await?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure {
                def: def.clone(),
                env: self.scope.clone(),
            }))),
            Expr::Member { object, property } => {
                let target = self.eval(object).await?;
                self.get_property(&target, property)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object).await?;
                let key = self.eval(index).await?;
                self.get_index(&target, &key)
            }
            Expr::Call { callee, args } => self.call(callee, args).await,
            Expr::New { constructor, args } => {
                let args = self.eval_args(args).await?;
                self.construct(constructor, args)
            }
            Expr::Unary { op, arg } => {
                if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, arg.as_ref()) {
                    if self.lookup(name).is_err() {
                        return Ok(Value::Str("undefined".to_string()));
                    }
                }
                let value = self.eval(arg).await?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::Str(value.type_of().to_string()),
                    UnaryOp::Void => Value::Undefined,
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left).await?;
                let short_circuit = match op {
                    BinaryOp::And => !left.truthy(),
                    BinaryOp::Or => left.truthy(),
                    BinaryOp::Nullish => !left.is_nullish(),
                    _ => false,
                };
                if short_circuit {
                    return Ok(left);
                }
                let right = self.eval(right).await?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval(target).await?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign_to(target, Value::Number(new)).await?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Assign { op, target, value } => {
                let value = match op {
                    None => self.eval(value).await?,
                    Some(op @ (BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish)) => {
                        let current = self.eval(target).await?;
                        let keep = match op {
                            BinaryOp::And => !current.truthy(),
                            BinaryOp::Or => current.truthy(),
                            _ => !current.is_nullish(),
                        };
                        if keep {
                            return Ok(current);
                        }
                        self.eval(value).await?
                    }
                    Some(op) => {
                        let current = self.eval(target).await?;
                        let rhs = self.eval(value).await?;
                        binary(*op, &current, &rhs)
                    }
                };
                self.assign_to(target, value.clone()).await?;
                Ok(value)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test).await?.truthy() {
                    self.eval(consequent).await
                } else {
                    self.eval(alternate).await
                }
            }
            Expr::Await(inner) => {
                let value = self.eval(inner).await?;
                self.await_value(value).await
            }
        }
    }

    async fn eval_args(&mut self, args: &[Expr]) -> Flow<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg).await?);
        }
        Ok(values)
    }

    async fn await_value(&mut self, value: Value) -> Flow<Value> {
        self.queue_microtask();
        tokio::task::yield_now().await;
        match value {
            Value::Promise(settled) => match &*settled {
                Ok(value) => Ok(value.clone()),
                Err(reason) => Err(Thrown::new(reason.clone())),
            },
            other => Ok(other),
        }
    }

    fn queue_microtask(&self) {
        if let Some(timers) = self.host.timers() {
            timers.queue_microtask();
        }
    }

    fn lookup(&self, name: &str) -> Flow<Value> {
        if let Some(value) = self.scope.lookup(name) {
            return Ok(value);
        }
        let value = match name {
            "undefined" => Value::Undefined,
            "NaN" => Value::Number(f64::NAN),
            "Infinity" => Value::Number(f64::INFINITY),
            "console" => Value::Builtin(Builtin::Console),
            "Math" => Value::Builtin(Builtin::Math),
            "JSON" => Value::Builtin(Builtin::Json),
            "document" if self.host.dom().is_some() => Value::Builtin(Builtin::Document),
            _ => return Err(Thrown::reference(name)),
        };
        Ok(value)
    }

    fn assign_name(&mut self, name: &str, value: Value) -> Flow<()> {
        match self.scope.assign(name, value.clone()) {
            Ok(()) => Ok(()),
            Err(AssignError::Constant) => {
                Err(Thrown::type_error("Assignment to constant variable."))
            }
            Err(AssignError::Undeclared) => {
                self.globals.declare(name, value, true);
                Ok(())
            }
        }
    }

    async fn assign_to(&mut self, target: &Expr, value: Value) -> Flow<()> {
        match target {
            Expr::Ident(name) => self.assign_name(name, value),
            Expr::Member { object, property } => {
                let object = self.eval(object).await?;
                self.set_property(&object, property, value)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object).await?;
                let key = self.eval(index).await?;
                self.set_index(&object, &key, value)
            }
            _ => Err(Thrown::error("SyntaxError", "Invalid assignment target")),
        }
    }

    fn dom(&self) -> Flow<Rc<dyn DomHost>> {
        self.host.dom().ok_or_else(|| Thrown::reference("document"))
    }

    fn get_property(&self, target: &Value, prop: &str) -> Flow<Value> {
        let value = match target {
            Value::Undefined | Value::Null => {
                return Err(Thrown::type_error(format!(
                    "Cannot read properties of {} (reading '{}')",
                    target.to_js_string(),
                    prop
                )));
            }
            Value::Str(s) if prop == "length" => Value::Number(s.chars().count() as f64),
            Value::Array(items) if prop == "length" => Value::Number(items.borrow().len() as f64),
            Value::Object(props) => props.borrow().get(prop).cloned().unwrap_or(Value::Undefined),
            Value::Error(e) => match prop {
                "name" => Value::Str(e.name.clone()),
                "message" => Value::Str(e.message.clone()),
                "stack" => Value::Str(target.to_js_string()),
                _ => Value::Undefined,
            },
            Value::Response(response) => match prop {
                "status" => Value::Number(f64::from(response.status)),
                "ok" => Value::Bool(response.is_success()),
                _ => Value::Undefined,
            },
            Value::Xhr(xhr) => {
                let state = xhr.borrow();
                let value = match prop {
                    "status" => Value::Number(f64::from(state.status)),
                    "responseText" | "response" => Value::Str(state.response_text.clone()),
                    "readyState" => Value::Number(if state.done {
                        4.0
                    } else if state.opened {
                        1.0
                    } else {
                        0.0
                    }),
                    other => state.handlers.get(other).cloned().unwrap_or(Value::Undefined),
                };
                value
            }
            Value::Builtin(Builtin::Document) if prop == "body" => {
                Value::Node(self.dom()?.document_body())
            }
            Value::Builtin(Builtin::Math) => match prop {
                "PI" => Value::Number(std::f64::consts::PI),
                "E" => Value::Number(std::f64::consts::E),
                _ => Value::Undefined,
            },
            Value::Function(f) if prop == "name" => {
                Value::Str(f.def.name.clone().unwrap_or_default())
            }
            _ => Value::Undefined,
        };
        Ok(value)
    }

    fn get_index(&self, target: &Value, key: &Value) -> Flow<Value> {
        match (target, key) {
            (Value::Array(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                Ok(items.borrow().get(*n as usize).cloned().unwrap_or(Value::Undefined))
            }
            (Value::Str(s), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(s
                .chars()
                .nth(*n as usize)
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Undefined)),
            _ => self.get_property(target, &key.to_js_string()),
        }
    }

    fn set_property(&self, target: &Value, prop: &str, value: Value) -> Flow<()> {
        match target {
            Value::Undefined | Value::Null => Err(Thrown::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                target.to_js_string(),
                prop
            ))),
            Value::Object(props) => {
                props.borrow_mut().insert(prop.to_string(), value);
                Ok(())
            }
            Value::Xhr(xhr) => {
                xhr.borrow_mut().handlers.insert(prop.to_string(), value);
                Ok(())
            }
            Value::Node(node) if matches!(prop, "textContent" | "innerText") => self
                .dom()?
                .set_text_content(*node, &value.to_js_string())
                .map_err(dom_error),
            // Writes to other properties of primitives and host objects are dropped.
            _ => Ok(()),
        }
    }

    fn set_index(&self, target: &Value, key: &Value, value: Value) -> Flow<()> {
        match (target, key) {
            (Value::Array(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                let index = *n as usize;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    if index > items.len() + MAX_GROWTH {
                        return Err(Thrown::error("RangeError", "Invalid array length"));
                    }
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                Ok(())
            }
            _ => self.set_property(target, &key.to_js_string(), value),
        }
    }

    fn construct(&self, constructor: &str, args: Vec<Value>) -> Flow<Value> {
        match constructor {
            "Error" | "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" | "EvalError"
            | "URIError" => {
                let message = match args.first() {
                    None | Some(Value::Undefined) => String::new(),
                    Some(v) => v.to_js_string(),
                };
                Ok(Value::error(constructor, message))
            }
            "XMLHttpRequest" if self.host.network().is_some() => {
                Ok(Value::Xhr(Rc::new(RefCell::new(XhrState::default()))))
            }
            "Array" => Ok(Value::array(args)),
            "Object" => Ok(Value::object(BTreeMap::new())),
            _ => match self.scope.lookup(constructor) {
                Some(_) => Err(Thrown::type_error(format!("{} is not a constructor", constructor))),
                None => Err(Thrown::reference(constructor)),
            },
        }
    }

    async fn call(&mut self, callee: &Expr, args: &[Expr]) -> Flow<Value> {
        match callee {
            Expr::Member { object, property } => {
                let target = self.eval(object).await?;
                let args = self.eval_args(args).await?;
                self.call_method(target, property, args).await
            }
            Expr::Ident(name) if self.scope.lookup(name).is_none() => {
                let args = self.eval_args(args).await?;
                self.call_global(name, args).await
            }
            other => {
                let function = self.eval(other).await?;
                let args = self.eval_args(args).await?;
                let label = match other {
                    Expr::Ident(name) => name.as_str(),
                    _ => "expression",
                };
                self.call_value(function, args, label).await
            }
        }
    }

    async fn call_value(&mut self, function: Value, args: Vec<Value>, label: &str) -> Flow<Value> {
        match function {
            Value::Function(closure) => self.call_function(closure, args).await,
            _ => Err(Thrown::type_error(format!("{} is not a function", label))),
        }
    }

    async fn call_function(&mut self, closure: Rc<Closure>, args: Vec<Value>) -> Flow<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Thrown::error("RangeError", "Maximum call stack size exceeded"));
        }
        self.depth += 1;
        let saved = std::mem::replace(&mut self.scope, Scope::child(&closure.env));
        let mut args = args.into_iter();
        for param in &closure.def.params {
            self.scope.declare(param, args.next().unwrap_or(Value::Undefined), true);
        }
        let result = match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr).await,
            FunctionBody::Block(body) => {
                self.exec_sequence(body)
                    .await
                    .map(|completion| match completion {
                        Completion::Return(value) => value,
                        _ => Value::Undefined,
                    })
            }
        };
        self.scope = saved;
        self.depth -= 1;

        if closure.def.is_async {
            Ok(Value::Promise(Rc::new(result.map_err(|thrown| thrown.value))))
        } else {
            result
        }
    }

    async fn call_global(&mut self, name: &str, args: Vec<Value>) -> Flow<Value> {
        let host = self.host;
        match name {
            "fetch" => {
                let network = host.network().ok_or_else(|| Thrown::reference(name))?;
                let request = Request {
                    method: request_method(args.get(1)),
                    url: arg_string(&args, 0),
                };
                let settled = match network.fetch(request).await {
                    Ok(response) => Ok(Value::Response(Rc::new(response))),
                    Err(e) => {
                        log::debug!("fetch rejected: {}", e);
                        Err(Value::error("TypeError", "Failed to fetch"))
                    }
                };
                Ok(Value::Promise(Rc::new(settled)))
            }
            "setTimeout" | "setInterval" | "requestAnimationFrame" => {
                let timers = host.timers().ok_or_else(|| Thrown::reference(name))?;
                let delay = args
                    .get(1)
                    .map(Value::to_number)
                    .filter(|d| d.is_finite())
                    .unwrap_or(0.0)
                    .max(0.0);
                let id = match name {
                    "setTimeout" => timers.set_timeout(delay),
                    "setInterval" => timers.set_interval(delay),
                    _ => timers.request_animation_frame(),
                };
                Ok(Value::Number(id.0 as f64))
            }
            "clearTimeout" | "clearInterval" | "cancelAnimationFrame" => {
                let timers = host.timers().ok_or_else(|| Thrown::reference(name))?;
                if let Some(Value::Number(id)) = args.first() {
                    timers.clear_timer(TimerId(*id as u64));
                }
                Ok(Value::Undefined)
            }
            "queueMicrotask" => {
                let timers = host.timers().ok_or_else(|| Thrown::reference(name))?;
                timers.queue_microtask();
                Ok(Value::Undefined)
            }
            "String" => Ok(Value::Str(arg_string(&args, 0))),
            "Number" => Ok(Value::Number(args.first().map(Value::to_number).unwrap_or(0.0))),
            "Boolean" => Ok(Value::Bool(args.first().map(Value::truthy).unwrap_or(false))),
            "isNaN" => Ok(Value::Bool(arg_number(&args, 0).is_nan())),
            "parseFloat" => {
                let text = arg_string(&args, 0);
                let text = text.trim_start();
                let end = text
                    .char_indices()
                    .take_while(|(i, c)| {
                        c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))
                    })
                    .count();
                Ok(Value::Number(text[..end].parse().unwrap_or(f64::NAN)))
            }
            "parseInt" => {
                let text = arg_string(&args, 0);
                let text = text.trim_start();
                let radix = match args.get(1).map(Value::to_number) {
                    Some(r) if (2.0..=36.0).contains(&r) => r as u32,
                    _ => 10,
                };
                let (sign, digits) = match text.strip_prefix('-') {
                    Some(rest) => (-1.0, rest),
                    None => (1.0, text.strip_prefix('+').unwrap_or(text)),
                };
                let end = digits.chars().take_while(|c| c.is_digit(radix)).count();
                let value = i64::from_str_radix(&digits[..end], radix)
                    .map(|v| sign * v as f64)
                    .unwrap_or(f64::NAN);
                Ok(Value::Number(value))
            }
            "Error" | "TypeError" | "RangeError" | "SyntaxError" | "ReferenceError" => {
                self.construct(name, args)
            }
            _ => Err(Thrown::reference(name)),
        }
    }

    async fn call_method(&mut self, target: Value, method: &str, args: Vec<Value>) -> Flow<Value> {
        if method == "toString" && !matches!(target, Value::Undefined | Value::Null) {
            return Ok(Value::Str(target.to_js_string()));
        }
        match &target {
            Value::Undefined | Value::Null => Err(Thrown::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                target.to_js_string(),
                method
            ))),
            Value::Builtin(Builtin::Console) => self.console_call(method, &args),
            Value::Builtin(Builtin::Document) => match method {
                "createElement" => {
                    Ok(Value::Node(self.dom()?.create_element(&arg_string(&args, 0))))
                }
                _ => Err(not_a_function("document", method)),
            },
            Value::Builtin(Builtin::Math) => math_call(method, &args, &mut self.seed),
            Value::Builtin(Builtin::Json) => json_call(method, &args),
            Value::Node(node) => self.node_call(*node, method, &args),
            Value::Xhr(xhr) => self.xhr_call(xhr.clone(), method, &args).await,
            Value::Response(response) => response_call(response, method),
            Value::Promise(settled) => self.promise_call(settled.clone(), method, args).await,
            Value::Array(items) => self.array_call(items.clone(), method, args).await,
            Value::Str(s) => string_call(s, method, &args),
            Value::Number(n) if method == "toFixed" => {
                let digits = args
                    .first()
                    .map(Value::to_number)
                    .unwrap_or(0.0)
                    .clamp(0.0, 100.0) as usize;
                Ok(Value::Str(format!("{:.*}", digits, n)))
            }
            _ => {
                let member = self.get_property(&target, method)?;
                self.call_value(member, args, method).await
            }
        }
    }

    fn console_call(&self, method: &str, args: &[Value]) -> Flow<Value> {
        let level = LogLevel::from_method(method).ok_or_else(|| not_a_function("console", method))?;
        let message = args.iter().map(Value::display).collect::<Vec<_>>().join(" ");
        if let Some(console) = self.host.console() {
            console.write(level, &message);
        }
        Ok(Value::Undefined)
    }

    fn node_call(&self, node: NodeId, method: &str, args: &[Value]) -> Flow<Value> {
        let dom = self.dom()?;
        let result = match method {
            "appendChild" => dom.append_child(node, expect_node(args, 0, method)?).map(Value::Node),
            "insertBefore" => {
                let child = expect_node(args, 0, method)?;
                let reference = match args.get(1) {
                    None | Some(Value::Null) | Some(Value::Undefined) => None,
                    Some(_) => Some(expect_node(args, 1, method)?),
                };
                dom.insert_before(node, child, reference).map(Value::Node)
            }
            "removeChild" => dom.remove_child(node, expect_node(args, 0, method)?).map(Value::Node),
            "replaceChild" => dom
                .replace_child(node, expect_node(args, 0, method)?, expect_node(args, 1, method)?)
                .map(Value::Node),
            "replaceChildren" => {
                let children = (0..args.len())
                    .map(|i| expect_node(args, i, method))
                    .collect::<Flow<Vec<_>>>()?;
                dom.replace_children(node, &children).map(|_| Value::Undefined)
            }
            _ => return Err(not_a_function("element", method)),
        };
        result.map_err(dom_error)
    }

    async fn xhr_call(
        &mut self,
        xhr: Rc<RefCell<XhrState>>,
        method: &str,
        args: &[Value],
    ) -> Flow<Value> {
        match method {
            "open" => {
                let method = arg_string(args, 0).to_ascii_uppercase();
                let url = arg_string(args, 1);
                if let Some(network) = self.host.network() {
                    network.xhr_open(&method, &url);
                }
                let mut state = xhr.borrow_mut();
                state.method = method;
                state.url = url;
                state.opened = true;
                state.done = false;
                Ok(Value::Undefined)
            }
            "setRequestHeader" | "abort" => Ok(Value::Undefined),
            "send" => {
                let request = {
                    let state = xhr.borrow();
                    if !state.opened {
                        return Err(Thrown::error(
                            "InvalidStateError",
                            "The object's state must be OPENED.",
                        ));
                    }
                    Request {
                        method: state.method.clone(),
                        url: state.url.clone(),
                    }
                };
                let network = self
                    .host
                    .network()
                    .ok_or_else(|| Thrown::reference("XMLHttpRequest"))?;
                let outcome = network.xhr_send(request).await;
                let handler = {
                    let mut state = xhr.borrow_mut();
                    state.done = true;
                    match outcome {
                        Ok(response) => {
                            state.status = response.status;
                            state.response_text = response.body;
                            state.handlers.get("onload").cloned()
                        }
                        Err(_) => {
                            state.status = 0;
                            state.handlers.get("onerror").cloned()
                        }
                    }
                };
                if let Some(handler @ Value::Function(_)) = handler {
                    self.call_value(handler, Vec::new(), "handler").await?;
                }
                Ok(Value::Undefined)
            }
            _ => Err(not_a_function("XMLHttpRequest", method)),
        }
    }

    async fn promise_call(
        &mut self,
        settled: Rc<Result<Value, Value>>,
        method: &str,
        args: Vec<Value>,
    ) -> Flow<Value> {
        let mut args = args.into_iter();
        let (on_fulfilled, on_rejected) = match method {
            "then" => (args.next(), args.next()),
            "catch" => (None, args.next()),
            "finally" => {
                self.queue_microtask();
                if let Some(callback @ Value::Function(_)) = args.next() {
                    if let Err(thrown) = self.call_value(callback, Vec::new(), method).await {
                        return Ok(Value::Promise(Rc::new(Err(thrown.value))));
                    }
                }
                return Ok(Value::Promise(settled));
            }
            _ => return Err(not_a_function("Promise", method)),
        };
        self.queue_microtask();
        let (handler, input) = match &*settled {
            Ok(value) => (on_fulfilled, value.clone()),
            Err(reason) => (on_rejected, reason.clone()),
        };
        let next = match handler {
            Some(callback @ Value::Function(_)) => {
                match self.call_value(callback, vec![input], method).await {
                    Ok(Value::Promise(inner)) => (*inner).clone(),
                    Ok(value) => Ok(value),
                    Err(thrown) => Err(thrown.value),
                }
            }
            _ => (*settled).clone(),
        };
        Ok(Value::Promise(Rc::new(next)))
    }

    async fn array_call(
        &mut self,
        items: Rc<RefCell<Vec<Value>>>,
        method: &str,
        args: Vec<Value>,
    ) -> Flow<Value> {
        match method {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            "pop" => {
                let popped = items.borrow_mut().pop();
                Ok(popped.unwrap_or(Value::Undefined))
            }
            "join" => {
                let separator = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(sep) => sep.to_js_string(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(Value::Str(joined))
            }
            "includes" | "indexOf" => {
                let needle = args.first().cloned().unwrap_or(Value::Undefined);
                let position = items.borrow().iter().position(|v| v.strict_equals(&needle));
                Ok(if method == "includes" {
                    Value::Bool(position.is_some())
                } else {
                    Value::Number(position.map(|p| p as f64).unwrap_or(-1.0))
                })
            }
            "forEach" | "map" | "filter" => {
                let callback = args.into_iter().next().unwrap_or(Value::Undefined);
                if !matches!(callback, Value::Function(_)) {
                    let message = format!("{} is not a function", callback.display());
                    return Err(Thrown::type_error(message));
                }
                let snapshot = items.borrow().clone();
                let mut out = Vec::new();
                for (index, item) in snapshot.into_iter().enumerate() {
                    self.tick().await?;
                    let result = self
                        .call_value(
                            callback.clone(),
                            vec![item.clone(), Value::Number(index as f64)],
                            method,
                        )
                        .await?;
                    match method {
                        "map" => out.push(result),
                        "filter" if result.truthy() => out.push(item),
                        _ => {}
                    }
                }
                Ok(if method == "forEach" {
                    Value::Undefined
                } else {
                    Value::array(out)
                })
            }
            _ => Err(not_a_function("array", method)),
        }
    }
}

fn iteration_items(collection: &Value, keys: bool) -> Flow<Vec<Value>> {
    let items = match (collection, keys) {
        (Value::Array(items), false) => items.borrow().clone(),
        (Value::Str(s), false) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        (Value::Array(items), true) => (0..items.borrow().len())
            .map(|i| Value::Str(i.to_string()))
            .collect(),
        (Value::Str(s), true) => (0..s.chars().count())
            .map(|i| Value::Str(i.to_string()))
            .collect(),
        (Value::Object(props), true) => props
            .borrow()
            .keys()
            .map(|k| Value::Str(k.clone()))
            .collect(),
        (_, true) => Vec::new(),
        (other, false) => {
            return Err(Thrown::type_error(format!("{} is not iterable", other.display())));
        }
    };
    Ok(items)
}
