//! Async tree-walking evaluator.
//!
//! Executes parsed statements against a [`Namespace`] of local bindings
//! and a [`CaptureHost`].  Name resolution for calls, in order:
//!
//! 1. capture primitives (`Step`, `Say`, `Var`, `SaveArtifact`, `Trigger`,
//!    `Return`, `Yield`, `WaitForMessage`, `LoadArtifact`),
//! 2. builtin functions (`len`, `str`, `int`, ...),
//! 3. registered playbooks (via the host),
//! 4. otherwise: undefined name.
//!
//! `self.X(...)` routes the same set through the agent; `Peer.playbook(...)`
//! routes to a qualified cross-agent call when `Peer` is a known agent
//! class.  `self.state.<path>` (and bare `state.<path>`) reads and writes
//! go through the host's variable store.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::FutureExt;
use playbooks_state::Value;

use crate::ast::{
    AssignTarget, BinOp, BoolOpKind, CmpOp, Expr, FStringPart, Literal, Stmt, UnaryOp,
};
use crate::error::{InterpError, Result};
use crate::host::CaptureHost;

/// Names that resolve to capture primitives.
const CAPTURE_NAMES: &[&str] = &[
    "Step",
    "Say",
    "Var",
    "SaveArtifact",
    "Trigger",
    "LogTrigger",
    "Return",
    "Yield",
    "Yld",
    "WaitForMessage",
    "LoadArtifact",
];

/// Local bindings for one LLM call.
///
/// Seeded from the frame's persisted locals plus playbook arguments; every
/// statement's new bindings are mirrored back into the frame via
/// [`CaptureHost::sync_locals`].
#[derive(Debug, Default)]
pub struct Namespace {
    pub locals: BTreeMap<String, Value>,
}

impl Namespace {
    /// Empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace seeded with bindings.
    pub fn with_locals(locals: BTreeMap<String, Value>) -> Self {
        Self { locals }
    }
}

/// Loop control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// Statement evaluator bound to one namespace and host.
pub struct Evaluator<'a> {
    namespace: &'a mut Namespace,
    host: &'a mut dyn CaptureHost,
}

impl<'a> Evaluator<'a> {
    /// Bind an evaluator.
    pub fn new(namespace: &'a mut Namespace, host: &'a mut dyn CaptureHost) -> Self {
        Self { namespace, host }
    }

    /// Execute a top-level statement block.
    pub async fn exec_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            match self.exec_stmt(stmt).await? {
                Flow::Normal => {}
                Flow::Break | Flow::Continue => {
                    return Err(InterpError::runtime("break/continue outside a loop"));
                }
            }
        }
        Ok(())
    }

    fn exec_stmt<'b>(&'b mut self, stmt: &'b Stmt) -> BoxFuture<'b, Result<Flow>> {
        async move {
            match stmt {
                Stmt::Expr(expr) => {
                    self.eval_expr(expr).await?;
                    Ok(Flow::Normal)
                }
                Stmt::Assign { target, value } => {
                    let value = self.eval_expr(value).await?;
                    self.assign(target, value).await?;
                    Ok(Flow::Normal)
                }
                Stmt::AugAssign { target, op, value } => {
                    let current = self.read_target(target).await?;
                    let rhs = self.eval_expr(value).await?;
                    let updated = binary_op(*op, &current, &rhs)?;
                    self.assign(target, updated).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    branches,
                    else_body,
                } => {
                    for (test, body) in branches {
                        if self.eval_expr(test).await?.truthy() {
                            return self.exec_body(body).await;
                        }
                    }
                    if let Some(body) = else_body {
                        return self.exec_body(body).await;
                    }
                    Ok(Flow::Normal)
                }
                Stmt::While { test, body } => {
                    while self.eval_expr(test).await?.truthy() {
                        match self.exec_body(body).await? {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::For { target, iter, body } => {
                    let iterable = self.eval_expr(iter).await?;
                    for item in iterate(&iterable)? {
                        self.namespace.locals.insert(target.clone(), item);
                        match self.exec_body(body).await? {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Pass => Ok(Flow::Normal),
                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),
            }
        }
        .boxed()
    }

    /// Execute a nested body, stopping at the first break/continue.
    async fn exec_body(&mut self, body: &[Stmt]) -> Result<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt).await? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    // -- Assignment ---------------------------------------------------------

    async fn assign(&mut self, target: &AssignTarget, value: Value) -> Result<()> {
        match target {
            AssignTarget::Name(name) => {
                self.namespace.locals.insert(name.clone(), value);
                Ok(())
            }
            AssignTarget::Attribute { base, attr } => {
                if let Some(mut path) = state_path(base) {
                    path.push(attr.clone());
                    let parts: Vec<&str> = path.iter().map(String::as_str).collect();
                    return self.host.state_set(&parts, value).await;
                }
                Err(InterpError::runtime(format!(
                    "cannot assign attribute `{attr}` outside self.state"
                )))
            }
            AssignTarget::Index { base, index } => {
                let index = self.eval_expr(index).await?;
                match base {
                    Expr::Name(name) => {
                        let mut container = self
                            .namespace
                            .locals
                            .remove(name)
                            .ok_or_else(|| InterpError::UndefinedName { name: name.clone() })?;
                        let outcome = index_set(&mut container, &index, value);
                        self.namespace.locals.insert(name.clone(), container);
                        outcome
                    }
                    base => {
                        if let Some(path) = state_path_with_leaf(base) {
                            let parts: Vec<&str> = path.iter().map(String::as_str).collect();
                            let mut container = self.host.state_get(&parts);
                            index_set(&mut container, &index, value)?;
                            return self.host.state_set(&parts, container).await;
                        }
                        Err(InterpError::runtime(
                            "index assignment requires a local variable or self.state path",
                        ))
                    }
                }
            }
        }
    }

    /// Read the current value of an assignment target (for `+=` etc.).
    async fn read_target(&mut self, target: &AssignTarget) -> Result<Value> {
        match target {
            AssignTarget::Name(name) => self
                .namespace
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| InterpError::UndefinedName { name: name.clone() }),
            AssignTarget::Attribute { base, attr } => {
                if let Some(mut path) = state_path(base) {
                    path.push(attr.clone());
                    let parts: Vec<&str> = path.iter().map(String::as_str).collect();
                    return Ok(self.host.state_get(&parts));
                }
                Err(InterpError::runtime(format!(
                    "cannot read attribute `{attr}` outside self.state"
                )))
            }
            AssignTarget::Index { base, index } => {
                let container = self.eval_expr(base).await?;
                let index = self.eval_expr(index).await?;
                index_get(&container, &index)
            }
        }
    }

    // -- Expressions --------------------------------------------------------

    fn eval_expr<'b>(&'b mut self, expr: &'b Expr) -> BoxFuture<'b, Result<Value>> {
        async move {
            match expr {
                Expr::Literal(literal) => Ok(literal_value(literal)),
                Expr::FString(parts) => {
                    let mut rendered = String::new();
                    for part in parts {
                        match part {
                            FStringPart::Text(text) => rendered.push_str(text),
                            FStringPart::Expr(expr) => {
                                let value = self.eval_expr(expr).await?;
                                rendered.push_str(&value.display_string());
                            }
                        }
                    }
                    Ok(Value::Str(rendered))
                }
                Expr::Name(name) => self.eval_name(name),
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::List(values))
                }
                Expr::Tuple(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::List(values))
                }
                Expr::Dict(entries) => {
                    let mut map = BTreeMap::new();
                    for (key, value) in entries {
                        let key = self.eval_expr(key).await?.display_string();
                        let value = self.eval_expr(value).await?;
                        map.insert(key, value);
                    }
                    Ok(Value::Map(map))
                }
                Expr::Attribute { base, attr } => self.eval_attribute(base, attr).await,
                Expr::Index { base, index } => {
                    let container = self.eval_expr(base).await?;
                    let index = self.eval_expr(index).await?;
                    index_get(&container, &index)
                }
                Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs).await,
                Expr::Unary { op, operand } => {
                    let value = self.eval_expr(operand).await?;
                    unary_op(*op, &value)
                }
                Expr::Binary { op, left, right } => {
                    let left = self.eval_expr(left).await?;
                    let right = self.eval_expr(right).await?;
                    binary_op(*op, &left, &right)
                }
                Expr::Compare { left, comparisons } => {
                    let mut previous = self.eval_expr(left).await?;
                    for (op, right) in comparisons {
                        let right = self.eval_expr(right).await?;
                        if !compare(*op, &previous, &right)? {
                            return Ok(Value::Bool(false));
                        }
                        previous = right;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::BoolOp { op, values } => {
                    match op {
                        BoolOpKind::And => {
                            let mut last = Value::Bool(true);
                            for value in values {
                                last = self.eval_expr(value).await?;
                                if !last.truthy() {
                                    return Ok(last);
                                }
                            }
                            Ok(last)
                        }
                        BoolOpKind::Or => {
                            let mut last = Value::Bool(false);
                            for value in values {
                                last = self.eval_expr(value).await?;
                                if last.truthy() {
                                    return Ok(last);
                                }
                            }
                            Ok(last)
                        }
                    }
                }
                Expr::Await(operand) => self.eval_expr(operand).await,
            }
        }
        .boxed()
    }

    fn eval_name(&mut self, name: &str) -> Result<Value> {
        if let Some(value) = self.namespace.locals.get(name) {
            return Ok(value.clone());
        }
        // Underscore chains the previous Return value.
        if name == "_" {
            return Ok(self.host.state_get(&["_"]));
        }
        Err(InterpError::UndefinedName {
            name: name.to_string(),
        })
    }

    async fn eval_attribute(&mut self, base: &Expr, attr: &str) -> Result<Value> {
        // self.state.<path> / state.<path>
        if let Some(mut path) = state_path(base) {
            path.push(attr.to_string());
            let parts: Vec<&str> = path.iter().map(String::as_str).collect();
            return Ok(self.host.state_get(&parts));
        }
        // Dotted access into local map values.
        let base_value = self.eval_expr(base).await?;
        match base_value {
            Value::Map(map) => Ok(map.get(attr).cloned().unwrap_or(Value::Null)),
            other => Err(InterpError::runtime(format!(
                "{} has no attribute `{attr}`",
                other.type_name()
            ))),
        }
    }

    async fn eval_call(
        &mut self,
        func: &Expr,
        arg_exprs: &[Expr],
        kwarg_exprs: &[(String, Expr)],
    ) -> Result<Value> {
        let mut args = Vec::with_capacity(arg_exprs.len());
        for arg in arg_exprs {
            args.push(self.eval_expr(arg).await?);
        }
        let mut kwargs = Vec::with_capacity(kwarg_exprs.len());
        for (name, expr) in kwarg_exprs {
            kwargs.push((name.clone(), self.eval_expr(expr).await?));
        }

        match func {
            Expr::Name(name) => {
                if CAPTURE_NAMES.contains(&name.as_str()) {
                    return self.call_capture(name, args, kwargs).await;
                }
                if let Some(result) = call_builtin(name, &args)? {
                    return Ok(result);
                }
                if self.host.is_playbook(name) {
                    return self.host.call_playbook(name, args, kwargs).await;
                }
                Err(InterpError::UndefinedName {
                    name: name.to_string(),
                })
            }
            Expr::Attribute { base, attr } => {
                // self.X(...): captures and local playbooks.
                if matches!(base.as_ref(), Expr::Name(n) if n == "self") {
                    if CAPTURE_NAMES.contains(&attr.as_str()) {
                        return self.call_capture(attr, args, kwargs).await;
                    }
                    return self.host.call_playbook(attr, args, kwargs).await;
                }
                // Peer.playbook(...): cross-agent proxy.
                if let Expr::Name(klass) = base.as_ref() {
                    if !self.namespace.locals.contains_key(klass)
                        && self.host.is_agent_klass(klass)
                    {
                        let qualified = format!("{klass}.{attr}");
                        return self.host.call_playbook(&qualified, args, kwargs).await;
                    }
                }
                // Value method call.
                let receiver = self.eval_expr(base).await?;
                self.call_method(base, receiver, attr, args).await
            }
            other => {
                let value = self.eval_expr(other).await?;
                Err(InterpError::runtime(format!(
                    "{} is not callable",
                    value.type_name()
                )))
            }
        }
    }

    async fn call_capture(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match name {
            "Step" => {
                let location = expect_str_arg(&args, 0, "Step")?;
                self.host.step(&location).await?;
                Ok(Value::Null)
            }
            "Say" => {
                let target = expect_str_arg(&args, 0, "Say")?;
                let message = args
                    .get(1)
                    .map(Value::display_string)
                    .unwrap_or_default();
                self.host.say(&target, &message).await?;
                Ok(Value::Null)
            }
            "Var" => {
                let var_name = expect_str_arg(&args, 0, "Var")?;
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                self.host.var(&var_name, value).await?;
                Ok(Value::Null)
            }
            "SaveArtifact" => {
                let artifact = expect_str_arg(&args, 0, "SaveArtifact")?;
                let summary = expect_str_arg(&args, 1, "SaveArtifact")?;
                let content = args
                    .get(2)
                    .map(Value::display_string)
                    .unwrap_or_default();
                self.host.save_artifact(&artifact, &summary, &content).await?;
                Ok(Value::Null)
            }
            "LoadArtifact" => {
                let artifact = expect_str_arg(&args, 0, "LoadArtifact")?;
                self.host.load_artifact(&artifact).await
            }
            "Trigger" | "LogTrigger" => {
                let code = expect_str_arg(&args, 0, "Trigger")?;
                self.host.log_trigger(&code).await?;
                Ok(Value::Null)
            }
            "Return" => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                self.host.return_value(value).await?;
                Ok(Value::Null)
            }
            "Yield" | "Yld" => {
                let target = args
                    .first()
                    .map(Value::display_string)
                    .unwrap_or_else(|| "user".to_string());
                self.host.yield_to(&target).await?;
                Ok(Value::Null)
            }
            "WaitForMessage" => {
                let source = expect_str_arg(&args, 0, "WaitForMessage")?;
                self.host.wait_for_message(&source).await
            }
            other => Err(InterpError::UndefinedName {
                name: other.to_string(),
            }),
        }
    }

    async fn call_method(
        &mut self,
        base: &Expr,
        receiver: Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        // Mutating list methods on self.state paths write back through
        // the variable store.
        if matches!(method, "append" | "extend") {
            if let Some(path) = state_path_with_leaf(base) {
                let parts: Vec<&str> = path.iter().map(String::as_str).collect();
                let mut container = self.host.state_get(&parts);
                apply_list_mutation(&mut container, method, &args)?;
                self.host.state_set(&parts, container).await?;
                return Ok(Value::Null);
            }
        }

        // Mutating list methods write back through local names.
        if let (Expr::Name(name), "append" | "extend") = (base, method) {
            let mut container = self
                .namespace
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| InterpError::UndefinedName { name: name.clone() })?;
            apply_list_mutation(&mut container, method, &args)?;
            self.namespace.locals.insert(name.clone(), container);
            return Ok(Value::Null);
        }

        value_method(&receiver, method, &args)
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

/// If `expr` is `self.state` or `state` (optionally with more attributes),
/// return the path segments after `state`.
fn state_path(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Name(name) if name == "state" => Some(Vec::new()),
        Expr::Attribute { base, attr } => {
            if attr == "state" && matches!(base.as_ref(), Expr::Name(n) if n == "self") {
                return Some(Vec::new());
            }
            let mut path = state_path(base)?;
            path.push(attr.clone());
            Some(path)
        }
        _ => None,
    }
}

/// Like [`state_path`] but for a complete expression (including the leaf).
fn state_path_with_leaf(expr: &Expr) -> Option<Vec<String>> {
    let path = state_path(expr)?;
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

fn expect_str_arg(args: &[Value], index: usize, func: &str) -> Result<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Ok(other.display_string()),
        None => Err(InterpError::runtime(format!(
            "{func}() missing argument {index}"
        ))),
    }
}

fn iterate(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Map(map) => Ok(map.keys().map(|k| Value::Str(k.clone())).collect()),
        other => Err(InterpError::runtime(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

fn unary_op(op: UnaryOp, value: &Value) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Int(i)) => Ok(Value::Int(*i)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (op, v) => Err(InterpError::runtime(format!(
            "bad operand type for {op:?}: {}",
            v.type_name()
        ))),
    }
}

fn binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    use Value::{Float, Int, List, Str};

    match (op, left, right) {
        (BinOp::Add, Int(a), Int(b)) => Ok(Int(a + b)),
        (BinOp::Add, Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),
        (BinOp::Add, List(a), List(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            Ok(List(items))
        }
        (BinOp::Sub, Int(a), Int(b)) => Ok(Int(a - b)),
        (BinOp::Mul, Int(a), Int(b)) => Ok(Int(a * b)),
        (BinOp::Mul, Str(s), Int(n)) | (BinOp::Mul, Int(n), Str(s)) => {
            Ok(Str(s.repeat((*n).max(0) as usize)))
        }
        (BinOp::Mul, List(items), Int(n)) => {
            let mut result = Vec::new();
            for _ in 0..(*n).max(0) {
                result.extend(items.iter().cloned());
            }
            Ok(List(result))
        }
        (BinOp::Div, a, b) => {
            let (a, b) = (as_float(a)?, as_float(b)?);
            if b == 0.0 {
                return Err(InterpError::runtime("division by zero"));
            }
            Ok(Float(a / b))
        }
        (BinOp::FloorDiv, Int(a), Int(b)) => {
            if *b == 0 {
                return Err(InterpError::runtime("division by zero"));
            }
            Ok(Int(a.div_euclid(*b)))
        }
        (BinOp::Mod, Int(a), Int(b)) => {
            if *b == 0 {
                return Err(InterpError::runtime("division by zero"));
            }
            Ok(Int(a.rem_euclid(*b)))
        }
        (BinOp::Pow, Int(a), Int(b)) if *b >= 0 => {
            Ok(Int(a.pow((*b).min(u32::MAX as i64) as u32)))
        }
        // Mixed numeric operands fall back to float math.
        (op, a, b) => {
            let (a, b) = (as_float(a)?, as_float(b)?);
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::FloorDiv => (a / b).floor(),
                BinOp::Mod => a.rem_euclid(b),
                BinOp::Pow => a.powf(b),
            };
            Ok(Float(result))
        }
    }
}

fn as_float(value: &Value) -> Result<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(InterpError::runtime(format!(
            "unsupported operand type: {}",
            other.type_name()
        ))),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::NotEq => Ok(!values_equal(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|b| !b),
        CmpOp::Lt | CmpOp::LtEq | CmpOp::Gt | CmpOp::GtEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                (a, b) => {
                    let (a, b) = (as_float(a)?, as_float(b)?);
                    a.partial_cmp(&b).ok_or_else(|| {
                        InterpError::runtime("comparison of NaN is undefined")
                    })?
                }
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::LtEq => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::GtEq => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            (*a as f64) == *b
        }
        (a, b) => a == b,
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool> {
    match container {
        Value::List(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Str(s) => Ok(s.contains(&needle.display_string())),
        Value::Map(map) => Ok(map.contains_key(&needle.display_string())),
        other => Err(InterpError::runtime(format!(
            "argument of type {} is not a container",
            other.type_name()
        ))),
    }
}

fn index_get(container: &Value, index: &Value) -> Result<Value> {
    match (container, index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = normalize_index(*i, items.len())?;
            Ok(items[idx].clone())
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(*i, chars.len())?;
            Ok(Value::Str(chars[idx].to_string()))
        }
        (Value::Map(map), key) => {
            let key = key.display_string();
            map.get(&key)
                .cloned()
                .ok_or_else(|| InterpError::runtime(format!("key not found: {key}")))
        }
        (container, index) => Err(InterpError::runtime(format!(
            "cannot index {} with {}",
            container.type_name(),
            index.type_name()
        ))),
    }
}

fn index_set(container: &mut Value, index: &Value, value: Value) -> Result<()> {
    match (container, index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = normalize_index(*i, items.len())?;
            items[idx] = value;
            Ok(())
        }
        (Value::Map(map), key) => {
            map.insert(key.display_string(), value);
            Ok(())
        }
        (container, _) => Err(InterpError::runtime(format!(
            "cannot assign into {}",
            container.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Result<usize> {
    let idx = if index < 0 {
        index + len as i64
    } else {
        index
    };
    if idx < 0 || idx as usize >= len {
        return Err(InterpError::runtime(format!(
            "index {index} out of range (len {len})"
        )));
    }
    Ok(idx as usize)
}

/// Builtin functions.  Returns `Ok(None)` when `name` is not a builtin.
fn call_builtin(name: &str, args: &[Value]) -> Result<Option<Value>> {
    let result = match name {
        "len" => {
            let arg = builtin_arg(args, 0, "len")?;
            let len = match arg {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                other => {
                    return Err(InterpError::runtime(format!(
                        "object of type {} has no len()",
                        other.type_name()
                    )));
                }
            };
            Value::Int(len as i64)
        }
        "str" => Value::Str(
            args.first()
                .map(Value::display_string)
                .unwrap_or_default(),
        ),
        "int" => match builtin_arg(args, 0, "int")? {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Int(*f as i64),
            Value::Bool(b) => Value::Int(i64::from(*b)),
            Value::Str(s) => Value::Int(s.trim().parse::<i64>().map_err(|_| {
                InterpError::runtime(format!("invalid literal for int(): {s:?}"))
            })?),
            other => {
                return Err(InterpError::runtime(format!(
                    "int() argument must be a number or string, not {}",
                    other.type_name()
                )));
            }
        },
        "float" => match builtin_arg(args, 0, "float")? {
            Value::Int(i) => Value::Float(*i as f64),
            Value::Float(f) => Value::Float(*f),
            Value::Str(s) => Value::Float(s.trim().parse::<f64>().map_err(|_| {
                InterpError::runtime(format!("could not convert string to float: {s:?}"))
            })?),
            other => {
                return Err(InterpError::runtime(format!(
                    "float() argument must be a number or string, not {}",
                    other.type_name()
                )));
            }
        },
        "bool" => Value::Bool(builtin_arg(args, 0, "bool")?.truthy()),
        "abs" => match builtin_arg(args, 0, "abs")? {
            Value::Int(i) => Value::Int(i.abs()),
            Value::Float(f) => Value::Float(f.abs()),
            other => {
                return Err(InterpError::runtime(format!(
                    "bad operand type for abs(): {}",
                    other.type_name()
                )));
            }
        },
        "min" | "max" => {
            let items: Vec<Value> = if args.len() == 1 {
                iterate(builtin_arg(args, 0, name)?)?
            } else {
                args.to_vec()
            };
            let mut best = items
                .first()
                .cloned()
                .ok_or_else(|| InterpError::runtime(format!("{name}() of empty sequence")))?;
            for item in &items[1..] {
                let take = if name == "min" {
                    compare(CmpOp::Lt, item, &best)?
                } else {
                    compare(CmpOp::Gt, item, &best)?
                };
                if take {
                    best = item.clone();
                }
            }
            best
        }
        "sum" => {
            let items = iterate(builtin_arg(args, 0, "sum")?)?;
            let mut total = Value::Int(0);
            for item in &items {
                total = binary_op(BinOp::Add, &total, item)?;
            }
            total
        }
        "sorted" => {
            let mut items = iterate(builtin_arg(args, 0, "sorted")?)?;
            let mut failed = None;
            items.sort_by(|a, b| match compare(CmpOp::Lt, a, b) {
                Ok(true) => std::cmp::Ordering::Less,
                Ok(false) => std::cmp::Ordering::Greater,
                Err(e) => {
                    failed = Some(e);
                    std::cmp::Ordering::Equal
                }
            });
            if let Some(error) = failed {
                return Err(error);
            }
            Value::List(items)
        }
        "range" => {
            let (start, stop) = match args.len() {
                1 => (0, int_arg(args, 0, "range")?),
                _ => (int_arg(args, 0, "range")?, int_arg(args, 1, "range")?),
            };
            Value::List((start..stop).map(Value::Int).collect())
        }
        "enumerate" => {
            let items = iterate(builtin_arg(args, 0, "enumerate")?)?;
            Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::List(vec![Value::Int(i as i64), item]))
                    .collect(),
            )
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn builtin_arg<'v>(args: &'v [Value], index: usize, func: &str) -> Result<&'v Value> {
    args.get(index)
        .ok_or_else(|| InterpError::runtime(format!("{func}() missing argument {index}")))
}

fn int_arg(args: &[Value], index: usize, func: &str) -> Result<i64> {
    builtin_arg(args, index, func)?
        .as_int()
        .ok_or_else(|| InterpError::runtime(format!("{func}() expects an int")))
}

/// Apply `append`/`extend` to a list value in place.
fn apply_list_mutation(container: &mut Value, method: &str, args: &[Value]) -> Result<()> {
    let Value::List(items) = container else {
        return Err(InterpError::runtime(format!(
            "{} has no method `{method}`",
            container.type_name()
        )));
    };
    match method {
        "append" => {
            items.push(args.first().cloned().unwrap_or(Value::Null));
            Ok(())
        }
        _ => match args.first() {
            Some(Value::List(more)) => {
                items.extend(more.iter().cloned());
                Ok(())
            }
            _ => Err(InterpError::runtime("extend() expects a list")),
        },
    }
}

/// Non-mutating methods on plain values.
fn value_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value> {
    match (receiver, method) {
        (Value::Str(s), "upper") => Ok(Value::Str(s.to_uppercase())),
        (Value::Str(s), "lower") => Ok(Value::Str(s.to_lowercase())),
        (Value::Str(s), "strip") => Ok(Value::Str(s.trim().to_string())),
        (Value::Str(s), "startswith") => Ok(Value::Bool(
            s.starts_with(&args.first().map(Value::display_string).unwrap_or_default()),
        )),
        (Value::Str(s), "endswith") => Ok(Value::Bool(
            s.ends_with(&args.first().map(Value::display_string).unwrap_or_default()),
        )),
        (Value::Str(s), "replace") => {
            let from = args.first().map(Value::display_string).unwrap_or_default();
            let to = args.get(1).map(Value::display_string).unwrap_or_default();
            Ok(Value::Str(s.replace(&from, &to)))
        }
        (Value::Str(s), "split") => {
            let parts: Vec<Value> = match args.first() {
                Some(sep) => s
                    .split(&sep.display_string())
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                None => s
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            };
            Ok(Value::List(parts))
        }
        (Value::Str(sep), "join") => {
            let items = match args.first() {
                Some(Value::List(items)) => items,
                _ => return Err(InterpError::runtime("join() expects a list")),
            };
            let parts: Vec<String> = items.iter().map(Value::display_string).collect();
            Ok(Value::Str(parts.join(sep)))
        }
        (Value::Map(map), "get") => {
            let key = args.first().map(Value::display_string).unwrap_or_default();
            Ok(map
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        (Value::Map(map), "keys") => Ok(Value::List(
            map.keys().map(|k| Value::Str(k.clone())).collect(),
        )),
        (Value::Map(map), "values") => Ok(Value::List(map.values().cloned().collect())),
        (receiver, method) => Err(InterpError::runtime(format!(
            "{} has no method `{method}`",
            receiver.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::testing::MockHost;

    async fn run(source: &str) -> (Namespace, MockHost) {
        let mut namespace = Namespace::new();
        let mut host = MockHost::new();
        let stmts = parse(source).expect("parse");
        Evaluator::new(&mut namespace, &mut host)
            .exec_block(&stmts)
            .await
            .expect("exec");
        (namespace, host)
    }

    #[tokio::test]
    async fn assignment_and_arithmetic() {
        let (namespace, _) = run("x = 2 + 3 * 4\ny = x - 4\n").await;
        assert_eq!(namespace.locals["x"], Value::Int(14));
        assert_eq!(namespace.locals["y"], Value::Int(10));
    }

    #[tokio::test]
    async fn capture_say_routes_to_host() {
        let (_, host) = run("await Say(\"user\", \"Hello!\")\n").await;
        assert_eq!(host.result.messages, vec![("user".into(), "Hello!".into())]);
    }

    #[tokio::test]
    async fn self_prefixed_captures_work() {
        let (_, host) = run("await self.Step(\"Hi:01:QUE\")\nawait self.Say(\"human\", \"Hello!\")\nawait self.Return(\"done\")\n").await;
        assert_eq!(host.result.steps.len(), 1);
        assert_eq!(host.result.messages.len(), 1);
        assert_eq!(host.result.return_value, Some(Value::Str("done".into())));
        assert!(host.result.playbook_finished);
    }

    #[tokio::test]
    async fn state_write_and_read() {
        let (namespace, host) = run("self.state.count = 3\nx = self.state.count + 1\n").await;
        assert_eq!(host.state_value("count"), Value::Int(3));
        assert_eq!(namespace.locals["x"], Value::Int(4));
    }

    #[tokio::test]
    async fn bare_state_alias() {
        let (_, host) = run("state.name = \"John\"\n").await;
        assert_eq!(host.state_value("name"), Value::Str("John".into()));
    }

    #[tokio::test]
    async fn fstring_interpolation() {
        let (namespace, _) = run("name = \"Ada\"\ngreeting = f\"Hi {name}!\"\n").await;
        assert_eq!(namespace.locals["greeting"], Value::Str("Hi Ada!".into()));
    }

    #[tokio::test]
    async fn if_elif_else() {
        let (namespace, _) =
            run("x = 5\nif x > 10:\n    kind = \"big\"\nelif x > 3:\n    kind = \"mid\"\nelse:\n    kind = \"small\"\n")
                .await;
        assert_eq!(namespace.locals["kind"], Value::Str("mid".into()));
    }

    #[tokio::test]
    async fn while_loop_with_break() {
        let (namespace, _) =
            run("x = 0\nwhile True:\n    x += 1\n    if x >= 3:\n        break\n").await;
        assert_eq!(namespace.locals["x"], Value::Int(3));
    }

    #[tokio::test]
    async fn for_loop_over_list() {
        let (namespace, _) =
            run("total = 0\nfor n in [1, 2, 3]:\n    total += n\n").await;
        assert_eq!(namespace.locals["total"], Value::Int(6));
    }

    #[tokio::test]
    async fn list_append_mutates_local() {
        let (namespace, _) = run("items = [1]\nitems.append(2)\n").await;
        assert_eq!(
            namespace.locals["items"],
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[tokio::test]
    async fn builtins() {
        let (namespace, _) = run(
            "a = len(\"hello\")\nb = str(42)\nc = max([3, 1, 2])\nd = sorted([3, 1, 2])\ne = sum(range(4))\n",
        )
        .await;
        assert_eq!(namespace.locals["a"], Value::Int(5));
        assert_eq!(namespace.locals["b"], Value::Str("42".into()));
        assert_eq!(namespace.locals["c"], Value::Int(3));
        assert_eq!(
            namespace.locals["d"],
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(namespace.locals["e"], Value::Int(6));
    }

    #[tokio::test]
    async fn playbook_call_via_host() {
        let mut namespace = Namespace::new();
        let mut host = MockHost::new().with_playbook("GetOrder");
        let stmts = parse("order = await GetOrder(42)\n").expect("parse");
        Evaluator::new(&mut namespace, &mut host)
            .exec_block(&stmts)
            .await
            .expect("exec");
        assert_eq!(host.calls, vec![("GetOrder".to_string(), vec![Value::Int(42)])]);
        assert_eq!(namespace.locals["order"], Value::Str("GetOrder-result".into()));
    }

    #[tokio::test]
    async fn cross_agent_proxy_call() {
        let mut namespace = Namespace::new();
        let mut host = MockHost::new().with_klass("AgentB");
        let stmts = parse("result = await AgentB.Compute(5)\n").expect("parse");
        Evaluator::new(&mut namespace, &mut host)
            .exec_block(&stmts)
            .await
            .expect("exec");
        assert_eq!(
            host.calls,
            vec![("AgentB.Compute".to_string(), vec![Value::Int(5)])]
        );
    }

    #[tokio::test]
    async fn denied_builtins_do_not_exist() {
        for name in ["eval", "exec", "open", "__import__", "compile", "input"] {
            let mut namespace = Namespace::new();
            let mut host = MockHost::new();
            let stmts = parse(&format!("x = {name}(\"data\")\n")).expect("parse");
            let error = Evaluator::new(&mut namespace, &mut host)
                .exec_block(&stmts)
                .await
                .expect_err("must be undefined");
            assert!(matches!(error, InterpError::UndefinedName { .. }));
        }
    }

    #[tokio::test]
    async fn string_methods() {
        let (namespace, _) = run(
            "s = \" Hi \"\na = s.strip()\nb = a.upper()\nc = \", \".join([\"x\", \"y\"])\n",
        )
        .await;
        assert_eq!(namespace.locals["b"], Value::Str("HI".into()));
        assert_eq!(namespace.locals["c"], Value::Str("x, y".into()));
    }

    #[tokio::test]
    async fn chained_comparison_short_circuits() {
        let (namespace, _) = run("ok = 1 < 2 < 3\nbad = 1 < 2 > 5\n").await;
        assert_eq!(namespace.locals["ok"], Value::Bool(true));
        assert_eq!(namespace.locals["bad"], Value::Bool(false));
    }

    #[tokio::test]
    async fn division_by_zero_is_runtime_error() {
        let mut namespace = Namespace::new();
        let mut host = MockHost::new();
        let stmts = parse("x = 1 / 0\n").expect("parse");
        let error = Evaluator::new(&mut namespace, &mut host)
            .exec_block(&stmts)
            .await
            .expect_err("must fail");
        assert!(matches!(error, InterpError::Runtime { .. }));
    }

    #[tokio::test]
    async fn dict_access_and_methods() {
        let (namespace, _) = run(
            "d = {\"a\": 1, \"b\": 2}\nx = d[\"a\"]\ny = d.get(\"missing\", 0)\nks = d.keys()\n",
        )
        .await;
        assert_eq!(namespace.locals["x"], Value::Int(1));
        assert_eq!(namespace.locals["y"], Value::Int(0));
        assert_eq!(
            namespace.locals["ks"],
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
    }
}
