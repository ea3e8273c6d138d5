//! Condition and value evaluation over run variables, trigger payload and node outputs.
//!
//! Paths are dotted references rooted at `vars`, `trigger` or `nodes`
//! (`trigger.orderId`, `nodes.classify.confidence`, `vars.items.0`). A path
//! that does not resolve is *undefined*: every comparison involving an
//! undefined operand is `false`, and a free-form expression that errors or
//! yields a non-boolean is `false`. Evaluation never fails a run by itself.
//!
//! In Rhai expressions a missing map property or a comparison against `()`
//! raises an error, so the whole expression (including any `!` around the
//! comparison) evaluates to `false`.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use regex::Regex;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope, AST};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value};
use std::cmp::Ordering;

/// Context variables exposed to expressions.
#[derive(Clone, Debug, Default)]
pub struct EvaluationContext {
    pub vars: Value,
    pub trigger: Value,
    pub nodes: Value,
}

impl EvaluationContext {
    pub fn new(vars: Value, trigger: Value, nodes: Value) -> Self {
        Self {
            vars,
            trigger,
            nodes,
        }
    }

    /// Resolve a dotted path. `None` means undefined.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').map(str::trim);
        let root = match segments.next()? {
            "vars" => &self.vars,
            "trigger" => &self.trigger,
            "nodes" => &self.nodes,
            _ => return None,
        };
        let mut current = root;
        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

/// Reference to a single value: a path, `{"$var": path}` or `{"$expr": rhai}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ValueRef {
    Expr {
        #[serde(rename = "$expr")]
        expr: String,
    },
    Var {
        #[serde(rename = "$var")]
        var: String,
    },
    Path(String),
}

impl ValueRef {
    pub fn expression(&self) -> Option<&str> {
        match self {
            ValueRef::Expr { expr } => Some(expr.as_str()),
            _ => None,
        }
    }

    /// Resolve to a value, `None` when undefined or when the expression fails.
    pub fn resolve(&self, engine: &ExpressionEngine, ctx: &EvaluationContext) -> Option<Value> {
        match self {
            ValueRef::Path(path) | ValueRef::Var { var: path } => ctx.lookup(path).cloned(),
            ValueRef::Expr { expr } => match engine.evaluate(expr, ctx) {
                Ok(Value::Null) => None,
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!(expr = %expr, error = %err.message, "value expression failed; treating as undefined");
                    None
                }
            },
        }
    }
}

/// Boolean predicate authored on Condition nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Always(bool),
    Exists(String),
    Missing(String),
    Compare(Comparison),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    Expr(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Comparison {
    pub path: String,
    pub op: CompareOp,
    /// Literal, `{"$var": path}` or `{"$expr": ...}`.
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Matches,
}

impl Predicate {
    pub fn evaluate(&self, engine: &ExpressionEngine, ctx: &EvaluationContext) -> bool {
        match self {
            Predicate::Always(flag) => *flag,
            Predicate::Exists(path) => matches!(ctx.lookup(path), Some(v) if !v.is_null()),
            Predicate::Missing(path) => !matches!(ctx.lookup(path), Some(v) if !v.is_null()),
            Predicate::Compare(cmp) => {
                let left = ctx.lookup(&cmp.path).cloned();
                let right = resolve_operand(&cmp.value, engine, ctx);
                compare(left.as_ref(), cmp.op, right.as_ref())
            }
            Predicate::All(items) => items.iter().all(|p| p.evaluate(engine, ctx)),
            Predicate::Any(items) => items.iter().any(|p| p.evaluate(engine, ctx)),
            Predicate::Not(inner) => !inner.evaluate(engine, ctx),
            Predicate::Expr(expr) => engine.evaluate_bool(expr, ctx),
        }
    }

    /// Every free-form expression and regex literal in the predicate tree.
    pub fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Expr(expr) => out.push(expr.as_str()),
            Predicate::Compare(cmp) => {
                if let Some(Value::String(expr)) = cmp.value.get("$expr") {
                    out.push(expr.as_str());
                }
            }
            Predicate::All(items) | Predicate::Any(items) => {
                for item in items {
                    item.collect_expressions(out);
                }
            }
            Predicate::Not(inner) => inner.collect_expressions(out),
            _ => {}
        }
    }

    /// Regex literals used by `matches` comparisons.
    pub fn collect_patterns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare(cmp) if cmp.op == CompareOp::Matches => {
                if let Value::String(pattern) = &cmp.value {
                    out.push(pattern.as_str());
                }
            }
            Predicate::All(items) | Predicate::Any(items) => {
                for item in items {
                    item.collect_patterns(out);
                }
            }
            Predicate::Not(inner) => inner.collect_patterns(out),
            _ => {}
        }
    }
}

fn resolve_operand(
    value: &Value,
    engine: &ExpressionEngine,
    ctx: &EvaluationContext,
) -> Option<Value> {
    if let Value::Object(map) = value {
        if map.len() == 1 {
            if let Some(Value::String(path)) = map.get("$var") {
                return ctx.lookup(path).cloned();
            }
            if let Some(Value::String(expr)) = map.get("$expr") {
                return engine.evaluate(expr, ctx).ok();
            }
        }
    }
    Some(value.clone())
}

/// Compare two operands. Undefined on either side is always `false`.
pub fn compare(left: Option<&Value>, op: CompareOp, right: Option<&Value>) -> bool {
    let (Some(left), Some(right)) = (left, right) else {
        return false;
    };
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt => order(left, right) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            order(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => order(left, right) == Some(Ordering::Less),
        CompareOp::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Contains => match (left, right) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
        CompareOp::StartsWith => match (left, right) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        CompareOp::EndsWith => match (left, right) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        CompareOp::In => match right {
            Value::Array(items) => items.iter().any(|item| values_equal(left, item)),
            Value::String(s) => left.as_str().map(|l| s.contains(l)).unwrap_or(false),
            _ => false,
        },
        CompareOp::Matches => match (left, right) {
            (Value::String(s), Value::String(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(s))
                .unwrap_or(false),
            _ => false,
        },
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Expression evaluation engine using a locked-down Rhai configuration.
pub struct ExpressionEngine {
    engine: Engine,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        let mut engine = Engine::new_raw();
        engine.set_max_operations(50_000);
        engine.set_max_call_levels(64);
        engine.set_max_expr_depths(64, 64);
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});
        engine.set_fail_on_invalid_map_property(true);
        // registered overloads must win over the built-in `() == ()`
        engine.set_fast_operators(false);
        for op in ["==", "!=", "<", ">", "<=", ">="] {
            engine.register_fn(op, undefined_left);
            engine.register_fn(op, undefined_right);
        }
        ExpressionEngine { engine }
    }
}

fn undefined_left(_: (), _: Dynamic) -> Result<bool, Box<EvalAltResult>> {
    Err("comparison with an undefined value".into())
}

fn undefined_right(_: Dynamic, _: ()) -> Result<bool, Box<EvalAltResult>> {
    Err("comparison with an undefined value".into())
}

impl ExpressionEngine {
    /// Compile the given expression string into an AST.
    pub fn compile(&self, expr: &str) -> Result<AST, AppError> {
        self.engine.compile(expr).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("expression compile error: {}", err),
            )
            .with_code("FLOW-EXPR-001")
        })
    }

    /// Evaluate the given expression string against the provided context.
    pub fn evaluate(&self, expr: &str, ctx: &EvaluationContext) -> Result<Value, AppError> {
        let mut scope = Scope::new();
        scope.push_dynamic("vars", to_dynamic(&ctx.vars));
        scope.push_dynamic("trigger", to_dynamic(&ctx.trigger));
        scope.push_dynamic("nodes", to_dynamic(&ctx.nodes));

        let result = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, expr)
            .map_err(|err| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("expression execution error: {}", err),
                )
                .with_code("FLOW-EXPR-002")
            })?;
        Ok(from_dynamic(result))
    }

    /// Evaluate as a condition: errors and non-boolean results are `false`.
    pub fn evaluate_bool(&self, expr: &str, ctx: &EvaluationContext) -> bool {
        match self.evaluate(expr, ctx) {
            Ok(Value::Bool(flag)) => flag,
            Ok(other) => {
                tracing::debug!(expr = %expr, result = %other, "condition did not return bool");
                false
            }
            Err(err) => {
                tracing::debug!(expr = %expr, error = %err.message, "condition failed");
                false
            }
        }
    }
}

/// Resolve `$expr` / `$var` placeholders anywhere inside a config value.
///
/// An undefined `$var` resolves to `null`; a failing `$expr` is an error so the
/// evaluator can fail the node with the expression message.
pub fn resolve_value(
    value: &Value,
    engine: &ExpressionEngine,
    ctx: &EvaluationContext,
) -> Result<Value, AppError> {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(expr)) = map.get("$expr") {
                    return engine.evaluate(expr, ctx);
                }
                if let Some(Value::String(path)) = map.get("$var") {
                    return Ok(ctx.lookup(path).cloned().unwrap_or(Value::Null));
                }
            }
            let mut resolved = JsonMap::new();
            for (key, child) in map {
                resolved.insert(key.clone(), resolve_value(child, engine, ctx)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => {
            let mut collection = Vec::with_capacity(items.len());
            for item in items {
                collection.push(resolve_value(item, engine, ctx)?);
            }
            Ok(Value::Array(collection))
        }
        other => Ok(other.clone()),
    }
}

/// Collect every `$expr` string embedded in a config value.
pub fn collect_expression_strings<'a>(value: &'a Value, expressions: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(expr)) = map.get("$expr") {
                    expressions.push(expr.as_str());
                    return;
                }
            }
            for child in map.values() {
                collect_expression_strings(child, expressions);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_expression_strings(item, expressions);
            }
        }
        _ => {}
    }
}

/// Render a resolved value as message text.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::from(0_i64)
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            let arr: Array = items.iter().map(to_dynamic).collect();
            Dynamic::from_array(arr)
        }
        Value::Object(map) => {
            let mut rhai_map = Map::new();
            for (key, value) in map {
                rhai_map.insert(key.into(), to_dynamic(value));
            }
            Dynamic::from_map(rhai_map)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::Number(Number::from(i));
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        if let Some(num) = Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Value::String(s);
    }
    if let Some(arr) = value.clone().try_cast::<Array>() {
        return Value::Array(arr.into_iter().map(from_dynamic).collect());
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let mut json_map = JsonMap::new();
        for (key, value) in map {
            json_map.insert(key.into(), from_dynamic(value));
        }
        return Value::Object(json_map);
    }
    Value::Null
}
