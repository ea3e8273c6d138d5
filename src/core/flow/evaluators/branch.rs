use super::{EvalContext, EvalResult};
use crate::core::flow::schema::{ConditionConfig, SwitchConfig};
use serde_json::Value;

/// Routes on `"true"` / `"false"`. Undefined operands make the predicate false.
pub fn condition(ctx: &EvalContext<'_>, cfg: &ConditionConfig) -> EvalResult {
    let outcome = cfg.when.evaluate(ctx.expressions, &ctx.scope());
    tracing::debug!(node_id = %ctx.node_id(), outcome, "condition evaluated");
    EvalResult::Continue(Some(outcome.to_string()))
}

/// Routes on the discriminant's string form. An undefined discriminant
/// carries no label and falls through to `default_to`.
pub fn switch(ctx: &EvalContext<'_>, cfg: &SwitchConfig) -> EvalResult {
    let label = cfg
        .on
        .resolve(ctx.expressions, &ctx.scope())
        .and_then(|value| discriminant(&value));
    tracing::debug!(node_id = %ctx.node_id(), label = ?label, "switch evaluated");
    EvalResult::Continue(label)
}

fn discriminant(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
