//! AI-assisted nodes. Outcomes and confidence scores are opaque data; the only
//! policy applied here is the confidence threshold, which sends anything
//! uncertain, unknown or unscored to the fallback label.

use super::{EvalContext, EvalResult};
use crate::core::flow::effects::EffectPayload;
use crate::core::flow::schema::{AiDecisionConfig, AiRouteConfig, AiToolCallConfig, GuardrailConfig};
use serde_json::{json, Value};

pub fn decision(ctx: &EvalContext<'_>, cfg: &AiDecisionConfig) -> EvalResult {
    if let Some(result) = ctx.result() {
        let outcome = result.get("outcome").and_then(Value::as_str);
        let confidence = result.get("confidence").and_then(Value::as_f64);
        let threshold = cfg.min_confidence.unwrap_or(ctx.settings.min_confidence);
        let label = match (outcome, confidence) {
            (Some(outcome), Some(score)) if score >= threshold && ctx.has_label(outcome) => outcome,
            _ => cfg.fallback_label.as_str(),
        };
        tracing::info!(
            node_id = %ctx.node_id(),
            outcome = ?outcome,
            confidence = ?confidence,
            threshold,
            label,
            "AI decision routed"
        );
        return EvalResult::Continue(Some(label.to_string()));
    }
    match context_value(ctx, &cfg.context) {
        Ok(context) => ctx.dispatch_ai(EffectPayload::AiDecide { context }, cfg.mode),
        Err(result) => result,
    }
}

pub fn route(ctx: &EvalContext<'_>, cfg: &AiRouteConfig) -> EvalResult {
    if let Some(result) = ctx.result() {
        let label = result.get("label").and_then(Value::as_str);
        let confidence = result.get("confidence").and_then(Value::as_f64);
        let confident = confidence
            .map(|score| score >= ctx.settings.min_confidence)
            .unwrap_or(true);
        let chosen = match label {
            Some(label) if confident && cfg.intents.contains_key(label) && ctx.has_label(label) => label,
            _ => cfg.fallback_label.as_str(),
        };
        tracing::info!(node_id = %ctx.node_id(), label = ?label, chosen, "AI route resolved");
        return EvalResult::Continue(Some(chosen.to_string()));
    }
    match context_value(ctx, &cfg.input) {
        Ok(input) => ctx.dispatch_ai(
            EffectPayload::AiRoute {
                input,
                intents: cfg.intents.clone(),
            },
            cfg.mode,
        ),
        Err(result) => result,
    }
}

pub fn tool_call(ctx: &EvalContext<'_>, cfg: &AiToolCallConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    match ctx.resolve(&cfg.args) {
        Ok(args) => ctx.dispatch_ai(
            EffectPayload::AiToolCall {
                tool: cfg.tool.clone(),
                args,
            },
            cfg.mode,
        ),
        Err(reason) => EvalResult::Fail(reason),
    }
}

/// Pass only when a confidence score exists and meets the threshold.
pub fn guardrail(ctx: &EvalContext<'_>, cfg: &GuardrailConfig) -> EvalResult {
    let confidence = match (&cfg.confidence, &cfg.source) {
        (Some(reference), _) => reference
            .resolve(ctx.expressions, &ctx.scope())
            .and_then(|value| value.as_f64()),
        // only the source's latest visit counts; an older score is stale
        (None, Some(source)) => ctx
            .run
            .current_result(source)
            .and_then(|result| result.get("confidence"))
            .and_then(Value::as_f64),
        (None, None) => None,
    };
    let threshold = cfg.threshold.unwrap_or(ctx.settings.min_confidence);
    let passed = confidence.map(|score| score >= threshold).unwrap_or(false);
    let label = if passed {
        &cfg.pass_label
    } else {
        &cfg.fallback_label
    };
    tracing::info!(
        node_id = %ctx.node_id(),
        confidence = ?confidence,
        threshold,
        passed,
        "guardrail evaluated"
    );
    EvalResult::Continue(Some(label.clone()))
}

/// Resolve an AI request context, defaulting to the trigger payload and run variables.
fn context_value(ctx: &EvalContext<'_>, raw: &Value) -> Result<Value, EvalResult> {
    if raw.is_null() {
        return Ok(json!({
            "trigger": ctx.run.trigger_payload,
            "vars": ctx.run.variables,
        }));
    }
    ctx.resolve(raw).map_err(EvalResult::Fail)
}
