use super::{resolve_object, EvalContext, EvalResult, FailReason};
use crate::core::flow::effects::EffectPayload;
use crate::core::flow::schema::{TicketCreateConfig, TicketUpdateConfig};
use serde_json::Value;

pub fn create(ctx: &EvalContext<'_>, cfg: &TicketCreateConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    match resolve_object(ctx, &cfg.fields, "fields") {
        Ok(fields) => ctx.dispatch(EffectPayload::CreateTicket { fields }),
        Err(reason) => EvalResult::Fail(reason),
    }
}

pub fn update(ctx: &EvalContext<'_>, cfg: &TicketUpdateConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    let resolved = ticket_id(ctx, &cfg.ticket_id)
        .and_then(|id| Ok((id, resolve_object(ctx, &cfg.fields, "fields")?)));
    match resolved {
        Ok((ticket_id, fields)) => ctx.dispatch(EffectPayload::UpdateTicket { ticket_id, fields }),
        Err(reason) => EvalResult::Fail(reason),
    }
}

fn ticket_id(ctx: &EvalContext<'_>, raw: &Value) -> Result<String, FailReason> {
    match ctx.resolve(raw)? {
        Value::String(id) if !id.is_empty() => Ok(id),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(FailReason::new(
            "FLOW-EVAL-004",
            format!("ticket_id resolved to {}", other),
        )),
    }
}
