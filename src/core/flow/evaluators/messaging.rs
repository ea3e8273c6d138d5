use super::{EvalContext, EvalResult, FailReason};
use crate::core::flow::effects::EffectPayload;
use crate::core::flow::expression::render_text;
use crate::core::flow::schema::{NotifyConfig, SendMessageConfig};
use serde_json::Value;

pub fn send_message(ctx: &EvalContext<'_>, cfg: &SendMessageConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    match build_message(ctx, cfg) {
        Ok(payload) => ctx.dispatch(payload),
        Err(reason) => EvalResult::Fail(reason),
    }
}

fn build_message(ctx: &EvalContext<'_>, cfg: &SendMessageConfig) -> Result<EffectPayload, FailReason> {
    let trigger = &ctx.run.trigger_payload;
    let channel = match &cfg.channel {
        Some(channel) => channel.clone(),
        None => trigger
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                FailReason::new(
                    "FLOW-EVAL-003",
                    "no channel configured and the trigger payload has none",
                )
            })?,
    };
    let to = match &cfg.to {
        Some(to) => ctx.resolve(to)?,
        None => trigger.get("from").cloned().unwrap_or(Value::Null),
    };
    if to.is_null() {
        return Err(FailReason::new(
            "FLOW-EVAL-003",
            "message recipient resolved to nothing",
        ));
    }
    let content = render_text(&ctx.resolve(&cfg.content)?);
    Ok(EffectPayload::SendMessage {
        channel,
        to,
        content,
    })
}

pub fn notify(ctx: &EvalContext<'_>, cfg: &NotifyConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    let resolved = ctx
        .resolve(&cfg.target)
        .and_then(|target| Ok((target, ctx.resolve(&cfg.message)?)));
    match resolved {
        Ok((target, message)) => ctx.dispatch(EffectPayload::Notify {
            channel: cfg.channel.clone(),
            target,
            message: render_text(&message),
        }),
        Err(reason) => EvalResult::Fail(reason),
    }
}
