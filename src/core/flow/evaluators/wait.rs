use super::{EvalContext, EvalResult, FailReason};
use crate::core::flow::expression::render_text;
use crate::core::flow::run::WaitTarget;
use crate::core::flow::schema::WaitConfig;

/// Suspends on a timer or an external event key. The resume path records a
/// result for the visit, after which the wait continues along its edge.
pub fn evaluate(ctx: &EvalContext<'_>, cfg: &WaitConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    match suspension(ctx, cfg) {
        Ok(result) => result,
        Err(reason) => EvalResult::Fail(reason),
    }
}

fn suspension(ctx: &EvalContext<'_>, cfg: &WaitConfig) -> Result<EvalResult, FailReason> {
    if let Some(raw) = &cfg.duration {
        let duration = humantime::parse_duration(raw).map_err(|err| {
            FailReason::new("FLOW-EVAL-001", format!("invalid wait duration '{}': {}", raw, err))
        })?;
        let until = ctx.deadline_after(duration).ok_or_else(|| {
            FailReason::new("FLOW-EVAL-001", format!("wait duration '{}' overflows", raw))
        })?;
        return Ok(EvalResult::Suspend {
            target: WaitTarget::Until(until),
            deadline: None,
        });
    }

    let Some(event) = &cfg.event else {
        return Err(FailReason::new(
            "FLOW-EVAL-001",
            "wait has neither duration nor event",
        ));
    };
    let key = render_text(&ctx.resolve(event)?);
    if key.is_empty() {
        return Err(FailReason::new(
            "FLOW-EVAL-001",
            "wait event key resolved to an empty string",
        ));
    }
    let timeout = match &cfg.timeout {
        Some(raw) => humantime::parse_duration(raw).map_err(|err| {
            FailReason::new("FLOW-EVAL-001", format!("invalid wait timeout '{}': {}", raw, err))
        })?,
        None => ctx.settings.suspend_timeout,
    };
    Ok(EvalResult::Suspend {
        target: WaitTarget::ExternalEvent(key),
        deadline: ctx.deadline_after(timeout),
    })
}
