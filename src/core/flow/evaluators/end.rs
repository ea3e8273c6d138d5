use super::{EvalContext, EvalResult};
use crate::core::flow::schema::EndConfig;

pub fn evaluate(_ctx: &EvalContext<'_>, cfg: &EndConfig) -> EvalResult {
    EvalResult::Complete {
        outcome: cfg.outcome.clone(),
    }
}
