use super::{EvalContext, EvalResult};
use crate::core::flow::schema::TriggerConfig;

/// The trigger already matched when the run was created; it only hands over to its edge.
pub fn evaluate(_ctx: &EvalContext<'_>, _cfg: &TriggerConfig) -> EvalResult {
    EvalResult::Continue(None)
}
