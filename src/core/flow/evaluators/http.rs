use super::{EvalContext, EvalResult, FailReason};
use crate::core::flow::effects::{EffectPayload, HttpCall};
use crate::core::flow::expression::render_text;
use crate::core::flow::schema::HttpRequestConfig;
use indexmap::IndexMap;

pub fn evaluate(ctx: &EvalContext<'_>, cfg: &HttpRequestConfig) -> EvalResult {
    if ctx.result().is_some() {
        return EvalResult::Continue(None);
    }
    match build_call(ctx, cfg) {
        Ok(call) => ctx.dispatch(EffectPayload::Http(call)),
        Err(reason) => EvalResult::Fail(reason),
    }
}

fn build_call(ctx: &EvalContext<'_>, cfg: &HttpRequestConfig) -> Result<HttpCall, FailReason> {
    let url = render_text(&ctx.resolve(&cfg.url)?);
    let parsed = url::Url::parse(&url).map_err(|err| {
        FailReason::new("FLOW-EVAL-002", format!("malformed HTTP URL '{}': {}", url, err))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FailReason::new(
            "FLOW-EVAL-002",
            format!("unsupported URL scheme '{}'", parsed.scheme()),
        ));
    }
    let mut headers = IndexMap::new();
    for (name, value) in &cfg.headers {
        headers.insert(name.clone(), render_text(&ctx.resolve(value)?));
    }
    let body = match &cfg.body {
        Some(body) => Some(ctx.resolve(body)?),
        None => None,
    };
    Ok(HttpCall {
        method: cfg.method.to_ascii_uppercase(),
        url: parsed.to_string(),
        headers,
        body,
    })
}
