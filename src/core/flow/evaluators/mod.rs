//! Node evaluators: pure functions from run state to the next instruction.
//!
//! Evaluators never perform I/O and never mutate the run. An effectful node
//! returns [`EvalResult::Dispatch`] on its first evaluation for a visit; once
//! the scheduler has recorded the outcome for that visit, the same evaluator
//! returns [`EvalResult::Continue`].

use crate::core::config::EngineConfig;
use crate::core::error::AppError;
use crate::core::flow::effects::{idempotency_key, Completion, EffectPayload, EffectRequest};
use crate::core::flow::expression::{resolve_value, EvaluationContext, ExpressionEngine};
use crate::core::flow::run::{ExecutionRun, WaitTarget};
use crate::core::flow::schema::{AiMode, NodeConfig};
use crate::core::flow::validate::{ValidGraph, ValidNode};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;

pub mod ai;
pub mod branch;
pub mod end;
pub mod http;
pub mod messaging;
pub mod ticket;
pub mod trigger;
pub mod wait;

/// Instruction returned by an evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    /// Follow the outgoing edge matching the label (or the only edge).
    Continue(Option<String>),
    Suspend {
        target: WaitTarget,
        /// Ceiling after which the wait fails with `SuspendTimeout`.
        deadline: Option<DateTime<Utc>>,
    },
    Dispatch(EffectRequest),
    /// Reached an End node.
    Complete { outcome: Option<String> },
    Fail(FailReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailReason {
    pub code: String,
    pub message: String,
}

impl FailReason {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn from_error(err: AppError) -> Self {
        Self {
            code: "FLOW-EVAL-001".to_string(),
            message: err.message,
        }
    }
}

/// Engine-wide values evaluators need.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    pub min_confidence: f64,
    pub suspend_timeout: Duration,
}

impl EvalSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            min_confidence: config.ai.min_confidence,
            suspend_timeout: config.suspend_timeout(),
        }
    }
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

pub struct EvalContext<'a> {
    pub run: &'a ExecutionRun,
    pub node: &'a ValidNode,
    pub graph: &'a ValidGraph,
    pub now: DateTime<Utc>,
    pub settings: &'a EvalSettings,
    pub expressions: &'a ExpressionEngine,
}

impl<'a> EvalContext<'a> {
    pub fn node_id(&self) -> &str {
        &self.node.node.id
    }

    pub fn visit(&self) -> u32 {
        self.run.visits(self.node_id())
    }

    pub fn idempotency_key(&self) -> String {
        idempotency_key(&self.run.run_id, self.node_id(), self.visit())
    }

    /// Outcome recorded for this node's current visit.
    pub fn result(&self) -> Option<&'a Value> {
        self.run.current_result(&self.node.node.id)
    }

    pub fn scope(&self) -> EvaluationContext {
        EvaluationContext::new(
            Value::Object(self.run.variables.clone()),
            self.run.trigger_payload.clone(),
            self.run.nodes_value(),
        )
    }

    pub fn resolve(&self, value: &Value) -> Result<Value, FailReason> {
        resolve_value(value, self.expressions, &self.scope()).map_err(FailReason::from_error)
    }

    pub fn dispatch(&self, payload: EffectPayload) -> EvalResult {
        EvalResult::Dispatch(EffectRequest::immediate(self.idempotency_key(), payload))
    }

    pub fn dispatch_ai(&self, payload: EffectPayload, mode: AiMode) -> EvalResult {
        let completion = match mode {
            AiMode::Sync => Completion::Immediate,
            AiMode::Async => Completion::Callback,
        };
        EvalResult::Dispatch(EffectRequest {
            idempotency_key: self.idempotency_key(),
            payload,
            completion,
        })
    }

    /// True when the node has an outgoing edge with this label.
    pub fn has_label(&self, label: &str) -> bool {
        self.graph
            .outgoing(self.node_id())
            .iter()
            .any(|edge| edge.label.as_deref() == Some(label))
    }

    pub fn deadline_after(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| self.now.checked_add_signed(d))
    }
}

/// Evaluate the context's node through the kind table.
pub fn evaluate(ctx: &EvalContext<'_>) -> EvalResult {
    match &ctx.node.config {
        NodeConfig::TriggerChannel(cfg) => trigger::evaluate(ctx, cfg),
        NodeConfig::SendMessage(cfg) => messaging::send_message(ctx, cfg),
        NodeConfig::Notify(cfg) => messaging::notify(ctx, cfg),
        NodeConfig::Condition(cfg) => branch::condition(ctx, cfg),
        NodeConfig::Switch(cfg) => branch::switch(ctx, cfg),
        NodeConfig::Wait(cfg) => wait::evaluate(ctx, cfg),
        NodeConfig::TicketCreate(cfg) => ticket::create(ctx, cfg),
        NodeConfig::TicketUpdate(cfg) => ticket::update(ctx, cfg),
        NodeConfig::HttpRequest(cfg) => http::evaluate(ctx, cfg),
        NodeConfig::AiDecision(cfg) => ai::decision(ctx, cfg),
        NodeConfig::AiRoute(cfg) => ai::route(ctx, cfg),
        NodeConfig::AiToolCall(cfg) => ai::tool_call(ctx, cfg),
        NodeConfig::AiGuardrail(cfg) => ai::guardrail(ctx, cfg),
        NodeConfig::End(cfg) => end::evaluate(ctx, cfg),
    }
}

/// Resolved value that must be a JSON object.
pub(crate) fn resolve_object(ctx: &EvalContext<'_>, value: &Value, field: &str) -> Result<Value, FailReason> {
    match ctx.resolve(value)? {
        Value::Object(map) => Ok(Value::Object(map)),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(FailReason::new(
            "FLOW-EVAL-001",
            format!("{} must resolve to an object, got {}", field, other),
        )),
    }
}
