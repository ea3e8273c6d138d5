use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Deterministic key for one effect: the same run, node and visit always yield the same key.
pub fn idempotency_key(run_id: &Uuid, node_id: &str, visit: u32) -> String {
    format!("{}:{}:{}", run_id, node_id, visit)
}

/// How the scheduler learns that an effect finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The collaborator returns the outcome inline.
    Immediate,
    /// The collaborator accepts the request and delivers the outcome later,
    /// keyed by the idempotency key.
    Callback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Fully resolved instruction for a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectPayload {
    SendMessage {
        channel: String,
        to: Value,
        content: String,
    },
    Notify {
        channel: String,
        target: Value,
        message: String,
    },
    CreateTicket {
        fields: Value,
    },
    UpdateTicket {
        ticket_id: String,
        fields: Value,
    },
    Http(HttpCall),
    AiDecide {
        context: Value,
    },
    AiRoute {
        input: Value,
        intents: IndexMap<String, String>,
    },
    AiToolCall {
        tool: String,
        args: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    SendMessage,
    Notify,
    CreateTicket,
    UpdateTicket,
    Http,
    AiDecide,
    AiRoute,
    AiToolCall,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EffectKind::SendMessage => "send_message",
            EffectKind::Notify => "notify",
            EffectKind::CreateTicket => "create_ticket",
            EffectKind::UpdateTicket => "update_ticket",
            EffectKind::Http => "http",
            EffectKind::AiDecide => "ai_decide",
            EffectKind::AiRoute => "ai_route",
            EffectKind::AiToolCall => "ai_tool_call",
        };
        f.write_str(text)
    }
}

/// Ephemeral request produced by an evaluator. Only the key is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRequest {
    pub idempotency_key: String,
    pub payload: EffectPayload,
    pub completion: Completion,
}

impl EffectRequest {
    pub fn immediate(idempotency_key: String, payload: EffectPayload) -> Self {
        Self {
            idempotency_key,
            payload,
            completion: Completion::Immediate,
        }
    }

    pub fn kind(&self) -> EffectKind {
        match &self.payload {
            EffectPayload::SendMessage { .. } => EffectKind::SendMessage,
            EffectPayload::Notify { .. } => EffectKind::Notify,
            EffectPayload::CreateTicket { .. } => EffectKind::CreateTicket,
            EffectPayload::UpdateTicket { .. } => EffectKind::UpdateTicket,
            EffectPayload::Http(_) => EffectKind::Http,
            EffectPayload::AiDecide { .. } => EffectKind::AiDecide,
            EffectPayload::AiRoute { .. } => EffectKind::AiRoute,
            EffectPayload::AiToolCall { .. } => EffectKind::AiToolCall,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectOutcome {
    /// Effect finished; the value is recorded as the node's result.
    Completed(Value),
    /// Accepted for asynchronous completion.
    Accepted,
}
