//! Effect execution through external collaborators.
//!
//! Every collaborator call carries the request's idempotency key and must
//! de-duplicate on it: a retry after a crash between "effect sent" and "run
//! saved" returns the original outcome instead of acting twice.

use crate::core::flow::effects::{
    Completion, EffectKind, EffectOutcome, EffectPayload, EffectRequest, HttpCall,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EffectError {
    #[error("{kind} timed out after {timeout_ms}ms")]
    Timeout { kind: EffectKind, timeout_ms: u64 },
    #[error("{kind} failed: {source}")]
    Collaborator {
        kind: EffectKind,
        #[source]
        source: CollaboratorError,
    },
}

impl EffectError {
    /// Whether the retry policy should try again.
    pub fn retryable(&self) -> bool {
        match self {
            EffectError::Timeout { .. } => true,
            EffectError::Collaborator { source, .. } => !matches!(source, CollaboratorError::Permanent(_)),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EffectError::Timeout { .. } => "FLOW-EFFECT-002",
            EffectError::Collaborator {
                source: CollaboratorError::Permanent(_),
                ..
            } => "FLOW-EFFECT-003",
            EffectError::Collaborator { .. } => "FLOW-EFFECT-001",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub channel: String,
    /// True when the key had already been delivered and the original receipt was returned.
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecision {
    pub outcome: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRouteResult {
    pub label: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[async_trait]
pub trait MessagingChannel: Send + Sync {
    async fn send_message(
        &self,
        idempotency_key: &str,
        channel: &str,
        to: &Value,
        content: &str,
    ) -> Result<DeliveryReceipt, CollaboratorError>;
}

#[async_trait]
pub trait Ticketing: Send + Sync {
    async fn create_ticket(
        &self,
        idempotency_key: &str,
        fields: &Value,
    ) -> Result<String, CollaboratorError>;

    async fn update_ticket(
        &self,
        idempotency_key: &str,
        ticket_id: &str,
        fields: &Value,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(
        &self,
        idempotency_key: &str,
        call: &HttpCall,
    ) -> Result<HttpResponse, CollaboratorError>;
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn decide(
        &self,
        idempotency_key: &str,
        context: &Value,
    ) -> Result<AiDecision, CollaboratorError>;

    async fn route(
        &self,
        idempotency_key: &str,
        input: &Value,
        intents: &IndexMap<String, String>,
    ) -> Result<AiRouteResult, CollaboratorError>;

    async fn call_tool(
        &self,
        idempotency_key: &str,
        tool: &str,
        args: &Value,
    ) -> Result<Value, CollaboratorError>;

    /// Queue an asynchronous AI request; the result arrives later as an event keyed by `idempotency_key`.
    async fn submit(
        &self,
        idempotency_key: &str,
        payload: &EffectPayload,
    ) -> Result<(), CollaboratorError>;
}

/// Routes effect requests to collaborators with a bounded per-call timeout.
#[derive(Clone)]
pub struct EffectDispatcher {
    messaging: Arc<dyn MessagingChannel>,
    ticketing: Arc<dyn Ticketing>,
    http: Arc<dyn HttpTransport>,
    ai: Arc<dyn AiProvider>,
    timeout: Duration,
}

impl EffectDispatcher {
    pub fn new(
        messaging: Arc<dyn MessagingChannel>,
        ticketing: Arc<dyn Ticketing>,
        http: Arc<dyn HttpTransport>,
        ai: Arc<dyn AiProvider>,
    ) -> Self {
        Self {
            messaging,
            ticketing,
            http,
            ai,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn dispatch(&self, request: &EffectRequest) -> Result<EffectOutcome, EffectError> {
        let kind = request.kind();
        tracing::debug!(
            idempotency_key = %request.idempotency_key,
            kind = %kind,
            "dispatching effect"
        );
        match tokio::time::timeout(self.timeout, self.call(request)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(CollaboratorError::Timeout(_))) | Err(_) => Err(EffectError::Timeout {
                kind,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Ok(Err(source)) => Err(EffectError::Collaborator { kind, source }),
        }
    }

    async fn call(&self, request: &EffectRequest) -> Result<EffectOutcome, CollaboratorError> {
        let key = request.idempotency_key.as_str();
        if request.completion == Completion::Callback {
            self.ai.submit(key, &request.payload).await?;
            return Ok(EffectOutcome::Accepted);
        }
        let value = match &request.payload {
            EffectPayload::SendMessage {
                channel,
                to,
                content,
            } => {
                let receipt = self.messaging.send_message(key, channel, to, content).await?;
                to_value(&receipt)
            }
            EffectPayload::Notify {
                channel,
                target,
                message,
            } => {
                let receipt = self
                    .messaging
                    .send_message(key, channel, target, message)
                    .await?;
                to_value(&receipt)
            }
            EffectPayload::CreateTicket { fields } => {
                let ticket_id = self.ticketing.create_ticket(key, fields).await?;
                json!({ "ticket_id": ticket_id })
            }
            EffectPayload::UpdateTicket { ticket_id, fields } => {
                self.ticketing.update_ticket(key, ticket_id, fields).await?;
                json!({ "ticket_id": ticket_id, "updated": true })
            }
            EffectPayload::Http(call) => {
                let response = self.http.request(key, call).await?;
                to_value(&response)
            }
            EffectPayload::AiDecide { context } => to_value(&self.ai.decide(key, context).await?),
            EffectPayload::AiRoute { input, intents } => {
                to_value(&self.ai.route(key, input, intents).await?)
            }
            EffectPayload::AiToolCall { tool, args } => {
                let result = self.ai.call_tool(key, tool, args).await?;
                json!({ "result": result })
            }
        };
        Ok(EffectOutcome::Completed(value))
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
