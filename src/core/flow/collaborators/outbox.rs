#![allow(clippy::result_large_err)]

//! File-backed outbox used by the CLI: effects are written to
//! `<root>/outbox/effects.jsonl` instead of reaching real channels, and every
//! idempotency key is claimed exactly once under `<root>/outbox/keys/`.

use crate::core::error::AppError;
use crate::core::flow::dispatcher::{
    AiDecision, AiProvider, AiRouteResult, CollaboratorError, DeliveryReceipt, HttpResponse,
    HttpTransport, MessagingChannel, Ticketing,
};
use crate::core::flow::effects::{EffectPayload, HttpCall};
use crate::utils::{append_jsonl, read_json, read_jsonl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub idempotency_key: String,
    pub kind: String,
    pub request: Value,
    pub result: Value,
    pub recorded_at: DateTime<Utc>,
}

pub struct Outbox {
    root: PathBuf,
}

impl Outbox {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            root: state_dir.join("outbox"),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("effects.jsonl")
    }

    pub fn entries(&self) -> Result<Vec<OutboxEntry>, AppError> {
        read_jsonl(&self.log_path())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root
            .join("keys")
            .join(format!("{}.json", key_hash(key)))
    }

    /// Claim `key` and record the effect, or return the result recorded by an earlier claim.
    fn record(
        &self,
        key: &str,
        kind: &str,
        request: Value,
        result: Value,
    ) -> Result<Value, CollaboratorError> {
        self.claim(key, kind, request, result)
            .map_err(|err| CollaboratorError::Transient(err.message))
    }

    fn claim(&self, key: &str, kind: &str, request: Value, result: Value) -> Result<Value, AppError> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = OutboxEntry {
            idempotency_key: key.to_string(),
            kind: kind.to_string(),
            request,
            result,
            recorded_at: Utc::now(),
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&serde_json::to_vec_pretty(&entry)?)?;
                append_jsonl(&self.log_path(), &entry)?;
                tracing::info!(idempotency_key = %key, kind = %kind, "effect written to outbox");
                Ok(entry.result)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let previous: OutboxEntry = read_json(&path)?;
                tracing::debug!(idempotency_key = %key, "outbox key already claimed");
                Ok(previous.result)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn key_hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn short_id(prefix: &str, key: &str) -> String {
    format!("{}-{}", prefix, &key_hash(key)[..10])
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, CollaboratorError> {
    serde_json::from_value(value).map_err(|err| CollaboratorError::Permanent(err.to_string()))
}

#[async_trait]
impl MessagingChannel for Outbox {
    async fn send_message(
        &self,
        idempotency_key: &str,
        channel: &str,
        to: &Value,
        content: &str,
    ) -> Result<DeliveryReceipt, CollaboratorError> {
        let receipt = DeliveryReceipt {
            message_id: short_id("msg", idempotency_key),
            channel: channel.to_string(),
            duplicate: false,
        };
        let result = self.record(
            idempotency_key,
            "send_message",
            json!({ "channel": channel, "to": to, "content": content }),
            json!(receipt),
        )?;
        decode(result)
    }
}

#[async_trait]
impl Ticketing for Outbox {
    async fn create_ticket(
        &self,
        idempotency_key: &str,
        fields: &Value,
    ) -> Result<String, CollaboratorError> {
        let result = self.record(
            idempotency_key,
            "create_ticket",
            json!({ "fields": fields }),
            json!(short_id("T", idempotency_key)),
        )?;
        decode(result)
    }

    async fn update_ticket(
        &self,
        idempotency_key: &str,
        ticket_id: &str,
        fields: &Value,
    ) -> Result<(), CollaboratorError> {
        self.record(
            idempotency_key,
            "update_ticket",
            json!({ "ticket_id": ticket_id, "fields": fields }),
            Value::Null,
        )?;
        Ok(())
    }
}

#[async_trait]
impl HttpTransport for Outbox {
    async fn request(
        &self,
        idempotency_key: &str,
        call: &HttpCall,
    ) -> Result<HttpResponse, CollaboratorError> {
        let response = HttpResponse {
            status: 202,
            headers: IndexMap::new(),
            body: json!({ "outbox": true }),
        };
        let result = self.record(idempotency_key, "http", json!(call), json!(response))?;
        decode(result)
    }
}

/// Without an inference backend the outbox answers with no confidence, so guardrails take the fallback path.
#[async_trait]
impl AiProvider for Outbox {
    async fn decide(
        &self,
        idempotency_key: &str,
        context: &Value,
    ) -> Result<AiDecision, CollaboratorError> {
        let decision = AiDecision {
            outcome: "unavailable".to_string(),
            confidence: None,
        };
        let result = self.record(
            idempotency_key,
            "ai_decide",
            json!({ "context": context }),
            json!(decision),
        )?;
        decode(result)
    }

    async fn route(
        &self,
        idempotency_key: &str,
        input: &Value,
        intents: &IndexMap<String, String>,
    ) -> Result<AiRouteResult, CollaboratorError> {
        let route = AiRouteResult {
            label: "unavailable".to_string(),
            confidence: None,
        };
        let result = self.record(
            idempotency_key,
            "ai_route",
            json!({ "input": input, "intents": intents }),
            json!(route),
        )?;
        decode(result)
    }

    async fn call_tool(
        &self,
        idempotency_key: &str,
        tool: &str,
        args: &Value,
    ) -> Result<Value, CollaboratorError> {
        self.record(
            idempotency_key,
            "ai_tool_call",
            json!({ "tool": tool, "args": args }),
            Value::Null,
        )
    }

    async fn submit(
        &self,
        idempotency_key: &str,
        payload: &EffectPayload,
    ) -> Result<(), CollaboratorError> {
        self.record(idempotency_key, "ai_submit", json!(payload), Value::Null)?;
        Ok(())
    }
}
