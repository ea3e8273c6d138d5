//! In-process collaborators that record every externally visible effect and
//! honour idempotency keys. Used by tests and dry runs.

use crate::core::flow::dispatcher::{
    AiDecision, AiProvider, AiRouteResult, CollaboratorError, DeliveryReceipt, HttpResponse,
    HttpTransport, MessagingChannel, Ticketing,
};
use crate::core::flow::effects::{EffectPayload, HttpCall};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted failures and latency shared by the in-memory collaborators.
#[derive(Default)]
pub struct FailureScript {
    failures: Mutex<VecDeque<CollaboratorError>>,
    delay: Mutex<Option<Duration>>,
}

impl FailureScript {
    /// Fail the next calls, in order, with the given errors.
    pub fn push(&self, error: CollaboratorError) {
        guard(&self.failures).push_back(error);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *guard(&self.delay) = delay;
    }

    async fn before_call(&self) -> Result<(), CollaboratorError> {
        let delay = *guard(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match guard(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub idempotency_key: String,
    pub channel: String,
    pub to: Value,
    pub content: String,
}

#[derive(Default)]
struct MessagingState {
    sent: Vec<SentMessage>,
    receipts: HashMap<String, DeliveryReceipt>,
    attempts: usize,
}

/// Records delivered messages; a repeated key returns the original receipt.
#[derive(Default)]
pub struct RecordingMessaging {
    state: Mutex<MessagingState>,
    pub failures: FailureScript,
}

impl RecordingMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        guard(&self.state).sent.clone()
    }

    /// Calls received, including duplicates and failed attempts.
    pub fn attempts(&self) -> usize {
        guard(&self.state).attempts
    }
}

#[async_trait]
impl MessagingChannel for RecordingMessaging {
    async fn send_message(
        &self,
        idempotency_key: &str,
        channel: &str,
        to: &Value,
        content: &str,
    ) -> Result<DeliveryReceipt, CollaboratorError> {
        guard(&self.state).attempts += 1;
        self.failures.before_call().await?;
        let mut state = guard(&self.state);
        if let Some(receipt) = state.receipts.get(idempotency_key) {
            let mut receipt = receipt.clone();
            receipt.duplicate = true;
            return Ok(receipt);
        }
        let receipt = DeliveryReceipt {
            message_id: format!("msg-{}", state.sent.len() + 1),
            channel: channel.to_string(),
            duplicate: false,
        };
        state
            .receipts
            .insert(idempotency_key.to_string(), receipt.clone());
        state.sent.push(SentMessage {
            idempotency_key: idempotency_key.to_string(),
            channel: channel.to_string(),
            to: to.clone(),
            content: content.to_string(),
        });
        Ok(receipt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub fields: Value,
}

#[derive(Default)]
struct TicketState {
    tickets: Vec<TicketRecord>,
    created_by_key: HashMap<String, String>,
    applied_updates: HashMap<String, String>,
    updates: Vec<(String, Value)>,
}

/// Ticket system double; creation and updates are de-duplicated by key.
#[derive(Default)]
pub struct MemoryTicketing {
    state: Mutex<TicketState>,
    pub failures: FailureScript,
}

impl MemoryTicketing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tickets(&self) -> Vec<TicketRecord> {
        guard(&self.state).tickets.clone()
    }

    pub fn updates(&self) -> Vec<(String, Value)> {
        guard(&self.state).updates.clone()
    }
}

#[async_trait]
impl Ticketing for MemoryTicketing {
    async fn create_ticket(
        &self,
        idempotency_key: &str,
        fields: &Value,
    ) -> Result<String, CollaboratorError> {
        self.failures.before_call().await?;
        let mut state = guard(&self.state);
        if let Some(existing) = state.created_by_key.get(idempotency_key) {
            return Ok(existing.clone());
        }
        let ticket_id = format!("T-{}", 1000 + state.tickets.len() + 1);
        state
            .created_by_key
            .insert(idempotency_key.to_string(), ticket_id.clone());
        state.tickets.push(TicketRecord {
            ticket_id: ticket_id.clone(),
            fields: fields.clone(),
        });
        Ok(ticket_id)
    }

    async fn update_ticket(
        &self,
        idempotency_key: &str,
        ticket_id: &str,
        fields: &Value,
    ) -> Result<(), CollaboratorError> {
        self.failures.before_call().await?;
        let mut state = guard(&self.state);
        if !state.tickets.iter().any(|t| t.ticket_id == ticket_id) {
            return Err(CollaboratorError::Permanent(format!(
                "ticket {} does not exist",
                ticket_id
            )));
        }
        if state.applied_updates.contains_key(idempotency_key) {
            return Ok(());
        }
        state
            .applied_updates
            .insert(idempotency_key.to_string(), ticket_id.to_string());
        state.updates.push((ticket_id.to_string(), fields.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct HttpState {
    calls: Vec<(String, HttpCall)>,
    responses: HashMap<String, HttpResponse>,
    routes: HashMap<String, HttpResponse>,
}

/// HTTP double returning canned responses per URL (200 `{"ok": true}` otherwise).
#[derive(Default)]
pub struct MemoryHttpTransport {
    state: Mutex<HttpState>,
    pub failures: FailureScript,
}

impl MemoryHttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: HttpResponse) {
        guard(&self.state).routes.insert(url.to_string(), response);
    }

    /// Distinct requests performed (duplicates by key excluded).
    pub fn calls(&self) -> Vec<(String, HttpCall)> {
        guard(&self.state).calls.clone()
    }
}

#[async_trait]
impl HttpTransport for MemoryHttpTransport {
    async fn request(
        &self,
        idempotency_key: &str,
        call: &HttpCall,
    ) -> Result<HttpResponse, CollaboratorError> {
        self.failures.before_call().await?;
        let mut state = guard(&self.state);
        if let Some(response) = state.responses.get(idempotency_key) {
            return Ok(response.clone());
        }
        let response = state.routes.get(&call.url).cloned().unwrap_or(HttpResponse {
            status: 200,
            headers: IndexMap::new(),
            body: json!({ "ok": true }),
        });
        state
            .responses
            .insert(idempotency_key.to_string(), response.clone());
        state
            .calls
            .push((idempotency_key.to_string(), call.clone()));
        Ok(response)
    }
}

#[derive(Default)]
struct AiState {
    decisions: VecDeque<AiDecision>,
    routes: VecDeque<AiRouteResult>,
    tools: HashMap<String, Value>,
    submitted: Vec<(String, EffectPayload)>,
    answered: HashMap<String, Value>,
    calls: usize,
}

/// AI provider that answers from a script; unscripted decisions have no confidence.
#[derive(Default)]
pub struct ScriptedAi {
    state: Mutex<AiState>,
    pub failures: FailureScript,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_decision(&self, outcome: &str, confidence: Option<f64>) {
        guard(&self.state).decisions.push_back(AiDecision {
            outcome: outcome.to_string(),
            confidence,
        });
    }

    pub fn push_route(&self, label: &str, confidence: Option<f64>) {
        guard(&self.state).routes.push_back(AiRouteResult {
            label: label.to_string(),
            confidence,
        });
    }

    pub fn set_tool_result(&self, tool: &str, result: Value) {
        guard(&self.state).tools.insert(tool.to_string(), result);
    }

    pub fn submitted(&self) -> Vec<(String, EffectPayload)> {
        guard(&self.state).submitted.clone()
    }

    /// Provider calls that produced a fresh answer.
    pub fn calls(&self) -> usize {
        guard(&self.state).calls
    }

    fn answer<T, F>(&self, key: &str, produce: F) -> Result<T, CollaboratorError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce(&mut AiState) -> T,
    {
        let mut state = guard(&self.state);
        if let Some(previous) = state.answered.get(key) {
            return serde_json::from_value(previous.clone())
                .map_err(|err| CollaboratorError::Permanent(err.to_string()));
        }
        state.calls += 1;
        let answer = produce(&mut *state);
        let recorded = serde_json::to_value(&answer)
            .map_err(|err| CollaboratorError::Permanent(err.to_string()))?;
        state.answered.insert(key.to_string(), recorded);
        Ok(answer)
    }
}

#[async_trait]
impl AiProvider for ScriptedAi {
    async fn decide(
        &self,
        idempotency_key: &str,
        _context: &Value,
    ) -> Result<AiDecision, CollaboratorError> {
        self.failures.before_call().await?;
        self.answer(idempotency_key, |state| {
            state.decisions.pop_front().unwrap_or(AiDecision {
                outcome: "unknown".to_string(),
                confidence: None,
            })
        })
    }

    async fn route(
        &self,
        idempotency_key: &str,
        _input: &Value,
        _intents: &IndexMap<String, String>,
    ) -> Result<AiRouteResult, CollaboratorError> {
        self.failures.before_call().await?;
        self.answer(idempotency_key, |state| {
            state.routes.pop_front().unwrap_or(AiRouteResult {
                label: "unknown".to_string(),
                confidence: None,
            })
        })
    }

    async fn call_tool(
        &self,
        idempotency_key: &str,
        tool: &str,
        args: &Value,
    ) -> Result<Value, CollaboratorError> {
        self.failures.before_call().await?;
        self.answer(idempotency_key, |state| {
            state
                .tools
                .get(tool)
                .cloned()
                .unwrap_or_else(|| json!({ "tool": tool, "args": args }))
        })
    }

    async fn submit(
        &self,
        idempotency_key: &str,
        payload: &EffectPayload,
    ) -> Result<(), CollaboratorError> {
        self.failures.before_call().await?;
        let mut state = guard(&self.state);
        if !state.submitted.iter().any(|(key, _)| key == idempotency_key) {
            state
                .submitted
                .push((idempotency_key.to_string(), payload.clone()));
        }
        Ok(())
    }
}
