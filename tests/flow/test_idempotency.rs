#[path = "../support/mod.rs"]
mod support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use omniflow::core::flow::run::NewRun;
use omniflow::core::flow::{
    idempotency_key, ExecutionRun, MemoryRunStore, RunHistoryEntry, RunStatus, RunStore,
};
use omniflow::core::{AppError, ErrorCategory};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{fast_config, whatsapp_event, Harness};
use uuid::Uuid;

/// Loses the first save that clears a pending effect key, as if the process
/// died right after the collaborator acknowledged the effect.
struct CrashAfterDispatch {
    inner: MemoryRunStore,
    armed: AtomicBool,
}

impl CrashAfterDispatch {
    fn new() -> Self {
        Self {
            inner: MemoryRunStore::new(),
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RunStore for CrashAfterDispatch {
    async fn create(&self, new_run: NewRun, now: DateTime<Utc>) -> Result<ExecutionRun, AppError> {
        self.inner.create(new_run, now).await
    }

    async fn load(&self, run_id: Uuid) -> Result<ExecutionRun, AppError> {
        self.inner.load(run_id).await
    }

    async fn save(&self, run: ExecutionRun, expected_version: u64) -> Result<ExecutionRun, AppError> {
        let stored = self.inner.load(run.run_id).await?;
        if stored.pending_effect_idempotency_key.is_some()
            && run.pending_effect_idempotency_key.is_none()
            && self.armed.swap(false, Ordering::SeqCst)
        {
            return Err(AppError::new(ErrorCategory::IoError, "process crashed before commit"));
        }
        self.inner.save(run, expected_version).await
    }

    async fn find_due_waits(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        self.inner.find_due_waits(now).await
    }

    async fn find_by_event_key(&self, key: &str) -> Result<Vec<Uuid>, AppError> {
        self.inner.find_by_event_key(key).await
    }

    async fn history(&self, run_id: Uuid) -> Result<Vec<RunHistoryEntry>, AppError> {
        self.inner.history(run_id).await
    }

    async fn list(&self) -> Result<Vec<ExecutionRun>, AppError> {
        self.inner.list().await
    }
}

fn effect_graph(effect: Value) -> Value {
    json!({
        "id": "single-effect",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "*"}},
            effect,
            {"id": "done", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "effect"},
            {"id": "e2", "source": "effect", "target": "done"}
        ]
    })
}

async fn crashed_run(harness: &Harness) -> ExecutionRun {
    let result = harness
        .engine
        .trigger_event("single-effect", whatsapp_event("+15550100", "hi"))
        .await;
    let err = result.expect_err("the commit after dispatch should have been lost");
    let runs = harness.store.list().await.unwrap();
    assert_eq!(runs.len(), 1);
    let run = runs.into_iter().next().unwrap();
    // the caller can still find the run it created
    assert_eq!(err.context.get("run_id"), Some(&run.run_id.to_string()));
    run
}

#[tokio::test]
async fn message_is_not_resent_after_crash() {
    let harness = Harness::with_store(Arc::new(CrashAfterDispatch::new()), fast_config());
    harness
        .publish(effect_graph(json!({
            "id": "effect", "kind": "SendMessage",
            "config": {"content": "Your order has shipped.", "output_var": "receipt"}
        })))
        .await;

    let run = crashed_run(&harness).await;
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.current_node_id, "effect");
    let key = idempotency_key(&run.run_id, "effect", 1);
    assert_eq!(run.pending_effect_idempotency_key.as_deref(), Some(key.as_str()));
    assert_eq!(harness.messaging.sent().len(), 1);

    let status = harness.engine.drive(run.run_id).await.unwrap();
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(harness.messaging.attempts(), 2);
    let sent = harness.messaging.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].idempotency_key, key);

    let run = harness.engine.load_run(run.run_id).await.unwrap();
    assert_eq!(run.variables["receipt"]["duplicate"], json!(true));
    assert!(run.pending_effect_idempotency_key.is_none());
}

#[tokio::test]
async fn ticket_is_not_recreated_after_crash() {
    let harness = Harness::with_store(Arc::new(CrashAfterDispatch::new()), fast_config());
    harness
        .publish(effect_graph(json!({
            "id": "effect", "kind": "TicketCreate",
            "config": {"fields": {"subject": "Refund"}, "output_var": "ticket"}
        })))
        .await;

    let run = crashed_run(&harness).await;
    assert_eq!(harness.tickets.tickets().len(), 1);

    harness.engine.drive(run.run_id).await.unwrap();
    let tickets = harness.tickets.tickets();
    assert_eq!(tickets.len(), 1);
    let run = harness.engine.load_run(run.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.variables["ticket"]["ticket_id"], json!(tickets[0].ticket_id));
}

#[tokio::test]
async fn separate_visits_get_separate_keys() {
    let run_id = Uuid::new_v4();
    assert_eq!(
        idempotency_key(&run_id, "reply", 1),
        idempotency_key(&run_id, "reply", 1)
    );
    assert_ne!(
        idempotency_key(&run_id, "reply", 1),
        idempotency_key(&run_id, "reply", 2)
    );
    assert_ne!(
        idempotency_key(&run_id, "reply", 1),
        idempotency_key(&Uuid::new_v4(), "reply", 1)
    );
}

#[tokio::test]
async fn cancel_during_dispatch_discards_outcome() {
    let harness = Harness::new();
    harness
        .publish(effect_graph(json!({
            "id": "effect", "kind": "SendMessage",
            "config": {"content": "One moment please.", "output_var": "receipt"}
        })))
        .await;
    harness
        .messaging
        .failures
        .set_delay(Some(Duration::from_millis(150)));

    let engine = harness.engine.clone();
    let trigger = tokio::spawn(async move {
        engine
            .trigger_event("single-effect", whatsapp_event("+15550100", "hi"))
            .await
    });

    let run_id = loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let runs = harness.store.list().await.unwrap();
        if let Some(run) = runs
            .into_iter()
            .find(|run| run.pending_effect_idempotency_key.is_some())
        {
            break run.run_id;
        }
    };
    assert_eq!(
        harness.engine.cancel_run(run_id).await.unwrap(),
        RunStatus::Cancelled
    );

    assert_eq!(trigger.await.unwrap().unwrap(), run_id);
    let run = harness.engine.load_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.variables.get("receipt").is_none());
    assert_eq!(run.current_node_id, "effect");
}
