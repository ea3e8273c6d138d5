use chrono::Utc;
use omniflow::core::flow::run::NewRun;
use omniflow::core::flow::{FileRunStore, MemoryRunStore, RunStatus, RunStore};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn new_run() -> NewRun {
    NewRun {
        graph_id: "order-status".into(),
        graph_version: 3,
        tenant_id: "acme".into(),
        entry_node_id: "inbound".into(),
        trigger_payload: json!({"channel": "whatsapp", "from": "+15550100"}),
    }
}

/// Two writers load the same version; exactly one save lands.
async fn exactly_one_concurrent_save_wins(store: Arc<dyn RunStore>) {
    let created = store.create(new_run(), Utc::now()).await.unwrap();
    let expected = created.version;

    let mut handles = Vec::new();
    for writer in 0..2 {
        let store = store.clone();
        let mut run = created.clone();
        handles.push(tokio::spawn(async move {
            run.variables.insert("writer".into(), json!(writer));
            store.save(run, expected).await
        }));
    }

    let mut committed = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(run) => committed.push(run),
            Err(err) => {
                assert!(err.is_conflict(), "unexpected error {}", err);
                conflicts += 1;
            }
        }
    }
    assert_eq!(committed.len(), 1);
    assert_eq!(conflicts, 1);

    let stored = store.load(created.run_id).await.unwrap();
    assert_eq!(stored.version, expected + 1);
    assert_eq!(stored.variables["writer"], committed[0].variables["writer"]);
    assert_eq!(store.history(created.run_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn memory_store_serializes_concurrent_saves() {
    exactly_one_concurrent_save_wins(Arc::new(MemoryRunStore::new())).await;
}

#[tokio::test]
async fn file_store_serializes_concurrent_saves() {
    let dir = TempDir::new().unwrap();
    exactly_one_concurrent_save_wins(Arc::new(FileRunStore::new(dir.path()))).await;
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let run_id = {
        let store = FileRunStore::new(dir.path());
        let mut run = store.create(new_run(), Utc::now()).await.unwrap();
        let expected = run.version;
        run.suspend(None, Some("+15550100".into()), Some(Utc::now()));
        store.save(run, expected).await.unwrap().run_id
    };

    let reopened = FileRunStore::new(dir.path());
    let run = reopened.load(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Suspended);
    assert_eq!(run.graph_version, 3);
    assert_eq!(reopened.find_by_event_key("+15550100").await.unwrap(), vec![run_id]);
    assert_eq!(reopened.find_due_waits(Utc::now()).await.unwrap(), vec![run_id]);
    assert!(reopened.find_by_event_key("+15550999").await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_writer_sees_conflict_after_reload() {
    let store = MemoryRunStore::new();
    let created = store.create(new_run(), Utc::now()).await.unwrap();

    let mut first = created.clone();
    first.status = RunStatus::Cancelled;
    let saved = store.save(first, created.version).await.unwrap();

    let mut stale = created.clone();
    stale.variables.insert("late".into(), json!(true));
    let err = store.save(stale, created.version).await.unwrap_err();
    assert!(err.is_conflict());

    let reloaded = store.load(created.run_id).await.unwrap();
    assert_eq!(reloaded.version, saved.version);
    assert_eq!(reloaded.status, RunStatus::Cancelled);
    assert!(reloaded.variables.get("late").is_none());
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let store = MemoryRunStore::new();
    let err = store.load(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.code, "FLOW-NOTFOUND-001");
}
