use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn omniflow(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("omniflow").unwrap();
    cmd.arg("--state-dir").arg(state_dir);
    cmd
}

fn write_graph(dir: &Path, name: &str, document: Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();
    path
}

fn greeting_graph() -> Value {
    json!({
        "id": "greeting",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "whatsapp"}},
            {"id": "greet", "kind": "SendMessage", "config": {"content": "Hi! How can we help?"}},
            {"id": "done", "kind": "End", "config": {"outcome": "greeted"}}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "greet"},
            {"id": "e2", "source": "greet", "target": "done"}
        ]
    })
}

fn reply_graph() -> Value {
    json!({
        "id": "await-reply",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "whatsapp"}},
            {"id": "ask", "kind": "SendMessage", "config": {"content": "What is your order number?"}},
            {"id": "await_reply", "kind": "Wait", "config": {"event": {"$var": "trigger.from"}}},
            {"id": "done", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "ask"},
            {"id": "e2", "source": "ask", "target": "await_reply"},
            {"id": "e3", "source": "await_reply", "target": "done"}
        ]
    })
}

fn runs_json(state_dir: &Path) -> Vec<Value> {
    let output = omniflow(state_dir)
        .args(["status", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("omniflow").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Workflow automation engine"))
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("deliver"));
}

#[test]
fn test_trigger_command_help() {
    let mut cmd = Command::cargo_bin("omniflow").unwrap();
    cmd.arg("trigger").arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Start a run from an inbound event"));
}

#[test]
fn test_validate_accepts_valid_graph() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(dir.path(), "greeting.json", greeting_graph());

    omniflow(&dir.path().join("state"))
        .arg("validate")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("greeting v1 is valid"));
}

#[test]
fn test_validate_rejects_invalid_graph() {
    let dir = TempDir::new().unwrap();
    let mut document = greeting_graph();
    document["edges"][1]["target"] = json!("nowhere");
    let graph = write_graph(dir.path(), "broken.json", document);

    omniflow(&dir.path().join("state"))
        .arg("validate")
        .arg(&graph)
        .assert()
        .failure()
        .stdout(predicate::str::contains("FLOW-VAL-002"));

    let output = omniflow(&dir.path().join("state"))
        .args(["validate", "--format", "json"])
        .arg(&graph)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], json!(false));
    assert!(report["errors"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["code"] == json!("FLOW-VAL-002")));
}

#[test]
fn test_publish_trigger_and_status() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let graph = write_graph(dir.path(), "greeting.json", greeting_graph());

    omniflow(&state)
        .arg("publish")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("Published greeting v1"));

    omniflow(&state)
        .args(["trigger", "greeting", "--payload"])
        .arg(r#"{"channel":"whatsapp","from":"+15550100","text":"hello"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed at done"))
        .stdout(predicate::str::contains("outbox: 1 effect(s)"));

    let runs = runs_json(&state);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["status"], json!("Completed"));
    assert_eq!(runs[0]["variables"]["outcome"], json!("greeted"));

    let outbox = fs::read_to_string(state.join("outbox").join("effects.jsonl")).unwrap();
    assert_eq!(outbox.lines().count(), 1);
    assert!(outbox.contains("Hi! How can we help?"));
}

#[test]
fn test_trigger_unknown_graph_fails() {
    let dir = TempDir::new().unwrap();
    omniflow(dir.path())
        .args(["trigger", "missing", "--payload", r#"{"channel":"email"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no published version"));
}

#[test]
fn test_deliver_resumes_waiting_run() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let graph = write_graph(dir.path(), "reply.json", reply_graph());

    omniflow(&state).arg("publish").arg(&graph).assert().success();
    omniflow(&state)
        .args(["trigger", "await-reply", "--payload"])
        .arg(r#"{"channel":"whatsapp","from":"+15550123"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("Suspended at await_reply"))
        .stdout(predicate::str::contains("waiting for event '+15550123'"));

    omniflow(&state)
        .args(["deliver", "+15550999", "--payload", r#"{"text":"hi"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs waiting on '+15550999'"));

    omniflow(&state)
        .args(["deliver", "+15550123", "--payload", r#"{"text":"A-1001"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed at done"));

    let runs = runs_json(&state);
    let run_id = runs[0]["run_id"].as_str().unwrap().to_string();
    omniflow(&state)
        .args(["history", &run_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Suspended"))
        .stdout(predicate::str::contains("Completed"));
}

#[test]
fn test_cancel_suspended_run() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let graph = write_graph(dir.path(), "reply.json", reply_graph());

    omniflow(&state).arg("publish").arg(&graph).assert().success();
    omniflow(&state)
        .args(["trigger", "await-reply", "--payload"])
        .arg(r#"{"channel":"whatsapp","from":"+15550123"}"#)
        .assert()
        .success();

    let run_id = runs_json(&state)[0]["run_id"].as_str().unwrap().to_string();
    omniflow(&state)
        .args(["cancel", &run_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled"));
    omniflow(&state)
        .args(["wake"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Woke 0 run(s)"));
}

#[test]
fn test_status_with_no_runs() {
    let dir = TempDir::new().unwrap();
    omniflow(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs found"));
}

#[test]
fn test_dot_renders_graph() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(dir.path(), "greeting.json", greeting_graph());
    omniflow(dir.path())
        .arg("dot")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph"))
        .stdout(predicate::str::contains("greet [SendMessage]"));
}
