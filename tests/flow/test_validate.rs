use omniflow::core::flow::{
    validate, FileGraphCatalog, FlowGraph, GraphCatalog, MemoryGraphCatalog, PublishError,
    ValidationError,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn graph(document: Value) -> FlowGraph {
    serde_json::from_value(document).unwrap()
}

fn codes(errors: &[ValidationError]) -> Vec<&str> {
    let mut codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
    codes.sort();
    codes.dedup();
    codes
}

fn welcome(version: u32, text: &str) -> FlowGraph {
    graph(json!({
        "id": "welcome",
        "tenant_id": "acme",
        "version": version,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "whatsapp"}},
            {"id": "greet", "kind": "SendMessage", "config": {"content": text}},
            {"id": "done", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "greet"},
            {"id": "e2", "source": "greet", "target": "done"}
        ]
    }))
}

#[test]
fn reports_every_problem_in_one_pass() {
    let errors = validate(&graph(json!({
        "id": "broken",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "*"}},
            {"id": "pause", "kind": "Wait", "config": {"duration": "soon"}},
            {"id": "orphan", "kind": "End"},
            {"id": "done", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "pause"},
            {"id": "e2", "source": "pause", "target": "ghost"},
            {"id": "e3", "source": "pause", "target": "done"}
        ]
    })))
    .unwrap_err();

    assert_eq!(
        codes(&errors),
        vec!["FLOW-VAL-002", "FLOW-VAL-004", "FLOW-VAL-006", "FLOW-VAL-008"]
    );
    let unreachable = errors.iter().find(|e| e.code == "FLOW-VAL-004").unwrap();
    assert_eq!(unreachable.node_id.as_deref(), Some("orphan"));
    let dangling = errors.iter().find(|e| e.code == "FLOW-VAL-002").unwrap();
    assert_eq!(dangling.field, "edges[e2].target");
}

#[test]
fn side_effect_after_ai_needs_a_guardrail() {
    let errors = validate(&graph(json!({
        "id": "ungated",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "*"}},
            {"id": "classify", "kind": "AIDecision"},
            {"id": "refund", "kind": "TicketCreate", "config": {"fields": {"type": "refund"}}},
            {"id": "apologise", "kind": "SendMessage", "config": {"content": "Someone will reply soon."}},
            {"id": "done", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "classify"},
            {"id": "e2", "source": "classify", "target": "refund", "label": "refund"},
            {"id": "e3", "source": "classify", "target": "apologise", "label": "fallback"},
            {"id": "e4", "source": "refund", "target": "done"},
            {"id": "e5", "source": "apologise", "target": "done"}
        ]
    })))
    .unwrap_err();

    assert_eq!(codes(&errors), vec!["FLOW-VAL-013"]);
    assert_eq!(errors[0].node_id.as_deref(), Some("refund"));
}

#[test]
fn ai_nodes_require_fallback_edges() {
    let errors = validate(&graph(json!({
        "id": "no-fallback",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "*"}},
            {"id": "route", "kind": "AIRoute", "config": {"intents": {"billing": "Invoices and payments"}}},
            {"id": "done", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "route"},
            {"id": "e2", "source": "route", "target": "done", "label": "billing"}
        ]
    })))
    .unwrap_err();
    assert_eq!(codes(&errors), vec!["FLOW-VAL-015"]);
}

#[test]
fn unknown_config_fields_are_rejected() {
    let errors = validate(&graph(json!({
        "id": "typo",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"chanel": "email"}},
            {"id": "done", "kind": "End"}
        ],
        "edges": [{"id": "e1", "source": "inbound", "target": "done"}]
    })))
    .unwrap_err();
    assert!(codes(&errors).contains(&"FLOW-VAL-005"));
}

#[test]
fn condition_labels_must_be_boolean() {
    let errors = validate(&graph(json!({
        "id": "labels",
        "tenant_id": "acme",
        "version": 1,
        "nodes": [
            {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "*"}},
            {"id": "check", "kind": "Condition", "config": {"when": {"exists": "trigger.text"}}},
            {"id": "yes", "kind": "End"},
            {"id": "no", "kind": "End"}
        ],
        "edges": [
            {"id": "e1", "source": "inbound", "target": "check"},
            {"id": "e2", "source": "check", "target": "yes", "label": "yes"},
            {"id": "e3", "source": "check", "target": "no", "label": "false"}
        ]
    })))
    .unwrap_err();
    assert_eq!(codes(&errors), vec!["FLOW-VAL-012"]);
}

#[test]
fn yaml_documents_load_and_validate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("welcome.yaml");
    std::fs::write(
        &path,
        r#"
id: welcome
tenant_id: acme
version: 2
metadata:
  name: Welcome flow
nodes:
  - id: inbound
    kind: TriggerChannel
    config: {channel: email, event: message.received}
  - id: greet
    kind: SendMessage
    config: {content: "Hello!"}
  - id: done
    kind: End
edges:
  - {id: e1, source: inbound, target: greet}
  - {id: e2, source: greet, target: done}
"#,
    )
    .unwrap();

    let loaded = FlowGraph::load_from_file(&path).unwrap();
    let valid = validate(&loaded).unwrap();
    assert_eq!(valid.version(), 2);
    assert_eq!(valid.digest().len(), 64);
    assert_eq!(
        valid.match_trigger(&json!({"channel": "email", "event": "message.received"})),
        Some("inbound")
    );
    assert_eq!(valid.match_trigger(&json!({"channel": "email", "event": "bounce"})), None);
}

#[test]
fn unknown_node_kind_fails_to_parse() {
    let err = FlowGraph::from_json_str(
        r#"{"id": "g", "tenant_id": "t", "version": 1,
            "nodes": [{"id": "x", "kind": "Teleport"}], "edges": []}"#,
    )
    .unwrap_err();
    assert_eq!(err.code, "FLOW-PARSE-001");
}

#[tokio::test]
async fn published_versions_are_immutable() {
    let catalog = MemoryGraphCatalog::new();
    catalog.publish(welcome(1, "Hi there")).await.unwrap();
    // identical content is accepted again
    catalog.publish(welcome(1, "Hi there")).await.unwrap();

    match catalog.publish(welcome(1, "Hello!")).await {
        Err(PublishError::VersionExists { graph_id, version }) => {
            assert_eq!(graph_id, "welcome");
            assert_eq!(version, 1);
        }
        other => panic!("unexpected {:?}", other.map(|g| g.version())),
    }

    catalog.publish(welcome(2, "Hello!")).await.unwrap();
    assert_eq!(catalog.latest("welcome").await.unwrap().version(), 2);
    assert_eq!(catalog.get("welcome", 1).await.unwrap().version(), 1);
    assert_eq!(
        catalog.get("welcome", 3).await.unwrap_err().code,
        "FLOW-NOTFOUND-001"
    );
}

#[tokio::test]
async fn file_catalog_persists_across_instances() {
    let dir = TempDir::new().unwrap();
    {
        let catalog = FileGraphCatalog::new(dir.path());
        catalog.publish(welcome(1, "Hi there")).await.unwrap();
        catalog.publish(welcome(3, "Hey")).await.unwrap();
    }

    let reopened = FileGraphCatalog::new(dir.path());
    assert_eq!(reopened.latest("welcome").await.unwrap().version(), 3);
    let first = reopened.get("welcome", 1).await.unwrap();
    assert_eq!(first.digest(), validate(&welcome(1, "Hi there")).unwrap().digest());
    assert!(matches!(
        reopened.publish(welcome(1, "changed")).await,
        Err(PublishError::VersionExists { .. })
    ));
}
