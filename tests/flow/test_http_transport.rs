#[path = "../support/mod.rs"]
mod support;

use omniflow::core::flow::collaborators::{
    MemoryTicketing, RecordingMessaging, ReqwestHttpTransport, ScriptedAi, IDEMPOTENCY_HEADER,
};
use omniflow::core::flow::effects::HttpCall;
use omniflow::core::flow::{
    CollaboratorError, EffectDispatcher, FlowEngine, GraphCatalog, HttpTransport, ManualClock,
    MemoryGraphCatalog, MemoryRunStore, RunStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{fast_config, graph};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> ReqwestHttpTransport {
    ReqwestHttpTransport::new("omniflow-test", Duration::from_secs(5)).unwrap()
}

fn post(url: String) -> HttpCall {
    HttpCall {
        method: "POST".into(),
        url,
        headers: Default::default(),
        body: Some(json!({"order": "4411"})),
    }
}

#[tokio::test]
async fn sends_idempotency_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/lookup"))
        .and(header(IDEMPOTENCY_HEADER, "run-1:lookup:1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "shipped"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .request("run-1:lookup:1", &post(format!("{}/orders/lookup", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({"state": "shipped"}));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = transport()
        .request("k", &post(format!("{}/hook", server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, CollaboratorError::Transient(_)), "got {:?}", err);
}

#[tokio::test]
async fn client_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let err = transport()
        .request("k", &post(format!("{}/hook", server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, CollaboratorError::Permanent(_)), "got {:?}", err);
}

#[tokio::test]
async fn plain_text_body_is_kept_as_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
        .mount(&server)
        .await;

    let call = HttpCall {
        method: "get".into(),
        url: format!("{}/status", server.uri()),
        headers: Default::default(),
        body: None,
    };
    let response = transport().request("k", &call).await.unwrap();
    assert_eq!(response.body, json!("accepted"));
}

#[tokio::test]
async fn engine_retries_webhook_with_the_same_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/crm/contacts"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/crm/contacts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"contact_id": "c-77"})))
        .mount(&server)
        .await;

    let catalog = Arc::new(MemoryGraphCatalog::new());
    let dispatcher = EffectDispatcher::new(
        Arc::new(RecordingMessaging::new()),
        Arc::new(MemoryTicketing::new()),
        Arc::new(transport()),
        Arc::new(ScriptedAi::new()),
    );
    let engine = FlowEngine::new(
        catalog.clone(),
        Arc::new(MemoryRunStore::new()),
        dispatcher,
        fast_config(),
    )
    .with_clock(Arc::new(ManualClock::new(chrono::Utc::now())));

    catalog
        .publish(graph(json!({
            "id": "crm-sync",
            "tenant_id": "acme",
            "version": 1,
            "nodes": [
                {"id": "inbound", "kind": "TriggerChannel", "config": {"channel": "email"}},
                {"id": "sync", "kind": "HttpRequest", "config": {
                    "method": "post",
                    "url": {"$var": "trigger.webhook"},
                    "body": {"email": {"$var": "trigger.from"}},
                    "output_var": "crm"
                }},
                {"id": "done", "kind": "End"}
            ],
            "edges": [
                {"id": "e1", "source": "inbound", "target": "sync"},
                {"id": "e2", "source": "sync", "target": "done"}
            ]
        })))
        .await
        .unwrap();

    let run_id = engine
        .trigger_event(
            "crm-sync",
            json!({
                "channel": "email",
                "from": "ana@example.com",
                "webhook": format!("{}/crm/contacts", server.uri())
            }),
        )
        .await
        .unwrap();

    let run = engine.load_run(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.variables["crm"]["status"], json!(201));
    assert_eq!(run.variables["crm"]["body"]["contact_id"], json!("c-77"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let keys: Vec<String> = requests
        .iter()
        .map(|request| {
            request
                .headers
                .get(IDEMPOTENCY_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(keys[0], format!("{}:sync:1", run_id));
    assert_eq!(keys[0], keys[1]);
}
