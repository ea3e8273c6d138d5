#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use omniflow::core::config::EngineConfig;
use omniflow::core::flow::collaborators::{
    MemoryHttpTransport, MemoryTicketing, RecordingMessaging, ScriptedAi,
};
use omniflow::core::flow::{
    EffectDispatcher, FlowEngine, FlowGraph, GraphCatalog, ManualClock, MemoryGraphCatalog,
    MemoryRunStore, RunStore, ValidGraph,
};
use serde_json::Value;
use std::sync::Arc;

/// Engine wired to in-memory collaborators and a manual clock.
pub struct Harness {
    pub engine: Arc<FlowEngine>,
    pub catalog: Arc<MemoryGraphCatalog>,
    pub store: Arc<dyn RunStore>,
    pub messaging: Arc<RecordingMessaging>,
    pub tickets: Arc<MemoryTicketing>,
    pub http: Arc<MemoryHttpTransport>,
    pub ai: Arc<ScriptedAi>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(MemoryRunStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn RunStore>, config: EngineConfig) -> Self {
        let catalog = Arc::new(MemoryGraphCatalog::new());
        let messaging = Arc::new(RecordingMessaging::new());
        let tickets = Arc::new(MemoryTicketing::new());
        let http = Arc::new(MemoryHttpTransport::new());
        let ai = Arc::new(ScriptedAi::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let dispatcher =
            EffectDispatcher::new(messaging.clone(), tickets.clone(), http.clone(), ai.clone());
        let engine = FlowEngine::new(catalog.clone(), store.clone(), dispatcher, config)
            .with_clock(Arc::new(clock.clone()));
        Self {
            engine: Arc::new(engine),
            catalog,
            store,
            messaging,
            tickets,
            http,
            ai,
            clock,
        }
    }

    pub async fn publish(&self, document: Value) -> Arc<ValidGraph> {
        self.catalog
            .publish(graph(document))
            .await
            .expect("graph should publish")
    }
}

/// Retries without sleeping so failure tests stay fast.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.effects.backoff_ms = 0;
    config.effects.jitter_ms = 0;
    config.effects.timeout_ms = 500;
    config
}

pub fn graph(document: Value) -> FlowGraph {
    serde_json::from_value(document).expect("graph document should deserialize")
}

pub fn whatsapp_event(from: &str, text: &str) -> Value {
    serde_json::json!({
        "channel": "whatsapp",
        "event": "message.received",
        "from": from,
        "text": text,
    })
}
