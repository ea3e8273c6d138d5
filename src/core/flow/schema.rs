#![allow(clippy::result_large_err)] // Schema APIs return AppError to preserve structured load diagnostics without boxing.

use crate::core::error::AppError;
use crate::core::flow::expression::{Predicate, ValueRef};
use crate::core::types::ErrorCategory;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;

fn default_pass_label() -> String {
    "pass".to_string()
}

fn default_fallback_label() -> String {
    "fallback".to_string()
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_notify_channel() -> String {
    "internal".to_string()
}

/// Tenant-owned automation graph. Immutable once published; edits create a new version.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowGraph {
    pub id: String,
    pub tenant_id: String,
    pub version: u32,
    #[serde(default)]
    pub metadata: Option<FlowMetadata>,
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

/// Metadata embedded with a graph document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Node as authored. `config` stays untyped until publish-time validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowNode {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub loop_safe: bool,
    #[serde(default)]
    pub max_visits: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Closed set of node kinds the engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum NodeKind {
    TriggerChannel,
    SendMessage,
    Condition,
    Switch,
    Wait,
    TicketCreate,
    TicketUpdate,
    Notify,
    HttpRequest,
    #[serde(rename = "AIDecision")]
    AiDecision,
    #[serde(rename = "AIRoute")]
    AiRoute,
    #[serde(rename = "AIToolCall")]
    AiToolCall,
    #[serde(rename = "AIGuardrail")]
    AiGuardrail,
    End,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::TriggerChannel => "TriggerChannel",
            NodeKind::SendMessage => "SendMessage",
            NodeKind::Condition => "Condition",
            NodeKind::Switch => "Switch",
            NodeKind::Wait => "Wait",
            NodeKind::TicketCreate => "TicketCreate",
            NodeKind::TicketUpdate => "TicketUpdate",
            NodeKind::Notify => "Notify",
            NodeKind::HttpRequest => "HttpRequest",
            NodeKind::AiDecision => "AIDecision",
            NodeKind::AiRoute => "AIRoute",
            NodeKind::AiToolCall => "AIToolCall",
            NodeKind::AiGuardrail => "AIGuardrail",
            NodeKind::End => "End",
        }
    }

    /// Kinds that pick an outgoing edge by label.
    pub fn is_branching(&self) -> bool {
        matches!(
            self,
            NodeKind::Condition
                | NodeKind::Switch
                | NodeKind::AiDecision
                | NodeKind::AiRoute
                | NodeKind::AiGuardrail
        )
    }

    /// Kinds whose dispatch is externally visible to customers or third parties.
    pub fn is_side_effect(&self) -> bool {
        matches!(
            self,
            NodeKind::SendMessage
                | NodeKind::Notify
                | NodeKind::TicketCreate
                | NodeKind::TicketUpdate
                | NodeKind::HttpRequest
        )
    }

    /// Kinds whose output is produced by the AI collaborator.
    pub fn is_ai(&self) -> bool {
        matches!(
            self,
            NodeKind::AiDecision | NodeKind::AiRoute | NodeKind::AiToolCall
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed, kind-specific node configuration.
#[derive(Debug, Clone)]
pub enum NodeConfig {
    TriggerChannel(TriggerConfig),
    SendMessage(SendMessageConfig),
    Condition(ConditionConfig),
    Switch(SwitchConfig),
    Wait(WaitConfig),
    TicketCreate(TicketCreateConfig),
    TicketUpdate(TicketUpdateConfig),
    Notify(NotifyConfig),
    HttpRequest(HttpRequestConfig),
    AiDecision(AiDecisionConfig),
    AiRoute(AiRouteConfig),
    AiToolCall(AiToolCallConfig),
    AiGuardrail(GuardrailConfig),
    End(EndConfig),
}

impl NodeConfig {
    /// Parse the raw config for the given kind. A missing config is treated as an empty object.
    pub fn parse(kind: NodeKind, raw: &Value) -> Result<NodeConfig, serde_json::Error> {
        let raw = match raw {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        Ok(match kind {
            NodeKind::TriggerChannel => NodeConfig::TriggerChannel(serde_json::from_value(raw)?),
            NodeKind::SendMessage => NodeConfig::SendMessage(serde_json::from_value(raw)?),
            NodeKind::Condition => NodeConfig::Condition(serde_json::from_value(raw)?),
            NodeKind::Switch => NodeConfig::Switch(serde_json::from_value(raw)?),
            NodeKind::Wait => NodeConfig::Wait(serde_json::from_value(raw)?),
            NodeKind::TicketCreate => NodeConfig::TicketCreate(serde_json::from_value(raw)?),
            NodeKind::TicketUpdate => NodeConfig::TicketUpdate(serde_json::from_value(raw)?),
            NodeKind::Notify => NodeConfig::Notify(serde_json::from_value(raw)?),
            NodeKind::HttpRequest => NodeConfig::HttpRequest(serde_json::from_value(raw)?),
            NodeKind::AiDecision => NodeConfig::AiDecision(serde_json::from_value(raw)?),
            NodeKind::AiRoute => NodeConfig::AiRoute(serde_json::from_value(raw)?),
            NodeKind::AiToolCall => NodeConfig::AiToolCall(serde_json::from_value(raw)?),
            NodeKind::AiGuardrail => NodeConfig::AiGuardrail(serde_json::from_value(raw)?),
            NodeKind::End => NodeConfig::End(serde_json::from_value(raw)?),
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::TriggerChannel(_) => NodeKind::TriggerChannel,
            NodeConfig::SendMessage(_) => NodeKind::SendMessage,
            NodeConfig::Condition(_) => NodeKind::Condition,
            NodeConfig::Switch(_) => NodeKind::Switch,
            NodeConfig::Wait(_) => NodeKind::Wait,
            NodeConfig::TicketCreate(_) => NodeKind::TicketCreate,
            NodeConfig::TicketUpdate(_) => NodeKind::TicketUpdate,
            NodeConfig::Notify(_) => NodeKind::Notify,
            NodeConfig::HttpRequest(_) => NodeKind::HttpRequest,
            NodeConfig::AiDecision(_) => NodeKind::AiDecision,
            NodeConfig::AiRoute(_) => NodeKind::AiRoute,
            NodeConfig::AiToolCall(_) => NodeKind::AiToolCall,
            NodeConfig::AiGuardrail(_) => NodeKind::AiGuardrail,
            NodeConfig::End(_) => NodeKind::End,
        }
    }

    /// Variable that receives the node's effect outcome, if any.
    pub fn output_var(&self) -> Option<&str> {
        match self {
            NodeConfig::SendMessage(cfg) => cfg.output_var.as_deref(),
            NodeConfig::TicketCreate(cfg) => cfg.output_var.as_deref(),
            NodeConfig::HttpRequest(cfg) => cfg.output_var.as_deref(),
            NodeConfig::AiDecision(cfg) => cfg.output_var.as_deref(),
            NodeConfig::AiRoute(cfg) => cfg.output_var.as_deref(),
            NodeConfig::AiToolCall(cfg) => cfg.output_var.as_deref(),
            _ => None,
        }
    }

    /// Target node used when no labelled edge matches.
    pub fn default_to(&self) -> Option<&str> {
        match self {
            NodeConfig::Condition(cfg) => cfg.default_to.as_deref(),
            NodeConfig::Switch(cfg) => cfg.default_to.as_deref(),
            _ => None,
        }
    }
}

/// Matches inbound channel events.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    /// Channel name (`whatsapp`, `email`, ...) or `*` for any channel.
    pub channel: String,
    /// Optional event type filter (`message.received`, `ticket.created`, ...).
    #[serde(default)]
    pub event: Option<String>,
}

impl TriggerConfig {
    pub fn matches(&self, payload: &Value) -> bool {
        let channel_ok = self.channel == "*"
            || payload.get("channel").and_then(Value::as_str) == Some(self.channel.as_str());
        let event_ok = match &self.event {
            None => true,
            Some(event) => payload.get("event").and_then(Value::as_str) == Some(event.as_str()),
        };
        channel_ok && event_ok
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageConfig {
    /// Defaults to the triggering event's channel.
    #[serde(default)]
    pub channel: Option<String>,
    /// Defaults to the triggering event's `from` field.
    #[serde(default)]
    pub to: Option<Value>,
    pub content: Value,
    #[serde(default)]
    pub output_var: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    pub target: Value,
    pub message: Value,
    #[serde(default = "default_notify_channel")]
    pub channel: String,
}

/// Two-way branch on `true`/`false` edge labels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionConfig {
    pub when: Predicate,
    #[serde(default)]
    pub default_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    pub on: ValueRef,
    #[serde(default)]
    pub default_to: Option<String>,
}

/// Either a time-based wait (`duration`) or a wait on an external event key (`event`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WaitConfig {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub event: Option<Value>,
    /// Overrides the engine suspend ceiling for event waits.
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TicketCreateConfig {
    pub fields: Value,
    #[serde(default)]
    pub output_var: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TicketUpdateConfig {
    pub ticket_id: Value,
    pub fields: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpRequestConfig {
    #[serde(default = "default_http_method")]
    pub method: String,
    pub url: Value,
    #[serde(default)]
    pub headers: IndexMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub output_var: Option<String>,
}

/// Whether an AI call returns inline or through a later callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    #[default]
    Sync,
    Async,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AiDecisionConfig {
    #[serde(default)]
    pub context: Value,
    /// Overrides the engine-wide minimum confidence.
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
    #[serde(default)]
    pub mode: AiMode,
    #[serde(default)]
    pub output_var: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AiRouteConfig {
    #[serde(default)]
    pub input: Value,
    /// Edge label -> intent description handed to the router.
    pub intents: IndexMap<String, String>,
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
    #[serde(default)]
    pub mode: AiMode,
    #[serde(default)]
    pub output_var: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AiToolCallConfig {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub mode: AiMode,
    #[serde(default)]
    pub output_var: Option<String>,
}

/// Confidence gate in front of AI-influenced side effects.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GuardrailConfig {
    /// AI node whose recorded `confidence` is checked.
    #[serde(default)]
    pub source: Option<String>,
    /// Explicit confidence reference, used instead of `source`.
    #[serde(default)]
    pub confidence: Option<ValueRef>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default = "default_pass_label")]
    pub pass_label: String,
    #[serde(default = "default_fallback_label")]
    pub fallback_label: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndConfig {
    #[serde(default)]
    pub outcome: Option<String>,
}

impl FlowGraph {
    /// Load a graph document from a JSON or YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let parsed = if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        };
        parsed.map_err(|mut err| {
            err.add_context("path", &path.display().to_string());
            err
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse graph document: {}", err),
            )
            .with_code("FLOW-PARSE-001")
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse graph document: {}", err),
            )
            .with_code("FLOW-PARSE-001")
        })
    }
}
