use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::Running => "Running",
            RunStatus::Suspended => "Suspended",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
            RunStatus::Cancelled => "Cancelled",
        };
        f.write_str(text)
    }
}

/// What a suspended run is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitTarget {
    Until(DateTime<Utc>),
    ExternalEvent(String),
}

/// Recorded output of a node for a specific visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub visit: u32,
    pub value: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Terminal failure details shown in run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub code: String,
    pub node_id: Option<String>,
    pub reason: String,
    pub visit_count: u32,
}

/// Durable state of one execution of a pinned graph version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub run_id: Uuid,
    pub graph_id: String,
    pub graph_version: u32,
    pub tenant_id: String,
    pub current_node_id: String,
    /// Whether the visit to `current_node_id` has already been counted.
    #[serde(default)]
    pub entered: bool,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub trigger_payload: Value,
    pub status: RunStatus,
    #[serde(default)]
    pub visited_count: HashMap<String, u32>,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub suspended_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_event_key: Option<String>,
    #[serde(default)]
    pub suspend_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_effect_idempotency_key: Option<String>,
    #[serde(default)]
    pub node_results: HashMap<String, NodeResult>,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRun {
    pub fn visits(&self, node_id: &str) -> u32 {
        self.visited_count.get(node_id).copied().unwrap_or(0)
    }

    /// Result recorded for the current visit of `node_id`, if any.
    pub fn current_result(&self, node_id: &str) -> Option<&Value> {
        let visit = self.visits(node_id);
        self.node_results
            .get(node_id)
            .filter(|result| result.visit == visit)
            .map(|result| &result.value)
    }

    pub fn record_result(&mut self, node_id: &str, value: Value, at: DateTime<Utc>) {
        let visit = self.visits(node_id);
        self.node_results.insert(
            node_id.to_string(),
            NodeResult {
                visit,
                value,
                recorded_at: at,
            },
        );
    }

    /// Node outputs as a JSON object keyed by node id, for expression lookup.
    pub fn nodes_value(&self) -> Value {
        let map: Map<String, Value> = self
            .node_results
            .iter()
            .map(|(id, result)| (id.clone(), result.value.clone()))
            .collect();
        Value::Object(map)
    }

    /// Move to the next node; the new node's visit is not counted yet.
    pub fn advance_to(&mut self, node_id: &str) {
        self.current_node_id = node_id.to_string();
        self.entered = false;
        self.pending_effect_idempotency_key = None;
    }

    pub fn suspend(
        &mut self,
        until: Option<DateTime<Utc>>,
        event_key: Option<String>,
        deadline: Option<DateTime<Utc>>,
    ) {
        self.status = RunStatus::Suspended;
        self.suspended_until = until;
        self.external_event_key = event_key;
        self.suspend_deadline = deadline;
    }

    /// Suspended on the given external event key.
    pub fn is_waiting_on(&self, key: &str) -> bool {
        self.status == RunStatus::Suspended && self.external_event_key.as_deref() == Some(key)
    }

    pub fn clear_wait(&mut self) {
        self.suspended_until = None;
        self.external_event_key = None;
        self.suspend_deadline = None;
    }

    pub fn fail(&mut self, code: &str, node_id: Option<&str>, reason: impl Into<String>) {
        let visit_count = node_id.map(|id| self.visits(id)).unwrap_or(0);
        self.status = RunStatus::Failed;
        self.clear_wait();
        self.failure = Some(RunFailure {
            code: code.to_string(),
            node_id: node_id.map(str::to_string),
            reason: reason.into(),
            visit_count,
        });
    }

    /// True once a suspended run's timer or deadline has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != RunStatus::Suspended {
            return false;
        }
        let until_due = self.suspended_until.map(|at| at <= now).unwrap_or(false);
        let deadline_due = self.suspend_deadline.map(|at| at <= now).unwrap_or(false);
        until_due || deadline_due
    }
}

/// Inputs for creating a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub graph_id: String,
    pub graph_version: u32,
    pub tenant_id: String,
    pub entry_node_id: String,
    pub trigger_payload: Value,
}

impl NewRun {
    pub fn into_run(self, now: DateTime<Utc>) -> ExecutionRun {
        ExecutionRun {
            run_id: Uuid::new_v4(),
            graph_id: self.graph_id,
            graph_version: self.graph_version,
            tenant_id: self.tenant_id,
            current_node_id: self.entry_node_id,
            entered: false,
            variables: Map::new(),
            trigger_payload: self.trigger_payload,
            status: RunStatus::Running,
            visited_count: HashMap::new(),
            total_steps: 0,
            suspended_until: None,
            external_event_key: None,
            suspend_deadline: None,
            pending_effect_idempotency_key: None,
            node_results: HashMap::new(),
            failure: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Audit row appended on every committed save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub run_id: Uuid,
    pub version: u64,
    pub status: RunStatus,
    pub current_node_id: String,
    #[serde(default)]
    pub pending_effect_idempotency_key: Option<String>,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    pub recorded_at: DateTime<Utc>,
}

impl RunHistoryEntry {
    pub fn from_run(run: &ExecutionRun) -> Self {
        Self {
            run_id: run.run_id,
            version: run.version,
            status: run.status,
            current_node_id: run.current_node_id.clone(),
            pending_effect_idempotency_key: run.pending_effect_idempotency_key.clone(),
            failure: run.failure.clone(),
            recorded_at: run.updated_at,
        }
    }
}
