#![allow(clippy::result_large_err)] // Branch resolution returns AppError so callers keep the structured failure code.

//! Publish-time graph validation.
//!
//! Every rule runs and every problem is reported, so an author can fix the
//! whole graph in one pass. A graph that passes is wrapped in [`ValidGraph`],
//! which is the only form the scheduler accepts.

use crate::core::error::AppError;
use crate::core::flow::expression::{collect_expression_strings, ExpressionEngine};
use crate::core::flow::schema::{FlowEdge, FlowGraph, FlowNode, NodeConfig, NodeKind};
use crate::core::types::ErrorCategory;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// One authoring problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub node_id: Option<String>,
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        code: &str,
        node_id: Option<&str>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            field: field.into(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "[{}] {} ({}): {}", self.code, node, self.field, self.message),
            None => write!(f, "[{}] {}: {}", self.code, self.field, self.message),
        }
    }
}

/// Node with its parsed configuration.
#[derive(Debug, Clone)]
pub struct ValidNode {
    pub node: FlowNode,
    pub config: NodeConfig,
}

/// A graph that passed every validation rule.
#[derive(Debug, Clone)]
pub struct ValidGraph {
    graph: FlowGraph,
    nodes: HashMap<String, ValidNode>,
    outgoing: HashMap<String, Vec<FlowEdge>>,
    triggers: Vec<String>,
    digest: String,
}

impl ValidGraph {
    pub fn id(&self) -> &str {
        &self.graph.id
    }

    pub fn version(&self) -> u32 {
        self.graph.version
    }

    pub fn tenant_id(&self) -> &str {
        &self.graph.tenant_id
    }

    /// SHA-256 of the canonical JSON document.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn node(&self, node_id: &str) -> Option<&ValidNode> {
        self.nodes.get(node_id)
    }

    pub fn outgoing(&self, node_id: &str) -> &[FlowEdge] {
        self.outgoing
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    /// First trigger node, in document order, whose channel/event filter matches the payload.
    pub fn match_trigger(&self, payload: &Value) -> Option<&str> {
        self.triggers
            .iter()
            .find(|id| match self.nodes.get(id.as_str()).map(|n| &n.config) {
                Some(NodeConfig::TriggerChannel(cfg)) => cfg.matches(payload),
                _ => false,
            })
            .map(String::as_str)
    }

    /// Pick the outgoing edge for a node given an optional branch label.
    ///
    /// Order: the edge carrying `label`, then the edge to `default_to`, then
    /// the single edge of a non-branching node. Anything else is
    /// `NoMatchingBranch`.
    pub fn resolve_branch(&self, node_id: &str, label: Option<&str>) -> Result<&FlowEdge, AppError> {
        let node = self.nodes.get(node_id).ok_or_else(|| {
            AppError::not_found(format!("node '{}' not in graph {}", node_id, self.graph.id))
        })?;
        let edges = self.outgoing(node_id);

        if !node.node.kind.is_branching() {
            if let [edge] = edges {
                return Ok(edge);
            }
        }

        if let Some(label) = label {
            if let Some(edge) = edges.iter().find(|e| e.label.as_deref() == Some(label)) {
                return Ok(edge);
            }
        }

        if let Some(default_to) = node.config.default_to() {
            let preferred = edges
                .iter()
                .find(|e| e.target == default_to && e.label.is_none())
                .or_else(|| edges.iter().find(|e| e.target == default_to));
            if let Some(edge) = preferred {
                return Ok(edge);
            }
        }

        Err(AppError::new(
            ErrorCategory::NoMatchingBranch,
            format!(
                "node '{}' has no outgoing edge for {} and no default",
                node_id,
                label
                    .map(|l| format!("label '{}'", l))
                    .unwrap_or_else(|| "an undefined discriminant".to_string())
            ),
        )
        .with_code("FLOW-BRANCH-001"))
    }
}

/// Validate a graph, collecting every problem.
pub fn validate(graph: &FlowGraph) -> Result<ValidGraph, Vec<ValidationError>> {
    let engine = ExpressionEngine::default();
    let index = GraphIndex::build(graph, &engine);

    let mut errors = Vec::new();
    for rule in built_in_rules() {
        errors.extend(rule.check(&index));
    }
    if !errors.is_empty() {
        errors.sort_by(|a, b| {
            a.code
                .cmp(&b.code)
                .then(a.node_id.cmp(&b.node_id))
                .then(a.field.cmp(&b.field))
        });
        return Err(errors);
    }

    let mut nodes = HashMap::new();
    for node in &graph.nodes {
        if let Some(config) = index.configs.get(node.id.as_str()) {
            nodes.insert(
                node.id.clone(),
                ValidNode {
                    node: node.clone(),
                    config: config.clone(),
                },
            );
        }
    }
    let mut outgoing: HashMap<String, Vec<FlowEdge>> = HashMap::new();
    for edge in &graph.edges {
        outgoing
            .entry(edge.source.clone())
            .or_default()
            .push(edge.clone());
    }
    let triggers = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::TriggerChannel)
        .map(|n| n.id.clone())
        .collect();

    Ok(ValidGraph {
        graph: graph.clone(),
        nodes,
        outgoing,
        triggers,
        digest: digest(graph),
    })
}

/// SHA-256 over the serialized document.
pub fn digest(graph: &FlowGraph) -> String {
    let bytes = serde_json::to_vec(graph).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Lookup tables shared by all rules.
pub struct GraphIndex<'a> {
    pub graph: &'a FlowGraph,
    pub engine: &'a ExpressionEngine,
    pub nodes: HashMap<&'a str, &'a FlowNode>,
    pub configs: HashMap<&'a str, NodeConfig>,
    pub config_errors: Vec<(&'a str, String)>,
    pub outgoing: HashMap<&'a str, Vec<&'a FlowEdge>>,
    pub incoming: HashMap<&'a str, Vec<&'a FlowEdge>>,
}

impl<'a> GraphIndex<'a> {
    fn build(graph: &'a FlowGraph, engine: &'a ExpressionEngine) -> Self {
        let mut nodes = HashMap::new();
        let mut configs = HashMap::new();
        let mut config_errors = Vec::new();
        for node in &graph.nodes {
            nodes.entry(node.id.as_str()).or_insert(node);
            match NodeConfig::parse(node.kind, &node.config) {
                Ok(config) => {
                    configs.entry(node.id.as_str()).or_insert(config);
                }
                Err(err) => config_errors.push((node.id.as_str(), err.to_string())),
            }
        }
        let mut outgoing: HashMap<&str, Vec<&FlowEdge>> = HashMap::new();
        let mut incoming: HashMap<&str, Vec<&FlowEdge>> = HashMap::new();
        for edge in &graph.edges {
            outgoing.entry(edge.source.as_str()).or_default().push(edge);
            incoming.entry(edge.target.as_str()).or_default().push(edge);
        }
        Self {
            graph,
            engine,
            nodes,
            configs,
            config_errors,
            outgoing,
            incoming,
        }
    }

    fn outgoing(&self, node_id: &str) -> &[&'a FlowEdge] {
        self.outgoing
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn kind_of(&self, node_id: &str) -> Option<NodeKind> {
        self.nodes.get(node_id).map(|n| n.kind)
    }
}

/// Trait implemented by graph validation rules.
pub trait GraphRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError>;
}

pub fn built_in_rules() -> Vec<Box<dyn GraphRule>> {
    vec![
        Box::new(HeaderRule),
        Box::new(UniqueIdsRule),
        Box::new(EdgeEndpointsRule),
        Box::new(TriggerRule),
        Box::new(ReachabilityRule),
        Box::new(ConfigSchemaRule),
        Box::new(ConfigSemanticsRule),
        Box::new(EdgeShapeRule),
        Box::new(BranchLabelsRule),
        Box::new(MandatoryGuardrailRule),
    ]
}

struct HeaderRule;

impl GraphRule for HeaderRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let graph = index.graph;
        let mut out = Vec::new();
        if graph.id.trim().is_empty() {
            out.push(ValidationError::new("FLOW-VAL-000", None, "id", "graph id is empty"));
        }
        if graph.tenant_id.trim().is_empty() {
            out.push(ValidationError::new(
                "FLOW-VAL-000",
                None,
                "tenant_id",
                "tenant id is empty",
            ));
        }
        if graph.version == 0 {
            out.push(ValidationError::new(
                "FLOW-VAL-000",
                None,
                "version",
                "version must start at 1",
            ));
        }
        if graph.nodes.is_empty() {
            out.push(ValidationError::new("FLOW-VAL-000", None, "nodes", "graph has no nodes"));
        }
        out
    }
}

struct UniqueIdsRule;

impl GraphRule for UniqueIdsRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for node in &index.graph.nodes {
            if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
                out.push(ValidationError::new(
                    "FLOW-VAL-001",
                    Some(&node.id),
                    "id",
                    format!("duplicate node id '{}'", node.id),
                ));
            }
        }
        let mut seen_edges = HashSet::new();
        for edge in &index.graph.edges {
            if !seen_edges.insert(edge.id.as_str()) {
                out.push(ValidationError::new(
                    "FLOW-VAL-001",
                    None,
                    format!("edges[{}].id", edge.id),
                    format!("duplicate edge id '{}'", edge.id),
                ));
            }
        }
        out
    }
}

struct EdgeEndpointsRule;

impl GraphRule for EdgeEndpointsRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        for edge in &index.graph.edges {
            for (field, endpoint) in [("source", &edge.source), ("target", &edge.target)] {
                if !index.nodes.contains_key(endpoint.as_str()) {
                    out.push(ValidationError::new(
                        "FLOW-VAL-002",
                        None,
                        format!("edges[{}].{}", edge.id, field),
                        format!("edge '{}' references unknown node '{}'", edge.id, endpoint),
                    ));
                }
            }
        }
        out
    }
}

struct TriggerRule;

impl GraphRule for TriggerRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        let triggers: Vec<&FlowNode> = index
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::TriggerChannel)
            .collect();
        if triggers.is_empty() && !index.graph.nodes.is_empty() {
            out.push(ValidationError::new(
                "FLOW-VAL-003",
                None,
                "nodes",
                "graph has no TriggerChannel node",
            ));
        }
        for trigger in triggers {
            if index.incoming.contains_key(trigger.id.as_str()) {
                out.push(ValidationError::new(
                    "FLOW-VAL-003",
                    Some(&trigger.id),
                    "edges",
                    "trigger nodes cannot have incoming edges",
                ));
            }
        }
        out
    }
}

struct ReachabilityRule;

impl GraphRule for ReachabilityRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut node_index: HashMap<&str, NodeIndex> = HashMap::new();
        for node in &index.graph.nodes {
            node_index
                .entry(node.id.as_str())
                .or_insert_with(|| graph.add_node(node.id.as_str()));
        }
        for edge in &index.graph.edges {
            if let (Some(&from), Some(&to)) = (
                node_index.get(edge.source.as_str()),
                node_index.get(edge.target.as_str()),
            ) {
                graph.add_edge(from, to, ());
            }
        }

        let mut reachable = HashSet::new();
        for node in index
            .graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::TriggerChannel)
        {
            if let Some(&start) = node_index.get(node.id.as_str()) {
                let mut bfs = Bfs::new(&graph, start);
                while let Some(visited) = bfs.next(&graph) {
                    reachable.insert(graph[visited]);
                }
            }
        }
        if reachable.is_empty() {
            // no trigger: already reported by TriggerRule
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut reported = HashSet::new();
        for node in &index.graph.nodes {
            if !reachable.contains(node.id.as_str()) && reported.insert(node.id.as_str()) {
                out.push(ValidationError::new(
                    "FLOW-VAL-004",
                    Some(&node.id),
                    "id",
                    format!("node '{}' is unreachable from every trigger", node.id),
                ));
            }
        }
        out
    }
}

struct ConfigSchemaRule;

impl GraphRule for ConfigSchemaRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        index
            .config_errors
            .iter()
            .map(|(node_id, message)| {
                let kind = index
                    .kind_of(node_id)
                    .map(|k| k.as_str())
                    .unwrap_or("unknown");
                ValidationError::new(
                    "FLOW-VAL-005",
                    Some(*node_id),
                    "config",
                    format!("config does not match {} schema: {}", kind, message),
                )
            })
            .collect()
    }
}

struct ConfigSemanticsRule;

impl GraphRule for ConfigSemanticsRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        for node in &index.graph.nodes {
            let id = node.id.as_str();
            if node.max_visits == Some(0) {
                out.push(semantic(id, "max_visits", "max_visits must be at least 1"));
            }

            let mut expressions = Vec::new();
            collect_expression_strings(&node.config, &mut expressions);

            let Some(config) = index.configs.get(id) else {
                continue;
            };
            match config {
                NodeConfig::TriggerChannel(cfg) => {
                    if cfg.channel.trim().is_empty() {
                        out.push(semantic(id, "config.channel", "channel is empty"));
                    }
                }
                NodeConfig::Condition(cfg) => {
                    cfg.when.collect_expressions(&mut expressions);
                    let mut patterns = Vec::new();
                    cfg.when.collect_patterns(&mut patterns);
                    for pattern in patterns {
                        if let Err(err) = Regex::new(pattern) {
                            out.push(semantic(
                                id,
                                "config.when",
                                format!("invalid regex '{}': {}", pattern, err),
                            ));
                        }
                    }
                }
                NodeConfig::Switch(cfg) => {
                    if let Some(expr) = cfg.on.expression() {
                        expressions.push(expr);
                    }
                }
                NodeConfig::Wait(cfg) => {
                    match (&cfg.duration, &cfg.event) {
                        (Some(_), Some(_)) | (None, None) => out.push(semantic(
                            id,
                            "config",
                            "wait needs exactly one of 'duration' or 'event'",
                        )),
                        _ => {}
                    }
                    for (field, raw) in [("config.duration", &cfg.duration), ("config.timeout", &cfg.timeout)] {
                        if let Some(raw) = raw {
                            if let Err(err) = humantime::parse_duration(raw) {
                                out.push(semantic(
                                    id,
                                    field,
                                    format!("'{}' is not a duration: {}", raw, err),
                                ));
                            }
                        }
                    }
                    if cfg.timeout.is_some() && cfg.event.is_none() {
                        out.push(semantic(
                            id,
                            "config.timeout",
                            "timeout only applies to event waits",
                        ));
                    }
                }
                NodeConfig::HttpRequest(cfg) => {
                    if !HTTP_METHODS.contains(&cfg.method.to_ascii_uppercase().as_str()) {
                        out.push(semantic(
                            id,
                            "config.method",
                            format!("unsupported HTTP method '{}'", cfg.method),
                        ));
                    }
                    match &cfg.url {
                        Value::String(raw) => {
                            if let Err(err) = url::Url::parse(raw) {
                                out.push(semantic(
                                    id,
                                    "config.url",
                                    format!("invalid URL '{}': {}", raw, err),
                                ));
                            }
                        }
                        Value::Object(map) if map.contains_key("$expr") || map.contains_key("$var") => {}
                        _ => out.push(semantic(id, "config.url", "url must be a string or template")),
                    }
                }
                NodeConfig::AiDecision(cfg) => {
                    if let Some(threshold) = cfg.min_confidence {
                        check_threshold(&mut out, id, "config.min_confidence", threshold);
                    }
                }
                NodeConfig::AiRoute(cfg) => {
                    if cfg.intents.is_empty() {
                        out.push(semantic(id, "config.intents", "at least one intent is required"));
                    }
                    if cfg.intents.contains_key(&cfg.fallback_label) {
                        out.push(semantic(
                            id,
                            "config.intents",
                            format!("intent '{}' collides with the fallback label", cfg.fallback_label),
                        ));
                    }
                }
                NodeConfig::AiToolCall(cfg) => {
                    if cfg.tool.trim().is_empty() {
                        out.push(semantic(id, "config.tool", "tool name is empty"));
                    }
                }
                NodeConfig::AiGuardrail(cfg) => {
                    if let Some(threshold) = cfg.threshold {
                        check_threshold(&mut out, id, "config.threshold", threshold);
                    }
                    if cfg.source.is_none() && cfg.confidence.is_none() {
                        out.push(semantic(
                            id,
                            "config",
                            "guardrail needs a 'source' AI node or a 'confidence' reference",
                        ));
                    }
                    if let Some(source) = &cfg.source {
                        if !index.kind_of(source).map(|k| k.is_ai()).unwrap_or(false) {
                            out.push(ValidationError::new(
                                "FLOW-VAL-014",
                                Some(id),
                                "config.source",
                                format!("guardrail source '{}' is not an AI node", source),
                            ));
                        }
                    }
                    if let Some(expr) = cfg.confidence.as_ref().and_then(|c| c.expression()) {
                        expressions.push(expr);
                    }
                    if cfg.pass_label == cfg.fallback_label {
                        out.push(semantic(id, "config.pass_label", "pass and fallback labels must differ"));
                    }
                }
                _ => {}
            }

            for expr in expressions {
                if let Err(err) = index.engine.compile(expr) {
                    out.push(semantic(id, "config", err.message));
                }
            }
        }
        out
    }
}

fn semantic(node_id: &str, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::new("FLOW-VAL-006", Some(node_id), field, message)
}

fn check_threshold(out: &mut Vec<ValidationError>, node_id: &str, field: &str, threshold: f64) {
    if !(0.0..=1.0).contains(&threshold) {
        out.push(semantic(
            node_id,
            field,
            format!("threshold {} must be within [0, 1]", threshold),
        ));
    }
}

struct EdgeShapeRule;

impl GraphRule for EdgeShapeRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for node in &index.graph.nodes {
            if !seen.insert(node.id.as_str()) {
                continue;
            }
            let count = index.outgoing(&node.id).len();
            if node.kind == NodeKind::End {
                if count > 0 {
                    out.push(ValidationError::new(
                        "FLOW-VAL-007",
                        Some(&node.id),
                        "edges",
                        format!("End node has {} outgoing edge(s)", count),
                    ));
                }
            } else if node.kind.is_branching() {
                if count == 0 {
                    out.push(ValidationError::new(
                        "FLOW-VAL-009",
                        Some(&node.id),
                        "edges",
                        format!("{} node needs at least one outgoing edge", node.kind),
                    ));
                }
            } else if count != 1 {
                out.push(ValidationError::new(
                    "FLOW-VAL-008",
                    Some(&node.id),
                    "edges",
                    format!("{} node needs exactly one outgoing edge, found {}", node.kind, count),
                ));
            }
        }
        out
    }
}

struct BranchLabelsRule;

impl GraphRule for BranchLabelsRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        let mut seen_nodes = HashSet::new();
        for node in index.graph.nodes.iter().filter(|n| n.kind.is_branching()) {
            if !seen_nodes.insert(node.id.as_str()) {
                continue;
            }
            let edges = index.outgoing(&node.id);
            let config = index.configs.get(node.id.as_str());
            let default_to = config.and_then(|c| c.default_to());

            let mut labels = HashSet::new();
            for edge in edges {
                match &edge.label {
                    Some(label) => {
                        if !labels.insert(label.as_str()) {
                            out.push(ValidationError::new(
                                "FLOW-VAL-010",
                                Some(&node.id),
                                format!("edges[{}].label", edge.id),
                                format!("duplicate branch label '{}'", label),
                            ));
                        }
                        if node.kind == NodeKind::Condition && label != "true" && label != "false" {
                            out.push(ValidationError::new(
                                "FLOW-VAL-012",
                                Some(&node.id),
                                format!("edges[{}].label", edge.id),
                                format!("condition edges are labelled 'true' or 'false', got '{}'", label),
                            ));
                        }
                    }
                    None => {
                        if default_to != Some(edge.target.as_str()) {
                            out.push(ValidationError::new(
                                "FLOW-VAL-012",
                                Some(&node.id),
                                format!("edges[{}].label", edge.id),
                                "unlabelled edge on a branching node must be its default_to target",
                            ));
                        }
                    }
                }
            }

            if let Some(default_to) = default_to {
                if !edges.iter().any(|e| e.target == default_to) {
                    out.push(ValidationError::new(
                        "FLOW-VAL-011",
                        Some(&node.id),
                        "config.default_to",
                        format!("default_to '{}' is not an outgoing edge target", default_to),
                    ));
                }
            }

            let required: Vec<&str> = match config {
                Some(NodeConfig::AiDecision(cfg)) => vec![cfg.fallback_label.as_str()],
                Some(NodeConfig::AiRoute(cfg)) => vec![cfg.fallback_label.as_str()],
                Some(NodeConfig::AiGuardrail(cfg)) => {
                    vec![cfg.pass_label.as_str(), cfg.fallback_label.as_str()]
                }
                _ => Vec::new(),
            };
            for label in required {
                if !labels.contains(label) {
                    out.push(ValidationError::new(
                        "FLOW-VAL-015",
                        Some(&node.id),
                        "edges",
                        format!("{} node needs an edge labelled '{}'", node.kind, label),
                    ));
                }
            }
        }
        out
    }
}

/// Side effects downstream of an AI node must sit behind an AIGuardrail on every path.
struct MandatoryGuardrailRule;

impl GraphRule for MandatoryGuardrailRule {
    fn check(&self, index: &GraphIndex<'_>) -> Vec<ValidationError> {
        let mut out = Vec::new();
        let mut reported = HashSet::new();
        for node in index.graph.nodes.iter().filter(|n| n.kind.is_ai()) {
            let fallback = match index.configs.get(node.id.as_str()) {
                Some(NodeConfig::AiDecision(cfg)) => Some(cfg.fallback_label.as_str()),
                Some(NodeConfig::AiRoute(cfg)) => Some(cfg.fallback_label.as_str()),
                _ => None,
            };

            let mut queue: VecDeque<&str> = VecDeque::new();
            let mut visited: HashSet<&str> = HashSet::new();
            for edge in index.outgoing(&node.id) {
                // the fallback path is taken without acting on the AI output
                if fallback.is_some() && edge.label.as_deref() == fallback {
                    continue;
                }
                queue.push_back(edge.target.as_str());
            }
            while let Some(current) = queue.pop_front() {
                if !visited.insert(current) {
                    continue;
                }
                let Some(kind) = index.kind_of(current) else {
                    continue;
                };
                if kind == NodeKind::AiGuardrail {
                    continue;
                }
                if kind.is_side_effect() {
                    if reported.insert((node.id.as_str(), current)) {
                        out.push(ValidationError::new(
                            "FLOW-VAL-013",
                            Some(current),
                            "kind",
                            format!(
                                "{} node is reachable from AI node '{}' without passing an AIGuardrail",
                                kind, node.id
                            ),
                        ));
                    }
                    continue;
                }
                for edge in index.outgoing(current) {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
        out
    }
}
