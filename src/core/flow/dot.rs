use crate::core::flow::schema::FlowGraph;
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fmt;

/// Node weight carrying display information.
struct NodeLabel {
    id: String,
    kind: &'static str,
    name: Option<String>,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} [{}] {}", self.id, self.kind, truncate(name, 40)),
            None => write!(f, "{} [{}]", self.id, self.kind),
        }
    }
}

struct EdgeLabel(String);

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn build_graph(graph: &FlowGraph) -> DiGraph<NodeLabel, EdgeLabel> {
    let mut dag = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &graph.nodes {
        let idx = dag.add_node(NodeLabel {
            id: node.id.clone(),
            kind: node.kind.as_str(),
            name: node.name.clone(),
        });
        index.insert(node.id.as_str(), idx);
    }
    for edge in &graph.edges {
        if let (Some(&from), Some(&to)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            let label = edge.label.clone().unwrap_or_default();
            dag.add_edge(from, to, EdgeLabel(truncate(&label, 60)));
        }
    }
    dag
}

/// Render a graph as Graphviz DOT. Edges with dangling endpoints are omitted.
pub fn graph_to_dot(graph: &FlowGraph) -> String {
    format!("{}", Dot::new(&build_graph(graph)))
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        value.to_string()
    } else {
        let head: String = value.chars().take(limit).collect();
        format!("{}...", head)
    }
}
