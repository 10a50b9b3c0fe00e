//! Graph loader: turns a YAML graph document into a validated [`Graph`].
//!
//! The on-disk shape is deliberately permissive about defaults, following
//! the field-defaulting behavior of the parser this router replaces: a
//! node only needs an `id`, everything else falls back to a sane default,
//! so hand-written graph files stay short.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, RouterError};
use crate::graph::{Condition, Edge, Graph, Node};

#[derive(Debug, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    nodes: Vec<NodeDocument>,
    #[serde(default)]
    edges: Vec<EdgeDocument>,
}

#[derive(Debug, Deserialize)]
struct NodeDocument {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_allowed_providers")]
    allowed_providers: Vec<String>,
    #[serde(default)]
    blocked_tools: Vec<String>,
    #[serde(default)]
    prompt_injection: Option<String>,
    #[serde(default)]
    is_start: bool,
    #[serde(default)]
    is_end: bool,
    #[serde(default = "default_max_visits")]
    max_visits: u32,
}

fn default_allowed_providers() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_visits() -> u32 {
    10
}

#[derive(Debug, Deserialize)]
struct EdgeDocument {
    #[serde(default)]
    id: Option<String>,
    from: String,
    to: String,
    #[serde(flatten)]
    condition: EdgeConditionDocument,
    #[serde(default = "default_priority")]
    priority: i32,
}

fn default_priority() -> i32 {
    1
}

/// The edge document accepts either a `tool`, a `phrases` list, or neither
/// (meaning `always`/`default`, distinguished by the explicit `kind` field).
#[derive(Debug, Deserialize)]
struct EdgeConditionDocument {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    phrases: Option<Vec<String>>,
    #[serde(default)]
    kind: Option<String>,
}

impl EdgeConditionDocument {
    fn into_condition(self, edge_label: &str) -> Result<Condition> {
        if let Some(tool) = self.tool {
            return Ok(Condition::Tool { tool });
        }
        if let Some(phrases) = self.phrases {
            return Ok(Condition::Phrase { phrases });
        }
        match self.kind.as_deref() {
            Some("always") | None => Ok(Condition::Always),
            Some("default") => Ok(Condition::Default),
            Some(other) => Err(RouterError::GraphParse(format!(
                "edge '{edge_label}' has unrecognized condition kind '{other}'"
            ))),
        }
    }
}

/// Parse and validate a graph document from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<Graph> {
    let doc: GraphDocument = serde_yaml::from_str(yaml)?;
    build_graph(doc)
}

/// Parse and validate a graph document from a file on disk.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Graph> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RouterError::GraphParse(format!("could not read graph file '{}': {e}", path.display()))
    })?;
    load_from_str(&contents)
}

fn build_graph(doc: GraphDocument) -> Result<Graph> {
    let mut graph = Graph::new();
    for (key, value) in doc.metadata {
        graph.metadata.insert(key, value);
    }

    for n in doc.nodes {
        let name = n.name.unwrap_or_else(|| n.id.clone());
        let mut node = Node::new(n.id, name)
            .with_allowed_providers(n.allowed_providers)
            .with_blocked_tools(n.blocked_tools)
            .with_max_visits(n.max_visits)
            .with_is_start(n.is_start)
            .with_is_end(n.is_end);
        if let Some(prompt) = n.prompt_injection {
            node = node.with_prompt_injection(prompt);
        }
        graph.add_node(node);
    }

    for (idx, e) in doc.edges.into_iter().enumerate() {
        let id = e.id.clone().unwrap_or_else(|| format!("edge_{idx}"));
        let condition = e.condition.into_condition(&id)?;
        graph.add_edge(Edge::new(id, e.from, e.to, condition).with_priority(e.priority));
    }

    graph.validate()?;
    Ok(graph)
}
