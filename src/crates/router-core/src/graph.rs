//! The policy graph: nodes, edges, conditions, and structural validation.
//!
//! A node is an operating mode that whitelists which external tool providers
//! may be called while it is current. An edge is a conditional transition
//! between two nodes. The graph itself only ever grows by construction (via
//! [`Graph::add_node`]/[`Graph::add_edge`]) and is validated once, then
//! treated as immutable by every other component in this crate except for
//! the in-memory `max_visits` override described in [`crate::state`].
//!
//! ```rust
//! use router_core::graph::{Condition, Edge, Graph, Node};
//!
//! let mut graph = Graph::new();
//! graph.add_node(Node::new("start", "Start").with_is_start(true));
//! graph.add_node(Node::new("end", "End").with_is_end(true));
//! graph.add_edge(Edge::new("e1", "start", "end", Condition::Always));
//!
//! assert!(graph.validate().is_ok());
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

/// A predicate attached to an [`Edge`], tested against a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    /// Matches a fully-qualified tool name of the form `provider__tool`.
    ///
    /// The match is three-way, kept for parity with the system this router
    /// replaces: equality, prefix, or substring against `"{provider}__{tool}"`.
    /// Substring matching admits surprising collisions — a pattern `__run`
    /// matches both `docker__run` and `kube__prerun` — so keep patterns as
    /// specific as the provider's namespace allows.
    Tool { tool: String },
    /// Matches when the trigger text contains any of `phrases`, compared
    /// case-insensitively.
    Phrase { phrases: Vec<String> },
    /// Matches only when the caller explicitly asks for unconditional
    /// transitions (the `None` trigger in [`crate::evaluator`]).
    Always,
    /// Fallback: matches unconditionally when no more specific edge from the
    /// same source wins — expressed as lowest precedence via priority rather
    /// than by excluding it from the survivor list, so it always matches a
    /// tool or phrase trigger on its own terms. Also included in
    /// `None`-trigger evaluation alongside `Always`.
    Default,
}

impl Condition {
    /// True iff this condition is satisfied by a tool invocation on
    /// `provider`/`tool`: a `Tool` pattern tested by equality/prefix/substring
    /// against `"{provider}__{tool}"`, or a bare `Default` edge, which has no
    /// tool pattern to test and so matches any tool trigger unconditionally.
    pub fn matches_tool(&self, provider: &str, tool: &str) -> bool {
        match self {
            Condition::Tool { tool: pattern } => {
                let full_name = format!("{provider}__{tool}");
                full_name == *pattern || full_name.starts_with(pattern.as_str()) || full_name.contains(pattern.as_str())
            }
            Condition::Default => true,
            _ => false,
        }
    }

    /// True iff this condition is satisfied by phrase text, along with the
    /// specific phrase that matched (the first one found, in declaration
    /// order). A bare `Default` edge has no phrases to test and matches
    /// unconditionally, same as it does for a tool trigger.
    pub fn matches_phrase(&self, text: &str) -> (bool, Option<&str>) {
        match self {
            Condition::Phrase { phrases } => {
                let lowered = text.to_lowercase();
                for phrase in phrases {
                    if lowered.contains(&phrase.to_lowercase()) {
                        return (true, Some(phrase.as_str()));
                    }
                }
                (false, None)
            }
            Condition::Default => (true, None),
            _ => (false, None),
        }
    }

    /// True for the two variants considered during trigger-less (`None`)
    /// evaluation.
    pub fn matches_unconditionally(&self) -> bool {
        matches!(self, Condition::Always | Condition::Default)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Tool { .. } => "tool",
            Condition::Phrase { .. } => "phrase",
            Condition::Always => "always",
            Condition::Default => "default",
        }
    }
}

/// A mode of operation. Defines which external providers are reachable
/// while it is the current node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    /// Provider names reachable from this node. `"*"` means all providers.
    pub allowed_providers: Vec<String>,
    /// Fully-qualified `provider__tool` names never permitted here, even if
    /// the provider is otherwise allowed.
    pub blocked_tools: Vec<String>,
    /// Free text handed to the caller on entry, if any.
    pub prompt_injection: Option<String>,
    pub is_start: bool,
    pub is_end: bool,
    pub max_visits: u32,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            allowed_providers: vec!["*".to_string()],
            blocked_tools: Vec::new(),
            prompt_injection: None,
            is_start: false,
            is_end: false,
            max_visits: 10,
        }
    }

    pub fn with_is_start(mut self, is_start: bool) -> Self {
        self.is_start = is_start;
        self
    }

    pub fn with_is_end(mut self, is_end: bool) -> Self {
        self.is_end = is_end;
        self
    }

    pub fn with_allowed_providers(mut self, providers: Vec<String>) -> Self {
        self.allowed_providers = providers;
        self
    }

    pub fn with_blocked_tools(mut self, tools: Vec<String>) -> Self {
        self.blocked_tools = tools;
        self
    }

    pub fn with_max_visits(mut self, max_visits: u32) -> Self {
        self.max_visits = max_visits;
        self
    }

    pub fn with_prompt_injection(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_injection = Some(prompt.into());
        self
    }

    /// True if `provider` may be called while this node is current, and the
    /// fully-qualified tool name isn't explicitly blocked.
    pub fn permits(&self, provider: &str, tool: &str) -> bool {
        let provider_allowed = self.allowed_providers.iter().any(|p| p == "*" || p == provider);
        if !provider_allowed {
            return false;
        }
        let qualified = format!("{provider}__{tool}");
        !self.blocked_tools.iter().any(|b| b == &qualified)
    }
}

/// A directed, conditional transition between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    pub condition: Condition,
    /// Lower is higher precedence.
    pub priority: i32,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        condition: Condition,
    ) -> Self {
        Self {
            id: id.into(),
            from_node: from_node.into(),
            to_node: to_node.into(),
            condition,
            priority: 1,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A complete policy graph: nodes, edges, and the derived outgoing-edge
/// index used by the transition evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub nodes: HashMap<String, Node>,
    pub edges: Vec<Edge>,
    /// `node_id -> edges originating there, sorted by priority ascending`.
    /// Rebuilt whenever an edge is added; never serialized, since it's a
    /// pure function of `edges`.
    #[serde(skip)]
    outgoing: HashMap<String, Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
        self.rebuild_outgoing_index();
    }

    fn rebuild_outgoing_index(&mut self) {
        self.outgoing.clear();
        for (idx, edge) in self.edges.iter().enumerate() {
            self.outgoing.entry(edge.from_node.clone()).or_default().push(idx);
        }
        for indices in self.outgoing.values_mut() {
            // Stable sort: insertion order (the original `edges` order) is
            // preserved as the tie-break for equal priority, per invariant 7.
            indices.sort_by_key(|&idx| self.edges[idx].priority);
        }
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.is_start)
    }

    /// Outgoing edges of `node_id`, already sorted by priority ascending
    /// with insertion-order tie-break. Empty if the node has none or
    /// doesn't exist.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.outgoing
            .get(node_id)
            .map(|indices| indices.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == edge_id)
    }

    /// Structural validation: aggregates every problem found rather than
    /// failing on the first, so a human fixing the graph file sees the
    /// whole picture at once. See invariants 1-3 in the data model.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let start_nodes: Vec<&str> = self.nodes.values().filter(|n| n.is_start).map(|n| n.id.as_str()).collect();
        if start_nodes.is_empty() {
            problems.push("no start node defined (set is_start = true on at least one node)".to_string());
        } else if start_nodes.len() > 1 {
            problems.push(format!("multiple start nodes: {}", start_nodes.join(", ")));
        }

        let mut nodes_with_outgoing = std::collections::HashSet::new();
        let mut nodes_with_incoming = std::collections::HashSet::new();
        for edge in &self.edges {
            nodes_with_outgoing.insert(edge.from_node.as_str());
            nodes_with_incoming.insert(edge.to_node.as_str());

            if !self.nodes.contains_key(&edge.from_node) {
                problems.push(format!("edge '{}' references unknown from_node '{}'", edge.id, edge.from_node));
            }
            if !self.nodes.contains_key(&edge.to_node) {
                problems.push(format!("edge '{}' references unknown to_node '{}'", edge.id, edge.to_node));
            }
        }

        for node in self.nodes.values() {
            if !nodes_with_outgoing.contains(node.id.as_str()) && !node.is_end {
                problems.push(format!("node '{}' has no outgoing edges and is not marked as end", node.id));
            }
            if !nodes_with_incoming.contains(node.id.as_str()) && !node.is_start {
                problems.push(format!("node '{}' has no incoming edges and is not marked as start", node.id));
            }
        }

        match RouterError::structure_invalid(problems) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `outgoing_edges` is non-decreasing in priority, regardless of how
        /// many edges share a source node or what order they were added in.
        #[test]
        fn outgoing_edges_non_decreasing_in_priority(priorities in proptest::collection::vec(-10i32..10, 0..12)) {
            let mut g = Graph::new();
            g.add_node(Node::new("a", "A").with_is_start(true));
            g.add_node(Node::new("b", "B").with_is_end(true));
            for (i, priority) in priorities.iter().enumerate() {
                g.add_edge(Edge::new(format!("e{i}"), "a", "b", Condition::Always).with_priority(*priority));
            }

            let outgoing = g.outgoing_edges("a");
            for pair in outgoing.windows(2) {
                prop_assert!(pair[0].priority <= pair[1].priority);
            }
        }

        /// A `Tool` condition's pattern always matches its own fully-qualified
        /// name, and any fully-qualified name the pattern is a substring of.
        #[test]
        fn tool_condition_matches_whenever_pattern_is_a_substring(
            provider in "[a-z]{1,8}",
            tool in "[a-z]{1,8}",
            extra in "[a-z]{0,8}",
        ) {
            let full_name = format!("{provider}__{tool}");
            let condition = Condition::Tool { tool: full_name.clone() };
            prop_assert!(condition.matches_tool(&provider, &tool));

            let padded_tool = format!("{tool}{extra}");
            let padded = Condition::Tool { tool: full_name };
            prop_assert!(padded.matches_tool(&provider, &padded_tool));
        }
    }
}
