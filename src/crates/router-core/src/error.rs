//! Error types for the graph model, graph state, and transition evaluator.
//!
//! Everything below the dispatcher layer (connection pool, subprocess I/O,
//! session resolution) has its own error type in the `router` crate, which
//! wraps [`RouterError`] via `#[from]` rather than duplicating these variants.
//!
//! ```text
//! RouterError
//! ├── GraphStructureInvalid   -- loader/validate() found structural problems
//! ├── UnknownNodeReferenced   -- edge target missing from the node map
//! ├── MaxVisitsExceeded       -- visit cap reached, state left untouched
//! ├── EdgeNotFound            -- traverse() given an id that doesn't exist
//! ├── EdgeNotFromCurrentNode  -- traverse() given an id from the wrong node
//! ├── GraphParse              -- loader couldn't parse or map a document
//! ├── Io                      -- state file read/write failure
//! └── Serialization / Yaml    -- state or graph document malformed
//! ```

use thiserror::Error;

/// Errors produced by the graph model, graph state, and transition evaluator.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The graph failed structural validation. Carries every problem found,
    /// not just the first, so a human fixing the graph file sees them all
    /// at once.
    #[error("graph structure invalid:\n{}", .problems.join("\n"))]
    GraphStructureInvalid { problems: Vec<String> },

    /// An edge's `to` field names a node id absent from the graph. Validation
    /// should have caught this already; this variant exists for the
    /// traversal path, which re-checks defensively rather than trusting that
    /// the graph it was handed passed validation.
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    UnknownNodeReferenced { edge_id: String, node_id: String },

    /// The destination node has reached its visit cap. The caller decides
    /// whether to call `override_max_visits` or pick a different edge.
    #[error("node '{node}' has reached max visits ({current}/{cap})")]
    MaxVisitsExceeded {
        node: String,
        current: u32,
        cap: u32,
    },

    /// `traverse` was given an edge id that doesn't exist in the graph.
    #[error("edge '{0}' not found")]
    EdgeNotFound(String),

    /// `traverse` was given an edge id that exists but doesn't originate
    /// from the current node (a stale hint from a previous turn, most
    /// commonly).
    #[error("edge '{edge_id}' does not originate from current node '{current_node}'")]
    EdgeNotFromCurrentNode {
        edge_id: String,
        current_node: String,
    },

    /// `override_max_visits` was asked to set a cap at or below the node's
    /// current visit count.
    #[error("cannot set max_visits for '{node}' to {new_max}: already visited {current} times")]
    InvalidMaxVisitsOverride {
        node: String,
        current: u32,
        new_max: u32,
    },

    /// The graph loader (§10.1) could not parse or map a graph document into
    /// the typed entities of the data model.
    #[error("failed to parse graph document: {0}")]
    GraphParse(String),

    /// I/O failure reading or writing a graph state file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The graph state file contained malformed JSON.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A graph document contained malformed YAML.
    #[error("graph document YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RouterError {
    /// Build a [`RouterError::GraphStructureInvalid`] from an accumulated
    /// list of problems. Returns `None` if the list is empty, so call sites
    /// can write `if let Some(e) = RouterError::structure_invalid(problems) { return Err(e) }`.
    pub fn structure_invalid(problems: Vec<String>) -> Option<Self> {
        if problems.is_empty() {
            None
        } else {
            Some(Self::GraphStructureInvalid { problems })
        }
    }

    pub fn unknown_node(edge_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::UnknownNodeReferenced {
            edge_id: edge_id.into(),
            node_id: node_id.into(),
        }
    }

    pub fn max_visits_exceeded(node: impl Into<String>, current: u32, cap: u32) -> Self {
        Self::MaxVisitsExceeded {
            node: node.into(),
            current,
            cap,
        }
    }
}

/// Result type used throughout `router-core`.
pub type Result<T> = std::result::Result<T, RouterError>;
