//! Graph state: the mutable, persisted half of a running graph.
//!
//! A [`Graph`] is the fixed shape of the state machine; [`GraphState`] is
//! where execution sits in it right now: the current node(s), per-node
//! visit counters, per-node `max_visits` overrides, and a trailing history
//! of [`TransitionRecord`]s. State is persisted as JSON and written with a
//! write-to-temp-then-rename so a crash mid-save never corrupts the file
//! a later process reads back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::graph::Graph;

/// A single recorded transition, appended to [`GraphState::history`] every
/// time [`GraphState::apply_transition`] or [`GraphState::force_node`]
/// succeeds. `edge_id` is `None` for a `force_node` jump, since those
/// bypass edge evaluation entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub edge_id: Option<String>,
    pub from_node: String,
    pub to_node: String,
    pub timestamp: DateTime<Utc>,
    /// The phrase that matched, if the edge's condition was `Phrase`.
    pub matched_phrase: Option<String>,
    /// Caller-supplied note on why the transition was taken, if any.
    pub reason: Option<String>,
}

/// Mutable execution state for one running instance of a [`Graph`].
///
/// `current_nodes` is a list rather than a scalar: execution today is
/// always at exactly one node, but the shape reserves room for a future
/// extension where a graph activates more than one node in parallel.
/// Every method here treats it as a singleton — `current_node()` returns
/// the first (and only) entry — and persistence preserves the list shape
/// even though nothing currently populates more than one element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphState {
    pub current_nodes: Vec<String>,
    #[serde(default)]
    pub visit_counts: HashMap<String, u32>,
    /// Per-node overrides set via `override_max_visits`; absent entries fall
    /// back to the node's own `max_visits`.
    #[serde(default)]
    pub max_visits_overrides: HashMap<String, u32>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    /// Total number of transitions ever applied, across resets. Unlike
    /// `history`, this is never cleared by `reset` — it's a lifetime
    /// counter for the session, and the sole numeric witness that
    /// dispatch never auto-advances the graph on a tool call.
    #[serde(default)]
    pub total_transitions: u64,
    #[serde(default = "Utc::now")]
    pub last_activity: DateTime<Utc>,
    /// Name of the graph document this state was activated against, if
    /// known. Survives `reset`.
    #[serde(default)]
    pub active_graph_name: Option<String>,
    /// Cap used for a node whose own `max_visits` is `0` ("use the
    /// session-wide default"). Survives `reset`.
    #[serde(default = "default_max_visits_cap")]
    pub default_max_visits: u32,

    #[serde(skip)]
    path: Option<PathBuf>,
}

fn default_max_visits_cap() -> u32 {
    10
}

/// The fraction of a node's visit cap at which [`GraphState::visit_warning`]
/// starts returning advisory text, carried over from the visit-tracking
/// behavior of the system this router replaces.
const VISIT_WARNING_THRESHOLD: f64 = 0.8;

impl GraphState {
    /// Build fresh state sitting at `graph`'s start node.
    pub fn initialize(graph: &Graph) -> Result<Self> {
        let start = graph
            .start_node()
            .ok_or_else(|| RouterError::structure_invalid(vec!["no start node defined".to_string()]).unwrap())?;
        let mut visit_counts = HashMap::new();
        visit_counts.insert(start.id.clone(), 1);
        Ok(Self {
            current_nodes: vec![start.id.clone()],
            visit_counts,
            max_visits_overrides: HashMap::new(),
            history: Vec::new(),
            total_transitions: 0,
            last_activity: Utc::now(),
            active_graph_name: None,
            default_max_visits: default_max_visits_cap(),
            path: None,
        })
    }

    /// The single active node. See the type's doc comment for why the
    /// backing field is a list.
    pub fn current_node(&self) -> &str {
        self.current_nodes.first().map(String::as_str).unwrap_or_default()
    }

    /// Reset back to `graph`'s start node, clearing counters, history, and
    /// the lifetime transition count, but keeping `max_visits_overrides`,
    /// `active_graph_name`, and `default_max_visits` — those are operator
    /// and graph-activation decisions, not execution progress.
    pub fn reset(&mut self, graph: &Graph) -> Result<()> {
        let start = graph
            .start_node()
            .ok_or_else(|| RouterError::structure_invalid(vec!["no start node defined".to_string()]).unwrap())?;
        self.current_nodes = vec![start.id.clone()];
        self.visit_counts.clear();
        self.visit_counts.insert(start.id.clone(), 1);
        self.history.clear();
        self.total_transitions = 0;
        self.last_activity = Utc::now();
        Ok(())
    }

    pub fn visit_count(&self, node_id: &str) -> u32 {
        self.visit_counts.get(node_id).copied().unwrap_or(0)
    }

    /// The cap in effect for `node_id`: an explicit override if one was
    /// set; otherwise the node's own `max_visits` if it's nonzero;
    /// otherwise `default_max_visits` (a node's cap of `0` means "use the
    /// session-wide default", not "unlimited").
    pub fn effective_max_visits(&self, graph: &Graph, node_id: &str) -> Option<u32> {
        if let Some(&over) = self.max_visits_overrides.get(node_id) {
            return Some(over);
        }
        let node_cap = graph.nodes.get(node_id)?.max_visits;
        if node_cap > 0 {
            Some(node_cap)
        } else {
            Some(self.default_max_visits)
        }
    }

    /// Advisory text once a node's visit count reaches 80% of its cap.
    /// Never blocks anything; `apply_transition` is the sole enforcement
    /// point for the hard cap.
    pub fn visit_warning(&self, graph: &Graph, node_id: &str) -> Option<String> {
        let cap = self.effective_max_visits(graph, node_id)?;
        if cap == 0 {
            return None;
        }
        let count = self.visit_count(node_id);
        if (count as f64) >= (cap as f64) * VISIT_WARNING_THRESHOLD {
            Some(format!(
                "node '{node_id}' has been visited {count}/{cap} times, approaching its cap"
            ))
        } else {
            None
        }
    }

    /// Set an explicit cap for `node_id`. Rejected if the node has already
    /// been visited at least `new_max` times, since that would silently
    /// make the node immediately over-cap.
    pub fn override_max_visits(&mut self, node_id: &str, new_max: u32) -> Result<()> {
        let current = self.visit_count(node_id);
        if current >= new_max {
            return Err(RouterError::InvalidMaxVisitsOverride {
                node: node_id.to_string(),
                current,
                new_max,
            });
        }
        self.max_visits_overrides.insert(node_id.to_string(), new_max);
        Ok(())
    }

    /// Move directly to `node_id`, bypassing edge evaluation. Used by the
    /// `set_node` operation for manual recovery; still enforces the visit
    /// cap and still records history, but with no `edge_id`.
    pub fn force_node(&mut self, graph: &Graph, node_id: &str) -> Result<()> {
        if !graph.nodes.contains_key(node_id) {
            return Err(RouterError::unknown_node("<force_node>", node_id));
        }
        let next_count = self.visit_count(node_id) + 1;
        if let Some(cap) = self.effective_max_visits(graph, node_id) {
            if next_count > cap {
                return Err(RouterError::max_visits_exceeded(node_id, next_count, cap));
            }
        }
        let from_node = self.current_node().to_string();
        self.current_nodes = vec![node_id.to_string()];
        *self.visit_counts.entry(node_id.to_string()).or_insert(0) += 1;
        self.total_transitions += 1;
        self.last_activity = Utc::now();
        self.history.push(TransitionRecord {
            edge_id: None,
            from_node,
            to_node: node_id.to_string(),
            timestamp: Utc::now(),
            matched_phrase: None,
            reason: None,
        });
        Ok(())
    }

    /// Apply a transition along `edge_id`, enforcing that it originates from
    /// the current node and that the destination hasn't exceeded its cap.
    /// `reason` is operator- or caller-supplied context recorded alongside
    /// the transition; it plays no role in evaluation or enforcement.
    pub fn apply_transition(
        &mut self,
        graph: &Graph,
        edge_id: &str,
        matched_phrase: Option<String>,
        reason: Option<String>,
    ) -> Result<()> {
        let edge = graph
            .edge(edge_id)
            .ok_or_else(|| RouterError::EdgeNotFound(edge_id.to_string()))?;
        if edge.from_node != self.current_node() {
            return Err(RouterError::EdgeNotFromCurrentNode {
                edge_id: edge_id.to_string(),
                current_node: self.current_node().to_string(),
            });
        }

        let next_count = self.visit_count(&edge.to_node) + 1;
        if let Some(cap) = self.effective_max_visits(graph, &edge.to_node) {
            if next_count > cap {
                return Err(RouterError::max_visits_exceeded(&edge.to_node, next_count, cap));
            }
        }

        let from_node = self.current_node().to_string();
        self.current_nodes = vec![edge.to_node.clone()];
        *self.visit_counts.entry(edge.to_node.clone()).or_insert(0) += 1;
        self.total_transitions += 1;
        self.last_activity = Utc::now();
        self.history.push(TransitionRecord {
            edge_id: Some(edge_id.to_string()),
            from_node,
            to_node: edge.to_node.clone(),
            timestamp: Utc::now(),
            matched_phrase,
            reason,
        });
        Ok(())
    }

    /// Load state from `path` if it exists, otherwise initialize fresh
    /// state at `graph`'s start node. Either way the returned state
    /// remembers `path` for subsequent `save` calls.
    pub fn load_or_init(path: impl AsRef<Path>, graph: &Graph) -> Result<Self> {
        let path = path.as_ref();
        let mut state = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str::<GraphState>(&contents)?
        } else {
            Self::initialize(graph)?
        };
        state.path = Some(path.to_path_buf());
        Ok(state)
    }

    /// Persist to the path remembered by `load_or_init`/`set_path`, via a
    /// temp file in the same directory followed by an atomic rename so
    /// concurrent readers never observe a half-written file. Refreshes
    /// `last_activity` as the side effect of touching disk.
    pub fn save(&mut self) -> Result<()> {
        self.last_activity = Utc::now();
        let path = self
            .path
            .as_deref()
            .expect("save() called on state with no associated path; call set_path first")
            .to_path_buf();
        self.save_to(&path)
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("graph_state")
        ));
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
