//! The transition API surface: every operation an agent can perform on a
//! graph session that isn't a tool dispatch. Backs the `graph_*` methods
//! exposed over the agent-facing JSON-RPC surface in [`crate::surface`].

use std::sync::Arc;

use serde::Serialize;

use router_core::{evaluate, Graph, GraphState, Trigger};

use crate::error::{Result, RouterAppError};
use crate::session::SessionRegistry;

/// One outgoing edge of the current node, as reported by `status`. Lets a
/// caller see what it could traverse to without first issuing a `check_*`.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEdgeSummary {
    pub edge_id: String,
    pub to_node: String,
    pub condition_kind: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub current_node: String,
    pub visit_count: u32,
    pub max_visits: Option<u32>,
    pub visit_warning: Option<String>,
    pub history_len: usize,
    pub total_transitions: u64,
    pub allowed_providers: Vec<String>,
    pub outgoing_edges: Vec<OutgoingEdgeSummary>,
}

/// One edge a `check_*` dry run found to match, in priority order.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionCandidate {
    pub edge_id: String,
    pub target_node: String,
    pub matched_phrase: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub would_match: bool,
    /// Every matching edge, in priority order. Empty when `would_match` is
    /// false.
    pub candidates: Vec<TransitionCandidate>,
    /// The head of `candidates`, named separately for callers that just
    /// want the one the core would recommend.
    pub recommended_edge_id: Option<String>,
}

pub struct TransitionApi {
    sessions: Arc<SessionRegistry>,
}

impl TransitionApi {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    fn build_status(graph: &Graph, state: &GraphState) -> StatusResponse {
        let node_id = state.current_node().to_string();
        let outgoing_edges = graph
            .outgoing_edges(&node_id)
            .into_iter()
            .map(|edge| OutgoingEdgeSummary {
                edge_id: edge.id.clone(),
                to_node: edge.to_node.clone(),
                condition_kind: edge.condition.kind().to_string(),
                priority: edge.priority,
            })
            .collect();
        let allowed_providers = graph
            .nodes
            .get(&node_id)
            .map(|n| n.allowed_providers.clone())
            .unwrap_or_default();
        StatusResponse {
            visit_count: state.visit_count(&node_id),
            max_visits: state.effective_max_visits(graph, &node_id),
            visit_warning: state.visit_warning(graph, &node_id),
            history_len: state.history.len(),
            total_transitions: state.total_transitions,
            allowed_providers,
            outgoing_edges,
            current_node: node_id,
        }
    }

    pub async fn status(&self, session_id: &str) -> Result<StatusResponse> {
        self.sessions
            .with_session(session_id, |graph, state| Ok(Self::build_status(graph, state)))
            .await
    }

    /// Apply a specific edge by id, bypassing trigger evaluation. Used when
    /// the caller has already decided which transition it wants.
    /// `reason` is recorded alongside the transition for later inspection
    /// via `status`'s history; it has no effect on whether the transition
    /// is allowed.
    pub async fn traverse(&self, session_id: &str, edge_id: &str, reason: Option<String>) -> Result<StatusResponse> {
        self.sessions
            .with_session(session_id, move |graph, state| {
                state.apply_transition(graph, edge_id, None, reason)?;
                Ok(Self::build_status(graph, state))
            })
            .await
    }

    /// Dry-run a tool trigger: which edges would fire, and in what order.
    /// Does not mutate state.
    pub async fn check_tool(&self, session_id: &str, provider: &str, tool: &str) -> Result<CheckResponse> {
        let trigger = Trigger::Tool { provider: provider.to_string(), tool: tool.to_string() };
        self.check(session_id, trigger).await
    }

    /// Dry-run phrase text against the current node's outgoing edges.
    pub async fn check_phrase(&self, session_id: &str, text: &str) -> Result<CheckResponse> {
        let trigger = Trigger::Phrase { text: text.to_string() };
        self.check(session_id, trigger).await
    }

    async fn check(&self, session_id: &str, trigger: Trigger) -> Result<CheckResponse> {
        self.sessions
            .with_session(session_id, |graph, state| {
                let candidates: Vec<TransitionCandidate> = evaluate(graph, state, &trigger)
                    .into_iter()
                    .map(|m| TransitionCandidate {
                        edge_id: m.edge.id.clone(),
                        target_node: m.edge.to_node.clone(),
                        matched_phrase: m.matched_phrase,
                    })
                    .collect();
                let recommended_edge_id = candidates.first().map(|c| c.edge_id.clone());
                Ok(CheckResponse {
                    would_match: !candidates.is_empty(),
                    candidates,
                    recommended_edge_id,
                })
            })
            .await
    }

    pub async fn reset(&self, session_id: &str) -> Result<()> {
        self.sessions
            .with_session(session_id, |graph, state| state.reset(graph).map_err(RouterAppError::from))
            .await
    }

    pub async fn set_node(&self, session_id: &str, node_id: &str) -> Result<()> {
        self.sessions
            .with_session(session_id, |graph, state| {
                state.force_node(graph, node_id).map_err(RouterAppError::from)
            })
            .await
    }

    pub async fn override_max_visits(&self, session_id: &str, node_id: &str, new_max: u32) -> Result<()> {
        self.sessions
            .with_session(session_id, |_graph, state| {
                state.override_max_visits(node_id, new_max).map_err(RouterAppError::from)
            })
            .await
    }

    /// Replace the active graph definition for every session, after
    /// validating it.
    pub async fn activate(&self, graph_yaml: &str) -> Result<()> {
        let graph = router_core::load_from_str(graph_yaml)?;
        self.sessions.activate(graph).await
    }

    /// Validate a graph document without activating it.
    pub fn validate(&self, graph_yaml: &str) -> Result<()> {
        router_core::load_from_str(graph_yaml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistryConfig;
    use router_core::{Condition, Edge, Graph, Node};

    fn graph_with_default_and_tool_edge() -> Arc<Graph> {
        let mut g = Graph::new();
        g.add_node(
            Node::new("start", "Start")
                .with_is_start(true)
                .with_max_visits(2)
                .with_allowed_providers(vec!["git".to_string()]),
        );
        g.add_node(Node::new("end", "End").with_is_end(true));
        g.add_edge(Edge::new("e1", "start", "end", Condition::Tool { tool: "git__diff".into() }));
        Arc::new(g)
    }

    async fn api_with_session() -> (TransitionApi, String) {
        let sessions = Arc::new(SessionRegistry::new(
            graph_with_default_and_tool_edge(),
            SessionRegistryConfig { state_dir: None, default_session: Some("s1".to_string()) },
        ));
        let api = TransitionApi::new(sessions.clone());
        let session_id = sessions.resolve(None, None).await.unwrap();
        (api, session_id)
    }

    #[tokio::test]
    async fn status_reports_current_node_and_counts() {
        let (api, session_id) = api_with_session().await;
        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.current_node, "start");
        assert_eq!(status.visit_count, 1);
        assert_eq!(status.max_visits, Some(2));
        assert_eq!(status.total_transitions, 0);
    }

    #[tokio::test]
    async fn status_reports_policy_and_outgoing_edges() {
        let (api, session_id) = api_with_session().await;
        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.allowed_providers, vec!["git".to_string()]);
        assert_eq!(status.outgoing_edges.len(), 1);
        assert_eq!(status.outgoing_edges[0].edge_id, "e1");
        assert_eq!(status.outgoing_edges[0].to_node, "end");
        assert_eq!(status.outgoing_edges[0].condition_kind, "tool");
    }

    #[tokio::test]
    async fn check_tool_reports_match_without_mutating_state() {
        let (api, session_id) = api_with_session().await;
        let check = api.check_tool(&session_id, "git", "diff").await.unwrap();
        assert!(check.would_match);
        assert_eq!(check.recommended_edge_id.as_deref(), Some("e1"));
        assert_eq!(check.candidates.len(), 1);

        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.current_node, "start");
    }

    #[tokio::test]
    async fn check_phrase_returns_every_match_in_priority_order_with_head_recommended() {
        let mut g = Graph::new();
        g.add_node(Node::new("start", "Start").with_is_start(true));
        g.add_node(Node::new("high", "High").with_is_end(true));
        g.add_node(Node::new("low", "Low").with_is_end(true));
        g.add_edge(
            Edge::new("e_high", "start", "high", Condition::Phrase { phrases: vec!["urgent".into()] })
                .with_priority(1),
        );
        g.add_edge(Edge::new("e_low", "start", "low", Condition::Default).with_priority(5));

        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(g),
            SessionRegistryConfig { state_dir: None, default_session: Some("s1".to_string()) },
        ));
        let api = TransitionApi::new(sessions.clone());
        let session_id = sessions.resolve(None, None).await.unwrap();

        let check = api.check_phrase(&session_id, "this is urgent!").await.unwrap();
        let ids: Vec<&str> = check.candidates.iter().map(|c| c.edge_id.as_str()).collect();
        assert_eq!(ids, vec!["e_high", "e_low"]);
        assert_eq!(check.recommended_edge_id.as_deref(), Some("e_high"));
    }

    #[tokio::test]
    async fn traverse_applies_named_edge_and_records_reason() {
        let (api, session_id) = api_with_session().await;
        let status = api.traverse(&session_id, "e1", Some("manual escalation".to_string())).await.unwrap();
        assert_eq!(status.current_node, "end");
        assert_eq!(status.total_transitions, 1);
    }

    #[tokio::test]
    async fn set_node_and_reset_round_trip() {
        let (api, session_id) = api_with_session().await;
        api.traverse(&session_id, "e1", None).await.unwrap();
        api.reset(&session_id).await.unwrap();
        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.current_node, "start");
        assert_eq!(status.total_transitions, 0);
    }

    #[tokio::test]
    async fn override_max_visits_then_exceed_is_rejected_later() {
        let (api, session_id) = api_with_session().await;
        api.override_max_visits(&session_id, "start", 5).await.unwrap();
        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.max_visits, Some(5));
    }

    #[tokio::test]
    async fn validate_accepts_well_formed_document_without_activating() {
        let (api, session_id) = api_with_session().await;
        let doc = "nodes:\n  - id: a\n    is_start: true\n  - id: b\n    is_end: true\nedges:\n  - from: a\n    to: b\n    kind: always\n";
        api.validate(doc).unwrap();

        // Graph for the session is unaffected since validate() doesn't activate.
        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.current_node, "start");
    }

    #[tokio::test]
    async fn activate_swaps_graph_for_existing_sessions() {
        let (api, session_id) = api_with_session().await;
        let doc = "nodes:\n  - id: a\n    is_start: true\n  - id: b\n    is_end: true\nedges:\n  - from: a\n    to: b\n    kind: always\n";
        api.activate(doc).await.unwrap();

        let status = api.status(&session_id).await.unwrap();
        assert_eq!(status.current_node, "a");
    }
}
