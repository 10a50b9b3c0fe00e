//! Dispatcher: the single entry point an agent-facing call goes through to
//! actually invoke a tool on a provider.
//!
//! `execute` ties every other component together:
//!
//! 1. resolve the caller's session to a running graph instance
//! 2. look up the session's current node
//! 3. policy gate: is `provider` allowed here, and is `provider__tool`
//!    explicitly blocked
//! 4. get (or lazily spawn) the provider's connection from the pool
//! 5. call the tool, honoring the per-call timeout
//! 6. evaluate the tool trigger against the current node's outgoing edges,
//!    read-only
//! 7. do **not** apply any transition — the graph never auto-advances on a
//!    tool call; the caller decides whether to traverse via `graph_traverse`
//! 8. return the tool result together with the matching edges as a hint

use std::sync::Arc;

use serde_json::Value;

use router_core::Trigger;

use crate::error::{Result, RouterAppError};
use crate::pool::ConnectionPool;
use crate::session::SessionRegistry;

/// One candidate transition a caller could take via `graph_traverse`,
/// surfaced as a hint after a tool call whose trigger matched it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransitionHint {
    pub edge_id: String,
    pub to_node: String,
    pub to_node_name: String,
}

/// Outcome of one dispatched tool call. `current_node` is always equal to
/// the node the session was on before the call — `execute` never advances
/// the graph. `available_transitions` is an ordered hint, highest priority
/// first; the caller traverses explicitly if it wants one.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchOutcome {
    pub result: Value,
    pub session_id: String,
    pub current_node: String,
    pub available_transitions: Vec<TransitionHint>,
}

pub struct Dispatcher {
    pool: Arc<ConnectionPool>,
    sessions: Arc<SessionRegistry>,
}

impl Dispatcher {
    pub fn new(pool: Arc<ConnectionPool>, sessions: Arc<SessionRegistry>) -> Self {
        Self { pool, sessions }
    }

    pub async fn execute(
        &self,
        override_session: Option<&str>,
        specific_session: Option<&str>,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<DispatchOutcome> {
        let session_id = self.sessions.resolve(override_session, specific_session).await?;

        let current_node = self.current_node(&session_id).await?;
        self.check_policy(&session_id, &current_node, provider, tool).await?;

        let connection = self.pool.get(provider).await?;
        let result = connection.call_tool(tool, arguments).await?;

        let trigger = Trigger::Tool {
            provider: provider.to_string(),
            tool: tool.to_string(),
        };
        let available_transitions = self
            .sessions
            .with_session(&session_id, |graph, state| {
                Ok(router_core::evaluate(graph, state, &trigger)
                    .into_iter()
                    .map(|m| {
                        let to_node = m.edge.to_node.clone();
                        let to_node_name = graph.nodes.get(&to_node).map(|n| n.name.clone()).unwrap_or_default();
                        TransitionHint {
                            edge_id: m.edge.id.clone(),
                            to_node,
                            to_node_name,
                        }
                    })
                    .collect())
            })
            .await?;

        Ok(DispatchOutcome {
            result,
            session_id,
            current_node,
            available_transitions,
        })
    }

    async fn current_node(&self, session_id: &str) -> Result<String> {
        self.sessions
            .with_session(session_id, |_graph, state| Ok(state.current_node().to_string()))
            .await
    }

    async fn check_policy(&self, session_id: &str, node_id: &str, provider: &str, tool: &str) -> Result<()> {
        let permitted = self
            .sessions
            .with_session(session_id, |graph, _state| {
                Ok(graph
                    .nodes
                    .get(node_id)
                    .map(|node| node.permits(provider, tool))
                    .unwrap_or(false))
            })
            .await?;

        if permitted {
            Ok(())
        } else {
            Err(RouterAppError::PolicyDenied {
                node: node_id.to_string(),
                provider: provider.to_string(),
                tool: tool.to_string(),
            })
        }
    }
}
