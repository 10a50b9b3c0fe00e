//! Session registry: maps a caller-supplied session identity to a running
//! [`GraphState`] instance, all sharing one [`Graph`] definition.
//!
//! Resolution follows a fixed precedence: an explicit override always wins,
//! then the session implied by the calling context, then a configured
//! default, and finally [`RouterAppError::SessionUnresolved`] if none of
//! those produced a usable id. Each resolved session gets its own
//! [`GraphState`], created lazily on first use and optionally persisted to
//! disk if a state directory was configured.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use router_core::{Graph, GraphState};

use crate::error::{Result, RouterAppError};

/// Where a resolved session should look for its transition state.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistryConfig {
    /// Directory holding one `<session_id>.json` file per session. `None`
    /// means state lives in memory only for the lifetime of the process.
    pub state_dir: Option<PathBuf>,
    /// The session id to fall back to when neither an override nor a
    /// context-specific id was supplied.
    pub default_session: Option<String>,
}

pub struct SessionRegistry {
    graph: RwLock<Arc<Graph>>,
    config: SessionRegistryConfig,
    sessions: Mutex<HashMap<String, GraphState>>,
}

impl SessionRegistry {
    pub fn new(graph: Arc<Graph>, config: SessionRegistryConfig) -> Self {
        Self {
            graph: RwLock::new(graph),
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a session id following override > specific > default
    /// precedence, creating its [`GraphState`] on first use if necessary.
    pub async fn resolve(
        &self,
        override_session: Option<&str>,
        specific_session: Option<&str>,
    ) -> Result<String> {
        let session_id = override_session
            .or(specific_session)
            .or(self.config.default_session.as_deref())
            .ok_or(RouterAppError::SessionUnresolved)?
            .to_string();

        self.ensure_session(&session_id).await?;
        Ok(session_id)
    }

    async fn ensure_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session_id) {
            return Ok(());
        }

        let graph = self.graph.read().await;
        let state = match self.state_path(session_id) {
            Some(path) => GraphState::load_or_init(&path, &graph)?,
            None => GraphState::initialize(&graph)?,
        };
        sessions.insert(session_id.to_string(), state);
        Ok(())
    }

    fn state_path(&self, session_id: &str) -> Option<PathBuf> {
        self.config
            .state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{session_id}.json")))
    }

    /// Run `f` against the resolved session's graph and state, persisting
    /// afterward if a state directory is configured. This is the only way
    /// callers touch a session's state, so persistence never gets
    /// forgotten at a call site.
    pub async fn with_session<F, T>(&self, session_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Graph, &mut GraphState) -> Result<T>,
    {
        let graph = self.graph.read().await;
        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .get_mut(session_id)
            .ok_or(RouterAppError::SessionUnresolved)?;
        let result = f(&graph, state)?;
        if self.state_path(session_id).is_some() {
            state.save()?;
        }
        Ok(result)
    }

    pub async fn graph_snapshot(&self) -> Arc<Graph> {
        self.graph.read().await.clone()
    }

    /// Replace the active graph and reset every already-resolved session
    /// back to the new graph's start node. Existing node ids, visit
    /// counts, and history belong to the old graph and can't be carried
    /// forward safely.
    pub async fn activate(&self, new_graph: Graph) -> Result<()> {
        new_graph.validate()?;
        let new_graph = Arc::new(new_graph);

        let mut graph = self.graph.write().await;
        let mut sessions = self.sessions.lock().await;
        for state in sessions.values_mut() {
            state.reset(&new_graph)?;
        }
        *graph = new_graph;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::{Condition, Edge, Node};

    fn simple_graph() -> Arc<Graph> {
        let mut g = Graph::new();
        g.add_node(Node::new("start", "Start").with_is_start(true));
        g.add_node(Node::new("end", "End").with_is_end(true));
        g.add_edge(Edge::new("e1", "start", "end", Condition::Always));
        Arc::new(g)
    }

    #[tokio::test]
    async fn override_takes_precedence_over_specific_and_default() {
        let registry = SessionRegistry::new(
            simple_graph(),
            SessionRegistryConfig {
                state_dir: None,
                default_session: Some("default".to_string()),
            },
        );
        let resolved = registry.resolve(Some("explicit"), Some("context")).await.unwrap();
        assert_eq!(resolved, "explicit");
    }

    #[tokio::test]
    async fn specific_used_when_no_override() {
        let registry = SessionRegistry::new(
            simple_graph(),
            SessionRegistryConfig {
                state_dir: None,
                default_session: Some("default".to_string()),
            },
        );
        let resolved = registry.resolve(None, Some("context")).await.unwrap();
        assert_eq!(resolved, "context");
    }

    #[tokio::test]
    async fn default_used_when_nothing_else_supplied() {
        let registry = SessionRegistry::new(
            simple_graph(),
            SessionRegistryConfig {
                state_dir: None,
                default_session: Some("default".to_string()),
            },
        );
        let resolved = registry.resolve(None, None).await.unwrap();
        assert_eq!(resolved, "default");
    }

    #[tokio::test]
    async fn unresolved_when_nothing_available() {
        let registry = SessionRegistry::new(simple_graph(), SessionRegistryConfig::default());
        let err = registry.resolve(None, None).await.unwrap_err();
        assert!(matches!(err, RouterAppError::SessionUnresolved));
    }

    #[tokio::test]
    async fn with_session_mutates_and_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(
            simple_graph(),
            SessionRegistryConfig {
                state_dir: Some(dir.path().to_path_buf()),
                default_session: None,
            },
        );
        let session_id = registry.resolve(Some("s1"), None).await.unwrap();
        registry
            .with_session(&session_id, |graph, state| {
                state.apply_transition(graph, "e1", None, None).map_err(RouterAppError::from)
            })
            .await
            .unwrap();

        assert!(dir.path().join("s1.json").exists());
    }

    #[tokio::test]
    async fn activate_swaps_graph_and_resets_existing_sessions() {
        let registry = SessionRegistry::new(simple_graph(), SessionRegistryConfig::default());
        let session_id = registry.resolve(Some("s1"), None).await.unwrap();
        registry
            .with_session(&session_id, |graph, state| {
                state.apply_transition(graph, "e1", None, None).map_err(RouterAppError::from)
            })
            .await
            .unwrap();

        let mut replacement = Graph::new();
        replacement.add_node(Node::new("new_start", "NewStart").with_is_start(true));
        replacement.add_node(Node::new("new_end", "NewEnd").with_is_end(true));
        replacement.add_edge(Edge::new("e2", "new_start", "new_end", Condition::Always));
        registry.activate(replacement).await.unwrap();

        let node = registry
            .with_session(&session_id, |_graph, state| Ok(state.current_node().to_string()))
            .await
            .unwrap();
        assert_eq!(node, "new_start");
    }

    #[tokio::test]
    async fn activate_rejects_structurally_invalid_graph() {
        let registry = SessionRegistry::new(simple_graph(), SessionRegistryConfig::default());
        let broken = Graph::new();
        let err = registry.activate(broken).await.unwrap_err();
        assert!(matches!(err, RouterAppError::Graph(_)));
    }
}
