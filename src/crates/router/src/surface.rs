//! Agent-facing surface: a line-delimited JSON-RPC server on stdio, the
//! mirror image of the framing [`crate::connection::Connection`] uses
//! outbound to providers. This is what an agent process talks to.
//!
//! Exposed methods: `tool_execute`, `graph_status`, `graph_traverse`,
//! `graph_check_tool`, `graph_check_phrase`, `graph_reset`,
//! `graph_set_node`, `graph_override_max_visits`, `graph_activate`,
//! `graph_validate`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::api::TransitionApi;
use crate::dispatcher::Dispatcher;
use crate::error::RouterAppError;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct AgentSurface {
    dispatcher: Arc<Dispatcher>,
    api: Arc<TransitionApi>,
}

/// Session and override ids are threaded through params on every request
/// rather than tied to the connection, since one agent process may talk
/// to multiple sessions over its single stdio pipe.
#[derive(Debug, Deserialize, Default)]
struct SessionParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    override_session_id: Option<String>,
}

impl AgentSurface {
    pub fn new(dispatcher: Arc<Dispatcher>, api: Arc<TransitionApi>) -> Self {
        Self { dispatcher, api }
    }

    /// Run the server loop: read one JSON-RPC request per line from
    /// `reader`, write one JSON-RPC response per line to `writer`. Returns
    /// when `reader` hits EOF.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> crate::error::Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            let mut serialized = serde_json::to_string(&response)?;
            serialized.push('\n');
            writer.write_all(serialized.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return RpcResponse {
                    jsonrpc: "2.0",
                    id: Value::Null,
                    result: None,
                    error: Some(RpcError { code: -32700, message: format!("parse error: {e}") }),
                }
            }
        };
        let id = request.id.unwrap_or(Value::Null);

        match self.dispatch(&request.method, request.params).await {
            Ok(result) => RpcResponse { jsonrpc: "2.0", id, result: Some(result), error: None },
            Err(e) => {
                tracing::event!(target: "router::surface", tracing::Level::WARN, error = %e, method = %request.method, "request failed");
                RpcResponse {
                    jsonrpc: "2.0",
                    id,
                    result: None,
                    error: Some(RpcError { code: rpc_error_code(&e), message: e.to_string() }),
                }
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> crate::error::Result<Value> {
        match method {
            "tool_execute" => {
                #[derive(Deserialize)]
                struct Params {
                    #[serde(flatten)]
                    session: SessionParams,
                    provider: String,
                    tool: String,
                    #[serde(default)]
                    arguments: Value,
                }
                let p: Params = serde_json::from_value(params)?;
                let outcome = self
                    .dispatcher
                    .execute(
                        p.session.override_session_id.as_deref(),
                        p.session.session_id.as_deref(),
                        &p.provider,
                        &p.tool,
                        p.arguments,
                    )
                    .await?;
                Ok(serde_json::to_value(outcome)?)
            }
            "graph_status" => {
                let session_id = require_session(&params)?;
                Ok(serde_json::to_value(self.api.status(&session_id).await?)?)
            }
            "graph_traverse" => {
                #[derive(Deserialize)]
                struct Params {
                    session_id: String,
                    edge_id: String,
                    #[serde(default)]
                    reason: Option<String>,
                }
                let p: Params = serde_json::from_value(params)?;
                Ok(serde_json::to_value(self.api.traverse(&p.session_id, &p.edge_id, p.reason).await?)?)
            }
            "graph_check_tool" => {
                #[derive(Deserialize)]
                struct Params {
                    session_id: String,
                    provider: String,
                    tool: String,
                }
                let p: Params = serde_json::from_value(params)?;
                Ok(serde_json::to_value(self.api.check_tool(&p.session_id, &p.provider, &p.tool).await?)?)
            }
            "graph_check_phrase" => {
                #[derive(Deserialize)]
                struct Params {
                    session_id: String,
                    text: String,
                }
                let p: Params = serde_json::from_value(params)?;
                Ok(serde_json::to_value(self.api.check_phrase(&p.session_id, &p.text).await?)?)
            }
            "graph_reset" => {
                let session_id = require_session(&params)?;
                self.api.reset(&session_id).await?;
                Ok(Value::Null)
            }
            "graph_set_node" => {
                #[derive(Deserialize)]
                struct Params {
                    session_id: String,
                    node_id: String,
                }
                let p: Params = serde_json::from_value(params)?;
                self.api.set_node(&p.session_id, &p.node_id).await?;
                Ok(Value::Null)
            }
            "graph_override_max_visits" => {
                #[derive(Deserialize)]
                struct Params {
                    session_id: String,
                    node_id: String,
                    max_visits: u32,
                }
                let p: Params = serde_json::from_value(params)?;
                self.api.override_max_visits(&p.session_id, &p.node_id, p.max_visits).await?;
                Ok(Value::Null)
            }
            "graph_activate" => {
                #[derive(Deserialize)]
                struct Params {
                    graph_yaml: String,
                }
                let p: Params = serde_json::from_value(params)?;
                self.api.activate(&p.graph_yaml).await?;
                Ok(Value::Null)
            }
            "graph_validate" => {
                #[derive(Deserialize)]
                struct Params {
                    graph_yaml: String,
                }
                let p: Params = serde_json::from_value(params)?;
                self.api.validate(&p.graph_yaml)?;
                Ok(Value::Null)
            }
            other => Err(RouterAppError::Configuration(format!("unknown method '{other}'"))),
        }
    }
}

fn require_session(params: &Value) -> crate::error::Result<String> {
    params
        .get("session_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(RouterAppError::SessionUnresolved)
}

fn rpc_error_code(error: &RouterAppError) -> i64 {
    match error {
        RouterAppError::PolicyDenied { .. } => -32001,
        RouterAppError::SessionUnresolved => -32002,
        RouterAppError::UnknownProvider(_) => -32003,
        RouterAppError::Graph(_) => -32004,
        RouterAppError::Serialization(_) => -32602,
        _ => -32000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderLaunchDescriptor, ProvidersConfig};
    use crate::pool::ConnectionPool;
    use crate::session::{SessionRegistry, SessionRegistryConfig};
    use router_core::{Condition, Edge, Graph, Node};
    use std::collections::HashMap;

    fn build_surface() -> AgentSurface {
        let mut g = Graph::new();
        g.add_node(Node::new("start", "Start").with_is_start(true));
        g.add_node(Node::new("end", "End").with_is_end(true));
        g.add_edge(Edge::new("e1", "start", "end", Condition::Always));

        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(g),
            SessionRegistryConfig { state_dir: None, default_session: Some("s1".to_string()) },
        ));
        let pool = Arc::new(ConnectionPool::new(ProvidersConfig {
            providers: HashMap::from([(
                "git".to_string(),
                ProviderLaunchDescriptor { command: "cat".to_string(), args: vec![], env: HashMap::new() },
            )]),
        }));
        let dispatcher = Arc::new(Dispatcher::new(pool, sessions.clone()));
        let api = Arc::new(TransitionApi::new(sessions));
        AgentSurface::new(dispatcher, api)
    }

    #[tokio::test]
    async fn handles_graph_status_round_trip() {
        let surface = build_surface();
        surface.api.reset("s1").await.ok();
        let response =
            surface.handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"graph_status","params":{"session_id":"s1"}}"#).await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["current_node"], "start");
    }

    #[tokio::test]
    async fn unknown_method_returns_error_response() {
        let surface = build_surface();
        let response = surface
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"nonexistent","params":{}}"#)
            .await;
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn malformed_json_returns_parse_error() {
        let surface = build_surface();
        let response = surface.handle_line("not json at all").await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32700);
    }

    #[tokio::test]
    async fn graph_traverse_advances_node() {
        let surface = build_surface();
        let response = surface
            .handle_line(r#"{"jsonrpc":"2.0","id":3,"method":"graph_traverse","params":{"session_id":"s1","edge_id":"e1"}}"#)
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()["current_node"], "end");
    }
}
