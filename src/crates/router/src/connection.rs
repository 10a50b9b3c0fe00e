//! A single line-delimited JSON-RPC connection to one provider subprocess.
//!
//! One `Connection` owns one child process and its stdin/stdout pipes.
//! Requests are serialized one at a time behind an internal mutex — the
//! wire protocol here is a single ordered stream, not a multiplexed one, so
//! concurrent callers queue rather than race.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::ProviderLaunchDescriptor;
use crate::error::{Result, RouterAppError};

/// Requests to providers time out after this long; see `RouterAppError::CallTimeout`.
/// This also bounds the id-correlation discard loop in `read_response`,
/// which has no separate limit of its own.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Lines read during the handshake before giving up, in case the provider
/// prints banners, notifications, or warnings to stdout before the
/// `initialize` response correlated to our request id.
const HANDSHAKE_DISCARD_LIMIT: usize = 10;

/// Time given the provider to settle after we send `notifications/initialized`
/// before the connection is considered ready for `tools/call`.
const HANDSHAKE_SETTLE: Duration = Duration::from_millis(100);

/// Protocol version advertised in the `initialize` request.
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    params: Value,
}

/// A fire-and-forget message: no `id` field, so the provider knows not to
/// reply.
#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

/// Interprets one line of subprocess stdout as the response correlated to
/// `expected_id`. Returns `None` for anything the reader should discard and
/// read past: a blank line, a line that isn't valid JSON-RPC (subprocesses
/// may emit log text on stdout), or a parseable message whose `id` doesn't
/// match — a notification, or a stale response to an earlier request.
fn correlated_response(line: &str, expected_id: i64) -> Option<JsonRpcResponse> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let response: JsonRpcResponse = serde_json::from_str(trimmed).ok()?;
    if response.id != Some(expected_id) {
        return None;
    }
    Some(response)
}

/// A live subprocess connection, framed with newline-delimited JSON-RPC.
pub struct Connection {
    provider: String,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicI64,
}

impl Connection {
    /// Spawn the provider's subprocess and perform the `initialize` /
    /// `notifications/initialized` handshake, discarding up to
    /// `HANDSHAKE_DISCARD_LIMIT` lines that don't correlate to our request
    /// before giving up.
    pub async fn spawn(provider: &str, descriptor: &ProviderLaunchDescriptor) -> Result<Self> {
        let mut command = Command::new(&descriptor.command);
        command
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RouterAppError::SpawnFailed {
            provider: provider.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RouterAppError::ConnectionClosed { provider: provider.to_string() })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RouterAppError::ConnectionClosed { provider: provider.to_string() })?;

        let connection = Self {
            provider: provider.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicI64::new(1),
        };

        connection.handshake().await?;
        Ok(connection)
    }

    async fn handshake(&self) -> Result<()> {
        let init_params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": "gatepipe-router", "version": env!("CARGO_PKG_VERSION") },
        });
        let sent_id = self.write_request("initialize", init_params).await?;

        let response = {
            let mut stdout = self.stdout.lock().await;
            let mut correlated = None;
            for _ in 0..HANDSHAKE_DISCARD_LIMIT {
                let mut line = String::new();
                let n = stdout.read_line(&mut line).await.map_err(|_| RouterAppError::HandshakeFailed {
                    provider: self.provider.clone(),
                    reason: "I/O error while reading the initialize response".to_string(),
                })?;
                if n == 0 {
                    return Err(RouterAppError::ConnectionClosed { provider: self.provider.clone() });
                }
                if let Some(response) = correlated_response(&line, sent_id) {
                    correlated = Some(response);
                    break;
                }
            }
            correlated
        };

        let response = response.ok_or_else(|| RouterAppError::HandshakeFailed {
            provider: self.provider.clone(),
            reason: format!(
                "no response correlated to request id {sent_id} within {HANDSHAKE_DISCARD_LIMIT} lines"
            ),
        })?;

        if let Some(error) = response.error {
            return Err(RouterAppError::HandshakeFailed {
                provider: self.provider.clone(),
                reason: format!("{} (code {})", error.message, error.code),
            });
        }

        self.send_notification("notifications/initialized", serde_json::json!({})).await?;
        tokio::time::sleep(HANDSHAKE_SETTLE).await;
        Ok(())
    }

    async fn write_request(&self, method: &str, params: Value) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest { jsonrpc: "2.0", id, method, params };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| RouterAppError::ConnectionClosed { provider: self.provider.clone() })?;
        stdin
            .flush()
            .await
            .map_err(|_| RouterAppError::ConnectionClosed { provider: self.provider.clone() })?;
        Ok(id)
    }

    /// Send a fire-and-forget message with no `id`. The provider is not
    /// expected to reply, and we don't wait for anything on stdout here.
    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let notification = JsonRpcNotification { jsonrpc: "2.0", method, params };
        let mut line = serde_json::to_string(&notification)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| RouterAppError::ConnectionClosed { provider: self.provider.clone() })?;
        stdin
            .flush()
            .await
            .map_err(|_| RouterAppError::ConnectionClosed { provider: self.provider.clone() })?;
        Ok(())
    }

    /// Read lines until one correlates to `expected_id`, discarding blank
    /// lines, non-JSON lines, and responses to other requests along the
    /// way. Has no discard limit of its own — callers wrap it in
    /// `tokio::time::timeout` (`call_tool` does, via `CALL_TIMEOUT`) to
    /// bound how long a misbehaving or silent provider can stall it.
    async fn read_response(&self, expected_id: i64) -> Result<JsonRpcResponse> {
        let mut stdout = self.stdout.lock().await;
        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|_| RouterAppError::ConnectionClosed { provider: self.provider.clone() })?;
            if n == 0 {
                return Err(RouterAppError::ConnectionClosed { provider: self.provider.clone() });
            }
            if let Some(response) = correlated_response(&line, expected_id) {
                return Ok(response);
            }
        }
    }

    /// Invoke `tool` on this provider with `arguments`, enforcing
    /// [`CALL_TIMEOUT`]. A timeout tears down the subprocess entirely,
    /// since there is no way to cancel an in-flight request on the wire.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let call = async {
            let id = self.write_request("tools/call", params).await?;
            self.read_response(id).await
        };

        let response = match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(result) => result?,
            Err(_) => {
                self.terminate().await;
                return Err(RouterAppError::CallTimeout {
                    provider: self.provider.clone(),
                    tool: tool.to_string(),
                    timeout_secs: CALL_TIMEOUT.as_secs(),
                });
            }
        };

        if let Some(error) = response.error {
            return Err(RouterAppError::RemoteError {
                provider: self.provider.clone(),
                tool: tool.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// List the tools this provider currently exposes.
    pub async fn list_tools(&self) -> Result<Vec<Value>> {
        let id = self.write_request("tools/list", serde_json::json!({})).await?;
        let response = self.read_response(id).await?;
        if let Some(error) = response.error {
            return Err(RouterAppError::RemoteError {
                provider: self.provider.clone(),
                tool: "tools/list".to_string(),
                code: error.code,
                message: error.message,
            });
        }
        let tools = response
            .result
            .and_then(|r| r.get("tools").cloned())
            .and_then(|t| t.as_array().cloned())
            .unwrap_or_default();
        Ok(tools)
    }

    /// Terminate the subprocess: SIGTERM, then SIGKILL if it hasn't exited
    /// within [`TERMINATE_GRACE`].
    pub async fn terminate(&self) {
        let mut child = self.child.lock().await;
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }
        }
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_descriptor() -> ProviderLaunchDescriptor {
        ProviderLaunchDescriptor {
            command: "cat".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    // `cat` never answers a JSON-RPC request — on a non-tty pipe it fully
    // buffers its own stdout and only emits anything once its buffer fills
    // or stdin closes, neither of which happens here. This exercises the
    // handshake-failure path (no correlated response ever arrives) without
    // depending on a real MCP-speaking binary being present.
    #[tokio::test]
    async fn handshake_fails_against_non_jsonrpc_process() {
        let result = Connection::spawn("echo-provider", &cat_descriptor()).await;
        match result {
            Err(RouterAppError::HandshakeFailed { provider, .. }) => assert_eq!(provider, "echo-provider"),
            Err(RouterAppError::ConnectionClosed { .. }) => {}
            other => panic!("expected handshake failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_reports_missing_binary() {
        let descriptor = ProviderLaunchDescriptor {
            command: "definitely-not-a-real-binary-xyz".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        };
        let err = Connection::spawn("ghost", &descriptor).await.unwrap_err();
        assert!(matches!(err, RouterAppError::SpawnFailed { .. }));
    }

    #[test]
    fn correlated_response_discards_blank_and_non_json_lines() {
        assert!(correlated_response("", 1).is_none());
        assert!(correlated_response("   \n", 1).is_none());
        assert!(correlated_response("[info] provider ready\n", 1).is_none());
    }

    #[test]
    fn correlated_response_discards_id_less_notification() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#;
        assert!(correlated_response(line, 7).is_none());
    }

    #[test]
    fn correlated_response_discards_mismatched_id() {
        let line = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        assert!(correlated_response(line, 2).is_none());
    }

    #[test]
    fn correlated_response_accepts_matching_id() {
        let line = r#"{"jsonrpc":"2.0","id":5,"result":{"ok":true}}"#;
        let response = correlated_response(line, 5).expect("should correlate");
        assert_eq!(response.id, Some(5));
        assert_eq!(response.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn correlated_response_surfaces_error_field_for_caller_to_check() {
        let line = r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32600,"message":"bad request"}}"#;
        let response = correlated_response(line, 9).expect("should correlate");
        let error = response.error.expect("error field should be present");
        assert_eq!(error.code, -32600);
        assert_eq!(error.message, "bad request");
    }

    /// Mirrors S5: a mock stream emits an id-less notification, then a log
    /// line, then the correlated response — the reader discards the first
    /// two and accepts the third.
    #[test]
    fn correlated_response_walks_past_notification_and_log_line_to_find_response() {
        let lines = [
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
            "[info] ready",
            r#"{"jsonrpc":"2.0","id":3,"result":{"capabilities":{}}}"#,
        ];
        let found = lines.iter().find_map(|line| correlated_response(line, 3));
        assert!(found.is_some());
    }
}
