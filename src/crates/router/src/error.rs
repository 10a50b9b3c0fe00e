//! Error type for everything below the graph model: subprocess connections,
//! the connection pool, dispatch, session resolution, and the agent-facing
//! surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterAppError {
    /// Bubbled up from `router-core` unchanged: bad graph structure, a
    /// rejected transition, a visit cap, etc.
    #[error(transparent)]
    Graph(#[from] router_core::RouterError),

    /// A provider's child process could not be spawned.
    #[error("failed to spawn provider '{provider}': {source}")]
    SpawnFailed {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider didn't complete the initialize handshake: either it
    /// never sent a correlated response within the discard budget, or it
    /// sent one with an `error` field set.
    #[error("provider '{provider}' failed initialize handshake: {reason}")]
    HandshakeFailed { provider: String, reason: String },

    /// A `tools/call` request exceeded its timeout and the connection was
    /// torn down.
    #[error("provider '{provider}' tool call '{tool}' timed out after {timeout_secs}s")]
    CallTimeout {
        provider: String,
        tool: String,
        timeout_secs: u64,
    },

    /// The provider's subprocess exited (or its stdout closed) while a
    /// request was in flight or while establishing the connection.
    #[error("provider '{provider}' connection closed unexpectedly")]
    ConnectionClosed { provider: String },

    /// A line of JSON-RPC traffic couldn't be parsed.
    #[error("malformed JSON-RPC message from '{provider}': {source}")]
    Protocol {
        provider: String,
        #[source]
        source: serde_json::Error,
    },

    /// The provider returned a JSON-RPC error object in response to a call.
    #[error("provider '{provider}' returned an error for tool '{tool}': {message} (code {code})")]
    RemoteError {
        provider: String,
        tool: String,
        code: i64,
        message: String,
    },

    /// `provider_name` isn't present in the loaded provider configuration.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// The current node doesn't allow `provider`, or explicitly blocks
    /// `provider__tool`.
    #[error("policy denied: node '{node}' does not permit '{provider}__{tool}'")]
    PolicyDenied {
        node: String,
        provider: String,
        tool: String,
    },

    /// No session id was supplied and no default session is configured, so
    /// the caller's session could not be resolved to a graph instance.
    #[error("could not resolve a session: no override, no session-specific match, and no default configured")]
    SessionUnresolved,

    /// The provider configuration file was malformed or referenced a
    /// provider with no launch command.
    #[error("invalid provider configuration: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider configuration YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RouterAppError {
    /// Severity this error should be logged at. Operator-actionable
    /// failures (bad config, policy denial) are warnings; everything that
    /// indicates a broken provider or protocol violation is an error.
    pub fn log_level(&self) -> tracing::Level {
        match self {
            RouterAppError::PolicyDenied { .. } | RouterAppError::SessionUnresolved => {
                tracing::Level::WARN
            }
            RouterAppError::Graph(router_core::RouterError::MaxVisitsExceeded { .. }) => {
                tracing::Level::WARN
            }
            _ => tracing::Level::ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterAppError>;
