//! Policy-gated tool-call router.
//!
//! Ties a [`router_core`] graph to a pool of provider subprocesses: the
//! [`dispatcher::Dispatcher`] gates every tool call against the caller's
//! current node, the [`session::SessionRegistry`] keeps one graph state per
//! session, and [`surface::AgentSurface`] exposes the whole thing as a
//! line-delimited JSON-RPC service on stdio.

pub mod api;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod session;
pub mod surface;

pub use api::{CheckResponse, OutgoingEdgeSummary, StatusResponse, TransitionApi, TransitionCandidate};
pub use config::{ProviderLaunchDescriptor, ProvidersConfig, RouterProcessConfig};
pub use connection::Connection;
pub use dispatcher::{DispatchOutcome, Dispatcher, TransitionHint};
pub use error::{Result, RouterAppError};
pub use pool::ConnectionPool;
pub use session::{SessionRegistry, SessionRegistryConfig};
pub use surface::AgentSurface;
