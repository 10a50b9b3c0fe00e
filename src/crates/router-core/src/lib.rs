//! Policy graph, graph state, and transition evaluator for the gatepipe
//! tool-call router.
//!
//! This crate has no knowledge of subprocesses, JSON-RPC, or connection
//! pooling — that's all in the `router` crate. What lives here is the pure
//! state machine: a [`graph::Graph`] of [`graph::Node`]s and [`graph::Edge`]s,
//! the [`state::GraphState`] that tracks where execution currently sits in
//! it, the [`evaluator`] that decides which edge fires for a given
//! [`evaluator::Trigger`], and the [`loader`] that turns a YAML document
//! into a validated graph.

pub mod error;
pub mod evaluator;
pub mod graph;
pub mod loader;
pub mod state;

pub use error::{Result, RouterError};
pub use evaluator::{evaluate, Match, Trigger};
pub use graph::{Condition, Edge, Graph, Node};
pub use loader::{load_from_path, load_from_str};
pub use state::{GraphState, TransitionRecord};
