//! Transition evaluator: decides which edges, if any, match a given
//! trigger. Evaluation is read-only — it never mutates [`GraphState`].
//! Applying a match is a separate, explicit step: [`GraphState::apply_transition`].
//!
//! Mirrors the dispatch-over-variant shape of a rule evaluator: a public
//! `evaluate` that walks the current node's outgoing edges in priority
//! order and a private per-condition-kind check for each.

use crate::graph::{Condition, Edge, Graph};
use crate::state::GraphState;

/// What provoked this evaluation pass.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A tool call was issued against `provider`/`tool`.
    Tool { provider: String, tool: String },
    /// Free text was produced (an agent message, a tool result) that may
    /// contain a configured phrase.
    Phrase { text: String },
    /// No specific event; only `Condition::Always`/`Condition::Default`
    /// edges are eligible.
    None,
}

/// The outcome of a successful match: which edge fired and, for phrase
/// triggers, which phrase matched.
#[derive(Debug, Clone)]
pub struct Match<'a> {
    pub edge: &'a Edge,
    pub matched_phrase: Option<String>,
}

/// Every outgoing edge of the current node whose condition is satisfied by
/// `trigger`, in priority order (the same order [`Graph::outgoing_edges`]
/// returns). The head of the list, if any, is the recommended transition;
/// callers that want only one may take `.into_iter().next()`. An empty
/// list means staying on the current node is the only option — that's a
/// normal outcome, not an error.
pub fn evaluate<'a>(graph: &'a Graph, state: &GraphState, trigger: &Trigger) -> Vec<Match<'a>> {
    graph
        .outgoing_edges(state.current_node())
        .into_iter()
        .filter_map(|edge| evaluate_edge(edge, trigger))
        .collect()
}

fn evaluate_edge<'a>(edge: &'a Edge, trigger: &Trigger) -> Option<Match<'a>> {
    match trigger {
        Trigger::Tool { provider, tool } => evaluate_tool(edge, provider, tool),
        Trigger::Phrase { text } => evaluate_phrase(edge, text),
        Trigger::None => evaluate_unconditional(edge),
    }
}

fn evaluate_tool<'a>(edge: &'a Edge, provider: &str, tool: &str) -> Option<Match<'a>> {
    if edge.condition.matches_tool(provider, tool) {
        Some(Match { edge, matched_phrase: None })
    } else {
        None
    }
}

fn evaluate_phrase<'a>(edge: &'a Edge, text: &str) -> Option<Match<'a>> {
    let (matched, phrase) = edge.condition.matches_phrase(text);
    if matched {
        Some(Match {
            edge,
            matched_phrase: phrase.map(str::to_string),
        })
    } else {
        None
    }
}

fn evaluate_unconditional(edge: &Edge) -> Option<Match<'_>> {
    if edge.condition.matches_unconditionally() {
        Some(Match { edge, matched_phrase: None })
    } else {
        None
    }
}

/// Only used to double-check a `Condition` that isn't one of the three
/// trigger-matching kinds hasn't silently become reachable through some
/// new variant added later without updating this module.
fn _exhaustiveness_guard(c: &Condition) -> &'static str {
    c.kind()
}
