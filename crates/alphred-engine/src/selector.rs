//! Node selector (component C3).
//!
//! Given the latest-attempt snapshot per `(run, node_key)` and the latest
//! routing decision per run node, picks either a single runnable node or
//! a blocked/no-runnable verdict, per the six-step algorithm in the
//! component design.

use std::collections::HashMap;
use std::sync::Arc;

use alphred_core::{
    DecisionType, Id, NodeRole, RouteOn, RoutingDecision, RunNode, RunNodeEdge, RunNodeStatus,
    RunStatus,
};
use thiserror::Error;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SelectError>;

/// Outcome of one selection pass over a run's current snapshot.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A node is ready to execute; `node` is the latest-attempt row, and
    /// `selected_edge` is the incoming edge that made it ready (`None`
    /// for a root node with no predecessor, or when re-entering an
    /// already-running node with no edge to re-derive).
    Runnable(RunNode, Option<RunNodeEdge>),
    /// Every latest-attempt node is terminal; the run should close with
    /// the given status.
    NoRunnable(RunStatus),
    /// No node is ready yet and the run is not done: some source is
    /// waiting on an unresolved guard, a `no_route` decision, or an
    /// external signal (human approval, pending join children).
    Blocked,
}

/// Selects the next node to run, or the terminal verdict, for `run_id`.
pub async fn select_next(storage: &Arc<Storage>, run_id: &Id) -> Result<Selection> {
    let nodes = storage.list_latest_attempt_run_nodes(run_id).await?;
    let edges = storage.list_run_node_edges(run_id).await?;

    let by_id: HashMap<&str, &RunNode> = nodes.iter().map(|n| (n.id.as_ref(), n)).collect();

    let mut latest_decision: HashMap<String, Option<RoutingDecision>> = HashMap::new();
    for node in &nodes {
        let decision = storage.latest_routing_decision(&node.id).await?;
        latest_decision.insert(node.id.to_string(), decision);
    }

    // Step 3: selected edge per terminal source — the one edge (by
    // route_on/priority rank) each terminal source actually routes on,
    // whether that's a Success or a Failure edge.
    let mut selected_edge_by_source: HashMap<String, String> = HashMap::new();
    let mut outgoing: HashMap<&str, Vec<&RunNodeEdge>> = HashMap::new();
    for edge in &edges {
        outgoing
            .entry(edge.source_run_node_id.as_ref())
            .or_default()
            .push(edge);
    }

    for node in &nodes {
        if !node.status.is_terminal() {
            continue;
        }
        let Some(mut candidates) = outgoing.get(node.id.as_ref()).cloned() else {
            continue;
        };
        candidates.sort_by_key(|e| (route_on_rank(e.route_on), e.priority));

        for edge in candidates {
            let selected = match edge.route_on {
                RouteOn::Success => {
                    node.status == RunNodeStatus::Completed
                        && (edge.auto
                            || evaluate_guard(
                                edge.guard.as_deref(),
                                latest_decision.get(node.id.as_ref()).and_then(|d| d.as_ref()),
                            ))
                }
                RouteOn::Failure => {
                    node.status == RunNodeStatus::Failed && node.attempt > node.max_retries
                }
            };
            if selected {
                selected_edge_by_source.insert(node.id.to_string(), edge.id.to_string());
                break;
            }
        }
    }

    let mut incoming: HashMap<&str, Vec<&RunNodeEdge>> = HashMap::new();
    for edge in &edges {
        incoming
            .entry(edge.target_run_node_id.as_ref())
            .or_default()
            .push(edge);
    }

    // The edge each incoming set actually selected, keyed by target id —
    // looked up below both for the running-node re-entry case and for
    // the freshly-readied target itself.
    let selected_incoming_edge = |node_id: &str| -> Option<RunNodeEdge> {
        incoming.get(node_id).and_then(|incoming_edges| {
            incoming_edges
                .iter()
                .find(|edge| {
                    selected_edge_by_source
                        .get(edge.source_run_node_id.as_ref())
                        .map(|id| id.as_str() == edge.id.as_ref())
                        .unwrap_or(false)
                })
                .map(|edge| (*edge).clone())
        })
    };

    // Step 2: an already-running node is always selected first (single
    // active node per run).
    if let Some(running) = nodes.iter().find(|n| n.status == RunNodeStatus::Running) {
        let edge = selected_incoming_edge(running.id.as_ref());
        return Ok(Selection::Runnable(running.clone(), edge));
    }

    // Step 4/5: ready targets, smallest sequence_index wins.
    let mut ready_targets: Vec<&RunNode> = Vec::new();
    for node in &nodes {
        if node.status != RunNodeStatus::Pending && node.status != RunNodeStatus::Completed {
            continue;
        }
        let Some(incoming_edges) = incoming.get(node.id.as_ref()) else {
            // No predecessors at all: a root node is ready once pending.
            if node.status == RunNodeStatus::Pending {
                ready_targets.push(node);
            }
            continue;
        };

        let all_satisfied = incoming_edges.iter().all(|edge| {
            let Some(source) = by_id.get(edge.source_run_node_id.as_ref()) else {
                return false;
            };
            let is_selected = selected_edge_by_source
                .get(edge.source_run_node_id.as_ref())
                .map(|id| id.as_str() == edge.id.as_ref())
                .unwrap_or(false);
            let terminal_satisfied = edge.terminal && source.status.is_terminal();
            is_selected || terminal_satisfied
        });

        if all_satisfied && !incoming_edges.is_empty() {
            if node.node_role == NodeRole::Join {
                if let Ok(barrier) = storage.latest_join_barrier_for_join(&node.id).await {
                    if !matches!(
                        barrier.map(|b| b.status),
                        Some(alphred_core::BarrierStatus::Ready)
                    ) {
                        continue;
                    }
                } else {
                    continue;
                }
            }
            ready_targets.push(node);
        }
    }

    ready_targets.sort_by_key(|n| (n.sequence_index, n.id.to_string()));

    if let Some(target) = ready_targets.into_iter().next() {
        let edge = selected_incoming_edge(target.id.as_ref());
        return Ok(Selection::Runnable(target.clone(), edge));
    }

    // Step 6: nothing ready.
    let all_terminal = nodes.iter().all(|n| n.status.is_terminal());
    if all_terminal {
        let any_failed = nodes.iter().any(|n| n.status == RunNodeStatus::Failed);
        return Ok(Selection::NoRunnable(if any_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        }));
    }

    Ok(Selection::Blocked)
}

fn route_on_rank(route_on: RouteOn) -> u8 {
    match route_on {
        RouteOn::Success => 0,
        RouteOn::Failure => 1,
    }
}

/// Evaluates a guard expression of the form `field op value` against the
/// node's latest routing decision. `field` is matched against
/// `decision_type` (the only field the routing decision currently
/// exposes); any other field name evaluates to `false` rather than
/// erroring, since a guard referencing an unknown field can never be
/// satisfied.
fn evaluate_guard(guard: Option<&str>, decision: Option<&RoutingDecision>) -> bool {
    let Some(guard) = guard else { return false };
    let Some((field, op, value)) = parse_guard(guard) else {
        return false;
    };

    if field != "decision_type" {
        return false;
    }
    let actual = decision.map(|d| d.decision_type.as_str()).unwrap_or("");
    let expected = value.trim_matches(|c| c == '\'' || c == '"');

    match op {
        "==" => actual == expected,
        "!=" => actual != expected,
        ">" | "<" | ">=" | "<=" => {
            let actual_rank = decision_rank(actual);
            let expected_rank = DecisionType::parse(expected)
                .map(|d| decision_rank(d.as_str()))
                .unwrap_or(-1);
            match op {
                ">" => actual_rank > expected_rank,
                "<" => actual_rank < expected_rank,
                ">=" => actual_rank >= expected_rank,
                "<=" => actual_rank <= expected_rank,
                _ => unreachable!(),
            }
        }
        _ => false,
    }
}

fn decision_rank(decision_type: &str) -> i32 {
    match decision_type {
        "approved" => 0,
        "changes_requested" => 1,
        "retry" => 2,
        "blocked" => 3,
        "no_route" => 4,
        _ => -1,
    }
}

/// Splits a guard expression on its comparison operator, longest
/// operators first so `>=`/`<=`/`==`/`!=` are not mis-split as `>`/`<`.
fn parse_guard(guard: &str) -> Option<(&str, &str, &str)> {
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(idx) = guard.find(op) {
            let field = guard[..idx].trim();
            let value = guard[idx + op.len()..].trim();
            if !field.is_empty() && !value.is_empty() {
                return Some((field, op, value));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(decision_type: DecisionType) -> RoutingDecision {
        RoutingDecision {
            id: Id::new(),
            run_node_id: Id::new(),
            attempt: 1,
            decision_type,
            source: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn guard_equality_matches_decision_type() {
        let d = decision(DecisionType::Approved);
        assert!(evaluate_guard(Some("decision_type == approved"), Some(&d)));
        assert!(!evaluate_guard(
            Some("decision_type == changes_requested"),
            Some(&d)
        ));
    }

    #[test]
    fn guard_inequality() {
        let d = decision(DecisionType::ChangesRequested);
        assert!(evaluate_guard(Some("decision_type != approved"), Some(&d)));
    }

    #[test]
    fn guard_unknown_field_is_false() {
        let d = decision(DecisionType::Approved);
        assert!(!evaluate_guard(Some("nonsense == approved"), Some(&d)));
    }

    #[test]
    fn guard_missing_is_false() {
        assert!(!evaluate_guard(None, None));
    }
}
