//! Entity structs for the workflow data model.
//!
//! Mirrors the tables persisted by `alphred-engine`'s storage layer:
//! `workflow_trees`, `tree_nodes`, `tree_edges`, `workflow_runs`,
//! `run_nodes`, `run_node_edges`, `phase_artifacts`, `routing_decisions`,
//! `run_join_barriers`, `run_node_stream_events`, `run_node_diagnostics`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    ArtifactType, BarrierStatus, ContentType, DecisionType, EdgeKind, Id, NodeRole, NodeType,
    RouteOn, RoutingDecisionSource, RunNodeStatus, RunStatus, TreeStatus,
};

/// A versioned workflow definition. Keyed by `(tree_key, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTree {
    pub id: Id,
    pub tree_key: String,
    pub version: i64,
    pub status: TreeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A node in a tree definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: Id,
    pub tree_id: Id,
    pub node_key: String,
    pub sequence_index: i64,
    pub node_type: NodeType,
    pub node_role: NodeRole,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_template_id: Option<String>,
    pub execution_permissions: Option<Value>,
    pub error_handler_config: Option<Value>,
    pub max_retries: i64,
    pub max_children: i64,
}

/// A directed edge between two nodes of the same tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEdge {
    pub id: Id,
    pub tree_id: Id,
    pub source_node_id: Id,
    pub target_node_id: Id,
    pub route_on: RouteOn,
    pub priority: i64,
    pub auto: bool,
    pub guard: Option<String>,
}

/// An execution instance of one tree version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Id,
    pub tree_id: Id,
    pub status: RunStatus,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-run instance of a tree node, or a dynamically spawned child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNode {
    pub id: Id,
    pub run_id: Id,
    pub tree_id: Id,
    pub node_key: String,
    pub attempt: i64,
    pub sequence_index: i64,
    pub sequence_path: String,
    pub lineage_depth: i64,
    pub spawner_node_id: Option<Id>,
    pub join_node_id: Option<Id>,
    pub node_type: NodeType,
    pub node_role: NodeRole,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub execution_permissions: Option<Value>,
    pub error_handler_config: Option<Value>,
    pub max_retries: i64,
    pub max_children: i64,
    pub status: RunNodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Run-scoped materialized edge: a copy of a `TreeEdge`, or a dynamic
/// spawner/join edge created by the fan-out/join coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNodeEdge {
    pub id: Id,
    pub run_id: Id,
    pub source_run_node_id: Id,
    pub target_run_node_id: Id,
    pub route_on: RouteOn,
    pub priority: i64,
    pub auto: bool,
    pub guard: Option<String>,
    pub edge_kind: EdgeKind,
    /// True when this edge fires once its source reaches any terminal
    /// status, rather than only on the specific `route_on` outcome
    /// (used by `dynamic_child_to_join` edges per the join selection rule).
    pub terminal: bool,
}

/// Output of a run node attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseArtifact {
    pub id: Id,
    pub run_node_id: Id,
    pub attempt: i64,
    pub artifact_type: ArtifactType,
    pub content_type: ContentType,
    pub content: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One row per node attempt recording the routing outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub id: Id,
    pub run_node_id: Id,
    pub attempt: i64,
    pub decision_type: DecisionType,
    pub source: Option<RoutingDecisionSource>,
    pub created_at: DateTime<Utc>,
}

/// Per-spawner-emission join counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJoinBarrier {
    pub id: Id,
    pub run_id: Id,
    pub spawner_run_node_id: Id,
    pub join_run_node_id: Id,
    pub expected_children: i64,
    pub terminal_children: i64,
    pub completed_children: i64,
    pub failed_children: i64,
    pub status: BarrierStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-attempt sequence of provider events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNodeStreamEvent {
    pub id: Id,
    pub run_node_id: Id,
    pub attempt: i64,
    pub sequence: i64,
    pub event_type: String,
    pub content_preview: String,
    pub metadata: Option<Value>,
    pub delta_tokens: Option<i64>,
    pub cumulative_tokens: Option<i64>,
    pub redacted: bool,
    pub truncated: bool,
    pub created_at: DateTime<Utc>,
}

/// One row per `(run, run_node, attempt)` with the bounded diagnostics
/// payload for that attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNodeDiagnostics {
    pub id: Id,
    pub run_node_id: Id,
    pub attempt: i64,
    pub event_count: i64,
    pub redacted: bool,
    pub truncated: bool,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
