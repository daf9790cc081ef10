//! Fan-out/join coordinator (component C9).
//!
//! When a `spawner` node completes with a `spawn` artifact describing
//! its children, materializes the child `RunNode` rows, a
//! `RunJoinBarrier`, and the dynamic edges connecting spawner → child →
//! join. Each child's terminal transition is recorded against its
//! barrier; once every child has reached a terminal status the barrier
//! flips `ready`, unblocking the join node in the selector.

use std::sync::Arc;

use alphred_core::{EdgeKind, Id, NodeType, RouteOn, RunJoinBarrier, RunNode, RunNodeEdge, RunNodeStatus};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("malformed spawn artifact: {0}")]
    MalformedSpawnArtifact(String),
}

pub type Result<T> = std::result::Result<T, JoinError>;

/// The `spawn` artifact's content shape: the template each child copies
/// and how many to create.
#[derive(Debug, Deserialize)]
pub struct SpawnSpec {
    pub count: u32,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Parses a spawner's completion artifact content into a `SpawnSpec`.
pub fn parse_spawn_spec(content: &Value) -> Result<SpawnSpec> {
    serde_json::from_value(content.clone())
        .map_err(|e| JoinError::MalformedSpawnArtifact(e.to_string()))
}

/// Materializes `spec.count` pending child nodes under `spawner`, paired
/// with `join_node`, plus the `RunJoinBarrier` and dynamic
/// `spawner→child`/`child→join` edges.
pub async fn spawn_children(
    storage: &Arc<Storage>,
    spawner: &RunNode,
    join_node: &RunNode,
    spec: &SpawnSpec,
) -> Result<RunJoinBarrier> {
    let barrier = RunJoinBarrier {
        id: Id::new(),
        run_id: spawner.run_id.clone(),
        spawner_run_node_id: spawner.id.clone(),
        join_run_node_id: join_node.id.clone(),
        expected_children: spec.count as i64,
        terminal_children: 0,
        completed_children: 0,
        failed_children: 0,
        status: alphred_core::BarrierStatus::Pending,
        created_at: Utc::now(),
    };
    storage.insert_join_barrier(&barrier).await?;

    for index in 0..spec.count {
        let child = RunNode {
            id: Id::new(),
            run_id: spawner.run_id.clone(),
            tree_id: spawner.tree_id.clone(),
            node_key: format!("{}.child.{}", spawner.node_key, index),
            attempt: 1,
            // Distinct per child and per run: tree_nodes.sequence_index
            // occupies the small range assigned at materialization, so
            // dynamic children live in a disjoint range well above it.
            sequence_index: 1_000_000 + spawner.sequence_index * 1000 + i64::from(index) + 1,
            sequence_path: format!("{}.{}", spawner.sequence_path, index),
            lineage_depth: spawner.lineage_depth + 1,
            spawner_node_id: Some(spawner.id.clone()),
            join_node_id: Some(join_node.id.clone()),
            node_type: NodeType::Agent,
            node_role: alphred_core::NodeRole::Standard,
            provider: spec.provider.clone().or_else(|| spawner.provider.clone()),
            model: spec.model.clone().or_else(|| spawner.model.clone()),
            prompt: spec.prompt.clone(),
            execution_permissions: spawner.execution_permissions.clone(),
            error_handler_config: None,
            max_retries: spawner.max_retries,
            max_children: 0,
            status: RunNodeStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        storage.insert_run_node(&child).await?;

        let spawner_to_child = RunNodeEdge {
            id: Id::new(),
            run_id: spawner.run_id.clone(),
            source_run_node_id: spawner.id.clone(),
            target_run_node_id: child.id.clone(),
            route_on: RouteOn::Success,
            priority: index as i64,
            auto: true,
            guard: None,
            edge_kind: EdgeKind::DynamicSpawnerToChild,
            terminal: false,
        };
        storage.insert_run_node_edge(&spawner_to_child).await?;

        let child_to_join = RunNodeEdge {
            id: Id::new(),
            run_id: spawner.run_id.clone(),
            source_run_node_id: child.id.clone(),
            target_run_node_id: join_node.id.clone(),
            route_on: RouteOn::Success,
            priority: 0,
            auto: true,
            guard: None,
            edge_kind: EdgeKind::DynamicChildToJoin,
            terminal: true,
        };
        storage.insert_run_node_edge(&child_to_join).await?;
    }

    Ok(barrier)
}

/// Records one child's terminal transition against its spawner's
/// barrier. Flips the barrier to `ready` once every expected child has
/// reached a terminal status.
pub async fn record_child_terminal(storage: &Arc<Storage>, child: &RunNode) -> Result<()> {
    let Some(spawner_id) = &child.spawner_node_id else {
        return Ok(());
    };
    let Some(barrier) = storage.get_join_barrier_for_spawner(spawner_id).await? else {
        return Ok(());
    };
    let completed = child.status == RunNodeStatus::Completed;
    storage
        .record_join_child_terminal(&barrier.id, completed)
        .await?;
    Ok(())
}

/// Marks the barrier feeding `join_node` as released once it claims
/// execution.
pub async fn release_barrier_for_join(storage: &Arc<Storage>, join_node: &RunNode) -> Result<()> {
    if let Some(barrier) = storage.latest_join_barrier_for_join(&join_node.id).await? {
        storage.release_join_barrier(&barrier.id).await?;
    }
    Ok(())
}
