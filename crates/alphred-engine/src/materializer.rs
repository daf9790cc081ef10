//! Planner/materializer (component C2).
//!
//! Expands a published `WorkflowTree` into a fresh `WorkflowRun`: one
//! `RunNode` per `TreeNode` (pending, attempt 1, config copied verbatim)
//! and one `RunNodeEdge` per `TreeEdge`.

use std::collections::HashMap;
use std::sync::Arc;

use alphred_core::{EdgeKind, Id, RunNode, RunNodeEdge, RunNodeStatus, WorkflowRun};
use chrono::Utc;
use thiserror::Error;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("workflow tree not found: {0}")]
    TreeNotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, MaterializeError>;

/// Materializes the latest published version of `tree_key` into a new,
/// independent `WorkflowRun`. Two calls with the same `tree_key` produce
/// two runs with identical node/edge topology but distinct ids — the
/// idempotent-materialization round-trip law in the testable properties.
pub async fn materialize_run(
    storage: &Arc<Storage>,
    tree_key: &str,
    repo: Option<String>,
    branch: Option<String>,
) -> Result<WorkflowRun> {
    let tree = storage
        .get_latest_published_tree(tree_key)
        .await
        .map_err(|e| match e {
            StorageError::TreeNotFound(k) => MaterializeError::TreeNotFound(k),
            other => MaterializeError::Storage(other),
        })?;

    let tree_nodes = storage.list_tree_nodes(&tree.id).await?;
    let tree_edges = storage.list_tree_edges(&tree.id).await?;

    let now = Utc::now();
    let run = WorkflowRun {
        id: Id::new(),
        tree_id: tree.id.clone(),
        status: alphred_core::RunStatus::Pending,
        repo,
        branch,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    storage.insert_run(&run).await?;

    let mut tree_node_to_run_node: HashMap<String, Id> = HashMap::new();

    for tree_node in &tree_nodes {
        let run_node = RunNode {
            id: Id::new(),
            run_id: run.id.clone(),
            tree_id: tree.id.clone(),
            node_key: tree_node.node_key.clone(),
            attempt: 1,
            sequence_index: tree_node.sequence_index,
            sequence_path: tree_node.sequence_index.to_string(),
            lineage_depth: 0,
            spawner_node_id: None,
            join_node_id: None,
            node_type: tree_node.node_type,
            node_role: tree_node.node_role,
            provider: tree_node.provider.clone(),
            model: tree_node.model.clone(),
            prompt: tree_node.prompt_template_id.clone(),
            execution_permissions: tree_node.execution_permissions.clone(),
            error_handler_config: tree_node.error_handler_config.clone(),
            max_retries: tree_node.max_retries,
            max_children: tree_node.max_children,
            status: RunNodeStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        storage.insert_run_node(&run_node).await?;
        tree_node_to_run_node.insert(tree_node.id.to_string(), run_node.id.clone());
    }

    for tree_edge in &tree_edges {
        let source_run_node_id = tree_node_to_run_node
            .get(tree_edge.source_node_id.as_ref())
            .expect("tree edge source must have a materialized run node")
            .clone();
        let target_run_node_id = tree_node_to_run_node
            .get(tree_edge.target_node_id.as_ref())
            .expect("tree edge target must have a materialized run node")
            .clone();

        let run_edge = RunNodeEdge {
            id: Id::new(),
            run_id: run.id.clone(),
            source_run_node_id,
            target_run_node_id,
            route_on: tree_edge.route_on,
            priority: tree_edge.priority,
            auto: tree_edge.auto,
            guard: tree_edge.guard.clone(),
            edge_kind: EdgeKind::Static,
            terminal: false,
        };
        storage.insert_run_node_edge(&run_edge).await?;
    }

    Ok(run)
}
