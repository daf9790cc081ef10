//! SQLite storage layer for the workflow execution engine.
//!
//! Owns the schema migrations and every typed CRUD operation, plus the two
//! precondition-guarded transition primitives the executor relies on to
//! serialize racing state changes without holding a lock.

use alphred_core::{
    ArtifactType, BarrierStatus, ContentType, DecisionType, EdgeKind, Id, NodeRole, NodeType,
    PhaseArtifact, RouteOn, RoutingDecision, RoutingDecisionSource, RunJoinBarrier, RunNode,
    RunNodeDiagnostics, RunNodeEdge, RunNodeStatus, RunNodeStreamEvent, RunStatus, TreeEdge,
    TreeNode, TreeStatus, WorkflowRun, WorkflowTree,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("workflow tree not found: {0}")]
    TreeNotFound(String),
    #[error("workflow run not found: {0}")]
    RunNotFound(String),
    #[error("run node not found: {0}")]
    RunNodeNotFound(String),
    /// A guarded transition matched zero rows: the expected `from` state (or
    /// run-status predicate) no longer held. The executor treats this as a
    /// concurrency retry signal, never as a fatal error.
    #[error("precondition failed for {0}")]
    PreconditionFailed(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or_default()
}

/// Storage backend for the engine.
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Run the embedded migrations. Idempotent: re-running on an
    /// up-to-date database is a no-op, since every statement is either
    /// `CREATE ... IF NOT EXISTS` or tolerated via the duplicate-object
    /// error filter below.
    pub async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [include_str!("../../../migrations/0001_init.sql")];

        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in split_statements(&cleaned) {
                let trimmed = statement.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match sqlx::query(trimmed).execute(&self.pool).await {
                    Ok(_) => {}
                    Err(e) => {
                        let msg = e.to_string();
                        if !msg.contains("already exists") && !msg.contains("duplicate column") {
                            return Err(e.into());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- Tree operations ---

    pub async fn insert_tree(&self, tree: &WorkflowTree) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_trees (id, tree_key, version, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(tree.id.as_ref())
        .bind(&tree.tree_key)
        .bind(tree.version)
        .bind(tree.status.as_str())
        .bind(tree.created_at.timestamp_millis())
        .bind(tree.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Locates the latest published version of `tree_key`.
    pub async fn get_latest_published_tree(&self, tree_key: &str) -> Result<WorkflowTree> {
        let row = sqlx::query_as::<_, TreeRow>(
            "SELECT id, tree_key, version, status, created_at, updated_at FROM workflow_trees \
             WHERE tree_key = ?1 AND status = 'published' ORDER BY version DESC LIMIT 1",
        )
        .bind(tree_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TreeRow::into_tree)
            .ok_or_else(|| StorageError::TreeNotFound(tree_key.to_string()))
    }

    pub async fn insert_tree_node(&self, node: &TreeNode) -> Result<()> {
        sqlx::query(
            "INSERT INTO tree_nodes (id, tree_id, node_key, sequence_index, node_type, \
             node_role, provider, model, prompt_template_id, execution_permissions_json, \
             error_handler_config_json, max_retries, max_children) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(node.id.as_ref())
        .bind(node.tree_id.as_ref())
        .bind(&node.node_key)
        .bind(node.sequence_index)
        .bind(node.node_type.as_str())
        .bind(node.node_role.as_str())
        .bind(&node.provider)
        .bind(&node.model)
        .bind(&node.prompt_template_id)
        .bind(json_opt(&node.execution_permissions)?)
        .bind(json_opt(&node.error_handler_config)?)
        .bind(node.max_retries)
        .bind(node.max_children)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_tree_nodes(&self, tree_id: &Id) -> Result<Vec<TreeNode>> {
        let rows = sqlx::query_as::<_, TreeNodeRow>(
            "SELECT id, tree_id, node_key, sequence_index, node_type, node_role, provider, \
             model, prompt_template_id, execution_permissions_json, error_handler_config_json, \
             max_retries, max_children FROM tree_nodes WHERE tree_id = ?1 ORDER BY sequence_index",
        )
        .bind(tree_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TreeNodeRow::into_node).collect()
    }

    pub async fn insert_tree_edge(&self, edge: &TreeEdge) -> Result<()> {
        sqlx::query(
            "INSERT INTO tree_edges (id, tree_id, source_node_id, target_node_id, route_on, \
             priority, auto, guard) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(edge.id.as_ref())
        .bind(edge.tree_id.as_ref())
        .bind(edge.source_node_id.as_ref())
        .bind(edge.target_node_id.as_ref())
        .bind(edge.route_on.as_str())
        .bind(edge.priority)
        .bind(edge.auto)
        .bind(&edge.guard)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_tree_edges(&self, tree_id: &Id) -> Result<Vec<TreeEdge>> {
        let rows = sqlx::query_as::<_, TreeEdgeRow>(
            "SELECT id, tree_id, source_node_id, target_node_id, route_on, priority, auto, \
             guard FROM tree_edges WHERE tree_id = ?1",
        )
        .bind(tree_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TreeEdgeRow::into_edge).collect())
    }

    // --- Run operations ---

    pub async fn insert_run(&self, run: &WorkflowRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflow_runs (id, tree_id, status, repo, branch, created_at, \
             updated_at, completed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(run.id.as_ref())
        .bind(run.tree_id.as_ref())
        .bind(run.status.as_str())
        .bind(&run.repo)
        .bind(&run.branch)
        .bind(run.created_at.timestamp_millis())
        .bind(run.updated_at.timestamp_millis())
        .bind(run.completed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, id: &Id) -> Result<WorkflowRun> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT id, tree_id, status, repo, branch, created_at, updated_at, completed_at \
             FROM workflow_runs WHERE id = ?1",
        )
        .bind(id.as_ref())
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::into_run)
            .ok_or_else(|| StorageError::RunNotFound(id.to_string()))
    }

    /// Guarded transition on `workflow_runs.status`. Fails with
    /// `PreconditionFailed` (not a fatal error) if the row's current
    /// status no longer matches `expected_from` when the update runs.
    pub async fn transition_workflow_run_status(
        &self,
        run_id: &Id,
        expected_from: RunStatus,
        to: RunStatus,
    ) -> Result<()> {
        let now = now_millis();
        let completed_at = if to.is_terminal() { Some(now) } else { None };

        let result = sqlx::query(
            "UPDATE workflow_runs SET status = ?1, updated_at = ?2, completed_at = ?3 \
             WHERE id = ?4 AND status = ?5",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(completed_at)
        .bind(run_id.as_ref())
        .bind(expected_from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::PreconditionFailed(run_id.to_string()));
        }
        Ok(())
    }

    // --- Run node operations ---

    pub async fn insert_run_node(&self, node: &RunNode) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_nodes (id, run_id, tree_id, node_key, attempt, sequence_index, \
             sequence_path, lineage_depth, spawner_node_id, join_node_id, node_type, node_role, \
             provider, model, prompt, execution_permissions_json, error_handler_config_json, \
             max_retries, max_children, status, started_at, completed_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)",
        )
        .bind(node.id.as_ref())
        .bind(node.run_id.as_ref())
        .bind(node.tree_id.as_ref())
        .bind(&node.node_key)
        .bind(node.attempt)
        .bind(node.sequence_index)
        .bind(&node.sequence_path)
        .bind(node.lineage_depth)
        .bind(node.spawner_node_id.as_ref().map(|i| i.as_ref()))
        .bind(node.join_node_id.as_ref().map(|i| i.as_ref()))
        .bind(node.node_type.as_str())
        .bind(node.node_role.as_str())
        .bind(&node.provider)
        .bind(&node.model)
        .bind(&node.prompt)
        .bind(json_opt(&node.execution_permissions)?)
        .bind(json_opt(&node.error_handler_config)?)
        .bind(node.max_retries)
        .bind(node.max_children)
        .bind(node.status.as_str())
        .bind(node.started_at.map(|t| t.timestamp_millis()))
        .bind(node.completed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run_node(&self, id: &Id) -> Result<RunNode> {
        let row = sqlx::query_as::<_, RunNodeRow>(run_node_select("WHERE id = ?1"))
            .bind(id.as_ref())
            .fetch_optional(&self.pool)
            .await?;

        row.map(RunNodeRow::into_node)
            .ok_or_else(|| StorageError::RunNodeNotFound(id.to_string()))
    }

    pub async fn list_run_nodes(&self, run_id: &Id) -> Result<Vec<RunNode>> {
        let rows = sqlx::query_as::<_, RunNodeRow>(run_node_select(
            "WHERE run_id = ?1 ORDER BY sequence_index, attempt",
        ))
        .bind(run_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunNodeRow::into_node).collect())
    }

    /// The latest-attempt row per `node_key`, as required by the node
    /// selector (greatest `attempt`, tie-break greatest `id`).
    pub async fn list_latest_attempt_run_nodes(&self, run_id: &Id) -> Result<Vec<RunNode>> {
        let rows = sqlx::query_as::<_, RunNodeRow>(run_node_select(
            "WHERE run_id = ?1 AND (node_key, attempt, id) IN ( \
               SELECT node_key, MAX(attempt), MAX(id) FROM run_nodes \
               WHERE run_id = ?1 GROUP BY node_key \
             ) ORDER BY sequence_index",
        ))
        .bind(run_id.as_ref())
        .bind(run_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunNodeRow::into_node).collect())
    }

    /// Guarded transition on `run_nodes.status`. The allowed transition
    /// table itself is enforced by a database trigger; this adds the
    /// concurrency guard (expected current status) and the timestamp
    /// bookkeeping the trigger does not perform.
    pub async fn transition_run_node_status(
        &self,
        run_node_id: &Id,
        expected_from: RunNodeStatus,
        to: RunNodeStatus,
    ) -> Result<()> {
        if !expected_from.can_transition_to(to) {
            return Err(StorageError::PreconditionFailed(format!(
                "{run_node_id}: {:?} -> {:?} not allowed",
                expected_from, to
            )));
        }

        let now = now_millis();
        let (started_at, completed_at): (Option<i64>, Option<i64>) = match to {
            RunNodeStatus::Running => (Some(now), None),
            RunNodeStatus::Pending => (None, None),
            _ if to.is_terminal() => (None, Some(now)),
            _ => (None, None),
        };

        let result = if to == RunNodeStatus::Running {
            sqlx::query(
                "UPDATE run_nodes SET status = ?1, started_at = ?2, completed_at = ?3 \
                 WHERE id = ?4 AND status = ?5",
            )
            .bind(to.as_str())
            .bind(started_at)
            .bind(completed_at)
            .bind(run_node_id.as_ref())
            .bind(expected_from.as_str())
            .execute(&self.pool)
            .await?
        } else if to == RunNodeStatus::Pending {
            sqlx::query(
                "UPDATE run_nodes SET status = ?1, started_at = NULL, completed_at = NULL \
                 WHERE id = ?2 AND status = ?3",
            )
            .bind(to.as_str())
            .bind(run_node_id.as_ref())
            .bind(expected_from.as_str())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE run_nodes SET status = ?1, completed_at = ?2 WHERE id = ?3 AND status = ?4",
            )
            .bind(to.as_str())
            .bind(completed_at)
            .bind(run_node_id.as_ref())
            .bind(expected_from.as_str())
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::PreconditionFailed(run_node_id.to_string()));
        }
        Ok(())
    }

    /// Same as `transition_run_node_status` but also bumps `attempt`, used
    /// when requeueing a `completed`/`failed` node for retry.
    pub async fn requeue_run_node(&self, run_node_id: &Id, next_attempt: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE run_nodes SET status = 'pending', attempt = ?1, started_at = NULL, \
             completed_at = NULL WHERE id = ?2 AND status IN ('completed', 'failed')",
        )
        .bind(next_attempt)
        .bind(run_node_id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::PreconditionFailed(run_node_id.to_string()));
        }
        Ok(())
    }

    // --- Run node edge operations ---

    pub async fn insert_run_node_edge(&self, edge: &RunNodeEdge) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_node_edges (id, run_id, source_run_node_id, target_run_node_id, \
             route_on, priority, auto, guard, edge_kind, terminal) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        )
        .bind(edge.id.as_ref())
        .bind(edge.run_id.as_ref())
        .bind(edge.source_run_node_id.as_ref())
        .bind(edge.target_run_node_id.as_ref())
        .bind(edge.route_on.as_str())
        .bind(edge.priority)
        .bind(edge.auto)
        .bind(&edge.guard)
        .bind(edge.edge_kind.as_str())
        .bind(edge.terminal)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_run_node_edges(&self, run_id: &Id) -> Result<Vec<RunNodeEdge>> {
        let rows = sqlx::query_as::<_, RunNodeEdgeRow>(
            "SELECT id, run_id, source_run_node_id, target_run_node_id, route_on, priority, \
             auto, guard, edge_kind, terminal FROM run_node_edges WHERE run_id = ?1",
        )
        .bind(run_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunNodeEdgeRow::into_edge).collect())
    }

    // --- Phase artifact operations ---

    pub async fn insert_phase_artifact(&self, artifact: &PhaseArtifact) -> Result<()> {
        sqlx::query(
            "INSERT INTO phase_artifacts (id, run_node_id, attempt, artifact_type, \
             content_type, content, metadata_json, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        )
        .bind(artifact.id.as_ref())
        .bind(artifact.run_node_id.as_ref())
        .bind(artifact.attempt)
        .bind(artifact.artifact_type.as_str())
        .bind(artifact.content_type.as_str())
        .bind(&artifact.content)
        .bind(json_opt(&artifact.metadata)?)
        .bind(artifact.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_phase_artifact(
        &self,
        run_node_id: &Id,
        artifact_type: ArtifactType,
    ) -> Result<Option<PhaseArtifact>> {
        let row = sqlx::query_as::<_, PhaseArtifactRow>(
            "SELECT id, run_node_id, attempt, artifact_type, content_type, content, \
             metadata_json, created_at FROM phase_artifacts \
             WHERE run_node_id = ?1 AND artifact_type = ?2 ORDER BY attempt DESC, created_at DESC LIMIT 1",
        )
        .bind(run_node_id.as_ref())
        .bind(artifact_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PhaseArtifactRow::into_artifact).transpose()
    }

    // --- Routing decision operations ---

    pub async fn insert_routing_decision(&self, decision: &RoutingDecision) -> Result<()> {
        sqlx::query(
            "INSERT INTO routing_decisions (id, run_node_id, attempt, decision_type, source, \
             created_at) VALUES (?1,?2,?3,?4,?5,?6)",
        )
        .bind(decision.id.as_ref())
        .bind(decision.run_node_id.as_ref())
        .bind(decision.attempt)
        .bind(decision.decision_type.as_str())
        .bind(decision.source.map(|s| s.as_str()))
        .bind(decision.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_routing_decision(
        &self,
        run_node_id: &Id,
    ) -> Result<Option<RoutingDecision>> {
        let row = sqlx::query_as::<_, RoutingDecisionRow>(
            "SELECT id, run_node_id, attempt, decision_type, source, created_at \
             FROM routing_decisions WHERE run_node_id = ?1 ORDER BY attempt DESC, created_at DESC LIMIT 1",
        )
        .bind(run_node_id.as_ref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RoutingDecisionRow::into_decision))
    }

    // --- Join barrier operations ---

    pub async fn insert_join_barrier(&self, barrier: &RunJoinBarrier) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_join_barriers (id, run_id, spawner_run_node_id, join_run_node_id, \
             expected_children, terminal_children, completed_children, failed_children, status, \
             created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
        )
        .bind(barrier.id.as_ref())
        .bind(barrier.run_id.as_ref())
        .bind(barrier.spawner_run_node_id.as_ref())
        .bind(barrier.join_run_node_id.as_ref())
        .bind(barrier.expected_children)
        .bind(barrier.terminal_children)
        .bind(barrier.completed_children)
        .bind(barrier.failed_children)
        .bind(barrier.status.as_str())
        .bind(barrier.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_join_barrier_for_spawner(
        &self,
        spawner_run_node_id: &Id,
    ) -> Result<Option<RunJoinBarrier>> {
        let row = sqlx::query_as::<_, JoinBarrierRow>(
            "SELECT id, run_id, spawner_run_node_id, join_run_node_id, expected_children, \
             terminal_children, completed_children, failed_children, status, created_at \
             FROM run_join_barriers WHERE spawner_run_node_id = ?1",
        )
        .bind(spawner_run_node_id.as_ref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JoinBarrierRow::into_barrier))
    }

    pub async fn latest_join_barrier_for_join(
        &self,
        join_run_node_id: &Id,
    ) -> Result<Option<RunJoinBarrier>> {
        let row = sqlx::query_as::<_, JoinBarrierRow>(
            "SELECT id, run_id, spawner_run_node_id, join_run_node_id, expected_children, \
             terminal_children, completed_children, failed_children, status, created_at \
             FROM run_join_barriers WHERE join_run_node_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(join_run_node_id.as_ref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JoinBarrierRow::into_barrier))
    }

    /// Records one child's terminal transition against its barrier,
    /// incrementing the matching counters atomically and flipping the
    /// barrier to `ready` once `terminal_children == expected_children`.
    pub async fn record_join_child_terminal(
        &self,
        barrier_id: &Id,
        completed: bool,
    ) -> Result<()> {
        let completed_delta = i64::from(completed);
        let failed_delta = i64::from(!completed);

        sqlx::query(
            "UPDATE run_join_barriers SET \
             terminal_children = terminal_children + 1, \
             completed_children = completed_children + ?1, \
             failed_children = failed_children + ?2 \
             WHERE id = ?3",
        )
        .bind(completed_delta)
        .bind(failed_delta)
        .bind(barrier_id.as_ref())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE run_join_barriers SET status = 'ready' \
             WHERE id = ?1 AND terminal_children >= expected_children AND status = 'pending'",
        )
        .bind(barrier_id.as_ref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn release_join_barrier(&self, barrier_id: &Id) -> Result<()> {
        sqlx::query("UPDATE run_join_barriers SET status = 'released' WHERE id = ?1")
            .bind(barrier_id.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_join_barrier(&self, id: &Id) -> Result<RunJoinBarrier> {
        let row = sqlx::query_as::<_, JoinBarrierRow>(
            "SELECT id, run_id, spawner_run_node_id, join_run_node_id, expected_children, \
             terminal_children, completed_children, failed_children, status, created_at \
             FROM run_join_barriers WHERE id = ?1",
        )
        .bind(id.as_ref())
        .fetch_optional(&self.pool)
        .await?;
        row.map(JoinBarrierRow::into_barrier)
            .ok_or_else(|| StorageError::RunNodeNotFound(id.to_string()))
    }

    pub async fn list_join_barriers_for_run(&self, run_id: &Id) -> Result<Vec<RunJoinBarrier>> {
        let rows = sqlx::query_as::<_, JoinBarrierRow>(
            "SELECT id, run_id, spawner_run_node_id, join_run_node_id, expected_children, \
             terminal_children, completed_children, failed_children, status, created_at \
             FROM run_join_barriers WHERE run_id = ?1 ORDER BY created_at",
        )
        .bind(run_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JoinBarrierRow::into_barrier).collect())
    }

    /// Lists every phase artifact persisted across all attempts of one run
    /// node, oldest first. Used by the context assembler to fetch a prior
    /// attempt's retry-summary note.
    pub async fn list_phase_artifacts(&self, run_node_id: &Id) -> Result<Vec<PhaseArtifact>> {
        let rows = sqlx::query_as::<_, PhaseArtifactRow>(
            "SELECT id, run_node_id, attempt, artifact_type, content_type, content, \
             metadata_json, created_at FROM phase_artifacts \
             WHERE run_node_id = ?1 ORDER BY attempt, created_at",
        )
        .bind(run_node_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PhaseArtifactRow::into_artifact).collect()
    }

    /// Reactivates a node that previously reached a terminal status
    /// (`completed` or `failed`) back to `pending`, bumping its attempt
    /// counter. Used for requeueing a completed downstream target whose
    /// upstream routing changed.
    pub async fn retry_run_node(&self, run_node_id: &Id, next_attempt: i64) -> Result<()> {
        self.requeue_run_node(run_node_id, next_attempt).await
    }

    /// Retries a failed node in place: `failed -> running` directly,
    /// bumping `attempt`, without passing back through `pending`. Used by
    /// the executor's own-attempt retry path (distinct from requeueing a
    /// completed downstream target).
    pub async fn retry_failed_node_in_place(&self, run_node_id: &Id, next_attempt: i64) -> Result<()> {
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE run_nodes SET status = 'running', attempt = ?1, started_at = ?2, \
             completed_at = NULL WHERE id = ?3 AND status = 'failed'",
        )
        .bind(next_attempt)
        .bind(now)
        .bind(run_node_id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::PreconditionFailed(run_node_id.to_string()));
        }
        Ok(())
    }

    // --- Stream event operations ---

    /// Inserts the next stream event for `(run_node_id, attempt)`, using
    /// `MAX(sequence)+1` under the unique index to keep the per-attempt
    /// sequence strictly increasing and gapless.
    pub async fn append_stream_event(
        &self,
        run_node_id: &Id,
        attempt: i64,
        event: NewStreamEvent,
    ) -> Result<RunNodeStreamEvent> {
        let id = Id::new();
        let now = Utc::now();

        let next_seq: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM run_node_stream_events \
             WHERE run_node_id = ?1 AND attempt = ?2",
        )
        .bind(run_node_id.as_ref())
        .bind(attempt)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO run_node_stream_events (id, run_node_id, attempt, sequence, \
             event_type, content_preview, metadata_json, delta_tokens, cumulative_tokens, \
             redacted, truncated, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        )
        .bind(id.as_ref())
        .bind(run_node_id.as_ref())
        .bind(attempt)
        .bind(next_seq.0)
        .bind(&event.event_type)
        .bind(&event.content_preview)
        .bind(json_opt(&event.metadata)?)
        .bind(event.delta_tokens)
        .bind(event.cumulative_tokens)
        .bind(event.redacted)
        .bind(event.truncated)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(RunNodeStreamEvent {
            id,
            run_node_id: run_node_id.clone(),
            attempt,
            sequence: next_seq.0,
            event_type: event.event_type,
            content_preview: event.content_preview,
            metadata: event.metadata,
            delta_tokens: event.delta_tokens,
            cumulative_tokens: event.cumulative_tokens,
            redacted: event.redacted,
            truncated: event.truncated,
            created_at: now,
        })
    }

    pub async fn list_stream_events(
        &self,
        run_node_id: &Id,
        attempt: i64,
    ) -> Result<Vec<RunNodeStreamEvent>> {
        let rows = sqlx::query_as::<_, StreamEventRow>(
            "SELECT id, run_node_id, attempt, sequence, event_type, content_preview, \
             metadata_json, delta_tokens, cumulative_tokens, redacted, truncated, created_at \
             FROM run_node_stream_events WHERE run_node_id = ?1 AND attempt = ?2 ORDER BY sequence",
        )
        .bind(run_node_id.as_ref())
        .bind(attempt)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StreamEventRow::into_event).collect()
    }

    // --- Diagnostics operations ---

    /// Writes the one diagnostics row for `(run_node, attempt)`; a second
    /// call for the same key is a no-op via `ON CONFLICT DO NOTHING`.
    pub async fn insert_diagnostics(&self, diagnostics: &RunNodeDiagnostics) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_node_diagnostics (id, run_node_id, attempt, event_count, \
             redacted, truncated, payload_json, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8) \
             ON CONFLICT (run_node_id, attempt) DO NOTHING",
        )
        .bind(diagnostics.id.as_ref())
        .bind(diagnostics.run_node_id.as_ref())
        .bind(diagnostics.attempt)
        .bind(diagnostics.event_count)
        .bind(diagnostics.redacted)
        .bind(diagnostics.truncated)
        .bind(serde_json::to_string(&diagnostics.payload)?)
        .bind(diagnostics.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Event fields needed to insert a stream event row; `sequence` and `id`
/// are assigned by the storage layer.
pub struct NewStreamEvent {
    pub event_type: String,
    pub content_preview: String,
    pub metadata: Option<Value>,
    pub delta_tokens: Option<i64>,
    pub cumulative_tokens: Option<i64>,
    pub redacted: bool,
    pub truncated: bool,
}

fn json_opt(value: &Option<Value>) -> std::result::Result<Option<String>, serde_json::Error> {
    value.as_ref().map(serde_json::to_string).transpose()
}

fn parse_json_opt(value: Option<String>) -> std::result::Result<Option<Value>, StorageError> {
    value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(StorageError::from)
}

/// Splits a migration file on `;` while tolerating statement bodies that
/// embed `BEGIN ... END;` trigger blocks (those contain their own `;`
/// terminators, so a naive split would cut a trigger in half).
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for token in sql.split_inclusive(';') {
        current.push_str(token);
        let upper = token.to_uppercase();
        if upper.contains("BEGIN") {
            depth += 1;
        }
        if upper.contains("END;") {
            depth = depth.saturating_sub(1);
        }
        if depth == 0 {
            statements.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

fn run_node_select(suffix: &str) -> String {
    format!(
        "SELECT id, run_id, tree_id, node_key, attempt, sequence_index, sequence_path, \
         lineage_depth, spawner_node_id, join_node_id, node_type, node_role, provider, model, \
         prompt, execution_permissions_json, error_handler_config_json, max_retries, \
         max_children, status, started_at, completed_at FROM run_nodes {suffix}"
    )
}

// --- Row types for SQLx ---

#[derive(sqlx::FromRow)]
struct TreeRow {
    id: String,
    tree_key: String,
    version: i64,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl TreeRow {
    fn into_tree(self) -> WorkflowTree {
        WorkflowTree {
            id: Id::from_string(self.id),
            tree_key: self.tree_key,
            version: self.version,
            status: TreeStatus::parse(&self.status).unwrap_or(TreeStatus::Draft),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TreeNodeRow {
    id: String,
    tree_id: String,
    node_key: String,
    sequence_index: i64,
    node_type: String,
    node_role: String,
    provider: Option<String>,
    model: Option<String>,
    prompt_template_id: Option<String>,
    execution_permissions_json: Option<String>,
    error_handler_config_json: Option<String>,
    max_retries: i64,
    max_children: i64,
}

impl TreeNodeRow {
    fn into_node(self) -> Result<TreeNode> {
        Ok(TreeNode {
            id: Id::from_string(self.id),
            tree_id: Id::from_string(self.tree_id),
            node_key: self.node_key,
            sequence_index: self.sequence_index,
            node_type: NodeType::parse(&self.node_type).unwrap_or(NodeType::Agent),
            node_role: NodeRole::parse(&self.node_role).unwrap_or_default(),
            provider: self.provider,
            model: self.model,
            prompt_template_id: self.prompt_template_id,
            execution_permissions: parse_json_opt(self.execution_permissions_json)?,
            error_handler_config: parse_json_opt(self.error_handler_config_json)?,
            max_retries: self.max_retries,
            max_children: self.max_children,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TreeEdgeRow {
    id: String,
    tree_id: String,
    source_node_id: String,
    target_node_id: String,
    route_on: String,
    priority: i64,
    auto: bool,
    guard: Option<String>,
}

impl TreeEdgeRow {
    fn into_edge(self) -> TreeEdge {
        TreeEdge {
            id: Id::from_string(self.id),
            tree_id: Id::from_string(self.tree_id),
            source_node_id: Id::from_string(self.source_node_id),
            target_node_id: Id::from_string(self.target_node_id),
            route_on: RouteOn::parse(&self.route_on).unwrap_or(RouteOn::Success),
            priority: self.priority,
            auto: self.auto,
            guard: self.guard,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    tree_id: String,
    status: String,
    repo: Option<String>,
    branch: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl RunRow {
    fn into_run(self) -> WorkflowRun {
        WorkflowRun {
            id: Id::from_string(self.id),
            tree_id: Id::from_string(self.tree_id),
            status: RunStatus::parse(&self.status).unwrap_or(RunStatus::Failed),
            repo: self.repo,
            branch: self.branch,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            completed_at: self.completed_at.map(from_millis),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunNodeRow {
    id: String,
    run_id: String,
    tree_id: String,
    node_key: String,
    attempt: i64,
    sequence_index: i64,
    sequence_path: String,
    lineage_depth: i64,
    spawner_node_id: Option<String>,
    join_node_id: Option<String>,
    node_type: String,
    node_role: String,
    provider: Option<String>,
    model: Option<String>,
    prompt: Option<String>,
    execution_permissions_json: Option<String>,
    error_handler_config_json: Option<String>,
    max_retries: i64,
    max_children: i64,
    status: String,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl RunNodeRow {
    fn into_node(self) -> RunNode {
        RunNode {
            id: Id::from_string(self.id),
            run_id: Id::from_string(self.run_id),
            tree_id: Id::from_string(self.tree_id),
            node_key: self.node_key,
            attempt: self.attempt,
            sequence_index: self.sequence_index,
            sequence_path: self.sequence_path,
            lineage_depth: self.lineage_depth,
            spawner_node_id: self.spawner_node_id.map(Id::from_string),
            join_node_id: self.join_node_id.map(Id::from_string),
            node_type: NodeType::parse(&self.node_type).unwrap_or(NodeType::Agent),
            node_role: NodeRole::parse(&self.node_role).unwrap_or_default(),
            provider: self.provider,
            model: self.model,
            prompt: self.prompt,
            execution_permissions: self
                .execution_permissions_json
                .and_then(|s| serde_json::from_str(&s).ok()),
            error_handler_config: self
                .error_handler_config_json
                .and_then(|s| serde_json::from_str(&s).ok()),
            max_retries: self.max_retries,
            max_children: self.max_children,
            status: RunNodeStatus::parse(&self.status).unwrap_or(RunNodeStatus::Failed),
            started_at: self.started_at.map(from_millis),
            completed_at: self.completed_at.map(from_millis),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunNodeEdgeRow {
    id: String,
    run_id: String,
    source_run_node_id: String,
    target_run_node_id: String,
    route_on: String,
    priority: i64,
    auto: bool,
    guard: Option<String>,
    edge_kind: String,
    terminal: bool,
}

impl RunNodeEdgeRow {
    fn into_edge(self) -> RunNodeEdge {
        RunNodeEdge {
            id: Id::from_string(self.id),
            run_id: Id::from_string(self.run_id),
            source_run_node_id: Id::from_string(self.source_run_node_id),
            target_run_node_id: Id::from_string(self.target_run_node_id),
            route_on: RouteOn::parse(&self.route_on).unwrap_or(RouteOn::Success),
            priority: self.priority,
            auto: self.auto,
            guard: self.guard,
            edge_kind: EdgeKind::parse(&self.edge_kind).unwrap_or(EdgeKind::Static),
            terminal: self.terminal,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PhaseArtifactRow {
    id: String,
    run_node_id: String,
    attempt: i64,
    artifact_type: String,
    content_type: String,
    content: String,
    metadata_json: Option<String>,
    created_at: i64,
}

impl PhaseArtifactRow {
    fn into_artifact(self) -> Result<PhaseArtifact> {
        Ok(PhaseArtifact {
            id: Id::from_string(self.id),
            run_node_id: Id::from_string(self.run_node_id),
            attempt: self.attempt,
            artifact_type: ArtifactType::parse(&self.artifact_type).unwrap_or(ArtifactType::Note),
            content_type: ContentType::parse(&self.content_type).unwrap_or(ContentType::Text),
            content: self.content,
            metadata: parse_json_opt(self.metadata_json)?,
            created_at: from_millis(self.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoutingDecisionRow {
    id: String,
    run_node_id: String,
    attempt: i64,
    decision_type: String,
    source: Option<String>,
    created_at: i64,
}

impl RoutingDecisionRow {
    fn into_decision(self) -> RoutingDecision {
        RoutingDecision {
            id: Id::from_string(self.id),
            run_node_id: Id::from_string(self.run_node_id),
            attempt: self.attempt,
            decision_type: DecisionType::parse(&self.decision_type)
                .unwrap_or(DecisionType::NoRoute),
            source: self.source.as_deref().and_then(|s| match s {
                "provider_result_metadata" => Some(RoutingDecisionSource::ProviderResultMetadata),
                "result_content_contract_fallback" => {
                    Some(RoutingDecisionSource::ResultContentContractFallback)
                }
                _ => None,
            }),
            created_at: from_millis(self.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct JoinBarrierRow {
    id: String,
    run_id: String,
    spawner_run_node_id: String,
    join_run_node_id: String,
    expected_children: i64,
    terminal_children: i64,
    completed_children: i64,
    failed_children: i64,
    status: String,
    created_at: i64,
}

impl JoinBarrierRow {
    fn into_barrier(self) -> RunJoinBarrier {
        RunJoinBarrier {
            id: Id::from_string(self.id),
            run_id: Id::from_string(self.run_id),
            spawner_run_node_id: Id::from_string(self.spawner_run_node_id),
            join_run_node_id: Id::from_string(self.join_run_node_id),
            expected_children: self.expected_children,
            terminal_children: self.terminal_children,
            completed_children: self.completed_children,
            failed_children: self.failed_children,
            status: BarrierStatus::parse(&self.status).unwrap_or(BarrierStatus::Pending),
            created_at: from_millis(self.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct StreamEventRow {
    id: String,
    run_node_id: String,
    attempt: i64,
    sequence: i64,
    event_type: String,
    content_preview: String,
    metadata_json: Option<String>,
    delta_tokens: Option<i64>,
    cumulative_tokens: Option<i64>,
    redacted: bool,
    truncated: bool,
    created_at: i64,
}

impl StreamEventRow {
    fn into_event(self) -> Result<RunNodeStreamEvent> {
        Ok(RunNodeStreamEvent {
            id: Id::from_string(self.id),
            run_node_id: Id::from_string(self.run_node_id),
            attempt: self.attempt,
            sequence: self.sequence,
            event_type: self.event_type,
            content_preview: self.content_preview,
            metadata: parse_json_opt(self.metadata_json)?,
            delta_tokens: self.delta_tokens,
            cumulative_tokens: self.cumulative_tokens,
            redacted: self.redacted,
            truncated: self.truncated,
            created_at: from_millis(self.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStorage {
        storage: Storage,
        _dir: TempDir,
    }

    async fn create_test_storage() -> TestStorage {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = Storage::new(&db_path).await.unwrap();
        storage.migrate_embedded().await.unwrap();
        TestStorage { storage, _dir: dir }
    }

    fn test_tree() -> WorkflowTree {
        let now = Utc::now();
        WorkflowTree {
            id: Id::new(),
            tree_key: "design_tree".to_string(),
            version: 1,
            status: TreeStatus::Published,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_tree_node(tree_id: &Id, node_key: &str) -> TreeNode {
        TreeNode {
            id: Id::new(),
            tree_id: tree_id.clone(),
            node_key: node_key.to_string(),
            sequence_index: 0,
            node_type: NodeType::Agent,
            node_role: NodeRole::Standard,
            provider: None,
            model: None,
            prompt_template_id: None,
            execution_permissions: None,
            error_handler_config: None,
            max_retries: 0,
            max_children: 0,
        }
    }

    #[tokio::test]
    async fn migrate_embedded_is_idempotent() {
        let ts = create_test_storage().await;
        ts.storage.migrate_embedded().await.unwrap();
        ts.storage.migrate_embedded().await.unwrap();
    }

    #[tokio::test]
    async fn insert_and_get_latest_published_tree() {
        let ts = create_test_storage().await;
        let tree = test_tree();
        ts.storage.insert_tree(&tree).await.unwrap();

        let found = ts
            .storage
            .get_latest_published_tree("design_tree")
            .await
            .unwrap();
        assert_eq!(found.id, tree.id);
    }

    #[tokio::test]
    async fn get_latest_published_tree_not_found() {
        let ts = create_test_storage().await;
        let err = ts
            .storage
            .get_latest_published_tree("missing")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TreeNotFound(_)));
    }

    #[tokio::test]
    async fn run_node_status_transition_respects_precondition() {
        let ts = create_test_storage().await;
        let tree = test_tree();
        ts.storage.insert_tree(&tree).await.unwrap();
        ts.storage
            .insert_tree_node(&test_tree_node(&tree.id, "design"))
            .await
            .unwrap();

        let now = Utc::now();
        let run = WorkflowRun {
            id: Id::new(),
            tree_id: tree.id.clone(),
            status: RunStatus::Running,
            repo: None,
            branch: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        ts.storage.insert_run(&run).await.unwrap();

        let node = RunNode {
            id: Id::new(),
            run_id: run.id.clone(),
            tree_id: tree.id.clone(),
            node_key: "design".to_string(),
            attempt: 1,
            sequence_index: 0,
            sequence_path: "0".to_string(),
            lineage_depth: 0,
            spawner_node_id: None,
            join_node_id: None,
            node_type: NodeType::Agent,
            node_role: NodeRole::Standard,
            provider: None,
            model: None,
            prompt: Some("Produce a design report".to_string()),
            execution_permissions: None,
            error_handler_config: None,
            max_retries: 0,
            max_children: 0,
            status: RunNodeStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        ts.storage.insert_run_node(&node).await.unwrap();

        ts.storage
            .transition_run_node_status(&node.id, RunNodeStatus::Pending, RunNodeStatus::Running)
            .await
            .unwrap();

        let err = ts
            .storage
            .transition_run_node_status(&node.id, RunNodeStatus::Pending, RunNodeStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed(_)));

        ts.storage
            .transition_run_node_status(
                &node.id,
                RunNodeStatus::Running,
                RunNodeStatus::Completed,
            )
            .await
            .unwrap();

        let refreshed = ts.storage.get_run_node(&node.id).await.unwrap();
        assert_eq!(refreshed.status, RunNodeStatus::Completed);
        assert!(refreshed.completed_at.is_some());
    }

    #[tokio::test]
    async fn stream_events_sequence_is_gapless() {
        let ts = create_test_storage().await;
        let tree = test_tree();
        ts.storage.insert_tree(&tree).await.unwrap();
        ts.storage
            .insert_tree_node(&test_tree_node(&tree.id, "design"))
            .await
            .unwrap();
        let now = Utc::now();
        let run = WorkflowRun {
            id: Id::new(),
            tree_id: tree.id.clone(),
            status: RunStatus::Running,
            repo: None,
            branch: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        ts.storage.insert_run(&run).await.unwrap();
        let node = RunNode {
            id: Id::new(),
            run_id: run.id.clone(),
            tree_id: tree.id.clone(),
            node_key: "design".to_string(),
            attempt: 1,
            sequence_index: 0,
            sequence_path: "0".to_string(),
            lineage_depth: 0,
            spawner_node_id: None,
            join_node_id: None,
            node_type: NodeType::Agent,
            node_role: NodeRole::Standard,
            provider: None,
            model: None,
            prompt: None,
            execution_permissions: None,
            error_handler_config: None,
            max_retries: 0,
            max_children: 0,
            status: RunNodeStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        ts.storage.insert_run_node(&node).await.unwrap();

        for i in 0..3 {
            let event = ts
                .storage
                .append_stream_event(
                    &node.id,
                    1,
                    NewStreamEvent {
                        event_type: "assistant".to_string(),
                        content_preview: format!("event {i}"),
                        metadata: None,
                        delta_tokens: None,
                        cumulative_tokens: None,
                        redacted: false,
                        truncated: false,
                    },
                )
                .await
                .unwrap();
            assert_eq!(event.sequence, i64::from(i) + 1);
        }

        let events = ts.storage.list_stream_events(&node.id, 1).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[2].sequence, 3);
    }

    #[tokio::test]
    async fn diagnostics_insert_is_unique_per_attempt() {
        let ts = create_test_storage().await;
        let tree = test_tree();
        ts.storage.insert_tree(&tree).await.unwrap();
        ts.storage
            .insert_tree_node(&test_tree_node(&tree.id, "design"))
            .await
            .unwrap();
        let now = Utc::now();
        let run = WorkflowRun {
            id: Id::new(),
            tree_id: tree.id.clone(),
            status: RunStatus::Running,
            repo: None,
            branch: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        ts.storage.insert_run(&run).await.unwrap();
        let node = RunNode {
            id: Id::new(),
            run_id: run.id.clone(),
            tree_id: tree.id.clone(),
            node_key: "design".to_string(),
            attempt: 1,
            sequence_index: 0,
            sequence_path: "0".to_string(),
            lineage_depth: 0,
            spawner_node_id: None,
            join_node_id: None,
            node_type: NodeType::Agent,
            node_role: NodeRole::Standard,
            provider: None,
            model: None,
            prompt: None,
            execution_permissions: None,
            error_handler_config: None,
            max_retries: 0,
            max_children: 0,
            status: RunNodeStatus::Pending,
            started_at: None,
            completed_at: None,
        };
        ts.storage.insert_run_node(&node).await.unwrap();

        let diagnostics = RunNodeDiagnostics {
            id: Id::new(),
            run_node_id: node.id.clone(),
            attempt: 1,
            event_count: 2,
            redacted: false,
            truncated: false,
            payload: serde_json::json!({"outcome": "completed"}),
            created_at: Utc::now(),
        };
        ts.storage.insert_diagnostics(&diagnostics).await.unwrap();

        let mut second = diagnostics;
        second.id = Id::new();
        ts.storage.insert_diagnostics(&second).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM run_node_diagnostics")
            .fetch_one(&ts.storage.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
