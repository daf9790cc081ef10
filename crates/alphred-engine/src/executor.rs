//! Executor (component C7).
//!
//! Drives a run to completion: claim → assemble → invoke → persist →
//! route, one node at a time, enforcing the iteration cap and exposing
//! the lifecycle controls (`pause`/`resume`/`cancel`/`retry`) the CLI's
//! `run pause|resume|cancel|retry` subcommand surfaces.

use std::sync::Arc;

use alphred_core::{
    ArtifactType, Config, ContentType, DecisionType, Id, NodeRole, ProviderOptions,
    RunNode, RunNodeDiagnostics, RunNodeStatus, RunStatus, RoutingDecisionSource as CoreRoutingDecisionSource,
    WorkflowRun,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::{self, ContextError};
use crate::diagnostics::{self, DiagnosticsInput};
use crate::join::{self, JoinError};
use crate::phase::{self, PhaseRunError, RoutingDecisionSource};
use crate::provider::ProviderFactory;
use crate::selector::{self, SelectError, Selection};
use crate::storage::{NewStreamEvent, Storage, StorageError};

const MAX_ATTEMPT_PRECONDITION_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    #[error("selection error: {0}")]
    Select(#[from] SelectError),
    #[error("join coordination error: {0}")]
    Join(#[from] JoinError),
    #[error("no provider registered for name {0:?}")]
    ProviderNotConfigured(Option<String>),
    #[error("no selector match for node key {0}")]
    SelectorNotFound(String),
    #[error("node {0} is not currently executable")]
    SelectorNotExecutable(String),
    #[error("invalid control transition: {0}")]
    InvalidControlTransition(String),
    #[error("no retry targets found for run {0}")]
    RetryTargetsNotFound(String),
}

/// Outcome of one driving step, used by `execute_run`'s loop to decide
/// whether to keep iterating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    Blocked,
    Terminal(RunStatus),
}

/// JSON-serializable result of a lifecycle control action, matching the
/// CLI's `run pause|resume|cancel|retry` output schema exactly.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleOutcome {
    pub action: &'static str,
    pub outcome: &'static str,
    #[serde(rename = "workflowRunId")]
    pub workflow_run_id: String,
    #[serde(rename = "previousRunStatus")]
    pub previous_run_status: String,
    #[serde(rename = "runStatus")]
    pub run_status: String,
    #[serde(rename = "retriedRunNodeIds")]
    pub retried_run_node_ids: Vec<String>,
}

pub struct Executor {
    storage: Arc<Storage>,
    providers: Arc<dyn ProviderFactory>,
    config: Config,
}

impl Executor {
    pub fn new(storage: Arc<Storage>, providers: Arc<dyn ProviderFactory>, config: Config) -> Self {
        Self {
            storage,
            providers,
            config,
        }
    }

    /// Drives `run_id` to a terminal (or blocked) state, calling
    /// `on_run_terminal` exactly once if the run reaches a terminal
    /// status during this call.
    pub async fn execute_run(
        &self,
        run_id: &Id,
        mut on_run_terminal: impl FnMut(&WorkflowRun),
    ) -> Result<WorkflowRun, ExecutorError> {
        let mut steps: u32 = 0;

        loop {
            if steps >= self.config.max_steps {
                self.apply_iteration_cap(run_id).await?;
                break;
            }
            steps += 1;

            match self.execute_next_runnable_node(run_id).await? {
                StepOutcome::Advanced => continue,
                StepOutcome::Blocked => break,
                StepOutcome::Terminal(_) => break,
            }
        }

        let run = self.storage.get_run(run_id).await?;
        if run.status.is_terminal() {
            on_run_terminal(&run);
        }
        Ok(run)
    }

    /// Selects and executes exactly one node, or determines the run is
    /// blocked or terminal. This is the loop body `execute_run` repeats.
    pub async fn execute_next_runnable_node(&self, run_id: &Id) -> Result<StepOutcome, ExecutorError> {
        let run = self.storage.get_run(run_id).await?;
        if run.status.is_terminal() || run.status == RunStatus::Paused {
            return Ok(StepOutcome::Terminal(run.status));
        }
        if run.status == RunStatus::Pending {
            match self
                .storage
                .transition_workflow_run_status(run_id, RunStatus::Pending, RunStatus::Running)
                .await
            {
                Ok(()) | Err(StorageError::PreconditionFailed(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let selection = selector::select_next(&self.storage, run_id).await?;
        match selection {
            Selection::Runnable(node, selected_edge) => {
                self.execute_node_attempt(run_id, &node, selected_edge.as_ref())
                    .await?;
                Ok(StepOutcome::Advanced)
            }
            Selection::NoRunnable(status) => {
                let current = self.storage.get_run(run_id).await?;
                match self
                    .storage
                    .transition_workflow_run_status(run_id, current.status, status)
                    .await
                {
                    Ok(()) => Ok(StepOutcome::Terminal(status)),
                    Err(StorageError::PreconditionFailed(_)) => Ok(StepOutcome::Blocked),
                    Err(e) => Err(e.into()),
                }
            }
            Selection::Blocked => Ok(StepOutcome::Blocked),
        }
    }

    /// Executes exactly one named node (by `node_key`), bypassing the
    /// selector's own pick — the `executeSingleNode(selector)` surface.
    /// Fails with `SelectorNotFound` if no latest-attempt node matches,
    /// or `SelectorNotExecutable` if that node isn't the one the selector
    /// would currently pick.
    pub async fn execute_single_node(
        &self,
        run_id: &Id,
        node_key: &str,
    ) -> Result<StepOutcome, ExecutorError> {
        let nodes = self.storage.list_latest_attempt_run_nodes(run_id).await?;
        let target = nodes
            .iter()
            .find(|n| n.node_key == node_key)
            .ok_or_else(|| ExecutorError::SelectorNotFound(node_key.to_string()))?;

        let selection = selector::select_next(&self.storage, run_id).await?;
        match selection {
            Selection::Runnable(selected, selected_edge) if selected.id == target.id => {
                self.execute_node_attempt(run_id, &selected, selected_edge.as_ref())
                    .await?;
                Ok(StepOutcome::Advanced)
            }
            _ => Err(ExecutorError::SelectorNotExecutable(node_key.to_string())),
        }
    }

    async fn apply_iteration_cap(&self, run_id: &Id) -> Result<(), ExecutorError> {
        warn!(run_id = %run_id, max_steps = self.config.max_steps, "iteration cap reached, failing run");
        let nodes = self.storage.list_latest_attempt_run_nodes(run_id).await?;
        let representative = nodes
            .iter()
            .find(|n| !n.status.is_terminal())
            .or_else(|| nodes.first());

        if let Some(node) = representative {
            if !node.status.is_terminal() {
                let _ = self
                    .storage
                    .transition_run_node_status(&node.id, node.status, RunNodeStatus::Failed)
                    .await;
            }
            let artifact = alphred_core::PhaseArtifact {
                id: Id::new(),
                run_node_id: node.id.clone(),
                attempt: node.attempt,
                artifact_type: ArtifactType::Log,
                content_type: ContentType::Text,
                content: format!(
                    "limit_exceeded: max_steps={}",
                    self.config.max_steps
                ),
                metadata: Some(json!({"tag": "limit_exceeded", "maxSteps": self.config.max_steps})),
                created_at: Utc::now(),
            };
            self.storage.insert_phase_artifact(&artifact).await?;

            let diagnostics = RunNodeDiagnostics {
                id: Id::new(),
                run_node_id: node.id.clone(),
                attempt: node.attempt,
                event_count: 0,
                redacted: false,
                truncated: false,
                payload: json!({"tag": "limit_exceeded", "maxSteps": self.config.max_steps}),
                created_at: Utc::now(),
            };
            self.storage.insert_diagnostics(&diagnostics).await?;
        }

        let run = self.storage.get_run(run_id).await?;
        let _ = self
            .storage
            .transition_workflow_run_status(run_id, run.status, RunStatus::Failed)
            .await;
        Ok(())
    }

    async fn execute_node_attempt(
        &self,
        run_id: &Id,
        node: &RunNode,
        selected_edge: Option<&alphred_core::RunNodeEdge>,
    ) -> Result<(), ExecutorError> {
        let claimed = self.claim_node(node).await?;

        let all_edges = self.storage.list_run_node_edges(run_id).await?;

        let mut predecessor_ids: Vec<Id> = all_edges
            .iter()
            .filter(|e| e.target_run_node_id == claimed.id)
            .map(|e| e.source_run_node_id.clone())
            .collect();
        predecessor_ids.sort();
        predecessor_ids.dedup();

        let mut predecessors = Vec::new();
        for id in &predecessor_ids {
            predecessors.push(self.storage.get_run_node(id).await?);
        }
        predecessors.sort_by_key(|n| n.sequence_index);

        if claimed.node_role == NodeRole::Join {
            join::release_barrier_for_join(&self.storage, &claimed).await?;
        }

        let assembled = context::assemble_context(
            &self.storage,
            &self.config,
            &claimed,
            selected_edge,
            &predecessors,
        )
        .await?;

        let manifest = json!({
            "includedCharsTotal": assembled.included_chars_total,
            "included": assembled.included,
            "dropped": assembled.dropped,
            "failureRouteContextIncluded": assembled.failure_route_context_included,
            "failureRouteSourceNodeKey": assembled.failure_route_source_node_key,
        });

        let Some(provider) = self.providers.resolve(claimed.provider.as_deref().unwrap_or_default())
        else {
            return Err(ExecutorError::ProviderNotConfigured(claimed.provider.clone()));
        };

        let options = ProviderOptions {
            working_directory: ".".to_string(),
            system_prompt: claimed.prompt.clone(),
            context: vec![assembled.render()].into_iter().filter(|s| !s.is_empty()).collect(),
            timeout_ms: None,
            model: claimed.model.clone(),
            execution_permissions: None,
        };

        let mut stream_events = Vec::new();
        let mut failed_command_outputs = Vec::new();
        let attempt = claimed.attempt;

        let run_result = match provider.run(options).await {
            Ok(stream) => {
                phase::run_phase(stream, |event| {
                    if is_failed_tool_result(event) {
                        failed_command_outputs.push(event.content.to_string());
                    }
                })
                .await
            }
            Err(cause) => Err(PhaseRunError {
                events: vec![],
                tokens_used: None,
                cause,
            }),
        };

        match run_result {
            Ok(outcome) => {
                for event in &outcome.events {
                    let (preview, redacted1) =
                        diagnostics::redact_secrets(&event_preview_text(event));
                    let (preview, truncated) = diagnostics::truncate_preview(
                        &preview,
                        self.config.max_diagnostic_event_content_chars,
                    );
                    let stored = self
                        .storage
                        .append_stream_event(
                            &claimed.id,
                            attempt,
                            NewStreamEvent {
                                event_type: event.event_type.as_str().to_string(),
                                content_preview: preview,
                                metadata: event.metadata.clone(),
                                delta_tokens: None,
                                cumulative_tokens: outcome.tokens_used,
                                redacted: redacted1,
                                truncated,
                            },
                        )
                        .await?;
                    stream_events.push(stored);
                }

                let content_is_object = outcome.result_content.is_object();
                let report = alphred_core::PhaseArtifact {
                    id: Id::new(),
                    run_node_id: claimed.id.clone(),
                    attempt,
                    artifact_type: ArtifactType::Report,
                    content_type: if content_is_object {
                        ContentType::Json
                    } else {
                        ContentType::Text
                    },
                    content: render_content(&outcome.result_content),
                    metadata: None,
                    created_at: Utc::now(),
                };
                self.storage.insert_phase_artifact(&report).await?;

                let decision_type = outcome
                    .routing_decision
                    .as_deref()
                    .and_then(DecisionType::parse)
                    .unwrap_or(DecisionType::NoRoute);
                let decision_source = outcome.routing_decision_source.map(|s| match s {
                    RoutingDecisionSource::ProviderResultMetadata => {
                        CoreRoutingDecisionSource::ProviderResultMetadata
                    }
                    RoutingDecisionSource::ResultContentContractFallback => {
                        CoreRoutingDecisionSource::ResultContentContractFallback
                    }
                });
                let decision = alphred_core::RoutingDecision {
                    id: Id::new(),
                    run_node_id: claimed.id.clone(),
                    attempt,
                    decision_type,
                    source: decision_source,
                    created_at: Utc::now(),
                };
                self.storage.insert_routing_decision(&decision).await?;

                self.storage
                    .transition_run_node_status(
                        &claimed.id,
                        RunNodeStatus::Running,
                        RunNodeStatus::Completed,
                    )
                    .await?;
                info!(node_key = %claimed.node_key, attempt, "node completed");

                let completed_node = self.storage.get_run_node(&claimed.id).await?;
                if completed_node.spawner_node_id.is_some() {
                    join::record_child_terminal(&self.storage, &completed_node).await?;
                }
                if completed_node.node_role == NodeRole::Spawner {
                    self.try_spawn_children(&completed_node, &report).await?;
                }

                let diagnostics = diagnostics::build_diagnostics(
                    &self.config,
                    DiagnosticsInput {
                        run_node: &claimed,
                        attempt,
                        events: &stream_events,
                        usage_total_tokens: outcome.tokens_used,
                        context_manifest: manifest,
                        routing_decision: Some(decision_type.as_str().to_string()),
                        failure_route_summary: assembled
                            .failure_route_context_included
                            .then(|| "failure route context included".to_string()),
                        error_handler_summary: None,
                        failed_command_outputs,
                    },
                );
                self.storage.insert_diagnostics(&diagnostics).await?;

                Ok(())
            }
            Err(phase_error) => {
                for event in &phase_error.events {
                    let (preview, redacted1) =
                        diagnostics::redact_secrets(&event_preview_text(event));
                    let (preview, truncated) = diagnostics::truncate_preview(
                        &preview,
                        self.config.max_diagnostic_event_content_chars,
                    );
                    let stored = self
                        .storage
                        .append_stream_event(
                            &claimed.id,
                            attempt,
                            NewStreamEvent {
                                event_type: event.event_type.as_str().to_string(),
                                content_preview: preview,
                                metadata: event.metadata.clone(),
                                delta_tokens: None,
                                cumulative_tokens: phase_error.tokens_used,
                                redacted: redacted1,
                                truncated,
                            },
                        )
                        .await?;
                    stream_events.push(stored);
                }

                let failure_artifact = alphred_core::PhaseArtifact {
                    id: Id::new(),
                    run_node_id: claimed.id.clone(),
                    attempt,
                    artifact_type: ArtifactType::Log,
                    content_type: ContentType::Text,
                    content: format!(
                        "failureReason={}; attempt={}; maxRetries={}",
                        phase_error.cause, attempt, claimed.max_retries
                    ),
                    metadata: Some(json!({
                        "failureReason": phase_error.cause.to_string(),
                        "attempt": attempt,
                        "maxRetries": claimed.max_retries,
                    })),
                    created_at: Utc::now(),
                };
                self.storage.insert_phase_artifact(&failure_artifact).await?;

                let mut error_handler_summary = None;
                if attempt <= claimed.max_retries {
                    warn!(node_key = %claimed.node_key, attempt, cause = %phase_error.cause, "node attempt failed, retrying");
                    self.storage
                        .transition_run_node_status(
                            &claimed.id,
                            RunNodeStatus::Running,
                            RunNodeStatus::Failed,
                        )
                        .await?;
                    self.storage
                        .retry_failed_node_in_place(&claimed.id, attempt + 1)
                        .await?;
                } else {
                    warn!(node_key = %claimed.node_key, attempt, cause = %phase_error.cause, "node exhausted retries, failing");
                    self.storage
                        .transition_run_node_status(
                            &claimed.id,
                            RunNodeStatus::Running,
                            RunNodeStatus::Failed,
                        )
                        .await?;
                    error_handler_summary = self
                        .run_error_handler(&claimed, attempt, &phase_error.cause.to_string())
                        .await?;
                }

                let diagnostics = diagnostics::build_diagnostics(
                    &self.config,
                    DiagnosticsInput {
                        run_node: &claimed,
                        attempt,
                        events: &stream_events,
                        usage_total_tokens: phase_error.tokens_used,
                        context_manifest: manifest,
                        routing_decision: None,
                        failure_route_summary: assembled
                            .failure_route_context_included
                            .then(|| "failure route context included".to_string()),
                        error_handler_summary,
                        failed_command_outputs,
                    },
                );
                self.storage.insert_diagnostics(&diagnostics).await?;

                Ok(())
            }
        }
    }

    async fn try_spawn_children(
        &self,
        spawner: &RunNode,
        report: &alphred_core::PhaseArtifact,
    ) -> Result<(), ExecutorError> {
        let Ok(spec) = join::parse_spawn_spec(&json_of(&report.content)) else {
            return Ok(());
        };
        if i64::from(spec.count) > spawner.max_children {
            warn!(
                node_key = %spawner.node_key,
                requested = spec.count,
                max_children = spawner.max_children,
                "spawn count exceeds max_children, skipping fan-out"
            );
            return Ok(());
        }
        let Some(join_id) = &spawner.join_node_id else {
            return Ok(());
        };
        let join_node = self.storage.get_run_node(join_id).await?;
        join::spawn_children(&self.storage, spawner, &join_node, &spec).await?;
        Ok(())
    }

    /// One-shot error-handler step (spec §4.7 step 5): once a node has
    /// exhausted its retries, if an error handler is configured, write
    /// the retry-summary artifact the next manual `retryRun` attempt
    /// will pick up via the context assembler's retry-summary envelope.
    /// Returns the summary text for the diagnostics payload, or `None`
    /// if no handler is configured.
    async fn run_error_handler(
        &self,
        node: &RunNode,
        attempt: i64,
        failure_cause: &str,
    ) -> Result<Option<String>, ExecutorError> {
        let Some(config) = &node.error_handler_config else {
            return Ok(None);
        };

        let strategy = config
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or("default");
        let summary = format!(
            "error handler ({strategy}) for node {}: attempt {attempt} failed with {failure_cause}",
            node.node_key
        );

        let artifact = alphred_core::PhaseArtifact {
            id: Id::new(),
            run_node_id: node.id.clone(),
            attempt,
            artifact_type: ArtifactType::Note,
            content_type: ContentType::Text,
            content: summary.clone(),
            metadata: Some(json!({"errorHandler": true, "strategy": strategy})),
            created_at: Utc::now(),
        };
        self.storage.insert_phase_artifact(&artifact).await?;

        Ok(Some(summary))
    }

    async fn claim_node(&self, node: &RunNode) -> Result<RunNode, ExecutorError> {
        match node.status {
            RunNodeStatus::Running => Ok(node.clone()),
            RunNodeStatus::Pending => {
                self.storage
                    .transition_run_node_status(
                        &node.id,
                        RunNodeStatus::Pending,
                        RunNodeStatus::Running,
                    )
                    .await?;
                self.storage.get_run_node(&node.id).await.map_err(Into::into)
            }
            RunNodeStatus::Completed => {
                self.storage
                    .retry_run_node(&node.id, node.attempt + 1)
                    .await?;
                self.storage
                    .transition_run_node_status(
                        &node.id,
                        RunNodeStatus::Pending,
                        RunNodeStatus::Running,
                    )
                    .await?;
                self.storage.get_run_node(&node.id).await.map_err(Into::into)
            }
            other => Err(ExecutorError::SelectorNotExecutable(format!(
                "{}: status {:?} is not claimable",
                node.node_key, other
            ))),
        }
    }

    // --- Lifecycle controls ---

    pub async fn pause_run(&self, run_id: &Id) -> Result<LifecycleOutcome, ExecutorError> {
        self.control(run_id, "pause", RunStatus::Running, RunStatus::Paused)
            .await
    }

    pub async fn resume_run(&self, run_id: &Id) -> Result<LifecycleOutcome, ExecutorError> {
        self.control(run_id, "resume", RunStatus::Paused, RunStatus::Running)
            .await
    }

    pub async fn cancel_run(&self, run_id: &Id) -> Result<LifecycleOutcome, ExecutorError> {
        for _ in 0..MAX_ATTEMPT_PRECONDITION_RETRIES {
            let run = self.storage.get_run(run_id).await?;
            if run.status.is_terminal() {
                return Err(ExecutorError::InvalidControlTransition(format!(
                    "run {run_id} is already {:?}",
                    run.status
                )));
            }
            match self
                .storage
                .transition_workflow_run_status(run_id, run.status, RunStatus::Cancelled)
                .await
            {
                Ok(()) => {
                    return Ok(LifecycleOutcome {
                        action: "cancel",
                        outcome: "applied",
                        workflow_run_id: run_id.to_string(),
                        previous_run_status: run.status.as_str().to_string(),
                        run_status: RunStatus::Cancelled.as_str().to_string(),
                        retried_run_node_ids: vec![],
                    });
                }
                Err(StorageError::PreconditionFailed(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ExecutorError::InvalidControlTransition(format!(
            "cancel raced with concurrent transitions on run {run_id}"
        )))
    }

    pub async fn retry_run(&self, run_id: &Id) -> Result<LifecycleOutcome, ExecutorError> {
        let run = self.storage.get_run(run_id).await?;
        if run.status != RunStatus::Failed {
            return Err(ExecutorError::InvalidControlTransition(format!(
                "run {run_id} is not failed"
            )));
        }

        let nodes = self.storage.list_latest_attempt_run_nodes(run_id).await?;
        let failed_nodes: Vec<&RunNode> = nodes
            .iter()
            .filter(|n| n.status == RunNodeStatus::Failed)
            .collect();
        if failed_nodes.is_empty() {
            return Err(ExecutorError::RetryTargetsNotFound(run_id.to_string()));
        }

        let mut retried = Vec::new();
        for node in &failed_nodes {
            self.storage
                .retry_run_node(&node.id, node.attempt + 1)
                .await?;
            retried.push(node.id.to_string());
        }

        self.storage
            .transition_workflow_run_status(run_id, RunStatus::Failed, RunStatus::Pending)
            .await?;

        Ok(LifecycleOutcome {
            action: "retry",
            outcome: "applied",
            workflow_run_id: run_id.to_string(),
            previous_run_status: RunStatus::Failed.as_str().to_string(),
            run_status: RunStatus::Pending.as_str().to_string(),
            retried_run_node_ids: retried,
        })
    }

    async fn control(
        &self,
        run_id: &Id,
        action: &'static str,
        expected_from: RunStatus,
        to: RunStatus,
    ) -> Result<LifecycleOutcome, ExecutorError> {
        for _ in 0..MAX_ATTEMPT_PRECONDITION_RETRIES {
            let run = self.storage.get_run(run_id).await?;
            if run.status != expected_from {
                return Err(ExecutorError::InvalidControlTransition(format!(
                    "run {run_id} is {:?}, expected {:?}",
                    run.status, expected_from
                )));
            }
            match self
                .storage
                .transition_workflow_run_status(run_id, expected_from, to)
                .await
            {
                Ok(()) => {
                    return Ok(LifecycleOutcome {
                        action,
                        outcome: "applied",
                        workflow_run_id: run_id.to_string(),
                        previous_run_status: expected_from.as_str().to_string(),
                        run_status: to.as_str().to_string(),
                        retried_run_node_ids: vec![],
                    });
                }
                Err(StorageError::PreconditionFailed(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ExecutorError::InvalidControlTransition(format!(
            "{action} raced with concurrent transitions on run {run_id}"
        )))
    }
}

fn event_preview_text(event: &alphred_core::ProviderEvent) -> String {
    render_content(&event.content)
}

fn render_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_of(content: &str) -> Value {
    serde_json::from_str(content).unwrap_or(Value::Null)
}

fn is_failed_tool_result(event: &alphred_core::ProviderEvent) -> bool {
    event.event_type == alphred_core::ProviderEventType::ToolResult
        && event
            .content
            .get("exitCode")
            .and_then(Value::as_i64)
            .map(|code| code != 0)
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_content_returns_raw_string_for_string_values() {
        assert_eq!(render_content(&json!("hello")), "hello");
    }

    #[test]
    fn render_content_serializes_non_string_values() {
        assert_eq!(render_content(&json!({"a": 1})), "{\"a\":1}");
    }

    #[test]
    fn is_failed_tool_result_detects_nonzero_exit_code() {
        let event = alphred_core::ProviderEvent {
            event_type: alphred_core::ProviderEventType::ToolResult,
            content: json!({"exitCode": 1}),
            metadata: None,
            timestamp: None,
        };
        assert!(is_failed_tool_result(&event));
    }

    #[test]
    fn is_failed_tool_result_ignores_successful_results() {
        let event = alphred_core::ProviderEvent {
            event_type: alphred_core::ProviderEventType::ToolResult,
            content: json!({"exitCode": 0}),
            metadata: None,
            timestamp: None,
        };
        assert!(!is_failed_tool_result(&event));
    }
}
