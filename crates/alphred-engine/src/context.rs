//! Context assembler (component C4).
//!
//! Builds the bounded prompt handoff for a target run node: failure-route
//! envelope, join summary, upstream reports, retry summary, each
//! truncated head+tail to its reserve and recorded in an included/dropped
//! manifest.

use std::sync::Arc;

use alphred_core::{ArtifactType, Config, ContentType, Id, NodeRole, RouteOn, RunNode, RunNodeEdge};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ContextError>;

/// Truncation record attached to every envelope in a manifest.
#[derive(Debug, Clone, Serialize)]
pub struct TruncationRecord {
    pub applied: bool,
    pub method: &'static str,
    pub original_chars: usize,
    pub included_chars: usize,
    pub dropped_chars: usize,
}

impl TruncationRecord {
    fn none(len: usize) -> Self {
        Self {
            applied: false,
            method: "none",
            original_chars: len,
            included_chars: len,
            dropped_chars: 0,
        }
    }
}

/// One artifact's worth of content, head+tail truncated to `budget`
/// chars, with its truncation record and sha256 content hash.
#[derive(Debug, Clone, Serialize)]
pub struct ContextEnvelope {
    pub label: &'static str,
    pub source_node_key: Option<String>,
    pub artifact_id: Option<Id>,
    pub content: String,
    pub content_sha256: String,
    pub truncation: TruncationRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub artifact_id: Option<Id>,
    pub source_node_key: Option<String>,
    pub chars: usize,
    pub overflow: bool,
}

/// The assembled handoff for one target node, plus the manifest the
/// testable-properties suite asserts bounds against.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AssembledContext {
    pub envelopes: Vec<ContextEnvelope>,
    pub included: Vec<ManifestEntry>,
    pub dropped: Vec<ManifestEntry>,
    pub included_chars_total: usize,
    pub failure_route_context_included: bool,
    pub failure_route_source_node_key: Option<String>,
}

impl AssembledContext {
    /// Concatenates every included envelope's content in inclusion
    /// order, the literal text handed to the provider adapter.
    pub fn render(&self) -> String {
        self.envelopes
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncates `content` to at most `budget` chars by keeping a head and
/// tail slice and dropping the middle, respecting char boundaries.
fn truncate_head_tail(content: &str, budget: usize) -> (String, TruncationRecord) {
    let original_len = content.chars().count();
    if original_len <= budget || budget == 0 {
        return (content.to_string(), TruncationRecord::none(original_len));
    }

    let half = budget / 2;
    let chars: Vec<char> = content.chars().collect();
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - (budget - half)..].iter().collect();
    let truncated = format!("{head}\n...[truncated]...\n{tail}");

    (
        truncated,
        TruncationRecord {
            applied: true,
            method: "head_tail",
            original_chars: original_len,
            included_chars: budget,
            dropped_chars: original_len - budget,
        },
    )
}

/// Assembles the context handoff for `target`, given the edge selected
/// to reach it (`None` for a root node with no incoming edge).
pub async fn assemble_context(
    storage: &Arc<Storage>,
    config: &Config,
    target: &RunNode,
    selected_edge: Option<&RunNodeEdge>,
    predecessors: &[RunNode],
) -> Result<AssembledContext> {
    let mut ctx = AssembledContext::default();
    let mut remaining = config.max_context_chars;

    // 1. Failure-route envelope.
    if let Some(edge) = selected_edge {
        if edge.route_on == RouteOn::Failure {
            let source = storage.get_run_node(&edge.source_run_node_id).await?;
            if let Some(artifact) = storage
                .latest_phase_artifact(&source.id, ArtifactType::Log)
                .await?
            {
                let budget = config.failure_route_reserved_chars.min(remaining);
                let (content, truncation) = truncate_head_tail(&artifact.content, budget);
                let chars = content.chars().count();
                remaining = remaining.saturating_sub(chars);
                ctx.included_chars_total += chars;
                ctx.failure_route_context_included = true;
                ctx.failure_route_source_node_key = Some(source.node_key.clone());
                ctx.included.push(ManifestEntry {
                    artifact_id: Some(artifact.id.clone()),
                    source_node_key: Some(source.node_key.clone()),
                    chars,
                    overflow: truncation.applied,
                });
                ctx.envelopes.push(ContextEnvelope {
                    label: "failure_route",
                    source_node_key: Some(source.node_key.clone()),
                    artifact_id: Some(artifact.id.clone()),
                    content,
                    content_sha256: sha256_hex(&artifact.content),
                    truncation,
                });

                if source.attempt > 1 {
                    if let Some(retry_summary) = storage
                        .latest_phase_artifact(&source.id, ArtifactType::Note)
                        .await?
                    {
                        let budget = config
                            .failure_route_reserved_chars
                            .saturating_sub(chars)
                            .min(remaining);
                        if budget >= config.min_remaining_chars {
                            let (content, truncation) =
                                truncate_head_tail(&retry_summary.content, budget);
                            let chars = content.chars().count();
                            remaining = remaining.saturating_sub(chars);
                            ctx.included_chars_total += chars;
                            ctx.included.push(ManifestEntry {
                                artifact_id: Some(retry_summary.id.clone()),
                                source_node_key: Some(source.node_key.clone()),
                                chars,
                                overflow: truncation.applied,
                            });
                            ctx.envelopes.push(ContextEnvelope {
                                label: "failure_route_retry_summary",
                                source_node_key: Some(source.node_key.clone()),
                                artifact_id: Some(retry_summary.id.clone()),
                                content,
                                content_sha256: sha256_hex(&retry_summary.content),
                                truncation,
                            });
                        }
                    }
                }
            }
        }
    }

    // 2. Join summary.
    if target.node_role == NodeRole::Join {
        if let Some(barrier) = storage.latest_join_barrier_for_join(&target.id).await? {
            let mut lines = Vec::new();
            let siblings = storage.list_run_nodes(&target.run_id).await?;
            let children = siblings
                .iter()
                .filter(|n| n.spawner_node_id.as_ref() == Some(&barrier.spawner_run_node_id));
            for child in children {
                let preview = storage
                    .latest_phase_artifact(&child.id, ArtifactType::Report)
                    .await?
                    .map(|a| head_preview(&a.content, 160))
                    .unwrap_or_default();
                lines.push(format!(
                    "- {} [{}]: {}",
                    child.id, child.status.as_str(), preview
                ));
            }
            let content = format!("Join summary for {}:\n{}", target.node_key, lines.join("\n"));
            let budget = config.join_summary_reserved_chars.min(remaining);
            let (content, truncation) = truncate_head_tail(&content, budget);
            let chars = content.chars().count();
            remaining = remaining.saturating_sub(chars);
            ctx.included_chars_total += chars;
            ctx.included.push(ManifestEntry {
                artifact_id: None,
                source_node_key: Some(target.node_key.clone()),
                chars,
                overflow: truncation.applied,
            });
            ctx.envelopes.push(ContextEnvelope {
                label: "join_summary",
                source_node_key: Some(target.node_key.clone()),
                artifact_id: None,
                content,
                content_sha256: String::new(),
                truncation,
            });
        }
    }

    // 3. Upstream reports, topological predecessor order, capped at
    // MAX_UPSTREAM_ARTIFACTS.
    for predecessor in predecessors.iter().take(config.max_upstream_artifacts) {
        let Some(artifact) = storage
            .latest_phase_artifact(&predecessor.id, ArtifactType::Report)
            .await?
        else {
            continue;
        };
        if !matches!(
            artifact.content_type,
            ContentType::Text | ContentType::Markdown | ContentType::Json | ContentType::Diff
        ) {
            continue;
        }
        if remaining < config.min_remaining_chars {
            ctx.dropped.push(ManifestEntry {
                artifact_id: Some(artifact.id.clone()),
                source_node_key: Some(predecessor.node_key.clone()),
                chars: artifact.content.chars().count(),
                overflow: true,
            });
            continue;
        }
        let budget = config.max_chars_per_artifact.min(remaining);
        let (content, truncation) = truncate_head_tail(&artifact.content, budget);
        let chars = content.chars().count();
        remaining = remaining.saturating_sub(chars);
        ctx.included_chars_total += chars;
        ctx.included.push(ManifestEntry {
            artifact_id: Some(artifact.id.clone()),
            source_node_key: Some(predecessor.node_key.clone()),
            chars,
            overflow: truncation.applied,
        });
        ctx.envelopes.push(ContextEnvelope {
            label: "upstream_report",
            source_node_key: Some(predecessor.node_key.clone()),
            artifact_id: Some(artifact.id.clone()),
            content,
            content_sha256: sha256_hex(&artifact.content),
            truncation,
        });
    }

    // 4. Retry summary for the target's own prior attempt.
    if target.attempt > 1 {
        if let Some(prior_summary) = storage
            .latest_phase_artifact(&target.id, ArtifactType::Note)
            .await?
        {
            let budget = config.retry_summary_reserved_chars.min(remaining);
            let (content, truncation) = truncate_head_tail(&prior_summary.content, budget);
            let chars = content.chars().count();
            ctx.included_chars_total += chars;
            ctx.included.push(ManifestEntry {
                artifact_id: Some(prior_summary.id.clone()),
                source_node_key: Some(target.node_key.clone()),
                chars,
                overflow: truncation.applied,
            });
            ctx.envelopes.push(ContextEnvelope {
                label: "retry_summary",
                source_node_key: Some(target.node_key.clone()),
                artifact_id: Some(prior_summary.id.clone()),
                content,
                content_sha256: sha256_hex(&prior_summary.content),
                truncation,
            });
        }
    }

    Ok(ctx)
}

fn head_preview(content: &str, max_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= max_chars {
        content.to_string()
    } else {
        let head: String = chars[..max_chars].iter().collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_head_tail_leaves_content_unchanged_under_budget() {
        let (content, record) = truncate_head_tail("short", 100);
        assert_eq!(content, "short");
        assert!(!record.applied);
    }

    #[test]
    fn truncate_head_tail_respects_budget() {
        let long = "a".repeat(1000);
        let (content, record) = truncate_head_tail(&long, 100);
        assert!(record.applied);
        assert!(content.chars().count() <= 100 + "\n...[truncated]...\n".len());
        assert_eq!(record.original_chars, 1000);
    }

    #[test]
    fn sha256_hex_is_stable() {
        let a = sha256_hex("hello");
        let b = sha256_hex("hello");
        assert_eq!(a, b);
        assert_ne!(a, sha256_hex("world"));
    }

    #[test]
    fn head_preview_truncates_long_content() {
        let long = "x".repeat(500);
        let preview = head_preview(&long, 160);
        assert_eq!(preview.len(), 163);
    }
}
