//! Core types for the workflow execution engine.
//!
//! These types mirror the data model in the system's entity catalogue:
//! trees, run nodes, edges, artifacts, routing decisions, join barriers,
//! and the stream/diagnostics rows attached to each node attempt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for trees, runs, nodes, edges, artifacts, and events.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Tree definition enumerations ---

/// Lifecycle status of a `WorkflowTree` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeStatus {
    Draft,
    Published,
}

impl TreeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Agent,
    Human,
    Tool,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Human => "human",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "human" => Some(Self::Human),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// Role a node plays in the fan-out/join subgraph. Only `agent` nodes may
/// be `spawner` or `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Standard,
    Spawner,
    Join,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Spawner => "spawner",
            Self::Join => "join",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "spawner" => Some(Self::Spawner),
            "join" => Some(Self::Join),
            _ => None,
        }
    }
}

/// The route an edge is taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOn {
    Success,
    Failure,
}

impl RouteOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Origin of a run-scoped edge: copied from the tree definition, or
/// materialized dynamically by the fan-out/join coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Static,
    DynamicSpawnerToChild,
    DynamicChildToJoin,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::DynamicSpawnerToChild => "dynamic_spawner_to_child",
            Self::DynamicChildToJoin => "dynamic_child_to_join",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(Self::Static),
            "dynamic_spawner_to_child" => Some(Self::DynamicSpawnerToChild),
            "dynamic_child_to_join" => Some(Self::DynamicChildToJoin),
            _ => None,
        }
    }
}

/// Lifecycle status of a `WorkflowRun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle status of a `RunNode` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunNodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl RunNodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Allowed transitions per the run-node state machine. Enforced again
    /// at the database layer via triggers; checked here so callers fail
    /// fast with a typed error instead of a generic SQL error.
    pub fn can_transition_to(&self, to: Self) -> bool {
        use RunNodeStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Completed, Pending)
                | (Failed, Running)
                | (Failed, Pending)
                | (Skipped, Pending)
        )
    }
}

/// Output kind of a `PhaseArtifact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Report,
    Note,
    Log,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Note => "note",
            Self::Log => "log",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "report" => Some(Self::Report),
            "note" => Some(Self::Note),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

/// Content encoding of a `PhaseArtifact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Markdown,
    Json,
    Diff,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Diff => "diff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "markdown" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            "diff" => Some(Self::Diff),
            _ => None,
        }
    }
}

/// Outcome recorded by a `RoutingDecision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Approved,
    ChangesRequested,
    Blocked,
    Retry,
    NoRoute,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Blocked => "blocked",
            Self::Retry => "retry",
            Self::NoRoute => "no_route",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "changes_requested" => Some(Self::ChangesRequested),
            "blocked" => Some(Self::Blocked),
            "retry" => Some(Self::Retry),
            "no_route" => Some(Self::NoRoute),
            _ => None,
        }
    }
}

/// Where a routing decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecisionSource {
    ProviderResultMetadata,
    ResultContentContractFallback,
}

impl RoutingDecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderResultMetadata => "provider_result_metadata",
            Self::ResultContentContractFallback => "result_content_contract_fallback",
        }
    }
}

/// Lifecycle status of a `RunJoinBarrier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierStatus {
    Pending,
    Ready,
    Released,
    Cancelled,
}

impl BarrierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "released" => Some(Self::Released),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Canonical provider event type (see `provider::ProviderEvent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEventType {
    System,
    Assistant,
    ToolUse,
    ToolResult,
    Usage,
    Result,
}

impl ProviderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Assistant => "assistant",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Usage => "usage",
            Self::Result => "result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "assistant" => Some(Self::Assistant),
            "tool_use" => Some(Self::ToolUse),
            "tool_result" => Some(Self::ToolResult),
            "usage" => Some(Self::Usage),
            "result" => Some(Self::Result),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generates_unique_values() {
        let id1 = Id::new();
        let id2 = Id::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn run_status_serializes_correctly() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn run_node_status_default_transitions() {
        assert!(RunNodeStatus::Pending.can_transition_to(RunNodeStatus::Running));
        assert!(RunNodeStatus::Completed.can_transition_to(RunNodeStatus::Pending));
        assert!(RunNodeStatus::Failed.can_transition_to(RunNodeStatus::Running));
        assert!(RunNodeStatus::Failed.can_transition_to(RunNodeStatus::Pending));
        assert!(RunNodeStatus::Skipped.can_transition_to(RunNodeStatus::Pending));
        assert!(!RunNodeStatus::Pending.can_transition_to(RunNodeStatus::Completed));
        assert!(!RunNodeStatus::Completed.can_transition_to(RunNodeStatus::Running));
    }

    #[test]
    fn node_role_default_is_standard() {
        assert_eq!(NodeRole::default(), NodeRole::Standard);
    }

    #[test]
    fn enums_round_trip_through_as_str_and_parse() {
        assert_eq!(NodeType::parse(NodeType::Agent.as_str()), Some(NodeType::Agent));
        assert_eq!(RouteOn::parse(RouteOn::Failure.as_str()), Some(RouteOn::Failure));
        assert_eq!(
            DecisionType::parse(DecisionType::ChangesRequested.as_str()),
            Some(DecisionType::ChangesRequested)
        );
        assert_eq!(
            BarrierStatus::parse(BarrierStatus::Released.as_str()),
            Some(BarrierStatus::Released)
        );
    }
}
