pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod types;

pub use config::{Config, ConfigError};
pub use error::{AlphredError, AlphredResult, ExitCode};
pub use model::{
    PhaseArtifact, RoutingDecision, RunJoinBarrier, RunNode, RunNodeDiagnostics, RunNodeEdge,
    RunNodeStreamEvent, TreeEdge, TreeNode, WorkflowRun, WorkflowTree,
};
pub use provider::{
    ApprovalPolicy, ErrorClassification, ExecutionPermissions, ProviderError, ProviderEvent,
    ProviderOptions, SandboxMode, WebSearchMode,
};
pub use types::{
    ArtifactType, BarrierStatus, ContentType, DecisionType, EdgeKind, Id, NodeRole, NodeType,
    ProviderEventType, RouteOn, RoutingDecisionSource, RunNodeStatus, RunStatus, TreeStatus,
};
