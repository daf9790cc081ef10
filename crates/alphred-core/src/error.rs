//! Stable error codes surfaced to the CLI and any future HTTP boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderError;

/// Application-level error, carrying a stable `SCREAMING_SNAKE_CASE` code
/// alongside the human message. Every variant maps to one of the codes
/// enumerated in the external-interfaces contract.
#[derive(Debug, Error)]
pub enum AlphredError {
    #[error("workflow tree not found: {0}")]
    WorkflowTreeNotFound(String),

    #[error("workflow run not found: {0}")]
    WorkflowRunNotFound(String),

    #[error("invalid control transition: {0}")]
    WorkflowRunControlInvalidTransition(String),

    #[error("concurrent conflict on run {0}")]
    WorkflowRunControlConcurrentConflict(String),

    #[error("no retry targets found for run {0}")]
    WorkflowRunControlRetryTargetsNotFound(String),

    #[error("single node selector not found: {0}")]
    WorkflowRunSingleNodeSelectorNotFound(String),

    #[error("single node selector not executable: {0}")]
    WorkflowRunSingleNodeSelectorNotExecutable(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("database error: {0}")]
    Database(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(String),
}

impl AlphredError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkflowTreeNotFound(_) => "WORKFLOW_TREE_NOT_FOUND",
            Self::WorkflowRunNotFound(_) => "WORKFLOW_RUN_NOT_FOUND",
            Self::WorkflowRunControlInvalidTransition(_) => {
                "WORKFLOW_RUN_CONTROL_INVALID_TRANSITION"
            }
            Self::WorkflowRunControlConcurrentConflict(_) => {
                "WORKFLOW_RUN_CONTROL_CONCURRENT_CONFLICT"
            }
            Self::WorkflowRunControlRetryTargetsNotFound(_) => {
                "WORKFLOW_RUN_CONTROL_RETRY_TARGETS_NOT_FOUND"
            }
            Self::WorkflowRunSingleNodeSelectorNotFound(_) => {
                "WORKFLOW_RUN_SINGLE_NODE_SELECTOR_NOT_FOUND"
            }
            Self::WorkflowRunSingleNodeSelectorNotExecutable(_) => {
                "WORKFLOW_RUN_SINGLE_NODE_SELECTOR_NOT_EXECUTABLE"
            }
            Self::InvalidSelector(_) => "INVALID_SELECTOR",
            Self::Provider(e) => e.code(),
            Self::Database(_) => "INTERNAL_ERROR",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::Serialization(_) => "INTERNAL_ERROR",
            Self::Io(_) => "INTERNAL_ERROR",
        }
    }
}

/// Exit codes the CLI maps `AlphredError`s onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCode {
    Success = 0,
    Usage = 2,
    NotFound = 3,
    RuntimeFailure = 4,
}

impl AlphredError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::WorkflowTreeNotFound(_)
            | Self::WorkflowRunNotFound(_)
            | Self::WorkflowRunSingleNodeSelectorNotFound(_)
            | Self::WorkflowRunControlRetryTargetsNotFound(_) => ExitCode::NotFound,
            Self::InvalidSelector(_) | Self::WorkflowRunSingleNodeSelectorNotExecutable(_) => {
                ExitCode::Usage
            }
            _ => ExitCode::RuntimeFailure,
        }
    }
}

pub type AlphredResult<T> = std::result::Result<T, AlphredError>;
