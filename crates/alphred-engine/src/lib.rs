//! Workflow execution engine for Alphred.
//!
//! Owns the durable state machine that drives a materialized run: node
//! selection (C3), context assembly (C4), provider invocation (C5/C6),
//! persistence (C1), the fan-out/join coordinator (C9), and the executor
//! driving loop with its lifecycle controls (C7). The planner (C2) turns
//! a published tree into a fresh run; the diagnostics recorder (C8)
//! sanitizes and bounds everything the executor writes alongside it.

pub mod context;
pub mod diagnostics;
pub mod executor;
pub mod join;
pub mod materializer;
pub mod phase;
pub mod provider;
pub mod selector;
pub mod storage;

pub use context::{AssembledContext, ContextError};
pub use executor::{Executor, ExecutorError, LifecycleOutcome, StepOutcome};
pub use join::JoinError;
pub use materializer::{materialize_run, MaterializeError};
pub use provider::{ClaudeCliProvider, Provider, ProviderFactory, ProviderRegistry, ScriptedProvider};
pub use selector::{SelectError, Selection};
pub use storage::{Storage, StorageError};
