//! Workflow execution engine
//!
//! The engine module provides the `WorkflowEngine` which drives workflow
//! definitions through history replay, plus the pieces it is built from:
//! the replay fold, the per-instance writer, the parallel join and the
//! status projection.

mod executor;
mod join;
mod registry;
mod replay;
mod run;
mod status;
mod writer;

pub use executor::{EngineError, ExecutorConfig, WorkflowEngine};
pub use join::{join_all, JoinFailure, Stragglers};
pub use registry::{DefinitionRegistry, RegistryError};
pub use replay::{FailedAttempt, Outcome, ReplayState, ScheduledCall, StepHistory};
pub use status::{InstanceStatus, StatusTracker};
pub use writer::HistoryWriter;
