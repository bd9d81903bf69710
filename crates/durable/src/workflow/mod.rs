//! Workflow abstractions and types
//!
//! This module contains the core workflow primitives:
//! - [`WorkflowDefinition`] ordered activity and parallel steps
//! - [`HistoryEvent`] enum for persisted events
//! - [`WorkflowError`] terminal failure recorded in history

mod definition;
mod error;
mod event;
mod options;

pub use definition::{
    ActivityStep, DefinitionError, InputMapper, InputValidator, ResultMapper, StepContext, StepSpec,
    ValidationError, WorkflowDefinition, WorkflowDefinitionBuilder,
};
pub use error::{WorkflowError, WorkflowErrorKind};
pub use event::HistoryEvent;
pub use options::ActivityOptions;
