//! # Durable Orchestration Engine
//!
//! An event-sourced engine that runs multi-step workflows exactly once per
//! step (modulo retries) and survives process restarts without losing
//! progress.
//!
//! ## Features
//!
//! - **Event-sourced instances**: every decision and completion is appended to a per-instance history; all state is derived by replaying it
//! - **Deterministic replay**: recorded steps are never re-executed, and replay verifies that the definition still computes what history recorded
//! - **Per-step retries**: pure exponential backoff, so replay reproduces the same waits
//! - **Parallel join**: concurrent branches, results in specification order, failures propagated by specification order
//! - **Status projection**: a read-only view for pollers that never blocks running steps
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine                          │
//! │  (replays history, walks the definition, joins branches)    │
//! └─────────────────────────────────────────────────────────────┘
//!          │ one HistoryWriter per running instance   │
//!          ▼                                           ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │        HistoryStore          │   │     ActivityInvoker      │
//! │ (Postgres or in-memory,      │   │ (named activities, retry │
//! │  append-only, optimistic)    │   │  policy, attempt timeout)│
//! └──────────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use orchestra_durable::prelude::*;
//!
//! let definition = WorkflowDefinition::builder("greet")
//!     .require_fields(["name"])
//!     .step(ActivityStep::new("lookup", "lookup_user").with_retry(RetryPolicy::fixed(Duration::from_secs(1), 3)))
//!     .parallel([
//!         ActivityStep::new("email", "send_email"),
//!         ActivityStep::new("sms", "send_sms"),
//!     ])
//!     .build()?;
//!
//! let mut definitions = DefinitionRegistry::new();
//! definitions.register(definition)?;
//!
//! let engine = WorkflowEngine::new(Arc::new(InMemoryHistoryStore::new()), definitions, Arc::new(activities));
//! let instance_id = engine.start("greet", json!({"name": "Ada"})).await?;
//! ```

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod workflow;

mod serde_millis;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        Activity, ActivityContext, ActivityError, ActivityErrorKind, ActivityInvoker,
        ActivityRegistry,
    };
    pub use crate::engine::{
        DefinitionRegistry, EngineError, ExecutorConfig, InstanceStatus, RegistryError,
        StatusTracker, WorkflowEngine,
    };
    pub use crate::persistence::{
        HistoryRecord, HistoryStore, InMemoryHistoryStore, PostgresHistoryStore, StoreError,
        WorkflowStatus,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::workflow::{
        ActivityOptions, ActivityStep, HistoryEvent, StepContext, ValidationError,
        WorkflowDefinition, WorkflowError, WorkflowErrorKind,
    };
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError, ActivityErrorKind, ActivityInvoker, ActivityRegistry};
pub use engine::{
    DefinitionRegistry, EngineError, ExecutorConfig, InstanceStatus, RegistryError, StatusTracker,
    WorkflowEngine,
};
pub use persistence::{
    HistoryRecord, HistoryStore, InMemoryHistoryStore, InstanceInfo, PostgresHistoryStore,
    StoreError, WorkflowStatus,
};
pub use reliability::{RetryDecision, RetryPolicy};
pub use workflow::{
    ActivityOptions, ActivityStep, HistoryEvent, ValidationError, WorkflowDefinition,
    WorkflowError, WorkflowErrorKind,
};
