//! Activity abstractions
//!
//! Activities are the leaf operations of a workflow. They:
//! - Are invoked by name with a single JSON input
//! - Fail with a transient or permanent [`ActivityError`]
//! - Are retried by the engine according to the step's retry policy

mod context;
mod definition;
mod registry;

pub use context::ActivityContext;
pub use definition::{Activity, ActivityError, ActivityErrorKind};
pub use registry::{ActivityInvoker, ActivityRegistry};
