//! Activity registry and invoker
//!
//! The engine calls activities through the [`ActivityInvoker`] trait. The
//! [`ActivityRegistry`] is the default implementation: a name → handler map
//! that erases each activity's typed input/output to JSON.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{Activity, ActivityContext, ActivityError};
use crate::engine::RegistryError;

/// Uniform entry point for calling a named activity
///
/// Implementations are stateless adapters; they never see workflow
/// structure, only one attempt at a time.
#[async_trait]
pub trait ActivityInvoker: Send + Sync + 'static {
    /// Invoke one attempt of the activity registered under `name`
    async fn invoke(
        &self,
        ctx: &ActivityContext,
        name: &str,
        input: Value,
    ) -> Result<Value, ActivityError>;
}

/// Type-erased activity handler
type ActivityHandler =
    Arc<dyn Fn(ActivityContext, Value) -> BoxFuture<'static, Result<Value, ActivityError>> + Send + Sync>;

/// Registry of activity handlers keyed by name
#[derive(Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, ActivityHandler>,
}

impl ActivityRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed activity under its `TYPE` name
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = ActivityRegistry::new();
    /// registry.register(SendEmailActivity)?;
    /// ```
    pub fn register<A: Activity>(&mut self, activity: A) -> Result<(), RegistryError> {
        let activity = Arc::new(activity);
        let handler: ActivityHandler = Arc::new(move |ctx, input| {
            let activity = activity.clone();
            Box::pin(async move {
                let typed: A::Input = serde_json::from_value(input).map_err(|e| {
                    ActivityError::permanent(format!("invalid input for activity '{}': {e}", A::TYPE))
                        .with_type("invalid_input")
                })?;
                let output = activity.execute(&ctx, typed).await?;
                serde_json::to_value(output).map_err(|e| {
                    ActivityError::permanent(format!("invalid output from activity '{}': {e}", A::TYPE))
                        .with_type("invalid_output")
                })
            })
        });

        self.insert(A::TYPE, handler)
    }

    /// Register an untyped activity from a closure
    pub fn register_fn<F, Fut>(&mut self, name: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        let handler: ActivityHandler = Arc::new(move |ctx, input| Box::pin(handler(ctx, input)));
        self.insert(name, handler)
    }

    fn insert(&mut self, name: &str, handler: ActivityHandler) -> Result<(), RegistryError> {
        if self.handlers.contains_key(name) {
            return Err(RegistryError::DuplicateActivity(name.to_string()));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    /// Check if an activity is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get the number of registered activities
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Get all registered activity names
    pub fn activity_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}

#[async_trait]
impl ActivityInvoker for ActivityRegistry {
    async fn invoke(
        &self,
        ctx: &ActivityContext,
        name: &str,
        input: Value,
    ) -> Result<Value, ActivityError> {
        let handler = self.handlers.get(name).cloned().ok_or_else(|| {
            ActivityError::permanent(format!("no activity registered under '{name}'"))
                .with_type("unknown_activity")
        })?;

        handler(ctx.clone(), input).await
    }
}

impl fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
