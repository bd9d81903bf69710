//! Activity execution context

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context provided to an activity for one attempt
///
/// Carries the identity of the attempt (instance, step, attempt number) so
/// activities can log with it or build idempotency keys from it, plus a
/// cancellation token that fires when the owning instance is cancelled.
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &ActivityContext, input: Input) -> Result<Output, ActivityError> {
///     tokio::select! {
///         result = charge(ctx.idempotency_key(), input) => result,
///         _ = ctx.cancelled() => Err(ActivityError::permanent("cancelled")),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Workflow instance that owns this activity
    pub instance_id: Uuid,

    /// Step identity within the workflow definition
    pub step_id: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed by the step's retry policy
    pub max_attempts: u32,

    cancellation: CancellationToken,
}

impl ActivityContext {
    /// Create a new activity context
    pub fn new(instance_id: Uuid, step_id: impl Into<String>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            instance_id,
            step_id: step_id.into(),
            attempt,
            max_attempts,
            cancellation: CancellationToken::new(),
        }
    }

    /// Tie the context to an instance-level cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Stable key for deduplicating side effects across retries and replays
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.instance_id, self.step_id)
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when the owning instance is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Check if this is the last attempt the retry policy allows
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_context_creation() {
        let instance_id = Uuid::now_v7();
        let ctx = ActivityContext::new(instance_id, "check_inventory", 1, 3);

        assert_eq!(ctx.instance_id, instance_id);
        assert_eq!(ctx.step_id, "check_inventory");
        assert_eq!(ctx.attempt, 1);
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_last_attempt());
    }

    #[test]
    fn test_is_last_attempt() {
        let ctx = ActivityContext::new(Uuid::now_v7(), "step", 3, 3);
        assert!(ctx.is_last_attempt());

        let ctx = ActivityContext::new(Uuid::now_v7(), "step", 1, 1);
        assert!(ctx.is_last_attempt());
    }

    #[test]
    fn test_idempotency_key_ignores_attempt() {
        let instance_id = Uuid::now_v7();
        let first = ActivityContext::new(instance_id, "process_payment", 1, 3);
        let second = ActivityContext::new(instance_id, "process_payment", 2, 3);

        assert_eq!(first.idempotency_key(), second.idempotency_key());
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let token = CancellationToken::new();
        let ctx = ActivityContext::new(Uuid::now_v7(), "step", 1, 1).with_cancellation(token.clone());

        token.cancel();

        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}
