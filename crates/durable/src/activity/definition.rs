//! Activity trait definition

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ActivityContext;

/// Classification of an activity failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityErrorKind {
    /// Worth retrying (network blips, timeouts, busy downstreams)
    Transient,

    /// Retrying cannot help (bad input, declined card, unknown activity)
    Permanent,
}

impl std::fmt::Display for ActivityErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Whether the failure is worth retrying
    pub kind: ActivityErrorKind,

    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    /// Create a transient (retryable) error
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityErrorKind::Transient,
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// Create a permanent (non-retryable) error
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ActivityErrorKind::Permanent,
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// A single attempt ran longer than its allowed duration
    pub fn timeout(limit: Duration) -> Self {
        Self::transient(format!("activity attempt timed out after {limit:?}")).with_type("timeout")
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ActivityErrorKind::Transient
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err.to_string())
    }
}

/// An activity is a single side-effecting operation invoked by name
///
/// Activities know nothing about the workflow that calls them. They receive
/// one input and produce one output or an [`ActivityError`]. Anything
/// non-deterministic (clocks, randomness, remote state) belongs here: the
/// engine records the output in history and never recomputes it.
///
/// # Example
///
/// ```ignore
/// use orchestra_durable::prelude::*;
///
/// struct SendEmailActivity;
///
/// #[async_trait]
/// impl Activity for SendEmailActivity {
///     const TYPE: &'static str = "send_email";
///     type Input = SendEmailInput;
///     type Output = SendEmailOutput;
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: Self::Input,
///     ) -> Result<Self::Output, ActivityError> {
///         // Send email...
///         Ok(SendEmailOutput { message_id: "..." })
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Name under which workflow definitions refer to this activity
    const TYPE: &'static str;

    /// Input type for the activity
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type for the activity
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute one attempt of the activity
    ///
    /// # Errors
    ///
    /// Return `ActivityError::transient()` for failures that should be retried.
    /// Return `ActivityError::permanent()` for failures that should fail the step.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}
