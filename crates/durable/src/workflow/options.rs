//! Per-step execution options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Options attached to one activity step of a definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOptions {
    /// Retry policy; `None` means a single attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    /// Limit for a single attempt; falls back to the executor default
    #[serde(
        default,
        with = "crate::serde_millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_to_close_timeout: Option<Duration>,
}

impl ActivityOptions {
    /// Policy the step actually runs under
    pub fn effective_retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = Some(timeout);
        self
    }
}
