//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Pure exponential backoff deciding retry vs. give-up
//! - [`with_attempt_timeout`] - Per-attempt deadline mapped to a transient failure

mod retry;
mod timeout;

pub use retry::{GiveUpReason, RetryDecision, RetryPolicy};
pub use timeout::with_attempt_timeout;
