//! Per-attempt timeout enforcement
//!
//! A timed-out attempt is indistinguishable from any other transient failure:
//! it is recorded as `ActivityFailed` and retried under the step's policy.

use std::future::Future;
use std::time::Duration;

use crate::activity::ActivityError;

/// Run one activity attempt, failing it transiently if `limit` elapses first
///
/// `None` means the attempt may run indefinitely.
pub async fn with_attempt_timeout<F, T>(limit: Option<Duration>, attempt: F) -> Result<T, ActivityError>
where
    F: Future<Output = Result<T, ActivityError>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::timeout(limit)),
        },
        None => attempt.await,
    }
}
