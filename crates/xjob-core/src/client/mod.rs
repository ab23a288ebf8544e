use async_trait::async_trait;
use xjob_model::TaskResult;

use crate::error::CoreError;

/// Outbound side of the scheduler protocol, as far as the executor needs it.
///
/// Submission is at-most-once: the executor never retries a failed call, it only
/// surfaces the failure as an [`crate::EventKind::Error`] event.
#[async_trait]
pub trait SchedulerClient: Send + Sync + 'static {
    /// Deliver a batch of task results stamped with `at_ms` (UNIX milliseconds).
    async fn submit_results(&self, at_ms: i64, results: Vec<TaskResult>) -> Result<(), CoreError>;

    /// Compare a token presented by the scheduler with the configured one.
    fn validate_api_token(&self, token: &str) -> bool;
}
