use serde::{Deserialize, Serialize};

use crate::{BlockStrategy, JobId, JobType, TaskId, TimeoutSec};

/// Source bundle shipped with script jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSource {
    /// Script content.
    pub code: String,
    /// When the script was last updated, UNIX milliseconds.
    pub updated_at: i64,
}

/// One admitted invocation of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub job_id: JobId,
    pub task_id: TaskId,
    /// Runner the task is routed to.
    pub job_type: JobType,
    /// Handler name inside the runner (only meaningful for bean jobs).
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    pub block_strategy: BlockStrategy,
    /// `0` means unbounded.
    #[serde(default)]
    pub timeout_sec: TimeoutSec,
    /// When the scheduler requested the run, UNIX milliseconds.
    pub requested_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<TaskSource>,
}

impl Task {
    /// Minimal bean task, requested now, serial and unbounded.
    pub fn new(job_id: impl Into<JobId>, task_id: impl Into<TaskId>, handler: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: task_id.into(),
            job_type: JobType::Bean,
            handler: handler.into(),
            args: None,
            block_strategy: BlockStrategy::SerialExecution,
            timeout_sec: 0,
            requested_at: crate::now_ms(),
            source: None,
        }
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    pub fn with_block_strategy(mut self, strategy: BlockStrategy) -> Self {
        self.block_strategy = strategy;
        self
    }

    pub fn with_timeout_sec(mut self, timeout_sec: TimeoutSec) -> Self {
        self.timeout_sec = timeout_sec;
        self
    }

    pub fn with_requested_at(mut self, requested_at: i64) -> Self {
        self.requested_at = requested_at;
        self
    }

    pub fn with_source(mut self, source: TaskSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Absolute deadline in UNIX milliseconds, `None` when unbounded.
    pub fn deadline_ms(&self) -> Option<i64> {
        (self.timeout_sec > 0)
            .then(|| {
                let timeout_sec = i64::try_from(self.timeout_sec).unwrap_or(i64::MAX);
                self.requested_at.saturating_add(timeout_sec.saturating_mul(1000))
            })
    }

    /// Returns `true` if the task carries a timeout and `now_ms` is past it.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.deadline_ms().is_some_and(|d| now_ms > d)
    }

    /// Milliseconds left before the deadline, `None` when unbounded.
    pub fn remaining_ms_at(&self, now_ms: i64) -> Option<u64> {
        self.deadline_ms().map(|d| d.saturating_sub(now_ms).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_derived_from_request_time() {
        let t = Task::new(1, 100, "demo").with_requested_at(1_000).with_timeout_sec(2);
        assert_eq!(t.deadline_ms(), Some(3_000));
        assert!(!t.is_expired_at(3_000));
        assert!(t.is_expired_at(3_001));
        assert_eq!(t.remaining_ms_at(2_500), Some(500));
        assert_eq!(t.remaining_ms_at(9_000), Some(0));
    }

    #[test]
    fn huge_timeout_saturates_instead_of_wrapping() {
        let t = Task::new(1, 1, "x").with_requested_at(1_000).with_timeout_sec(u64::MAX);
        assert_eq!(t.deadline_ms(), Some(i64::MAX));
        assert!(!t.is_expired_at(crate::now_ms()));
        assert!(t.remaining_ms_at(1_000).is_some_and(|ms| ms > 0));
    }

    #[test]
    fn zero_timeout_is_unbounded() {
        let t = Task::new(1, 100, "demo").with_requested_at(0);
        assert_eq!(t.deadline_ms(), None);
        assert!(!t.is_expired_at(i64::MAX));
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let t = Task::new(3, 42, "hello")
            .with_requested_at(5)
            .with_block_strategy(BlockStrategy::DiscardLater);
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["jobId"], 3);
        assert_eq!(v["taskId"], 42);
        assert_eq!(v["jobType"], "BEAN");
        assert_eq!(v["blockStrategy"], "DISCARD_LATER");
        assert!(v.get("args").is_none());
    }
}
