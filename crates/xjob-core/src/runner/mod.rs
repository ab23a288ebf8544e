use async_trait::async_trait;
use xjob_model::{JobType, Task};

use crate::{context::TaskContext, error::RunnerError};

/// Admission parameters a runner returns for a task it accepts.
///
/// Queue depth is a property of the handler, not of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareResult {
    /// How many tasks (pending + current) the job may hold.
    pub max_queue_depth: usize,
}

/// Executes tasks of one job type.
///
/// `prepare` is called while the job queue is locked: keep it cheap and non-blocking.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    fn job_type(&self) -> JobType;

    fn name(&self) -> &'static str {
        self.job_type().as_str()
    }

    /// Returns `None` when the runner cannot handle the task (unknown handler, bad script, ...).
    fn prepare(&self, task: &Task) -> Option<PrepareResult>;

    /// Run the task to completion.
    ///
    /// Cancellation is cooperative: long handlers should watch [`TaskContext::cancelled`]
    /// or poll [`TaskContext::is_active`].
    async fn run(&self, ctx: &TaskContext) -> Result<(), RunnerError>;
}
