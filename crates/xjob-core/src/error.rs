use thiserror::Error;
use xjob_model::{JobId, JobType, TaskId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("a runner is already registered for job type {0}")]
    DuplicateRunner(JobType),
    #[error("the task has been aborted")]
    TaskAborted,
    #[error("task {0} timed out before it could start")]
    JobTimeout(TaskId),
    #[error("task {0} exceeded its timeout while running")]
    ExecutionTimeout(TaskId),
    #[error("block strategy {strategy:?} is not supported (job {job_id}, task {task_id})")]
    BlockStrategyUnsupported {
        job_id: JobId,
        task_id: TaskId,
        strategy: String,
    },
    #[error("log sink: {0}")]
    LogSink(String),
    #[error("scheduler client: {0}")]
    Client(String),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("no such handler is registered: {0}")]
    HandlerNotFound(String),
    #[error("{0}")]
    Failed(String),
    #[error("cancelled")]
    Cancelled,
    #[error("handler panicked")]
    Panicked,
}

impl RunnerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        RunnerError::Failed(reason.into())
    }
}
