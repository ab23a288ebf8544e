mod memory;
pub use memory::{MemoryLogSink, MemoryLogSinkConfig};

use async_trait::async_trait;
use xjob_model::{LogRange, TaskId};

use crate::error::CoreError;

/// Per-task log storage.
///
/// The executor opens a section before a task runs and closes it (in the background)
/// once the runner returns. `write` is synchronous and best effort.
#[async_trait]
pub trait LogSink: Send + Sync + 'static {
    async fn open(&self, task_id: TaskId) -> Result<(), CoreError>;

    async fn close(&self, task_id: TaskId) -> Result<(), CoreError>;

    fn write(&self, task_id: TaskId, level: &str, message: &str);

    /// Read the log of `task_id` starting at the 1-based `start_line`.
    ///
    /// `datetime` is the task start time as sent by the scheduler (UNIX milliseconds).
    /// Returns `None` when no log exists for the task.
    async fn get(
        &self,
        task_id: TaskId,
        start_line: u64,
        datetime: i64,
    ) -> Result<Option<LogRange>, CoreError>;
}
