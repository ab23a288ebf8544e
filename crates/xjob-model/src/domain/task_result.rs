use serde::{Deserialize, Serialize};

use crate::{ResultCode, TaskId};

/// Outcome of one task, as submitted back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub code: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl TaskResult {
    pub fn ok(task_id: TaskId) -> Self {
        Self {
            task_id,
            code: ResultCode::Ok,
            msg: None,
        }
    }

    pub fn new(task_id: TaskId, code: ResultCode, msg: impl Into<String>) -> Self {
        Self {
            task_id,
            code,
            msg: Some(msg.into()),
        }
    }
}
