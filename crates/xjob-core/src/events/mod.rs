//! Executor events and their subscribers.
//!
//! Every executor owns its own subscriber list; there is no process-wide bus.
//! `EventKind::Error` is the single generic error channel: failed result submissions,
//! failed log closes and handler failures all land there.
use std::{
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use tracing::{error, warn};
use xjob_model::{JobId, ResultCode, TaskId, now_ms};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Task appended to its job queue.
    TaskAdmitted,
    /// Task refused at admission (unknown type/handler, strategy, depth, stale).
    TaskRejected,
    /// Task handed to its runner.
    TaskStarting,
    /// Task completed successfully.
    TaskFinished,
    /// Task failed while running.
    TaskFailed,
    /// Pending or running task removed by COVER_EARLY or kill.
    TaskEvicted,
    /// Job queue drained and dropped.
    QueueEmpty,
    /// Background failure.
    Error,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub job_id: Option<JobId>,
    pub task_id: Option<TaskId>,
    pub code: Option<ResultCode>,
    pub reason: Option<String>,
    /// UNIX milliseconds.
    pub at: i64,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            job_id: None,
            task_id: None,
            code: None,
            reason: None,
            at: now_ms(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(EventKind::Error).with_reason(reason)
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_code(mut self, code: ResultCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Receives executor events.
///
/// Called inline from the executor: implementations must be quick and must not call
/// back into the executor.
pub trait Subscribe: Send + Sync + 'static {
    fn on_event(&self, event: &Event);

    fn name(&self) -> &'static str {
        "subscriber"
    }
}

/// Fan-out to the subscribers of one executor.
#[derive(Default)]
pub(crate) struct Fanout {
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl Fanout {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self { subscribers }
    }

    pub fn publish(&self, event: Event) {
        for s in &self.subscribers {
            if catch_unwind(AssertUnwindSafe(|| s.on_event(&event))).is_err() {
                error!(subscriber = s.name(), kind = ?event.kind, "subscriber panicked while processing an event");
            }
        }
    }

    /// Spawn fire-and-forget work; its failure is published as an `Error` event.
    pub fn background<F>(self: &Arc<Self>, what: &'static str, fut: F)
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        let fanout = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                warn!(what, error = %e, "background work failed");
                fanout.publish(Event::error(format!("{what}: {e}")));
            }
        });
    }
}
