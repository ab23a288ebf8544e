use std::borrow::Borrow;

use tracing::{debug, error, info, trace, warn};
use xjob_core::{Event, EventKind};

/// Field accessors with placeholders for absent values.
pub trait View {
    fn kind(&self) -> EventKind;
    fn job(&self) -> i64;
    fn task(&self) -> i64;
    fn code(&self) -> &'static str;
    fn reason(&self) -> &str;
}

impl<T> View for T
where
    T: Borrow<Event>,
{
    #[inline]
    fn kind(&self) -> EventKind {
        self.borrow().kind
    }
    #[inline]
    fn job(&self) -> i64 {
        self.borrow().job_id.map_or(-1, |j| j.get())
    }
    #[inline]
    fn task(&self) -> i64 {
        self.borrow().task_id.map_or(-1, |t| t.get())
    }
    #[inline]
    fn code(&self) -> &'static str {
        self.borrow().code.map_or("none", |c| c.name())
    }
    #[inline]
    fn reason(&self) -> &str {
        self.borrow().reason.as_deref().unwrap_or("unknown")
    }
}

#[inline]
pub fn message_for(kind: EventKind) -> &'static str {
    match kind {
        // admission
        EventKind::TaskAdmitted => "task admitted to job queue",
        EventKind::TaskRejected => "task rejected at admission",
        EventKind::TaskEvicted => "task evicted from job queue",

        // lifecycle
        EventKind::TaskStarting => "task is starting",
        EventKind::TaskFinished => "task finished",
        EventKind::TaskFailed => "task failed",

        // queue
        EventKind::QueueEmpty => "job queue drained and dropped",

        // background
        EventKind::Error => "background operation failed",
    }
}

#[inline]
pub fn log_event<E: View>(e: E) {
    let msg = message_for(e.kind());

    match e.kind() {
        EventKind::TaskAdmitted => trace!(job_id = e.job(), task_id = e.task(), "{msg}"),
        EventKind::TaskRejected => {
            warn!(job_id = e.job(), task_id = e.task(), code = e.code(), "{msg}")
        }
        EventKind::TaskEvicted => {
            info!(job_id = e.job(), task_id = e.task(), code = e.code(), "{msg}")
        }

        EventKind::TaskStarting => debug!(job_id = e.job(), task_id = e.task(), "{msg}"),
        EventKind::TaskFinished => info!(job_id = e.job(), task_id = e.task(), "{msg}"),
        EventKind::TaskFailed => error!(
            job_id = e.job(),
            task_id = e.task(),
            reason = e.reason(),
            "{msg}"
        ),

        EventKind::QueueEmpty => trace!(job_id = e.job(), "{msg}"),

        EventKind::Error => error!(reason = e.reason(), "{msg}"),
    }
}
