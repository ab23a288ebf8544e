//! Per-task execution context.
//!
//! A [`TaskContext`] is created for every dispatched task and moves one way,
//! `Active -> Closed`. It closes on whichever happens first: the timeout elapses,
//! the runner completes ([`TaskContext::close`]) or the cancellation token is fired
//! from outside (kill, COVER_EARLY).
//!
//! Cancellation is cooperative. Closing only flips state and fires the token; handler
//! code keeps running until it looks at either.
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use xjob_model::{Task, now_ms};

use crate::{error::CoreError, sink::LogSink, sync::lock};

/// Why a context left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The runner returned and the context was closed normally.
    Completed,
    /// The timeout elapsed first.
    TimedOut,
    /// The token was fired from outside.
    Aborted,
}

#[derive(Debug, Clone, Copy)]
enum Status {
    Active,
    Closed(CloseReason),
}

struct State {
    status: Status,
    /// Absolute deadline, UNIX milliseconds.
    not_after: i64,
}

impl State {
    /// First transition wins.
    fn close(&mut self, reason: CloseReason) -> bool {
        match self.status {
            Status::Active => {
                self.status = Status::Closed(reason);
                if reason != CloseReason::Completed {
                    self.not_after = now_ms();
                }
                true
            }
            Status::Closed(_) => false,
        }
    }
}

/// Time out an active context. A context that already closed keeps its token untouched.
fn expire(state: &Mutex<State>, token: &CancellationToken) -> bool {
    let timed_out = lock(state).close(CloseReason::TimedOut);
    if timed_out {
        token.cancel();
    }
    timed_out
}

struct Inner {
    task: Task,
    sink: Arc<dyn LogSink>,
    token: CancellationToken,
    state: Arc<Mutex<State>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(w) = lock(&self.watcher).take() {
            w.abort();
        }
    }
}

/// Handle to the running task, shared between the executor and the runner.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<Inner>,
}

impl TaskContext {
    /// Build an active context. `timeout_ms == 0` means unbounded.
    ///
    /// Must be called inside a Tokio runtime: the timeout and the token are watched
    /// by a spawned task.
    pub fn new(task: Task, sink: Arc<dyn LogSink>, timeout_ms: u64, token: CancellationToken) -> Self {
        let not_after = if timeout_ms > 0 {
            now_ms().saturating_add(i64::try_from(timeout_ms).unwrap_or(i64::MAX))
        } else {
            i64::MAX
        };
        let state = Arc::new(Mutex::new(State {
            status: Status::Active,
            not_after,
        }));

        let watcher = {
            let state = Arc::clone(&state);
            let token = token.clone();
            let task_id = task.task_id;
            tokio::spawn(async move {
                if timeout_ms == 0 {
                    token.cancelled().await;
                    if lock(&state).close(CloseReason::Aborted) {
                        trace!(%task_id, "task context aborted");
                    }
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => {
                        if lock(&state).close(CloseReason::Aborted) {
                            trace!(%task_id, "task context aborted");
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                        if expire(&state, &token) {
                            trace!(%task_id, timeout_ms, "task context timed out");
                        }
                    }
                }
            })
        };

        Self {
            inner: Arc::new(Inner {
                task,
                sink,
                token,
                state,
                watcher: Mutex::new(Some(watcher)),
            }),
        }
    }

    /// Current status, folding in a token fired since the watcher last ran.
    fn observe(&self) -> Status {
        let mut state = lock(&self.inner.state);
        if matches!(state.status, Status::Active) && self.inner.token.is_cancelled() {
            state.close(CloseReason::Aborted);
        }
        state.status
    }

    pub fn task(&self) -> &Task {
        &self.inner.task
    }

    /// The cancellation token bound to this task.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Resolves once the context is aborted or timed out.
    ///
    /// Does not resolve on a normal [`close`](Self::close).
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    pub fn is_active(&self) -> bool {
        matches!(self.observe(), Status::Active)
    }

    pub fn is_closed(&self) -> bool {
        !self.is_active()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.observe() {
            Status::Active => None,
            Status::Closed(r) => Some(r),
        }
    }

    /// Absolute deadline in UNIX milliseconds; `i64::MAX` when unbounded.
    pub fn not_after(&self) -> i64 {
        self.observe();
        lock(&self.inner.state).not_after
    }

    /// Complete the context.
    ///
    /// Fails with [`CoreError::TaskAborted`] when it is already closed, whatever the reason.
    pub fn close(&self) -> Result<(), CoreError> {
        {
            let mut state = lock(&self.inner.state);
            if self.inner.token.is_cancelled() {
                state.close(CloseReason::Aborted);
            }
            if !state.close(CloseReason::Completed) {
                return Err(CoreError::TaskAborted);
            }
        }
        if let Some(w) = lock(&self.inner.watcher).take() {
            w.abort();
        }
        Ok(())
    }

    /// Append a line to the task log.
    ///
    /// Forwards whatever the state; handlers check [`is_active`](Self::is_active) themselves.
    pub fn log(&self, level: &str, message: impl AsRef<str>) {
        self.inner.sink.write(self.inner.task.task_id, level, message.as_ref());
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("TaskContext")
            .field("job_id", &self.inner.task.job_id)
            .field("task_id", &self.inner.task.task_id)
            .field("status", &state.status)
            .field("not_after", &state.not_after)
            .finish()
    }
}
