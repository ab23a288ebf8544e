//! Per-job task queue.
//!
//! One [`JobQueue`] exists per job id while the job has pending or current work.
//! Admission (`enqueue`) applies the block strategy and depth limit; a single drain
//! loop per queue then runs pending tasks strictly one at a time.
//!
//! All state sits behind one mutex per queue, held only for short synchronous
//! sections. Reports and notifications are collected in an [`Outbox`] while the lock
//! is held and flushed after it is released.
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use xjob_model::{BlockStrategy, JobId, ResultCode, Task, TaskId, TaskResult, now_ms};

use crate::{
    context::{CloseReason, TaskContext},
    error::{CoreError, RunnerError},
    report::Reporter,
    runner::Runner,
    sink::LogSink,
    sync::lock,
};

const MSG_NOT_RUNNABLE: &str = "the runner can not handle the task, please check the job settings";
const MSG_DISCARD_LATER: &str = "the task is ignored due to the DISCARD_LATER strategy";
const MSG_COVER_EARLY: &str = "the task is dequeued due to the COVER_EARLY strategy";
const MSG_TOO_DEEP: &str = "the job queue is full, please try again later";
const MSG_KILLED: &str = "the queue of the job has been stopped";

static QUEUE_IDS: AtomicU64 = AtomicU64::new(1);
static GENERATIONS: AtomicU64 = AtomicU64::new(1);

/// What a queue tells its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum QueueEvent {
    Admitted(TaskId),
    /// Refused at admission or dropped while pending.
    Rejected(TaskId, ResultCode),
    Starting(TaskId),
    Finished(TaskId),
    /// Removed by COVER_EARLY or stop.
    Evicted(TaskId, ResultCode),
    /// Task-error channel.
    TaskError(TaskId, String),
    /// Generic error channel.
    Error(String),
    /// The queue has no more work and must be dropped by its owner.
    Empty,
}

pub(crate) trait QueueObserver: Send + Sync + 'static {
    fn notify(&self, job_id: JobId, queue_id: u64, event: QueueEvent);
}

struct Pending {
    task: Task,
    timer: Option<JoinHandle<()>>,
}

struct Current {
    task_id: TaskId,
    token: CancellationToken,
    /// Already reported by eviction; the runner's outcome is dropped.
    evicted: bool,
}

struct QueueState {
    pending: VecDeque<Pending>,
    current: Option<Current>,
    /// Id of the active drain loop, `0` when idle.
    generation: u64,
    /// Set once the queue emitted `Empty`; it accepts nothing afterwards.
    retired: bool,
}

impl QueueState {
    fn is_running(&self) -> bool {
        self.generation != 0 || self.current.is_some()
    }

    fn depth(&self) -> usize {
        let current = self.current.as_ref().is_some_and(|c| !c.evicted);
        self.pending.len() + usize::from(current)
    }

    fn evict_all(&mut self, code: ResultCode, msg: &str, out: &mut Outbox) {
        for p in self.pending.drain(..) {
            if let Some(timer) = p.timer {
                timer.abort();
            }
            out.report(p.task.task_id, code, Some(msg.to_string()));
            out.notice(QueueEvent::Evicted(p.task.task_id, code));
        }
        if let Some(cur) = self.current.as_mut().filter(|c| !c.evicted) {
            cur.evicted = true;
            cur.token.cancel();
            out.report(cur.task_id, code, Some(msg.to_string()));
            out.notice(QueueEvent::Evicted(cur.task_id, code));
        }
    }
}

/// Side effects gathered under the queue lock.
#[derive(Default)]
struct Outbox {
    /// Result timestamp; flush time when unset.
    at_ms: Option<i64>,
    results: Vec<TaskResult>,
    notices: Vec<QueueEvent>,
}

impl Outbox {
    /// Results stamped with the time the task started.
    fn started_at(at_ms: i64) -> Self {
        Self {
            at_ms: Some(at_ms),
            ..Self::default()
        }
    }

    fn report(&mut self, task_id: TaskId, code: ResultCode, msg: Option<String>) {
        self.results.push(TaskResult { task_id, code, msg });
    }

    fn reject(&mut self, task_id: TaskId, code: ResultCode, msg: impl Into<String>) {
        self.report(task_id, code, Some(msg.into()));
        self.notice(QueueEvent::Rejected(task_id, code));
    }

    fn fail(&mut self, task_id: TaskId, msg: String) {
        self.report(task_id, ResultCode::HandlerFailed, Some(msg.clone()));
        self.notice(QueueEvent::TaskError(task_id, msg.clone()));
        self.notice(QueueEvent::Error(msg));
    }

    fn notice(&mut self, event: QueueEvent) {
        self.notices.push(event);
    }

    fn flush(self, queue: &JobQueue) {
        queue.reporter.submit(self.at_ms.unwrap_or_else(now_ms), self.results);
        for event in self.notices {
            queue.observer.notify(queue.job_id, queue.id, event);
        }
    }
}

enum Step {
    Run(Task, CancellationToken),
    Skip,
    Done,
}

enum Outcome {
    Done,
    Failed(String),
    Abandoned,
}

pub(crate) struct JobQueue {
    id: u64,
    job_id: JobId,
    runner: Arc<dyn Runner>,
    sink: Arc<dyn LogSink>,
    reporter: Reporter,
    observer: Arc<dyn QueueObserver>,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(
        job_id: JobId,
        runner: Arc<dyn Runner>,
        sink: Arc<dyn LogSink>,
        reporter: Reporter,
        observer: Arc<dyn QueueObserver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: QUEUE_IDS.fetch_add(1, Ordering::Relaxed),
            job_id,
            runner,
            sink,
            reporter,
            observer,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                current: None,
                generation: 0,
                retired: false,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True from the moment a drain loop is scheduled until the queue is idle again.
    pub fn is_running(&self) -> bool {
        lock(&self.state).is_running()
    }

    /// Admit a task.
    ///
    /// Every refusal is reported through the result channel and returns `Ok`.
    /// `Err` hands the task back when this queue is already retired; the caller
    /// must retry on a fresh queue.
    #[instrument(level = "debug", skip(self, task), fields(job_id = %self.job_id, task_id = %task.task_id, strategy = %task.block_strategy.as_str()))]
    pub fn enqueue(self: &Arc<Self>, task: Task) -> Result<(), Task> {
        let mut out = Outbox::default();
        {
            let mut st = lock(&self.state);
            if st.retired {
                return Err(task);
            }
            self.admit(&mut st, task, &mut out);
            if !st.is_running() && st.pending.is_empty() {
                st.retired = true;
                out.notice(QueueEvent::Empty);
            }
        }
        out.flush(self);
        Ok(())
    }

    fn admit(self: &Arc<Self>, st: &mut QueueState, task: Task, out: &mut Outbox) {
        let task_id = task.task_id;

        let Some(prepared) = self.runner.prepare(&task) else {
            debug!(%task_id, runner = self.runner.name(), handler = %task.handler, "task not runnable");
            out.reject(task_id, ResultCode::TaskNotRunnable, MSG_NOT_RUNNABLE);
            return;
        };

        match &task.block_strategy {
            BlockStrategy::DiscardLater => {
                if st.is_running() {
                    out.reject(task_id, ResultCode::TaskDiscarded, MSG_DISCARD_LATER);
                    return;
                }
            }
            BlockStrategy::CoverEarly => {
                st.evict_all(ResultCode::TaskDiscarded, MSG_COVER_EARLY, out);
            }
            BlockStrategy::SerialExecution => {}
            BlockStrategy::Unsupported(strategy) => {
                let err = CoreError::BlockStrategyUnsupported {
                    job_id: task.job_id,
                    task_id,
                    strategy: strategy.clone(),
                };
                out.reject(task_id, ResultCode::HandlerFailed, err.to_string());
                return;
            }
        }

        if st.depth() >= prepared.max_queue_depth {
            debug!(%task_id, depth = st.depth(), max = prepared.max_queue_depth, "job queue too deep");
            out.reject(task_id, ResultCode::JobQueueTooDeep, MSG_TOO_DEEP);
            return;
        }

        let timer = task
            .remaining_ms_at(now_ms())
            .map(|ms| self.arm_pending_timer(task_id, ms));
        st.pending.push_back(Pending { task, timer });
        out.notice(QueueEvent::Admitted(task_id));
        trace!(%task_id, depth = st.depth(), "task admitted");

        if st.generation == 0 {
            let generation = GENERATIONS.fetch_add(1, Ordering::Relaxed);
            st.generation = generation;
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain(generation).await });
        }
    }

    fn arm_pending_timer(self: &Arc<Self>, task_id: TaskId, remaining_ms: u64) -> JoinHandle<()> {
        let queue: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(remaining_ms.saturating_add(1))).await;
            if let Some(queue) = queue.upgrade() {
                queue.expire_pending(task_id);
            }
        })
    }

    fn expire_pending(&self, task_id: TaskId) {
        let mut out = Outbox::default();
        {
            let mut st = lock(&self.state);
            let now = now_ms();
            let Some(pos) = st
                .pending
                .iter()
                .position(|p| p.task.task_id == task_id && p.task.is_expired_at(now))
            else {
                return;
            };
            if st.pending.remove(pos).is_some() {
                debug!(%task_id, "pending task timed out");
                out.reject(task_id, ResultCode::HandlerFailed, CoreError::JobTimeout(task_id).to_string());
            }
        }
        out.flush(self);
    }

    /// Evict everything with `JOB_KILLED` and retire the queue.
    ///
    /// Does not wait for the current runner; its token is fired and its outcome dropped.
    #[instrument(level = "debug", skip(self), fields(job_id = %self.job_id))]
    pub fn stop(&self) {
        let mut out = Outbox::default();
        {
            let mut st = lock(&self.state);
            st.generation = 0;
            st.evict_all(ResultCode::JobKilled, MSG_KILLED, &mut out);
            if !st.retired {
                st.retired = true;
                out.notice(QueueEvent::Empty);
            }
        }
        out.flush(self);
    }

    async fn drain(self: Arc<Self>, generation: u64) {
        debug!(job_id = %self.job_id, generation, "drain loop started");
        loop {
            let started_at = now_ms();
            let mut out = Outbox::started_at(started_at);
            let step = {
                let mut st = lock(&self.state);
                if st.generation != generation {
                    debug!(job_id = %self.job_id, generation, "drain loop superseded");
                    return;
                }
                match st.pending.pop_front() {
                    Some(p) => {
                        if let Some(timer) = p.timer {
                            timer.abort();
                        }
                        let task_id = p.task.task_id;
                        if p.task.is_expired_at(started_at) {
                            debug!(%task_id, "task expired before start");
                            out.reject(task_id, ResultCode::HandlerFailed, CoreError::JobTimeout(task_id).to_string());
                            Step::Skip
                        } else {
                            // Current from here on, so eviction reaches it while the log opens.
                            let token = CancellationToken::new();
                            st.current = Some(Current {
                                task_id,
                                token: token.clone(),
                                evicted: false,
                            });
                            Step::Run(p.task, token)
                        }
                    }
                    None => {
                        st.generation = 0;
                        st.retired = true;
                        out.notice(QueueEvent::Empty);
                        Step::Done
                    }
                }
            };

            match step {
                Step::Run(task, token) => self.execute(task, token, started_at).await,
                Step::Skip => out.flush(&self),
                Step::Done => {
                    out.flush(&self);
                    debug!(job_id = %self.job_id, generation, "drain loop finished");
                    return;
                }
            }
        }
    }

    /// Clear `task_id` from the current slot; returns whether it had been evicted.
    fn release(st: &mut QueueState, task_id: TaskId) -> bool {
        match st.current.take() {
            Some(cur) if cur.task_id == task_id => cur.evicted,
            other => {
                st.current = other;
                true
            }
        }
    }

    async fn execute(self: &Arc<Self>, task: Task, token: CancellationToken, started_at: i64) {
        let task_id = task.task_id;
        let mut out = Outbox::started_at(started_at);

        if let Err(e) = self.sink.open(task_id).await {
            warn!(%task_id, error = %e, "failed to open task log");
            let evicted = Self::release(&mut lock(&self.state), task_id);
            if !evicted {
                out.fail(task_id, e.to_string());
            }
            out.flush(self);
            return;
        }

        let evicted = Self::release_if_evicted(&mut lock(&self.state), task_id);
        if evicted {
            trace!(%task_id, "task evicted while its log was opening");
            self.close_log(task_id);
            return;
        }
        self.observer.notify(self.job_id, self.id, QueueEvent::Starting(task_id));

        let timeout_ms = task.remaining_ms_at(now_ms()).map_or(0, |ms| ms.max(1));
        let ctx = TaskContext::new(task, Arc::clone(&self.sink), timeout_ms, token);

        let runner = Arc::clone(&self.runner);
        let run_ctx = ctx.clone();
        let mut handle = tokio::spawn(async move { runner.run(&run_ctx).await });

        let outcome = tokio::select! {
            biased;
            joined = &mut handle => match joined {
                Ok(Ok(())) => match ctx.close() {
                    Ok(()) => Outcome::Done,
                    Err(_) => Outcome::Abandoned,
                },
                Ok(Err(e)) => Outcome::Failed(e.to_string()),
                Err(e) if e.is_panic() => Outcome::Failed(RunnerError::Panicked.to_string()),
                Err(_) => Outcome::Failed(RunnerError::Cancelled.to_string()),
            },
            _ = ctx.cancelled() => Outcome::Abandoned,
        };

        let evicted = Self::release(&mut lock(&self.state), task_id);
        if evicted {
            trace!(%task_id, "outcome of evicted task dropped");
        } else {
            match outcome {
                Outcome::Done => {
                    out.report(task_id, ResultCode::Ok, None);
                    out.notice(QueueEvent::Finished(task_id));
                }
                Outcome::Failed(msg) => {
                    debug!(%task_id, error = %msg, "task failed");
                    out.fail(task_id, msg);
                }
                Outcome::Abandoned => {
                    let msg = match ctx.close_reason() {
                        Some(CloseReason::TimedOut) => CoreError::ExecutionTimeout(task_id).to_string(),
                        _ => CoreError::TaskAborted.to_string(),
                    };
                    debug!(%task_id, reason = %msg, "runner abandoned");
                    out.fail(task_id, msg);
                }
            }
        }
        out.flush(self);
        self.close_log(task_id);
    }

    /// Like [`release`](Self::release), but leaves a live current task in place.
    fn release_if_evicted(st: &mut QueueState, task_id: TaskId) -> bool {
        let live = st.current.as_ref().is_some_and(|c| c.task_id == task_id && !c.evicted);
        !live && Self::release(st, task_id)
    }

    fn close_log(&self, task_id: TaskId) {
        let sink = Arc::clone(&self.sink);
        self.reporter
            .background("close task log", async move { sink.close(task_id).await });
    }
}
