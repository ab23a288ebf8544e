//! Executor core: runner registry plus one [`JobQueue`] per busy job.
//!
//! Every public operation answers synchronously with a [`JobOpResult`]; execution
//! outcomes of admitted tasks are delivered later through the [`SchedulerClient`].
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use tracing::{debug, info, instrument, warn};
use xjob_model::{JobId, JobOpResult, LogRange, ResultCode, Task, TaskId, TaskResult, now_ms};

use crate::{
    client::SchedulerClient,
    error::CoreError,
    events::{Event, EventKind, Fanout, Subscribe},
    queue::{JobQueue, QueueEvent, QueueObserver},
    report::Reporter,
    router::RunnerRouter,
    runner::Runner,
    sink::LogSink,
    sync::lock,
};

struct Shared {
    router: RunnerRouter,
    queues: Mutex<HashMap<JobId, Arc<JobQueue>>>,
    sink: Arc<dyn LogSink>,
    client: Arc<dyn SchedulerClient>,
    reporter: Reporter,
    fanout: Arc<Fanout>,
}

/// Worker-side executor.
///
/// Cheap to clone; clones share runners, queues and subscribers.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder {
    client: Arc<dyn SchedulerClient>,
    sink: Arc<dyn LogSink>,
    router: RunnerRouter,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ExecutorBuilder {
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Register a runner up front; fails on a duplicate job type.
    pub fn with_runner(self, runner: Arc<dyn Runner>) -> Result<Self, CoreError> {
        self.router.register(runner)?;
        Ok(self)
    }

    pub fn build(self) -> Executor {
        let fanout = Arc::new(Fanout::new(self.subscribers));
        let reporter = Reporter::new(Arc::clone(&self.client), Arc::clone(&fanout));
        Executor {
            shared: Arc::new(Shared {
                router: self.router,
                queues: Mutex::new(HashMap::new()),
                sink: self.sink,
                client: self.client,
                reporter,
                fanout,
            }),
        }
    }
}

impl Executor {
    pub fn builder(client: Arc<dyn SchedulerClient>, sink: Arc<dyn LogSink>) -> ExecutorBuilder {
        ExecutorBuilder {
            client,
            sink,
            router: RunnerRouter::new(),
            subscribers: Vec::new(),
        }
    }

    /// Register a runner for its job type; fails if the type is already served.
    pub fn register_runner(&self, runner: Arc<dyn Runner>) -> Result<(), CoreError> {
        self.shared.router.register(runner)
    }

    /// Accept a pushed task.
    ///
    /// Always `OK`: admission refusals and execution outcomes are reported
    /// asynchronously.
    ///
    /// Must be called inside a Tokio runtime: reporting, pending timers and the drain
    /// loop are spawned tasks.
    #[instrument(level = "debug", skip(self, task), fields(job_id = %task.job_id, task_id = %task.task_id, job_type = %task.job_type))]
    pub fn enqueue_task(&self, task: Task) -> JobOpResult {
        let Some(runner) = self.shared.router.pick(task.job_type) else {
            let msg = format!("the job type {} is not supported", task.job_type);
            debug!(%msg, "task rejected");
            self.shared.fanout.publish(
                Event::new(EventKind::TaskRejected)
                    .with_job(task.job_id)
                    .with_task(task.task_id)
                    .with_code(ResultCode::JobTypeUnsupported),
            );
            self.shared.reporter.submit(
                now_ms(),
                vec![TaskResult::new(task.task_id, ResultCode::JobTypeUnsupported, msg)],
            );
            return JobOpResult::ok();
        };

        let mut task = task;
        loop {
            let queue = self.queue_for(task.job_id, &runner);
            match queue.enqueue(task) {
                Ok(()) => return JobOpResult::ok(),
                Err(back) => {
                    // Retired between lookup and enqueue.
                    self.drop_queue(back.job_id, queue.id());
                    task = back;
                }
            }
        }
    }

    fn queue_for(&self, job_id: JobId, runner: &Arc<dyn Runner>) -> Arc<JobQueue> {
        let mut queues = lock(&self.shared.queues);
        let queue = queues.entry(job_id).or_insert_with(|| {
            debug!(%job_id, "job queue created");
            JobQueue::new(
                job_id,
                Arc::clone(runner),
                Arc::clone(&self.shared.sink),
                self.shared.reporter.clone(),
                Arc::new(Notifier {
                    shared: Arc::downgrade(&self.shared),
                }),
            )
        });
        Arc::clone(queue)
    }

    fn drop_queue(&self, job_id: JobId, queue_id: u64) {
        remove_queue(&self.shared, job_id, queue_id);
    }

    fn queue(&self, job_id: JobId) -> Option<Arc<JobQueue>> {
        lock(&self.shared.queues).get(&job_id).cloned()
    }

    /// `EXECUTOR_BUSY` while the job has pending or current work, `OK` otherwise.
    pub fn check_job_status(&self, job_id: JobId) -> JobOpResult {
        match self.queue(job_id) {
            Some(q) if q.is_running() => {
                JobOpResult::error(ResultCode::ExecutorBusy, format!("job {job_id} is running"))
            }
            _ => JobOpResult::ok(),
        }
    }

    /// Stop the job's queue: pending and current tasks are reported `JOB_KILLED`.
    ///
    /// Must be called inside a Tokio runtime.
    #[instrument(level = "debug", skip(self))]
    pub fn kill_job(&self, job_id: JobId) -> JobOpResult {
        if let Some(q) = self.queue(job_id) {
            info!(%job_id, "killing job");
            q.stop();
        }
        JobOpResult::ok()
    }

    pub async fn get_task_log(&self, task_id: TaskId, start_line: u64, datetime: i64) -> JobOpResult<LogRange> {
        match self.shared.sink.get(task_id, start_line, datetime).await {
            Ok(Some(range)) => JobOpResult::with_data(range),
            Ok(None) => JobOpResult::error(ResultCode::LogNotFound, format!("no log found for task {task_id}")),
            Err(e) => {
                warn!(%task_id, error = %e, "failed to read task log");
                JobOpResult::error(ResultCode::InternalServerError, e.to_string())
            }
        }
    }

    pub fn validate_api_token(&self, token: &str) -> bool {
        self.shared.client.validate_api_token(token)
    }

    /// Whether a queue currently exists for the job.
    pub fn has_queue(&self, job_id: JobId) -> bool {
        lock(&self.shared.queues).contains_key(&job_id)
    }

    pub fn queue_count(&self) -> usize {
        lock(&self.shared.queues).len()
    }
}

fn remove_queue(shared: &Shared, job_id: JobId, queue_id: u64) -> bool {
    let mut queues = lock(&shared.queues);
    if queues.get(&job_id).is_some_and(|q| q.id() == queue_id) {
        queues.remove(&job_id);
        return true;
    }
    false
}

/// Bridges queue notices to the executor map and its subscribers.
struct Notifier {
    shared: Weak<Shared>,
}

impl QueueObserver for Notifier {
    fn notify(&self, job_id: JobId, queue_id: u64, event: QueueEvent) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let ev = match event {
            QueueEvent::Admitted(id) => Event::new(EventKind::TaskAdmitted).with_job(job_id).with_task(id),
            QueueEvent::Rejected(id, code) => Event::new(EventKind::TaskRejected)
                .with_job(job_id)
                .with_task(id)
                .with_code(code),
            QueueEvent::Starting(id) => Event::new(EventKind::TaskStarting).with_job(job_id).with_task(id),
            QueueEvent::Finished(id) => Event::new(EventKind::TaskFinished)
                .with_job(job_id)
                .with_task(id)
                .with_code(ResultCode::Ok),
            QueueEvent::Evicted(id, code) => Event::new(EventKind::TaskEvicted)
                .with_job(job_id)
                .with_task(id)
                .with_code(code),
            QueueEvent::TaskError(id, reason) => Event::new(EventKind::TaskFailed)
                .with_job(job_id)
                .with_task(id)
                .with_code(ResultCode::HandlerFailed)
                .with_reason(reason),
            QueueEvent::Error(reason) => Event::error(reason).with_job(job_id),
            QueueEvent::Empty => {
                if remove_queue(&shared, job_id, queue_id) {
                    debug!(%job_id, queue_id, "job queue dropped");
                }
                Event::new(EventKind::QueueEmpty).with_job(job_id)
            }
        };
        shared.fanout.publish(ev);
    }
}
