use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use xjob_core::{
    CoreError, Event, EventKind, Executor, LogSink, MemoryLogSink, PrepareResult, Runner, RunnerError,
    SchedulerClient, Subscribe, TaskContext,
};
use xjob_model::{BlockStrategy, JobId, JobType, LogRange, ResultCode, Task, TaskId, TaskResult, now_ms};

#[derive(Default)]
struct RecordingClient {
    results: Mutex<Vec<TaskResult>>,
    stamps: Mutex<Vec<(TaskId, i64)>>,
    fail: bool,
}

#[async_trait]
impl SchedulerClient for RecordingClient {
    async fn submit_results(&self, at_ms: i64, results: Vec<TaskResult>) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::Client("connection refused".into()));
        }
        self.stamps
            .lock()
            .unwrap()
            .extend(results.iter().map(|r| (r.task_id, at_ms)));
        self.results.lock().unwrap().extend(results);
        Ok(())
    }

    fn validate_api_token(&self, _token: &str) -> bool {
        true
    }
}

impl RecordingClient {
    fn results(&self) -> Vec<TaskResult> {
        self.results.lock().unwrap().clone()
    }

    fn result_of(&self, id: i64) -> Option<TaskResult> {
        self.results().into_iter().find(|r| r.task_id == TaskId::from(id))
    }

    fn stamp_of(&self, id: i64) -> Option<i64> {
        let stamps = self.stamps.lock().unwrap();
        stamps.iter().find(|(t, _)| *t == TaskId::from(id)).map(|(_, at)| *at)
    }

    fn count_of(&self, id: i64) -> usize {
        self.results().iter().filter(|r| r.task_id == TaskId::from(id)).count()
    }
}

#[derive(Default)]
struct RecordingSubscriber(Mutex<Vec<Event>>);

impl Subscribe for RecordingSubscriber {
    fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl RecordingSubscriber {
    fn count(&self, kind: EventKind) -> usize {
        self.0.lock().unwrap().iter().filter(|e| e.kind == kind).count()
    }
}

/// Behaviour is picked by handler name, duration (ms) by `args`.
#[derive(Default)]
struct ScriptedRunner {
    trace: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn trace(&self) -> Vec<String> {
        self.trace.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.trace.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    fn job_type(&self) -> JobType {
        JobType::Bean
    }

    fn prepare(&self, task: &Task) -> Option<PrepareResult> {
        matches!(task.handler.as_str(), "sleep" | "stubborn" | "fail" | "panic" | "log")
            .then_some(PrepareResult { max_queue_depth: 3 })
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), RunnerError> {
        let id = ctx.task().task_id;
        let ms = ctx.task().args.as_deref().and_then(|a| a.parse().ok()).unwrap_or(0);
        self.push(format!("start:{id}"));

        let res = match ctx.task().handler.as_str() {
            "sleep" => tokio::select! {
                _ = ctx.cancelled() => {
                    self.push(format!("cancelled:{id}"));
                    Err(RunnerError::Cancelled)
                }
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
            },
            "stubborn" => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            "fail" => Err(RunnerError::failed("bad input")),
            "panic" => panic!("handler blew up"),
            "log" => {
                ctx.log("info", format!("hello from {id}"));
                Ok(())
            }
            other => Err(RunnerError::HandlerNotFound(other.to_string())),
        };

        self.push(format!("end:{id}"));
        res
    }
}

/// Memory sink whose `open` fails or stalls for chosen tasks, and whose reads can fail.
#[derive(Default)]
struct ScriptedSink {
    inner: MemoryLogSink,
    fail_open: Vec<i64>,
    slow_open: Vec<i64>,
    fail_get: bool,
}

#[async_trait]
impl LogSink for ScriptedSink {
    async fn open(&self, task_id: TaskId) -> Result<(), CoreError> {
        if self.fail_open.iter().any(|id| TaskId::from(*id) == task_id) {
            return Err(CoreError::LogSink("disk full".into()));
        }
        if self.slow_open.iter().any(|id| TaskId::from(*id) == task_id) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.inner.open(task_id).await
    }

    async fn close(&self, task_id: TaskId) -> Result<(), CoreError> {
        self.inner.close(task_id).await
    }

    fn write(&self, task_id: TaskId, level: &str, message: &str) {
        self.inner.write(task_id, level, message)
    }

    async fn get(&self, task_id: TaskId, start_line: u64, datetime: i64) -> Result<Option<LogRange>, CoreError> {
        if self.fail_get {
            return Err(CoreError::LogSink("storage offline".into()));
        }
        self.inner.get(task_id, start_line, datetime).await
    }
}

struct Harness {
    executor: Executor,
    client: Arc<RecordingClient>,
    runner: Arc<ScriptedRunner>,
    events: Arc<RecordingSubscriber>,
}

fn harness_with(client: RecordingClient) -> Harness {
    harness_on(client, Arc::new(MemoryLogSink::default()))
}

fn harness_on(client: RecordingClient, sink: Arc<dyn LogSink>) -> Harness {
    let client = Arc::new(client);
    let runner = Arc::new(ScriptedRunner::default());
    let events = Arc::new(RecordingSubscriber::default());
    let executor = Executor::builder(client.clone(), sink)
        .with_subscribers(vec![events.clone()])
        .with_runner(runner.clone())
        .unwrap()
        .build();
    Harness {
        executor,
        client,
        runner,
        events,
    }
}

fn harness() -> Harness {
    harness_with(RecordingClient::default())
}

async fn wait_until(what: &str, limit: Duration, mut cond: impl FnMut() -> bool) {
    let started = Instant::now();
    while !cond() {
        assert!(started.elapsed() < limit, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn task(job: i64, id: i64, handler: &str, ms: u64) -> Task {
    Task::new(job, id, handler).with_args(ms.to_string())
}

#[tokio::test]
async fn serial_task_reports_ok_exactly_once() {
    let h = harness();
    assert!(h.executor.enqueue_task(task(1, 100, "sleep", 50)).is_ok());

    wait_until("result", Duration::from_secs(2), || !h.client.results().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let results = h.client.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].task_id, TaskId::from(100));
    assert_eq!(results[0].code, ResultCode::Ok);
}

#[tokio::test]
async fn discard_later_rejects_while_busy() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "sleep", 150));
    h.executor
        .enqueue_task(task(1, 2, "sleep", 0).with_block_strategy(BlockStrategy::DiscardLater));

    wait_until("both results", Duration::from_secs(2), || h.client.results().len() == 2).await;
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::TaskDiscarded);
    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::Ok);
    assert!(!h.runner.trace().contains(&"start:2".to_string()));
}

#[tokio::test]
async fn discard_later_window_counts_scheduled_drain_as_running() {
    let h = harness();
    // No await between the two pushes: the drain loop is scheduled but has not
    // picked task 1 yet, and the queue already counts as running.
    h.executor.enqueue_task(task(1, 1, "sleep", 0));
    assert!(!h.executor.check_job_status(JobId::from(1)).is_ok());
    h.executor
        .enqueue_task(task(1, 2, "sleep", 0).with_block_strategy(BlockStrategy::DiscardLater));

    wait_until("both results", Duration::from_secs(2), || h.client.results().len() == 2).await;
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::TaskDiscarded);
}

#[tokio::test]
async fn cover_early_aborts_current_and_runs_new_task() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "sleep", 5_000));
    wait_until("task 1 started", Duration::from_secs(2), || {
        h.runner.trace().contains(&"start:1".to_string())
    })
    .await;

    h.executor
        .enqueue_task(task(1, 2, "sleep", 10).with_block_strategy(BlockStrategy::CoverEarly));

    wait_until("task 2 result", Duration::from_secs(2), || h.client.result_of(2).is_some()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::TaskDiscarded);
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::Ok);
    assert_eq!(h.client.results().len(), 2, "late outcome of the evicted task is dropped");
    assert!(h.runner.trace().contains(&"cancelled:1".to_string()));
    assert_eq!(h.events.count(EventKind::TaskEvicted), 1);
}

#[tokio::test]
async fn cover_early_discards_pending_tasks() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "sleep", 5_000));
    h.executor.enqueue_task(task(1, 2, "sleep", 0));
    h.executor
        .enqueue_task(task(1, 3, "sleep", 0).with_block_strategy(BlockStrategy::CoverEarly));

    wait_until("task 3 result", Duration::from_secs(2), || h.client.result_of(3).is_some()).await;
    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::TaskDiscarded);
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::TaskDiscarded);
    assert_eq!(h.client.result_of(3).unwrap().code, ResultCode::Ok);
    assert!(!h.runner.trace().contains(&"start:2".to_string()));
}

#[tokio::test]
async fn serial_tasks_run_in_order_without_interleaving() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "sleep", 40));
    h.executor.enqueue_task(task(1, 2, "sleep", 10));
    h.executor.enqueue_task(task(1, 3, "sleep", 0));

    wait_until("three results", Duration::from_secs(2), || h.client.results().len() == 3).await;
    assert_eq!(
        h.runner.trace(),
        vec!["start:1", "end:1", "start:2", "end:2", "start:3", "end:3"]
    );
    assert!(h.client.results().iter().all(|r| r.code == ResultCode::Ok));
}

#[tokio::test]
async fn jobs_run_in_parallel() {
    let h = harness();
    let started = Instant::now();
    h.executor.enqueue_task(task(1, 1, "sleep", 200));
    h.executor.enqueue_task(task(2, 2, "sleep", 200));

    wait_until("two results", Duration::from_secs(2), || h.client.results().len() == 2).await;
    assert!(started.elapsed() < Duration::from_millis(390));
}

#[tokio::test]
async fn queue_depth_is_bounded_by_runner() {
    let h = harness();
    for id in 1..=4 {
        h.executor.enqueue_task(task(1, id, "sleep", 30));
    }

    wait_until("four results", Duration::from_secs(2), || h.client.results().len() == 4).await;
    assert_eq!(h.client.result_of(4).unwrap().code, ResultCode::JobQueueTooDeep);
    for id in 1..=3 {
        assert_eq!(h.client.result_of(id).unwrap().code, ResultCode::Ok);
    }
}

#[tokio::test]
async fn idle_queue_is_dropped_once_and_recreated() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "sleep", 10));
    assert!(h.executor.has_queue(JobId::from(1)));

    wait_until("queue dropped", Duration::from_secs(2), || !h.executor.has_queue(JobId::from(1))).await;
    assert_eq!(h.events.count(EventKind::QueueEmpty), 1);

    h.executor.enqueue_task(task(1, 2, "sleep", 10));
    assert!(h.executor.has_queue(JobId::from(1)));
    wait_until("second drop", Duration::from_secs(2), || !h.executor.has_queue(JobId::from(1))).await;

    assert_eq!(h.events.count(EventKind::QueueEmpty), 2);
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::Ok);
}

#[tokio::test]
async fn stubborn_handler_is_abandoned_at_timeout() {
    let h = harness();
    let started = Instant::now();
    h.executor
        .enqueue_task(task(1, 1, "stubborn", 5_000).with_timeout_sec(1));
    h.executor.enqueue_task(task(1, 2, "sleep", 0));

    wait_until("task 1 result", Duration::from_millis(1_500), || h.client.result_of(1).is_some()).await;
    let r1 = h.client.result_of(1).unwrap();
    assert_eq!(r1.code, ResultCode::HandlerFailed);
    assert!(r1.msg.unwrap().contains("exceeded its timeout"));

    wait_until("task 2 result", Duration::from_millis(300), || h.client.result_of(2).is_some()).await;
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::Ok);
    assert!(started.elapsed() < Duration::from_millis(1_600));
}

#[tokio::test]
async fn pending_task_times_out_before_start() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "sleep", 1_500));
    h.executor.enqueue_task(task(1, 2, "sleep", 0).with_timeout_sec(1));

    wait_until("task 2 result", Duration::from_millis(1_400), || h.client.result_of(2).is_some()).await;
    let r2 = h.client.result_of(2).unwrap();
    assert_eq!(r2.code, ResultCode::HandlerFailed);
    assert!(r2.msg.unwrap().contains("before it could start"));
    assert!(h.client.result_of(1).is_none(), "task 1 still running");
    assert!(!h.runner.trace().contains(&"start:2".to_string()));
}

#[tokio::test]
async fn kill_reports_immediately_and_fires_token() {
    let h = harness();
    h.executor.enqueue_task(task(1, 100, "sleep", 5_000));
    h.executor.enqueue_task(task(1, 101, "sleep", 0));
    wait_until("task started", Duration::from_secs(2), || {
        h.runner.trace().contains(&"start:100".to_string())
    })
    .await;

    assert!(h.executor.kill_job(JobId::from(1)).is_ok());
    assert!(!h.executor.has_queue(JobId::from(1)));

    wait_until("kill results", Duration::from_millis(500), || h.client.results().len() == 2).await;
    assert_eq!(h.client.result_of(100).unwrap().code, ResultCode::JobKilled);
    assert_eq!(h.client.result_of(101).unwrap().code, ResultCode::JobKilled);

    wait_until("token observed", Duration::from_millis(500), || {
        h.runner.trace().contains(&"cancelled:100".to_string())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.client.results().len(), 2);
    assert!(!h.runner.trace().contains(&"start:101".to_string()));
}

#[tokio::test]
async fn status_is_busy_while_work_exists() {
    let h = harness();
    let job = JobId::from(1);
    assert!(h.executor.check_job_status(job).is_ok());

    h.executor.enqueue_task(task(1, 1, "sleep", 100));
    let busy = h.executor.check_job_status(job);
    assert_eq!(busy.code, ResultCode::ExecutorBusy);
    assert_eq!(busy.msg.as_deref(), Some("job 1 is running"));

    wait_until("idle", Duration::from_secs(2), || h.executor.check_job_status(job).is_ok()).await;
}

#[tokio::test]
async fn unsupported_job_type_is_reported_not_queued() {
    let h = harness();
    let op = h
        .executor
        .enqueue_task(task(1, 1, "sleep", 0).with_job_type(JobType::Shell));
    assert!(op.is_ok());
    assert!(!h.executor.has_queue(JobId::from(1)));

    wait_until("result", Duration::from_secs(1), || h.client.result_of(1).is_some()).await;
    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::JobTypeUnsupported);
}

#[tokio::test]
async fn unknown_handler_is_not_runnable() {
    let h = harness();
    assert!(h.executor.enqueue_task(task(1, 1, "nope", 0)).is_ok());

    wait_until("result", Duration::from_secs(1), || h.client.result_of(1).is_some()).await;
    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::TaskNotRunnable);
    assert!(!h.executor.has_queue(JobId::from(1)));
}

#[tokio::test]
async fn unknown_block_strategy_is_reported() {
    let h = harness();
    h.executor
        .enqueue_task(task(1, 1, "sleep", 0).with_block_strategy(BlockStrategy::from("FIRST_COME")));

    wait_until("result", Duration::from_secs(1), || h.client.result_of(1).is_some()).await;
    let r = h.client.result_of(1).unwrap();
    assert_eq!(r.code, ResultCode::HandlerFailed);
    assert!(r.msg.unwrap().contains("FIRST_COME"));
    assert!(h.runner.trace().is_empty());
}

#[tokio::test]
async fn failures_and_panics_do_not_stop_the_queue() {
    let h = harness();
    h.executor.enqueue_task(task(1, 1, "fail", 0));
    h.executor.enqueue_task(task(1, 2, "panic", 0));
    h.executor.enqueue_task(task(1, 3, "sleep", 0));

    wait_until("three results", Duration::from_secs(2), || h.client.results().len() == 3).await;

    let r1 = h.client.result_of(1).unwrap();
    assert_eq!(r1.code, ResultCode::HandlerFailed);
    assert_eq!(r1.msg.as_deref(), Some("bad input"));

    let r2 = h.client.result_of(2).unwrap();
    assert_eq!(r2.code, ResultCode::HandlerFailed);
    assert_eq!(r2.msg.as_deref(), Some("handler panicked"));

    assert_eq!(h.client.result_of(3).unwrap().code, ResultCode::Ok);
    assert_eq!(h.events.count(EventKind::TaskFailed), 2);
    assert!(h.events.count(EventKind::Error) >= 2);
}

#[tokio::test]
async fn task_log_is_readable_after_run() {
    let h = harness();
    h.executor.enqueue_task(task(1, 7, "log", 0));
    wait_until("result", Duration::from_secs(1), || h.client.result_of(7).is_some()).await;

    let op = h.executor.get_task_log(TaskId::from(7), 1, 0).await;
    assert!(op.is_ok());
    let range = op.data.unwrap();
    assert_eq!(range.start_line, 1);
    assert_eq!(range.end_line, 1);
    assert!(range.content.contains("[info] hello from 7"));

    let missing = h.executor.get_task_log(TaskId::from(8), 1, 0).await;
    assert_eq!(missing.code, ResultCode::LogNotFound);
}

#[tokio::test]
async fn failed_submission_surfaces_as_error_event() {
    let h = harness_with(RecordingClient {
        fail: true,
        ..RecordingClient::default()
    });
    h.executor.enqueue_task(task(1, 1, "sleep", 0));

    wait_until("error event", Duration::from_secs(1), || h.events.count(EventKind::Error) > 0).await;
    let events = h.events.0.lock().unwrap();
    let err = events.iter().find(|e| e.kind == EventKind::Error).unwrap();
    assert!(err.reason.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn unreadable_log_is_an_internal_error() {
    let h = harness_on(
        RecordingClient::default(),
        Arc::new(ScriptedSink {
            fail_get: true,
            ..ScriptedSink::default()
        }),
    );

    let op = h.executor.get_task_log(TaskId::from(7), 1, 0).await;
    assert_eq!(op.code, ResultCode::InternalServerError);
    assert!(op.msg.unwrap().contains("storage offline"));
    assert!(op.data.is_none());
}

#[tokio::test]
async fn log_open_failure_fails_the_task_and_queue_moves_on() {
    let h = harness_on(
        RecordingClient::default(),
        Arc::new(ScriptedSink {
            fail_open: vec![1],
            ..ScriptedSink::default()
        }),
    );
    h.executor.enqueue_task(task(1, 1, "sleep", 0));
    h.executor.enqueue_task(task(1, 2, "sleep", 0));

    wait_until("both results", Duration::from_secs(2), || h.client.results().len() == 2).await;
    let r1 = h.client.result_of(1).unwrap();
    assert_eq!(r1.code, ResultCode::HandlerFailed);
    assert!(r1.msg.unwrap().contains("log sink: disk full"));
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::Ok);
    assert_eq!(h.runner.trace(), vec!["start:2", "end:2"]);
}

#[tokio::test]
async fn kill_while_log_opens_reports_once_and_never_starts() {
    let h = harness_on(
        RecordingClient::default(),
        Arc::new(ScriptedSink {
            slow_open: vec![1],
            ..ScriptedSink::default()
        }),
    );
    h.executor.enqueue_task(task(1, 1, "sleep", 0));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.executor.kill_job(JobId::from(1)).is_ok());
    wait_until("kill result", Duration::from_millis(500), || h.client.result_of(1).is_some()).await;
    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::JobKilled);

    // Let the stalled open finish.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.client.count_of(1), 1);
    assert!(h.runner.trace().is_empty());
}

#[tokio::test]
async fn cover_early_while_log_opens_discards_the_popped_task() {
    let h = harness_on(
        RecordingClient::default(),
        Arc::new(ScriptedSink {
            slow_open: vec![1],
            ..ScriptedSink::default()
        }),
    );
    h.executor.enqueue_task(task(1, 1, "sleep", 0));
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.executor
        .enqueue_task(task(1, 2, "sleep", 0).with_block_strategy(BlockStrategy::CoverEarly));
    wait_until("task 1 result", Duration::from_millis(100), || h.client.result_of(1).is_some()).await;
    assert_eq!(h.client.result_of(1).unwrap().code, ResultCode::TaskDiscarded);

    wait_until("task 2 result", Duration::from_secs(2), || h.client.result_of(2).is_some()).await;
    assert_eq!(h.client.result_of(2).unwrap().code, ResultCode::Ok);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.client.count_of(1), 1);
    assert_eq!(h.runner.trace(), vec!["start:2", "end:2"]);
}

#[tokio::test]
async fn results_are_stamped_with_the_task_start() {
    let h = harness();
    let pushed_at = now_ms();
    h.executor.enqueue_task(task(1, 1, "sleep", 200));

    wait_until("result", Duration::from_secs(2), || h.client.result_of(1).is_some()).await;
    let finished_at = now_ms();
    let at = h.client.stamp_of(1).unwrap();
    assert!(at >= pushed_at);
    assert!(at - pushed_at < 150, "stamp {at} should be near the start, not the finish");
    assert!(finished_at - at >= 190);
}
