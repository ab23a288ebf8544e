use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

use xjob_core::{
    CoreError, Executor, MemoryLogSink, MemoryLogSinkConfig, RunnerError, SchedulerClient, Subscribe,
};
use xjob_exec::BeanRunner;
use xjob_model::{AppName, BlockStrategy, JobId, Task, TaskId, TaskResult};
use xjob_observe::{LogSubscriber, LoggerConfig, logger_init};

/// Prints results instead of posting them to a scheduler.
struct TracingClient {
    token: String,
}

#[async_trait]
impl SchedulerClient for TracingClient {
    async fn submit_results(&self, at_ms: i64, results: Vec<TaskResult>) -> Result<(), CoreError> {
        let body = serde_json::to_string(&results).map_err(|e| CoreError::Client(e.to_string()))?;
        info!(at_ms, %body, "results submitted");
        Ok(())
    }

    fn validate_api_token(&self, token: &str) -> bool {
        self.token == token
    }
}

fn handlers() -> anyhow::Result<BeanRunner> {
    let runner = BeanRunner::new();

    runner.add("sleep", |ctx| async move {
        let ms = ctx.task().args.as_deref().and_then(|a| a.parse().ok()).unwrap_or(100);
        ctx.log("info", format!("sleeping {ms}ms"));
        tokio::select! {
            _ = ctx.cancelled() => {
                ctx.log("warn", "interrupted");
                Err(RunnerError::Cancelled)
            }
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                ctx.log("info", "done");
                Ok(())
            }
        }
    })?;

    runner.add_with_depth("fail", 1, |ctx| async move {
        ctx.log("error", "about to fail");
        Err(RunnerError::failed("intentional failure"))
    })?;

    Ok(runner)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let cfg = LoggerConfig::from_env()?;
    logger_init(&cfg)?;

    let app = AppName::parse("xjob-demo")?;
    info!(app = app.as_str(), "logger initialized");

    // 2) Log storage
    let sink = Arc::new(MemoryLogSink::new(MemoryLogSinkConfig {
        max_age: Duration::from_secs(60),
        sweep_interval: Duration::from_secs(10),
        ..Default::default()
    }));
    sink.start_sweeper();

    // 3) Executor
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogSubscriber::new())];
    let executor = Executor::builder(
        Arc::new(TracingClient {
            token: "demo-token".to_string(),
        }),
        sink.clone(),
    )
    .with_subscribers(subscribers)
    .with_runner(Arc::new(handlers()?))?
    .build();
    info!(token_ok = executor.validate_api_token("demo-token"), "executor ready");

    // 4) Push tasks through every block strategy
    executor.enqueue_task(Task::new(1, 100, "sleep").with_args("300"));
    executor.enqueue_task(Task::new(1, 101, "sleep").with_args("50"));
    executor.enqueue_task(
        Task::new(1, 102, "sleep").with_block_strategy(BlockStrategy::DiscardLater),
    );
    executor.enqueue_task(Task::new(2, 200, "sleep").with_args("5000"));
    executor.enqueue_task(
        Task::new(2, 201, "sleep")
            .with_args("50")
            .with_block_strategy(BlockStrategy::CoverEarly),
    );
    executor.enqueue_task(Task::new(3, 300, "fail"));
    executor.enqueue_task(Task::new(4, 400, "sleep").with_args("5000").with_timeout_sec(1));
    executor.enqueue_task(Task::new(5, 500, "missing"));

    let status = executor.check_job_status(JobId::from(1));
    info!(code = %status.code, "job 1 status");

    tokio::time::sleep(Duration::from_millis(100)).await;
    executor.kill_job(JobId::from(4));

    // 5) Let the queues drain
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        _ = tokio::signal::ctrl_c() => warn!("interrupted"),
    }

    for id in [100, 201, 300] {
        let log = executor.get_task_log(TaskId::from(id), 1, 0).await;
        match log.data {
            Some(range) => info!(task_id = id, lines = range.end_line, "task log:\n{}", range.content),
            None => warn!(task_id = id, code = %log.code, "no task log"),
        }
    }

    sink.stop_sweeper();
    info!("shutting down");
    Ok(())
}
