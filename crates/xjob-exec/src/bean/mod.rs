use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use tracing::{debug, trace};
use xjob_core::{PrepareResult, Runner, RunnerError, TaskContext};
use xjob_model::{DEFAULT_MAX_QUEUE_DEPTH, JobType, Task};

use crate::error::{ExecError, ExecResult};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), RunnerError>> + Send>>;
type HandlerFn = Arc<dyn Fn(TaskContext) -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
struct Entry {
    handler: HandlerFn,
    max_queue_depth: usize,
}

/// Runner for in-process handlers (`JobType::Bean`).
///
/// Handlers are registered by name; the task's `handler` field picks one.
/// Each handler carries its own queue depth.
#[derive(Default)]
pub struct BeanRunner {
    handlers: RwLock<HashMap<String, Entry>>,
}

impl BeanRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler with the default queue depth.
    pub fn add<F, Fut>(&self, name: impl Into<String>, handler: F) -> ExecResult<&Self>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
    {
        self.add_with_depth(name, DEFAULT_MAX_QUEUE_DEPTH, handler)
    }

    /// Register a handler allowing `max_queue_depth` tasks (pending + current) per job.
    pub fn add_with_depth<F, Fut>(
        &self,
        name: impl Into<String>,
        max_queue_depth: usize,
        handler: F,
    ) -> ExecResult<&Self>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RunnerError>> + Send + 'static,
    {
        let name = name.into();
        if max_queue_depth == 0 {
            return Err(ExecError::InvalidDepth(name));
        }

        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.contains_key(&name) {
            return Err(ExecError::HandlerExists(name));
        }

        let boxed: HandlerFn = Arc::new(move |ctx: TaskContext| -> HandlerFuture { Box::pin(handler(ctx)) });
        trace!(handler = %name, max_queue_depth, "bean handler registered");
        handlers.insert(
            name,
            Entry {
                handler: boxed,
                max_queue_depth,
            },
        );
        Ok(self)
    }

    /// Unregister a handler. Tasks already admitted for it fail with `HandlerNotFound`.
    pub fn remove(&self, name: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, name: &str) -> Option<Entry> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl Runner for BeanRunner {
    fn job_type(&self) -> JobType {
        JobType::Bean
    }

    fn prepare(&self, task: &Task) -> Option<PrepareResult> {
        self.entry(&task.handler).map(|e| PrepareResult {
            max_queue_depth: e.max_queue_depth,
        })
    }

    async fn run(&self, ctx: &TaskContext) -> Result<(), RunnerError> {
        let name = &ctx.task().handler;
        let entry = self
            .entry(name)
            .ok_or_else(|| RunnerError::HandlerNotFound(name.clone()))?;

        debug!(handler = %name, task_id = %ctx.task().task_id, "running bean handler");
        (entry.handler)(ctx.clone()).await
    }
}
