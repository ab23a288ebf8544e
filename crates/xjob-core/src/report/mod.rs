use std::{future::Future, sync::Arc};

use tracing::trace;
use xjob_model::TaskResult;

use crate::{client::SchedulerClient, error::CoreError, events::Fanout};

/// Fire-and-forget result submission.
#[derive(Clone)]
pub(crate) struct Reporter {
    client: Arc<dyn SchedulerClient>,
    fanout: Arc<Fanout>,
}

impl Reporter {
    pub fn new(client: Arc<dyn SchedulerClient>, fanout: Arc<Fanout>) -> Self {
        Self { client, fanout }
    }

    pub fn submit(&self, at_ms: i64, results: Vec<TaskResult>) {
        if results.is_empty() {
            return;
        }
        for r in &results {
            trace!(task_id = %r.task_id, code = %r.code, msg = r.msg.as_deref().unwrap_or(""), "submitting task result");
        }

        let client = Arc::clone(&self.client);
        self.fanout.background("submit task results", async move {
            client.submit_results(at_ms, results).await
        });
    }

    /// Other fire-and-forget work sharing the same error channel.
    pub fn background<F>(&self, what: &'static str, fut: F)
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.fanout.background(what, fut);
    }
}
