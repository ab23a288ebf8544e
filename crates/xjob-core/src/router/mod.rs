use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{debug, instrument};
use xjob_model::JobType;

use crate::{error::CoreError, runner::Runner};

/// Typed registry of runners, one per job type.
#[derive(Default)]
pub struct RunnerRouter {
    runners: RwLock<HashMap<JobType, Arc<dyn Runner>>>,
}

impl RunnerRouter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner; fails if one already serves the same job type.
    #[instrument(level = "debug", skip(self, runner), fields(job_type = %runner.job_type(), runner = runner.name()))]
    pub fn register(&self, runner: Arc<dyn Runner>) -> Result<(), CoreError> {
        let job_type = runner.job_type();
        let mut runners = self.runners.write().unwrap_or_else(PoisonError::into_inner);

        if runners.contains_key(&job_type) {
            return Err(CoreError::DuplicateRunner(job_type));
        }
        runners.insert(job_type, runner);
        debug!("runner registered");
        Ok(())
    }

    pub fn pick(&self, job_type: JobType) -> Option<Arc<dyn Runner>> {
        self.runners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_type)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.runners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
