//! Worker-side runtime of a server-push job scheduler.
//!
//! The scheduler pushes task invocations; the [`Executor`] admits them into one
//! queue per job, runs them through the [`Runner`] registered for their job type
//! and reports every outcome asynchronously through a [`SchedulerClient`].
pub mod error;
pub use error::{CoreError, RunnerError};

pub mod runner;
pub use runner::{PrepareResult, Runner};

pub mod router;
pub use router::RunnerRouter;

pub mod sink;
pub use sink::{LogSink, MemoryLogSink, MemoryLogSinkConfig};

pub mod client;
pub use client::SchedulerClient;

pub mod events;
pub use events::{Event, EventKind, Subscribe};

mod report;

pub mod context;
pub use context::{CloseReason, TaskContext};

mod queue;

pub mod executor;
pub use executor::{Executor, ExecutorBuilder};

pub(crate) mod sync {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Lock ignoring poisoning: guarded state is only mutated in short, panic-free sections.
    #[inline]
    pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
