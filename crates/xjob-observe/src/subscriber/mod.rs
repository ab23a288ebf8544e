mod view;
pub use view::{View, log_event, message_for};

use xjob_core::{Event, Subscribe};

/// Renders executor events as tracing records.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSubscriber;

impl LogSubscriber {
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for LogSubscriber {
    fn on_event(&self, event: &Event) {
        log_event(event);
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
