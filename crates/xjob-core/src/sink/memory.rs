use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use xjob_model::{LogRange, TaskId};

use crate::{error::CoreError, sink::LogSink, sync::lock};

/// Shortest sweep period; smaller configured values are raised to it.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Limits of the in-memory log store.
#[derive(Debug, Clone)]
pub struct MemoryLogSinkConfig {
    /// Sections older than this are dropped by the sweeper.
    pub max_age: Duration,
    /// How often the sweeper runs; raised to 1 ms when shorter.
    pub sweep_interval: Duration,
    /// Upper bound of lines returned by a single `get`.
    pub max_lines_at_once: usize,
}

impl Default for MemoryLogSinkConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            max_lines_at_once: 1000,
        }
    }
}

struct Section {
    lines: Vec<String>,
    created_at: Instant,
    closed: bool,
}

/// [`LogSink`] keeping task logs in process memory.
pub struct MemoryLogSink {
    cfg: MemoryLogSinkConfig,
    sections: Arc<Mutex<HashMap<TaskId, Section>>>,
    sweeper: Mutex<Option<CancellationToken>>,
}

impl MemoryLogSink {
    pub fn new(cfg: MemoryLogSinkConfig) -> Self {
        Self {
            cfg,
            sections: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the periodic retention sweep. No-op if already running.
    pub fn start_sweeper(&self) {
        let mut sweeper = lock(&self.sweeper);
        if sweeper.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *sweeper = Some(token.clone());

        let sections = Arc::clone(&self.sections);
        let max_age = self.cfg.max_age;
        let period = self.cfg.sweep_interval.max(MIN_SWEEP_INTERVAL);
        if period != self.cfg.sweep_interval {
            warn!(configured = ?self.cfg.sweep_interval, used = ?period, "log sweep interval raised to minimum");
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = purge(&sections, max_age);
                        if removed > 0 {
                            debug!(removed, "expired log sections swept");
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention sweep. No-op if not running.
    pub fn stop_sweeper(&self) {
        if let Some(token) = lock(&self.sweeper).take() {
            token.cancel();
        }
    }

    /// Drop every section older than `max_age` now; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.sections, self.cfg.max_age)
    }

    pub fn len(&self) -> usize {
        lock(&self.sections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new(MemoryLogSinkConfig::default())
    }
}

impl Drop for MemoryLogSink {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

fn purge(sections: &Mutex<HashMap<TaskId, Section>>, max_age: Duration) -> usize {
    let mut sections = lock(sections);
    let before = sections.len();
    sections.retain(|_, s| s.created_at.elapsed() < max_age);
    before - sections.len()
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn open(&self, task_id: TaskId) -> Result<(), CoreError> {
        lock(&self.sections).entry(task_id).or_insert_with(|| Section {
            lines: Vec::new(),
            created_at: Instant::now(),
            closed: false,
        });
        trace!(%task_id, "log section opened");
        Ok(())
    }

    async fn close(&self, task_id: TaskId) -> Result<(), CoreError> {
        if let Some(s) = lock(&self.sections).get_mut(&task_id) {
            s.closed = true;
        }
        Ok(())
    }

    fn write(&self, task_id: TaskId, level: &str, message: &str) {
        let mut sections = lock(&self.sections);
        match sections.get_mut(&task_id) {
            Some(s) if !s.closed => s.lines.push(format!("[{}] [{level}] {message}", timestamp())),
            _ => {}
        }
    }

    async fn get(
        &self,
        task_id: TaskId,
        start_line: u64,
        _datetime: i64,
    ) -> Result<Option<LogRange>, CoreError> {
        let sections = lock(&self.sections);
        let Some(s) = sections.get(&task_id) else {
            return Ok(None);
        };

        let start_line = start_line.max(1);
        let from = usize::try_from(start_line - 1).unwrap_or(usize::MAX);
        let rest = s.lines.get(from..).unwrap_or(&[]);
        let taken = rest.len().min(self.cfg.max_lines_at_once);

        let mut content = rest[..taken].join("\n");
        content.push('\n');

        Ok(Some(LogRange {
            start_line,
            end_line: start_line - 1 + taken as u64,
            content,
            has_more: !s.closed || taken < rest.len(),
        }))
    }
}
