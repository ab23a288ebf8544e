//! Admission policy applied when a task arrives for a job that is already busy.
//!
//! ## Variants
//! - `CoverEarly`: evict everything pending, abort the current task, admit the new one.
//! - `DiscardLater`: if the job is busy, **reject** the new task.
//! - `SerialExecution`: append the new task (FIFO).
//!
//! Any other wire value is kept verbatim in `Unsupported` so the executor can report it back
//! instead of failing the whole request.
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockStrategy {
    CoverEarly,
    DiscardLater,
    SerialExecution,
    Unsupported(String),
}

impl BlockStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            BlockStrategy::CoverEarly => "COVER_EARLY",
            BlockStrategy::DiscardLater => "DISCARD_LATER",
            BlockStrategy::SerialExecution => "SERIAL_EXECUTION",
            BlockStrategy::Unsupported(raw) => raw,
        }
    }
}

impl From<&str> for BlockStrategy {
    fn from(s: &str) -> Self {
        match s {
            "COVER_EARLY" => BlockStrategy::CoverEarly,
            "DISCARD_LATER" => BlockStrategy::DiscardLater,
            "SERIAL_EXECUTION" => BlockStrategy::SerialExecution,
            other => BlockStrategy::Unsupported(other.to_string()),
        }
    }
}

impl From<String> for BlockStrategy {
    fn from(s: String) -> Self {
        BlockStrategy::from(s.as_str())
    }
}

impl From<BlockStrategy> for String {
    fn from(s: BlockStrategy) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for BlockStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
