use serde::{Deserialize, Serialize};

/// A slice of a task log, addressed by 1-based line numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRange {
    pub start_line: u64,
    pub end_line: u64,
    /// Always ends with a newline.
    pub content: String,
    /// More lines may follow (task still running, or the read was truncated).
    pub has_more: bool,
}
