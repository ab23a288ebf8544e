//! Common model-level constants.

/// Header carrying the shared access token on every scheduler <-> executor call.
pub const TOKEN_HEADER: &str = "xxl-job-access-token";

/// How many tasks a handler may hold (pending + current) when it does not say otherwise.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 10;
