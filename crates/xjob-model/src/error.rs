use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid application name: {0} (expected /^[a-z][-0-9a-z]{{0,63}}$/i)")]
    InvalidAppName(String),
    #[error("unknown result code: {0}")]
    UnknownResultCode(u16),
}
