use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("a handler named {0:?} is already registered")]
    HandlerExists(String),
    #[error("queue depth of handler {0:?} must be at least 1")]
    InvalidDepth(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
