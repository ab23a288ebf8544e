use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Result codes exchanged with the scheduler.
///
/// Serialized as the numeric wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResultCode {
    Ok,
    BadRequest,
    Unauthorized,
    ExecutorBusy,
    TaskNotRunnable,
    LogNotFound,
    JobQueueTooDeep,
    JobTypeUnsupported,
    TaskDiscarded,
    JobKilled,
    HandlerFailed,
    InternalServerError,
}

impl ResultCode {
    /// Numeric code on the wire.
    pub fn code(self) -> u16 {
        match self {
            ResultCode::Ok => 200,
            ResultCode::BadRequest => 400,
            ResultCode::Unauthorized => 401,
            ResultCode::ExecutorBusy => 402,
            ResultCode::TaskNotRunnable => 403,
            ResultCode::LogNotFound => 404,
            ResultCode::JobQueueTooDeep => 405,
            ResultCode::JobTypeUnsupported => 406,
            ResultCode::TaskDiscarded => 407,
            ResultCode::JobKilled => 408,
            ResultCode::HandlerFailed => 409,
            ResultCode::InternalServerError => 410,
        }
    }

    /// Symbolic name, used for logging.
    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::BadRequest => "BAD_REQUEST",
            ResultCode::Unauthorized => "UNAUTHORIZED",
            ResultCode::ExecutorBusy => "EXECUTOR_BUSY",
            ResultCode::TaskNotRunnable => "TASK_NOT_RUNNABLE",
            ResultCode::LogNotFound => "LOG_NOT_FOUND",
            ResultCode::JobQueueTooDeep => "JOB_QUEUE_TOO_DEEP",
            ResultCode::JobTypeUnsupported => "JOB_TYPE_UNSUPPORTED",
            ResultCode::TaskDiscarded => "TASK_DISCARDED",
            ResultCode::JobKilled => "JOB_KILLED",
            ResultCode::HandlerFailed => "HANDLER_FAILED",
            ResultCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl From<ResultCode> for u16 {
    fn from(c: ResultCode) -> Self {
        c.code()
    }
}

impl TryFrom<u16> for ResultCode {
    type Error = ModelError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        let code = match v {
            200 => ResultCode::Ok,
            400 => ResultCode::BadRequest,
            401 => ResultCode::Unauthorized,
            402 => ResultCode::ExecutorBusy,
            403 => ResultCode::TaskNotRunnable,
            404 => ResultCode::LogNotFound,
            405 => ResultCode::JobQueueTooDeep,
            406 => ResultCode::JobTypeUnsupported,
            407 => ResultCode::TaskDiscarded,
            408 => ResultCode::JobKilled,
            409 => ResultCode::HandlerFailed,
            410 => ResultCode::InternalServerError,
            other => return Err(ModelError::UnknownResultCode(other)),
        };
        Ok(code)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_wire_numbering() {
        assert_eq!(ResultCode::Ok.code(), 200);
        assert_eq!(ResultCode::BadRequest.code(), 400);
        assert_eq!(ResultCode::HandlerFailed.code(), 409);
        assert_eq!(ResultCode::InternalServerError.code(), 410);
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(
            ResultCode::try_from(418),
            Err(ModelError::UnknownResultCode(418))
        );
        assert!(serde_json::from_str::<ResultCode>("499").is_err());
    }

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_string(&ResultCode::JobKilled).unwrap(), "408");
        let back: ResultCode = serde_json::from_str("402").unwrap();
        assert_eq!(back, ResultCode::ExecutorBusy);
    }
}
