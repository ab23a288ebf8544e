use serde::{Deserialize, Serialize};

use crate::ResultCode;

/// Synchronous reply of an executor operation.
///
/// `code` is the outcome at the call boundary; execution outcomes of admitted
/// tasks are reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOpResult<T = ()> {
    pub code: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> JobOpResult<T> {
    pub fn ok() -> Self {
        Self {
            code: ResultCode::Ok,
            msg: None,
            data: None,
        }
    }

    pub fn with_data(data: T) -> Self {
        Self {
            code: ResultCode::Ok,
            msg: None,
            data: Some(data),
        }
    }

    pub fn error(code: ResultCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: Some(msg.into()),
            data: None,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}
