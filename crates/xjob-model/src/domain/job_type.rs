use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime backend a task is routed to.
///
/// Exactly one runner may be registered per job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// Handler compiled into the application and looked up by name.
    #[serde(rename = "BEAN")]
    Bean,
    #[serde(rename = "GLUE_NODEJS")]
    NodeJs,
    #[serde(rename = "GLUE_SHELL")]
    Shell,
    #[serde(rename = "GLUE_PYTHON")]
    Python,
    #[serde(rename = "GLUE_PHP")]
    Php,
    #[serde(rename = "GLUE_POWERSHELL")]
    PowerShell,
}

impl JobType {
    /// Wire name of the job type, also used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Bean => "BEAN",
            JobType::NodeJs => "GLUE_NODEJS",
            JobType::Shell => "GLUE_SHELL",
            JobType::Python => "GLUE_PYTHON",
            JobType::Php => "GLUE_PHP",
            JobType::PowerShell => "GLUE_POWERSHELL",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
