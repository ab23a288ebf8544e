use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ModelError;

const MAX_LEN: usize = 64;

/// Name under which an executor registers itself on the scheduler.
///
/// Must match `/^[a-z][-0-9a-z]{0,63}$/i`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn parse(name: &str) -> Result<Self, ModelError> {
        let mut chars = name.chars();
        let valid = name.len() <= MAX_LEN
            && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c == '-' || c.is_ascii_alphanumeric());

        if !valid {
            return Err(ModelError::InvalidAppName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AppName {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        AppName::parse(&s)
    }
}

impl From<AppName> for String {
    fn from(n: AppName) -> Self {
        n.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
