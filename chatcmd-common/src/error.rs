// ================================================================
// File: chatcmd-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed definition: bad regex, duplicate subcommand arg, two fallbacks, bad option value.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trigger or alias already taken by another command.
    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("Not found error: {0}")]
    NotFound(String),

    /// A restriction predicate failed abnormally.
    #[error("Predicate error: {0}")]
    Predicate(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// True for the registration-time failures that leave the registry untouched.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Validation(format!("invalid regex: {}", err))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<chrono::format::ParseError> for Error {
    fn from(err: chrono::format::ParseError) -> Self {
        Error::Parse(err.to_string())
    }
}
