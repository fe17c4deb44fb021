use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while classifying spills.
///
/// Connection failures are fatal for the whole invocation. Query failures are
/// scoped to the rule that issued them; whether the remaining rules still run
/// is decided by [`crate::quality::FailurePolicy`].
#[derive(Error, Debug)]
pub enum QualityError {
    #[error("cannot open dataset '{schema}' on '{server}': {source}")]
    Connection {
        server: String,
        schema: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("rule '{rule}' failed on '{schema}' ({server}): {source}")]
    Query {
        server: String,
        schema: String,
        rule: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cannot prepare dataset directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("refusing to clean table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("invalid threshold config: {0}")]
    Config(String),
}

impl QualityError {
    /// Identifier of the failing rule, when the error came from one.
    pub fn rule(&self) -> Option<&'static str> {
        match self {
            QualityError::Query { rule, .. } => Some(rule),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QualityError>;
