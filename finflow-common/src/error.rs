//! Common error types for finflow
//!
//! One variant per failure class the pipelines distinguish. Stage code
//! decides retry behavior through [`Error::is_retryable`]; everything
//! else propagates with `?`.

use thiserror::Error;

/// Common result type for finflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the finflow pipeline stages
#[derive(Error, Debug)]
pub enum Error {
    /// Source connectivity loss (transient, retryable)
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Unreadable source payload (fatal for the batch, not retryable)
    #[error("Source format error: {0}")]
    SourceFormat(String),

    /// Attempt to re-register an existing contract version
    #[error("Registry conflict: contract {domain} v{version} already registered")]
    RegistryConflict { domain: String, version: u32 },

    /// Conflicting dimensional row at the same effective date
    #[error("Load conflict: {0}")]
    LoadConflict(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a stage failure with this error is worth retrying.
    ///
    /// SourceUnavailable covers transient connectivity loss. Database
    /// lock contention shows up as a sqlx error containing
    /// "database is locked" and clears on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SourceUnavailable(_) => true,
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_unavailable_is_retryable() {
        assert!(Error::SourceUnavailable("connection refused".into()).is_retryable());
    }

    #[test]
    fn format_and_registry_errors_are_fatal() {
        assert!(!Error::SourceFormat("bad header row".into()).is_retryable());
        assert!(!Error::RegistryConflict {
            domain: "dre_lancamentos".into(),
            version: 1
        }
        .is_retryable());
        assert!(!Error::LoadConflict("divergent attributes".into()).is_retryable());
    }
}
