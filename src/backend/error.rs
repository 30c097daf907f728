//! Backend error types.
//!
//! Everything a transactional resource can report back to the transaction
//! layer. The transaction layer wraps these in its own taxonomy depending on
//! which operation produced them.

use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by a backend or one of its transactions.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend was closed.
    #[error("backend is closed")]
    Closed,

    /// Every connection slot is in use.
    #[error("connection pool exhausted ({max} connections in use)")]
    PoolExhausted { max: usize },

    /// Error from the underlying Git library.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// The query text could not be parsed.
    #[error("sql syntax error: {0}")]
    Sql(String),

    /// The query parsed but cannot be evaluated by this backend.
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    /// Another transaction moved the target branch first.
    #[error("concurrent modification: branch {branch} was updated by another transaction")]
    Conflict { branch: String },

    /// Failure requested through a backend's fault-injection hooks.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Filesystem level error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlparser::parser::ParserError> for BackendError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        BackendError::Sql(e.to_string())
    }
}

impl BackendError {
    /// Check if the backend can no longer hand out transactions.
    pub fn is_closed(&self) -> bool {
        matches!(self, BackendError::Closed)
    }

    /// Check if this error is a capacity or contention problem that may clear up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::PoolExhausted { .. } | BackendError::Conflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BackendError::Closed.is_closed());
        assert!(!BackendError::Closed.is_transient());

        let exhausted = BackendError::PoolExhausted { max: 4 };
        assert!(exhausted.is_transient());
        assert_eq!(
            exhausted.to_string(),
            "connection pool exhausted (4 connections in use)"
        );

        let conflict = BackendError::Conflict { branch: "main".into() };
        assert!(conflict.is_transient());
        assert!(!BackendError::Sql("oops".into()).is_transient());
    }
}
