//! Transaction error types.

use thiserror::Error;

use crate::backend::BackendError;
use crate::transaction::record::TransactionState;

/// Result type for transaction operations.
pub type TxResult<T> = Result<T, TxError>;

/// Errors that can occur while managing request-scoped transactions.
#[derive(Debug, Error)]
pub enum TxError {
    /// `initialize` was called on a database that already has a backend.
    #[error("database connection already initialized")]
    AlreadyInitialized,

    /// An operation needed the backend before `initialize`.
    #[error("database connection not initialized")]
    NotInitialized,

    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The backend could not begin a transaction.
    #[error("failed to open transaction: {0}")]
    TransactionOpenError(#[source] BackendError),

    /// The context does not carry a transaction.
    #[error("no transaction in context")]
    NoTransactionInContext,

    /// The context already carries a transaction.
    #[error("context already carries transaction {tx_id}")]
    TransactionAlreadyBound { tx_id: String },

    /// The context was created by a different database.
    #[error("transaction {tx_id} belongs to another database")]
    ForeignTransaction { tx_id: String },

    /// The transaction was already committed or rolled back.
    #[error("transaction {tx_id} was already resolved (state: {state})")]
    AlreadyResolved {
        tx_id: String,
        state: TransactionState,
    },

    /// Commit failed.
    #[error("failed to commit transaction: {0}")]
    CommitFailedError(#[source] BackendError),

    /// Rollback failed.
    #[error("failed to rollback transaction: {0}")]
    RollbackFailedError(#[source] BackendError),

    /// A query run through the transaction handle failed.
    #[error("query failed: {0}")]
    Query(#[source] BackendError),

    /// The backend could not be opened or closed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl TxError {
    /// Check if this error comes from using the API in the wrong order,
    /// rather than from the database.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            TxError::NotInitialized
                | TxError::NoTransactionInContext
                | TxError::TransactionAlreadyBound { .. }
                | TxError::ForeignTransaction { .. }
                | TxError::AlreadyResolved { .. }
        )
    }

    /// Check if creating a new transaction may succeed on a later attempt.
    ///
    /// Only opening is retryable: once commit or rollback has been attempted
    /// the outcome on the server is unknown.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TxError::TransactionOpenError(_))
    }

    /// The backend error underneath, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            TxError::TransactionOpenError(e)
            | TxError::CommitFailedError(e)
            | TxError::RollbackFailedError(e)
            | TxError::Query(e)
            | TxError::Backend(e) => Some(e),
            _ => None,
        }
    }
}
