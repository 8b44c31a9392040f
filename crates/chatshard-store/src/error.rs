//! Store error types and the reconcilable/terminal classification.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the store adapter.
///
/// Every failure is tagged with how the caller should react: reconcilable
/// errors are transient and safe to retry, terminal errors mean a logical
/// precondition did not hold and retrying cannot help.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A lookup matched no rows where the caller can act on absence
    /// (e.g. "no free migration worker", "no controller registered yet").
    #[error("no rows")]
    NoRows,

    /// Constraint violation, zero rows affected on a precondition-bearing
    /// write, or a decode failure. Not retryable.
    #[error("terminal store error: {0}")]
    Terminal(String),

    /// Transient engine or connection failure. Safe to retry.
    #[error("reconcilable store error: {0}")]
    Reconcilable(String),

    /// The operation's context was cancelled between retry attempts.
    #[error("store operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Whether the retrying wrapper may try this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Reconcilable(_))
    }
}

// Postgres error codes that indicate a logical bug or a lost race rather
// than a transient fault.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NOT_NULL_VIOLATION: &str = "23502";

/// Whether a SQLSTATE code marks the failure as terminal.
pub(crate) fn is_terminal_code(code: &str) -> bool {
    matches!(
        code,
        UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION | NOT_NULL_VIOLATION
    )
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NoRows,
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if is_terminal_code(&code) => StoreError::Terminal(db.to_string()),
                _ => StoreError::Reconcilable(db.to_string()),
            },
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Terminal(err.to_string()),
            _ => StoreError::Reconcilable(err.to_string()),
        }
    }
}
