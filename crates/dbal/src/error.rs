//! Error types for dbal

use thiserror::Error;

/// Result type alias for dbal operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for database access
#[derive(Debug, Error)]
pub enum DbError {
    /// Missing or malformed endpoint definition
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Endpoint unreachable or connection lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Conflicting statement kind or malformed field/function expression
    #[error("Query compilation error: {0}")]
    Compilation(String),

    /// Unresolved placeholder at execute time, or a token bound twice
    #[error("Binding mismatch: {0}")]
    BindingMismatch(String),

    /// Driver-level failure, including constraint violations
    #[error("Execution error: {0}")]
    Execution(String),

    /// Every attempt of a transactional unit of work failed
    #[error("Transaction aborted after {attempts} attempt(s): {source}")]
    TransactionAborted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl DbError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a compilation error
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation(message.into())
    }

    /// Create a binding mismatch error
    pub fn binding_mismatch(message: impl Into<String>) -> Self {
        Self::BindingMismatch(message.into())
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a connection error
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if this is a compilation error
    pub fn is_compilation(&self) -> bool {
        matches!(self, Self::Compilation(_))
    }

    /// Check if this is a binding mismatch error
    pub fn is_binding_mismatch(&self) -> bool {
        matches!(self, Self::BindingMismatch(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is an aborted transaction
    pub fn is_transaction_aborted(&self) -> bool {
        matches!(self, Self::TransactionAborted { .. })
    }

    /// The error that ended the last attempt, for aborted transactions.
    ///
    /// Returns `self` for every other variant.
    pub fn last_failure(&self) -> &DbError {
        match self {
            Self::TransactionAborted { source, .. } => source.last_failure(),
            other => other,
        }
    }
}

#[cfg(feature = "mysql")]
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Configuration(_) => Self::Configuration(err.to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            sqlx::Error::ColumnDecode { index, source } => Self::decode(index.clone(), source.to_string()),
            _ => Self::Execution(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_failure_unwraps_aborted_transactions() {
        let err = DbError::TransactionAborted {
            attempts: 3,
            source: Box::new(DbError::execution("duplicate key")),
        };
        assert!(err.is_transaction_aborted());
        assert!(matches!(err.last_failure(), DbError::Execution(m) if m == "duplicate key"));
        assert_eq!(
            err.to_string(),
            "Transaction aborted after 3 attempt(s): Execution error: duplicate key"
        );
    }

    #[test]
    fn last_failure_is_identity_for_plain_errors() {
        let err = DbError::connection("refused");
        assert!(err.is_connection());
        assert!(err.last_failure().is_connection());
    }
}
