//! Error types and store failure classification.

use std::borrow::Cow;

use thiserror::Error;

/// SQLSTATE codes the stores report.
pub mod sqlstate {
    /// `unique_violation`
    pub const UNIQUE_VIOLATION: &str = "23505";
    /// `serialization_failure`
    pub const SERIALIZATION_FAILURE: &str = "40001";
    /// Class 23: integrity constraint violation.
    pub const CLASS_INTEGRITY_CONSTRAINT: &str = "23";
    /// Class 40: transaction rollback.
    pub const CLASS_TRANSACTION_ROLLBACK: &str = "40";
}

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Error reported by the SQL driver.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Transaction rejected by a store that reports SQLSTATE codes directly.
    #[error("Store rejected transaction [{sqlstate}]: {message}")]
    Rejected { sqlstate: String, message: String },

    /// Posting request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Terminal category of a failed posting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Constraint race between concurrently chosen identities. Abandon the request.
    IntegrityViolation,
    /// Serializability restart. Retry, then abandon the request.
    TransientConflict,
    /// Anything else. Stop the run.
    Fatal,
}

impl FailureClass {
    /// Whether a worker may continue with its next request.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FailureClass::Fatal)
    }

    /// Classify a SQLSTATE code by its two-character class.
    pub fn from_sqlstate(code: &str) -> Self {
        match code.get(..2) {
            Some(sqlstate::CLASS_INTEGRITY_CONSTRAINT) => FailureClass::IntegrityViolation,
            Some(sqlstate::CLASS_TRANSACTION_ROLLBACK) => FailureClass::TransientConflict,
            _ => FailureClass::Fatal,
        }
    }
}

impl LedgerError {
    /// Unique-key violation raised by a store.
    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::Rejected {
            sqlstate: sqlstate::UNIQUE_VIOLATION.to_string(),
            message: message.into(),
        }
    }

    /// Serialization failure raised by a store.
    pub fn serialization_failure(message: impl Into<String>) -> Self {
        Self::Rejected {
            sqlstate: sqlstate::SERIALIZATION_FAILURE.to_string(),
            message: message.into(),
        }
    }

    /// Invalid request.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// SQLSTATE code carried by this error, if any.
    pub fn sqlstate(&self) -> Option<Cow<'_, str>> {
        match self {
            LedgerError::Database(sqlx::Error::Database(db_err)) => db_err.code(),
            LedgerError::Rejected { sqlstate, .. } => Some(Cow::Borrowed(sqlstate.as_str())),
            _ => None,
        }
    }

    /// Classify this error for the posting loop.
    ///
    /// Only errors carrying a SQLSTATE in class 23 or 40 are recoverable;
    /// driver errors without a code (I/O, pool timeouts, decode failures) are fatal.
    pub fn failure_class(&self) -> FailureClass {
        self.sqlstate()
            .map(|code| FailureClass::from_sqlstate(&code))
            .unwrap_or(FailureClass::Fatal)
    }

    /// Get a stable error code for log lines.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::Rejected { .. } => "STORE_REJECTED",
            LedgerError::InvalidRequest(_) => "INVALID_REQUEST",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            LedgerError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            LedgerError::unique_violation("dup").failure_class(),
            FailureClass::IntegrityViolation
        );
        assert_eq!(
            LedgerError::serialization_failure("restart").failure_class(),
            FailureClass::TransientConflict
        );
        assert_eq!(
            LedgerError::InternalError("boom".into()).failure_class(),
            FailureClass::Fatal
        );
        assert_eq!(
            LedgerError::Database(sqlx::Error::PoolTimedOut).failure_class(),
            FailureClass::Fatal
        );
    }

    #[test]
    fn test_class_prefix() {
        assert_eq!(FailureClass::from_sqlstate("23503"), FailureClass::IntegrityViolation);
        assert_eq!(FailureClass::from_sqlstate("40P01"), FailureClass::TransientConflict);
        assert_eq!(FailureClass::from_sqlstate("42P01"), FailureClass::Fatal);
        assert_eq!(FailureClass::from_sqlstate("4"), FailureClass::Fatal);
        assert!(!FailureClass::Fatal.is_recoverable());
        assert!(FailureClass::TransientConflict.is_recoverable());
    }

    #[test]
    fn test_sqlstate_exposed() {
        let err = LedgerError::serialization_failure("restart");
        assert_eq!(err.sqlstate().as_deref(), Some("40001"));
        assert!(LedgerError::ConfigurationError("x".into()).sqlstate().is_none());
    }

    proptest! {
        #[test]
        fn classification_is_stable(code in "[0-9A-Z]{5}", message in ".*") {
            let err = LedgerError::Rejected { sqlstate: code.clone(), message };
            let first = err.failure_class();
            prop_assert_eq!(first, err.failure_class());
            prop_assert_eq!(first, FailureClass::from_sqlstate(&code));
        }
    }
}
