use thiserror::Error;

/// Status codes reported by the underlying document store.
///
/// Mirrors the gRPC status set the managed service speaks. Retry decisions
/// key off these codes, never off message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    Unauthenticated,
    Unknown,
}

impl ErrorCode {
    /// Transient codes worth retrying. Everything else is deterministic:
    /// retrying cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::DeadlineExceeded
                | Self::ResourceExhausted
                | Self::Aborted
                | Self::Internal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed write inside a batch operation.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Document '{id}' not found in collection '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Batch operation failed: {failed} of {total} writes failed")]
    Batch {
        total: usize,
        failed: usize,
        failures: Vec<BatchFailure>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Incompatible runtime: {0}")]
    IncompatibleRuntime(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Backend error ({code}): {message}")]
    Backend { code: ErrorCode, message: String },
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn backend(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Status code carried by this error, if the store reported one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Backend { code, .. } => Some(*code),
            Self::NotFound { .. } => Some(ErrorCode::NotFound),
            _ => None,
        }
    }

    /// Whether the backoff executor may retry this error.
    ///
    /// Only transport-level failures with a whitelisted status code qualify.
    /// Logical errors (not-found, precondition failures, validation) are
    /// deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { code, .. } => code.is_retryable(),
            _ => false,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::Unavailable.is_retryable());
        assert!(ErrorCode::DeadlineExceeded.is_retryable());
        assert!(ErrorCode::ResourceExhausted.is_retryable());
        assert!(ErrorCode::Aborted.is_retryable());
        assert!(ErrorCode::Internal.is_retryable());

        assert!(!ErrorCode::NotFound.is_retryable());
        assert!(!ErrorCode::InvalidArgument.is_retryable());
        assert!(!ErrorCode::PermissionDenied.is_retryable());
    }

    #[test]
    fn test_error_retryability() {
        let transient = DbError::backend(ErrorCode::Unavailable, "service down");
        assert!(transient.is_retryable());

        let logical = DbError::not_found("users", "u1");
        assert!(!logical.is_retryable());
        assert_eq!(logical.code(), Some(ErrorCode::NotFound));

        let validation = DbError::Validation("empty collection path".into());
        assert!(!validation.is_retryable());
        assert_eq!(validation.code(), None);
    }

    #[test]
    fn test_batch_error_carries_failures() {
        let err = DbError::Batch {
            total: 3,
            failed: 1,
            failures: vec![BatchFailure {
                id: "doc-2".into(),
                error: "missing".into(),
            }],
        };

        match err {
            DbError::Batch { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, "doc-2");
            }
            _ => unreachable!(),
        }
    }
}
