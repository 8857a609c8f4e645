//! Pool and storage error types.
//!
//! [`PoolError`] is the central error type of the crate. Storage-level
//! rejections are described by [`StorageError`] and only ever reach callers
//! wrapped in a rolled-back batch outcome.

use crate::batch::RollbackCause;

/// Rejection reported by the storage engine for a single statement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// A uniqueness, foreign key, not-null or check constraint rejected a row.
    #[error("constraint violation{}: {message}", constraint_suffix(.constraint))]
    ConstraintViolation {
        /// Name of the violated constraint, when the engine reports one.
        constraint: Option<String>,
        /// Engine-provided message.
        message: String,
    },

    /// A value did not match the column type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The engine aborted the transaction on a serialization conflict, or a
    /// record could not be encoded for the wire.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// The connection dropped while a statement was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Any other rejection.
    #[error("storage rejected statement: {0}")]
    Rejected(String),
}

#[allow(clippy::ref_option)]
fn constraint_suffix(constraint: &Option<String>) -> String {
    constraint
        .as_deref()
        .map(|c| format!(" on {c}"))
        .unwrap_or_default()
}

impl StorageError {
    /// Returns `true` if the error means the connection itself is unusable.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Pool, batch, and configuration errors.
///
/// # Error Code Ranges
///
/// | Range     | Category        | Recoverable by caller |
/// |-----------|-----------------|-----------------------|
/// | 1000–1999 | Request / config| no                    |
/// | 2000–2999 | Pool capacity   | yes (retry)           |
/// | 3000–3999 | Storage         | depends on cause      |
/// | 4000–4999 | Caller bugs     | no                    |
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection became available before the acquire timeout.
    #[error("pool exhausted: no connection available after {waited_ms} ms")]
    PoolExhausted {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// The pool has been closed.
    #[error("pool is closed")]
    Closed,

    /// Opening a new connection failed.
    #[error("failed to open connection: {0}")]
    Connect(String),

    /// A connection was found dead during a health check or mid-use.
    #[error("connection broken: {0}")]
    ConnectionBroken(String),

    /// A batch was rolled back; nothing from it was persisted.
    #[error("batch rolled back: {0}")]
    RolledBack(RollbackCause),

    /// A storage operation outside a batch failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A checkout was released twice, released to the wrong pool, or used
    /// after release.
    #[error("release protocol violation: {0}")]
    ReleaseProtocolViolation(String),

    /// The request could not be turned into a batch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Config(_) => 1002,
            Self::PoolExhausted { .. } => 2001,
            Self::Closed => 2002,
            Self::Connect(_) => 3001,
            Self::ConnectionBroken(_) => 3002,
            Self::RolledBack(_) => 3003,
            Self::Storage(_) => 3004,
            Self::ReleaseProtocolViolation(_) => 4001,
        }
    }

    /// Returns `true` if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::Connect(_) | Self::ConnectionBroken(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violation_display_names_constraint() {
        let err = StorageError::ConstraintViolation {
            constraint: Some("products_raw_product_id_key".to_string()),
            message: "duplicate key".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "constraint violation on products_raw_product_id_key: duplicate key"
        );

        let anonymous = StorageError::ConstraintViolation {
            constraint: None,
            message: "duplicate key".to_string(),
        };
        assert_eq!(anonymous.to_string(), "constraint violation: duplicate key");
    }

    #[test]
    fn only_connection_lost_is_connection_loss() {
        assert!(StorageError::ConnectionLost("eof".to_string()).is_connection_loss());
        assert!(!StorageError::TypeMismatch("int".to_string()).is_connection_loss());
    }

    #[test]
    fn codes_follow_ranges() {
        assert_eq!(PoolError::PoolExhausted { waited_ms: 5 }.error_code(), 2001);
        assert_eq!(
            PoolError::ReleaseProtocolViolation("twice".to_string()).error_code(),
            4001
        );
        assert_eq!(PoolError::Config("min > max".to_string()).error_code(), 1002);
    }

    #[test]
    fn exhaustion_is_recoverable_but_protocol_violation_is_not() {
        assert!(PoolError::PoolExhausted { waited_ms: 1 }.is_recoverable());
        assert!(!PoolError::ReleaseProtocolViolation("x".to_string()).is_recoverable());
        assert!(!PoolError::Closed.is_recoverable());
    }
}
