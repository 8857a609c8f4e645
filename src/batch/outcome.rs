//! Terminal results of a batch.

use std::fmt;

use crate::error::{PoolError, StorageError};

/// A storage rejection raised while applying a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRejection {
    /// Position of the offending record, when the backend can tell.
    pub index: Option<usize>,
    /// What the storage engine reported.
    pub error: StorageError,
}

impl BatchRejection {
    /// Rejection attributed to one record.
    #[must_use]
    pub const fn at(index: usize, error: StorageError) -> Self {
        Self {
            index: Some(index),
            error,
        }
    }

    /// Rejection of the batch statement as a whole.
    #[must_use]
    pub const fn whole_batch(error: StorageError) -> Self {
        Self { index: None, error }
    }
}

impl From<StorageError> for BatchRejection {
    fn from(error: StorageError) -> Self {
        Self::whole_batch(error)
    }
}

/// Where in the `Started → Applying → Committed` sequence a batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Opening the transaction failed.
    Begin,
    /// A record was rejected while applying.
    Applying {
        /// Offending record, when known.
        index: Option<usize>,
    },
    /// The final commit was refused.
    Commit,
}

/// Why a batch was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackCause {
    /// Stage at which the batch failed.
    pub stage: FailureStage,
    /// The underlying storage error.
    pub error: StorageError,
    /// Set if the rollback itself also failed; the connection is then
    /// discarded rather than reused.
    pub rollback_error: Option<StorageError>,
}

impl RollbackCause {
    /// Index of the record that caused the rollback, if known.
    #[must_use]
    pub const fn failed_index(&self) -> Option<usize> {
        match self.stage {
            FailureStage::Applying { index } => index,
            FailureStage::Begin | FailureStage::Commit => None,
        }
    }

    /// Returns `true` if the connection was lost along the way.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        self.error.is_connection_loss()
            || self
                .rollback_error
                .as_ref()
                .is_some_and(StorageError::is_connection_loss)
    }
}

impl fmt::Display for RollbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            FailureStage::Begin => write!(f, "begin failed: {}", self.error),
            FailureStage::Applying { index: Some(i) } => {
                write!(f, "record {i} rejected: {}", self.error)
            }
            FailureStage::Applying { index: None } => {
                write!(f, "batch rejected: {}", self.error)
            }
            FailureStage::Commit => write!(f, "commit failed: {}", self.error),
        }
    }
}

/// Result of one batch: every record persisted, or none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// All records are durable.
    Committed(u64),
    /// No record is durable.
    RolledBack(RollbackCause),
}

impl TransactionOutcome {
    /// Returns `true` for [`TransactionOutcome::Committed`].
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Returns `true` if the batch failed because the connection died.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::Committed(_) => false,
            Self::RolledBack(cause) => cause.is_connection_loss(),
        }
    }

    /// Converts the outcome into a `Result` for `?` propagation.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::RolledBack`] carrying the cause when the batch
    /// was rolled back.
    pub fn into_result(self) -> Result<u64, PoolError> {
        match self {
            Self::Committed(count) => Ok(count),
            Self::RolledBack(cause) => Err(PoolError::RolledBack(cause)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn duplicate() -> StorageError {
        StorageError::ConstraintViolation {
            constraint: None,
            message: "duplicate key".to_string(),
        }
    }

    #[test]
    fn committed_converts_to_count() {
        let Ok(count) = TransactionOutcome::Committed(7).into_result() else {
            panic!("committed is Ok");
        };
        assert_eq!(count, 7);
    }

    #[test]
    fn rolled_back_converts_to_error_with_cause() {
        let outcome = TransactionOutcome::RolledBack(RollbackCause {
            stage: FailureStage::Applying { index: Some(2) },
            error: duplicate(),
            rollback_error: None,
        });
        assert!(!outcome.is_committed());
        let Err(PoolError::RolledBack(cause)) = outcome.into_result() else {
            panic!("rolled back is Err");
        };
        assert_eq!(cause.failed_index(), Some(2));
        assert_eq!(
            cause.to_string(),
            "record 2 rejected: constraint violation: duplicate key"
        );
    }

    #[test]
    fn failed_rollback_on_dead_connection_counts_as_loss() {
        let cause = RollbackCause {
            stage: FailureStage::Commit,
            error: StorageError::Rejected("commit refused".to_string()),
            rollback_error: Some(StorageError::ConnectionLost("eof".to_string())),
        };
        assert!(cause.is_connection_loss());
        assert_eq!(cause.failed_index(), None);
    }

    #[test]
    fn rejection_from_storage_error_has_no_index() {
        let rejection = BatchRejection::from(duplicate());
        assert_eq!(rejection.index, None);
        assert_eq!(BatchRejection::at(4, duplicate()).index, Some(4));
    }
}
