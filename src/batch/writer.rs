//! All-or-nothing batch application on one connection.

use crate::error::StorageError;
use crate::persistence::TransactionalConnection;

use super::outcome::{BatchRejection, FailureStage, RollbackCause, TransactionOutcome};
use super::request::BatchRequest;

/// Applies `request` atomically on `conn`.
///
/// The batch moves through `Started → Applying → {Committed | RolledBack}`:
/// one `begin`, one batched `execute` carrying every record, then one
/// `commit`. Any rejection rolls the whole transaction back, including
/// records that would have succeeded on their own. An empty request commits
/// `0` without touching storage.
///
/// A row count that differs from the number of records is treated as a
/// rejection.
pub async fn write_batch<C>(conn: &mut C, request: BatchRequest) -> TransactionOutcome
where
    C: TransactionalConnection,
{
    let (target, records) = request.into_parts();
    let expected = u64::try_from(records.len()).unwrap_or(u64::MAX);

    if records.is_empty() {
        tracing::debug!(%target, "empty batch, nothing to write");
        return TransactionOutcome::Committed(0);
    }

    if let Err(error) = conn.begin().await {
        tracing::warn!(%target, %error, "could not open transaction");
        return TransactionOutcome::RolledBack(RollbackCause {
            stage: FailureStage::Begin,
            error,
            rollback_error: None,
        });
    }

    let rejection = match conn.execute_batch(&target, &records).await {
        Ok(rows) if rows == expected => None,
        Ok(rows) => Some(BatchRejection::whole_batch(StorageError::Rejected(format!(
            "storage applied {rows} of {expected} records"
        )))),
        Err(rejection) => Some(rejection),
    };

    if let Some(BatchRejection { index, error }) = rejection {
        let rollback_error = roll_back(conn).await;
        tracing::warn!(%target, records = expected, ?index, %error, "batch rolled back");
        return TransactionOutcome::RolledBack(RollbackCause {
            stage: FailureStage::Applying { index },
            error,
            rollback_error,
        });
    }

    match conn.commit().await {
        Ok(()) => {
            tracing::info!(%target, records = expected, "batch committed");
            TransactionOutcome::Committed(expected)
        }
        Err(error) => {
            let rollback_error = if conn.in_transaction() {
                roll_back(conn).await
            } else {
                None
            };
            tracing::warn!(%target, records = expected, %error, "commit refused, batch rolled back");
            TransactionOutcome::RolledBack(RollbackCause {
                stage: FailureStage::Commit,
                error,
                rollback_error,
            })
        }
    }
}

async fn roll_back<C: TransactionalConnection>(conn: &mut C) -> Option<StorageError> {
    match conn.rollback().await {
        Ok(()) => None,
        Err(error) => {
            tracing::error!(%error, "rollback failed");
            Some(error)
        }
    }
}
