//! Persistence layer: the storage contract plus its two backends.
//!
//! [`TransactionalConnection`] is everything the batch writer and the pool
//! need from one live storage session. The PostgreSQL implementation uses
//! `sqlx::PgConnection`; the in-memory one backs local dry runs and counts
//! every round-trip so tests can assert on protocol usage.

pub mod memory;
pub mod models;
pub mod postgres;

use std::future::Future;

use crate::batch::{BatchRejection, BatchTarget};
use crate::error::StorageError;
use models::StoredRecord;

/// One live session with durable storage.
///
/// A session is owned by exactly one caller at a time (enforced by the
/// pool's checkout), so implementations need no internal locking.
pub trait TransactionalConnection: Send + 'static {
    /// Opens a transaction boundary.
    fn begin(&mut self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Applies every record, in order, inside the open transaction using a
    /// single round-trip. Returns the number of rows written.
    fn execute_batch(
        &mut self,
        target: &BatchTarget,
        records: &[serde_json::Value],
    ) -> impl Future<Output = Result<u64, BatchRejection>> + Send;

    /// Commits the open transaction.
    fn commit(&mut self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Returns `true` while a transaction is open on this session.
    fn in_transaction(&self) -> bool;

    /// Reads every committed record of `target`, ordered by sequence id.
    fn fetch_records(
        &mut self,
        target: &BatchTarget,
    ) -> impl Future<Output = Result<Vec<StoredRecord>, StorageError>> + Send;
}
