//! In-memory storage engine.
//!
//! [`MemoryStore`] keeps committed rows per table, enforces optional
//! unique keys on a top-level JSON field, and assigns sequence ids the way
//! a database sequence does: ids consumed by a rolled-back batch are not
//! reused. Every session call is counted as one round-trip, and faults
//! (dead sessions, failing connects, slow executes) can be injected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use super::TransactionalConnection;
use super::models::StoredRecord;
use crate::batch::{BatchRejection, BatchTarget};
use crate::error::{PoolError, StorageError};
use crate::pool::ConnectionManager;

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, Vec<StoredRecord>>,
    unique_keys: HashMap<String, String>,
    last_id: i64,
    generation: u64,
}

impl StoreState {
    fn unique_key(&self, table: &str) -> Option<&str> {
        self.unique_keys.get(table).map(String::as_str)
    }

    fn committed_keys(&self, table: &str, field: &str) -> HashSet<String> {
        self.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| key_of(&row.payload, field))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Faults {
    execute_delay: Option<Duration>,
    failing_connects: u32,
    failing_rollbacks: u32,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    pings: AtomicU64,
    round_trips: AtomicU64,
    begins: AtomicU64,
    executes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    fetches: AtomicU64,
}

/// Shared in-memory database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    faults: Mutex<Faults>,
    counters: Counters,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `field` of every document in `table` unique.
    pub fn add_unique_key(&self, table: &str, field: &str) {
        self.state
            .lock()
            .unique_keys
            .insert(table.to_string(), field.to_string());
    }

    /// Committed rows of `table`, ordered by id.
    #[must_use]
    pub fn records(&self, table: &str) -> Vec<StoredRecord> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of committed rows in `table`.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, Vec::len)
    }

    /// Terminates every session opened so far. Their next call fails with
    /// [`StorageError::ConnectionLost`] and their health check fails.
    pub fn break_open_sessions(&self) {
        self.state.lock().generation += 1;
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.faults.lock().failing_connects = n;
    }

    /// Makes the next `n` rollbacks fail while leaving the session alive.
    pub fn fail_next_rollbacks(&self, n: u32) {
        self.faults.lock().failing_rollbacks = n;
    }

    /// Delays every batch execute by `delay` before it touches any row.
    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        self.faults.lock().execute_delay = delay;
    }

    /// Successful connection attempts.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Health-check probes received.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.counters.pings.load(Ordering::SeqCst)
    }

    /// Total session round-trips (begin, execute, commit, rollback, ping,
    /// fetch).
    #[must_use]
    pub fn round_trips(&self) -> u64 {
        self.counters.round_trips.load(Ordering::SeqCst)
    }

    /// Batch execute calls.
    #[must_use]
    pub fn execute_calls(&self) -> u64 {
        self.counters.executes.load(Ordering::SeqCst)
    }

    /// Commit calls.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::SeqCst)
    }

    /// Rollback calls.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    fn count_round_trip(&self, counter: &AtomicU64) {
        self.counters.round_trips.fetch_add(1, Ordering::SeqCst);
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

fn key_of(document: &Value, field: &str) -> Option<String> {
    match document.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn duplicate(table: &str, field: &str, key: &str) -> StorageError {
    StorageError::ConstraintViolation {
        constraint: Some(format!("{table}_{field}_key")),
        message: format!("duplicate key value violates unique constraint: ({field})=({key})"),
    }
}

/// Opens [`MemoryConnection`]s against one [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryManager {
    store: Arc<MemoryStore>,
}

impl MemoryManager {
    /// Creates a manager for `store`.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl ConnectionManager for MemoryManager {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, PoolError> {
        {
            let mut faults = self.store.faults.lock();
            if faults.failing_connects > 0 {
                faults.failing_connects -= 1;
                return Err(PoolError::Connect("connection refused".to_string()));
            }
        }
        self.store.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            store: Arc::clone(&self.store),
            generation: self.store.generation(),
            staged: None,
        })
    }

    async fn is_valid(&self, conn: &mut MemoryConnection) -> Result<(), PoolError> {
        self.store.count_round_trip(&self.store.counters.pings);
        conn.check_alive()
            .map_err(|e| PoolError::ConnectionBroken(e.to_string()))
    }

    fn has_broken(&self, conn: &mut MemoryConnection) -> bool {
        conn.check_alive().is_err()
    }
}

/// One session with a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    generation: u64,
    staged: Option<Vec<(String, StoredRecord)>>,
}

impl MemoryConnection {
    fn check_alive(&self) -> Result<(), StorageError> {
        if self.generation == self.store.generation() {
            Ok(())
        } else {
            Err(StorageError::ConnectionLost(
                "terminating connection due to administrator command".to_string(),
            ))
        }
    }

    fn stage(&mut self, table: &str, records: &[Value]) -> Result<u64, BatchRejection> {
        let mut state = self.store.state.lock();
        let unique = state.unique_key(table).map(str::to_string);
        let mut seen = unique
            .as_deref()
            .map(|field| state.committed_keys(table, field))
            .unwrap_or_default();
        let staged = self.staged.get_or_insert_with(Vec::new);
        if let Some(field) = unique.as_deref() {
            seen.extend(
                staged
                    .iter()
                    .filter(|(t, _)| t == table)
                    .filter_map(|(_, row)| key_of(&row.payload, field)),
            );
        }

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            if !record.is_object() {
                return Err(BatchRejection::at(
                    index,
                    StorageError::TypeMismatch(format!("expected a JSON object, got {record}")),
                ));
            }
            if let Some(field) = unique.as_deref()
                && let Some(key) = key_of(record, field)
                && !seen.insert(key.clone())
            {
                return Err(BatchRejection::at(index, duplicate(table, field, &key)));
            }
            state.last_id += 1;
            rows.push((
                table.to_string(),
                StoredRecord {
                    id: state.last_id,
                    payload: record.clone(),
                    created_at: Utc::now(),
                },
            ));
        }

        let applied = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        staged.extend(rows);
        Ok(applied)
    }
}

impl TransactionalConnection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), StorageError> {
        self.store.count_round_trip(&self.store.counters.begins);
        self.check_alive()?;
        if self.staged.is_some() {
            return Err(StorageError::Rejected(
                "there is already a transaction in progress".to_string(),
            ));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    async fn execute_batch(
        &mut self,
        target: &BatchTarget,
        records: &[Value],
    ) -> Result<u64, BatchRejection> {
        self.store.count_round_trip(&self.store.counters.executes);
        self.check_alive()?;
        if self.staged.is_none() {
            return Err(BatchRejection::whole_batch(StorageError::Rejected(
                "no transaction in progress".to_string(),
            )));
        }
        let delay = self.store.faults.lock().execute_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.stage(target.table(), records)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        self.store.count_round_trip(&self.store.counters.commits);
        self.check_alive()?;
        let Some(staged) = self.staged.take() else {
            return Err(StorageError::Rejected(
                "no transaction in progress".to_string(),
            ));
        };

        let mut state = self.store.state.lock();
        // rows committed by other sessions since staging may now collide
        let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
        for (table, row) in &staged {
            let Some(field) = state.unique_key(table) else {
                continue;
            };
            let keys = seen
                .entry(table.clone())
                .or_insert_with(|| state.committed_keys(table, field));
            if let Some(key) = key_of(&row.payload, field)
                && keys.contains(&key)
            {
                return Err(duplicate(table, field, &key));
            }
        }
        for (table, row) in staged {
            state.tables.entry(table).or_default().push(row);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.store.count_round_trip(&self.store.counters.rollbacks);
        self.staged = None;
        self.check_alive()?;
        let mut faults = self.store.faults.lock();
        if faults.failing_rollbacks > 0 {
            faults.failing_rollbacks -= 1;
            return Err(StorageError::Rejected("rollback refused".to_string()));
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    async fn fetch_records(
        &mut self,
        target: &BatchTarget,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.store.count_round_trip(&self.store.counters.fetches);
        self.check_alive()?;
        Ok(self.store.records(target.table()))
    }
}
