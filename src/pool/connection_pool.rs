//! The pool itself: bookkeeping, acquire, and reclaim.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::checkout::Checkout;
use super::connection_id::ConnectionId;
use super::manager::ConnectionManager;
use crate::batch::{self, BatchRequest, BatchTarget, TransactionOutcome};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::persistence::TransactionalConnection;
use crate::persistence::models::StoredRecord;

/// A connection plus the identity the pool gave it.
#[derive(Debug)]
pub(crate) struct PooledConnection<C> {
    pub(crate) id: ConnectionId,
    pub(crate) raw: C,
}

impl<C> PooledConnection<C> {
    fn new(raw: C) -> Self {
        Self {
            id: ConnectionId::new(),
            raw,
        }
    }
}

#[derive(Debug)]
struct IdleConnection<C> {
    conn: PooledConnection<C>,
    idle_since: Instant,
}

/// Idle, checked-out, and in-flight connections.
///
/// `idle.len() + checked_out.len() + pending` never exceeds the pool size:
/// a connection is only opened by a permit holder that found `idle` empty.
#[derive(Debug)]
struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    checked_out: HashSet<ConnectionId>,
    pending: usize,
    closed: bool,
}

/// Shared core behind [`Pool`] handles and live [`Checkout`]s.
pub(crate) struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<M::Connection>>,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn reserve(&self) -> Result<(Option<IdleConnection<M::Connection>>, Reservation<'_, M>), PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        let idle = state.idle.pop_back();
        state.pending += 1;
        Ok((
            idle,
            Reservation {
                inner: self,
                active: true,
            },
        ))
    }

    /// Takes back a connection whose checkout ended.
    ///
    /// Broken connections are dropped. A connection still inside a
    /// transaction is rolled back on a background task that keeps the
    /// permit until the connection is idle again.
    pub(crate) fn reclaim(
        self: &Arc<Self>,
        mut conn: PooledConnection<M::Connection>,
        permit: Option<OwnedSemaphorePermit>,
        broken: bool,
    ) {
        if broken || self.manager.has_broken(&mut conn.raw) {
            tracing::debug!(connection_id = %conn.id, "discarding broken connection");
            self.finish(conn.id, None);
            drop(permit);
            return;
        }

        if conn.raw.in_transaction() {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(
                    connection_id = %conn.id,
                    "no runtime to roll back open transaction; discarding connection"
                );
                self.finish(conn.id, None);
                drop(permit);
                return;
            };
            tracing::warn!(
                connection_id = %conn.id,
                "connection released inside an open transaction; rolling back"
            );
            let inner = Arc::clone(self);
            runtime.spawn(async move {
                let mut conn = conn;
                match conn.raw.rollback().await {
                    Ok(()) => inner.finish(conn.id, Some(conn)),
                    Err(error) => {
                        tracing::warn!(connection_id = %conn.id, %error, "rollback on release failed");
                        inner.finish(conn.id, None);
                    }
                }
                drop(permit);
            });
            return;
        }

        self.finish(conn.id, Some(conn));
        drop(permit);
    }

    /// Moves `id` out of the checked-out set and, if given, its connection
    /// into the idle set.
    fn finish(&self, id: ConnectionId, keep: Option<PooledConnection<M::Connection>>) {
        let mut state = self.state.lock();
        if !state.checked_out.remove(&id) {
            tracing::error!(connection_id = %id, "reclaimed connection was not checked out");
        }
        let discarded = match keep {
            Some(conn) if !state.closed => {
                state.idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            }
            other => other,
        };
        drop(state);
        drop(discarded);
    }

    fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            max_size: self.config.max_connections,
            idle: state.idle.len(),
            checked_out: state.checked_out.len(),
            pending: state.pending,
        }
    }
}

/// A slot taken while a connection is being probed or opened.
///
/// Dropping it unfinished (error or cancellation) gives the slot back.
struct Reservation<'a, M: ConnectionManager> {
    inner: &'a PoolInner<M>,
    active: bool,
}

impl<M: ConnectionManager> Reservation<'_, M> {
    fn complete(mut self, id: ConnectionId) {
        let mut state = self.inner.state.lock();
        state.pending = state.pending.saturating_sub(1);
        state.checked_out.insert(id);
        self.active = false;
    }
}

impl<M: ConnectionManager> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.active {
            let mut state = self.inner.state.lock();
            state.pending = state.pending.saturating_sub(1);
        }
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured capacity.
    pub max_size: u32,
    /// Connections waiting in the idle set.
    pub idle: usize,
    /// Connections currently held by callers.
    pub checked_out: usize,
    /// Connections being opened or health-checked.
    pub pending: usize,
}

impl PoolStats {
    /// Live connections: idle plus checked out plus in flight.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.idle + self.checked_out + self.pending
    }
}

/// Bounded pool of storage connections.
///
/// Cheap to clone; all clones share the same connections.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Pool<M> {
    /// Builds a pool and opens `min_connections` connections up front.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] for inconsistent sizing, or the
    /// manager's error if a warm-up connection cannot be opened.
    pub async fn connect(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let capacity = usize::try_from(config.max_connections)
            .map_err(|_| PoolError::Config("max_connections out of range".to_string()))?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                manager,
                semaphore: Arc::new(Semaphore::new(capacity)),
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(capacity),
                    checked_out: HashSet::with_capacity(capacity),
                    pending: 0,
                    closed: false,
                }),
                config,
            }),
        };

        for _ in 0..pool.inner.config.min_connections {
            let conn = PooledConnection::new(pool.inner.manager.connect().await?);
            tracing::debug!(connection_id = %conn.id, "opened warm connection");
            pool.inner.state.lock().idle.push_back(IdleConnection {
                conn,
                idle_since: Instant::now(),
            });
        }

        tracing::info!(
            max_connections = pool.inner.config.max_connections,
            min_connections = pool.inner.config.min_connections,
            health_check = %pool.inner.config.health_check,
            "connection pool ready"
        );
        Ok(pool)
    }

    /// Checks out a connection, waiting for capacity if the pool is
    /// saturated. Waiters are served in arrival order.
    ///
    /// Idle connections are probed according to the health check policy;
    /// dead ones are discarded and replaced without the caller noticing.
    /// Dropping the returned future while it waits consumes no capacity.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PoolExhausted`] if nothing became available
    /// within the acquire timeout, [`PoolError::Closed`] after
    /// [`Pool::close`], or the manager's error if a new connection could not
    /// be opened.
    pub async fn acquire(&self) -> Result<Checkout<M>, PoolError> {
        let started = Instant::now();
        match tokio::time::timeout(self.inner.config.acquire_timeout, self.acquire_inner()).await
        {
            Ok(result) => result,
            Err(_) => {
                let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(waited_ms, stats = ?self.stats(), "acquire timed out");
                Err(PoolError::PoolExhausted { waited_ms })
            }
        }
    }

    async fn acquire_inner(&self) -> Result<Checkout<M>, PoolError> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        loop {
            let (candidate, reservation) = self.inner.reserve()?;
            let conn = match candidate {
                Some(IdleConnection { mut conn, idle_since }) => {
                    if self
                        .inner
                        .config
                        .health_check
                        .should_probe(idle_since.elapsed())
                        && let Err(error) = self.inner.manager.is_valid(&mut conn.raw).await
                    {
                        tracing::warn!(connection_id = %conn.id, %error, "discarding dead idle connection");
                        continue;
                    }
                    conn
                }
                None => {
                    let conn = PooledConnection::new(self.inner.manager.connect().await?);
                    tracing::debug!(connection_id = %conn.id, "opened connection");
                    conn
                }
            };
            reservation.complete(conn.id);
            tracing::trace!(connection_id = %conn.id, "connection checked out");
            return Ok(Checkout::new(Arc::clone(&self.inner), conn, permit));
        }
    }

    /// Returns a checkout's connection to this pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReleaseProtocolViolation`] if the checkout was
    /// already released or came from a different pool. The checkout is left
    /// untouched in the latter case.
    pub fn release(&self, checkout: &mut Checkout<M>) -> Result<(), PoolError> {
        if !checkout.belongs_to(&self.inner) {
            tracing::error!(connection_id = %checkout.connection_id(), "checkout released to a foreign pool");
            return Err(PoolError::ReleaseProtocolViolation(format!(
                "connection {} does not belong to this pool",
                checkout.connection_id()
            )));
        }
        checkout.release()
    }

    /// Runs `work` with a checked-out connection and releases it afterwards,
    /// whether `work` succeeds or fails.
    ///
    /// # Errors
    ///
    /// Returns the acquire error, the error of `work`, or
    /// [`PoolError::ReleaseProtocolViolation`] if `work` released the
    /// checkout itself. An error from `work` takes precedence.
    pub async fn scope<T, F>(&self, work: F) -> Result<T, PoolError>
    where
        F: for<'c> FnOnce(&'c mut Checkout<M>) -> BoxFuture<'c, Result<T, PoolError>>,
    {
        let mut checkout = self.acquire().await?;
        let result = work(&mut checkout).await;
        let released = checkout.release();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Acquires a connection, writes `request` atomically, and releases.
    ///
    /// A batch that lost its connection, or whose rollback failed, discards
    /// that connection.
    ///
    /// # Errors
    ///
    /// Returns acquire errors. Storage rejections are not errors here; they
    /// come back as [`TransactionOutcome::RolledBack`].
    pub async fn write_batch(&self, request: BatchRequest) -> Result<TransactionOutcome, PoolError> {
        let mut checkout = self.acquire().await?;
        let outcome = batch::write_batch(checkout.connection_mut()?, request).await;
        let rollback_failed = matches!(
            &outcome,
            TransactionOutcome::RolledBack(cause) if cause.rollback_error.is_some()
        );
        if rollback_failed || outcome.is_connection_loss() {
            checkout.mark_broken();
        }
        checkout.release()?;
        Ok(outcome)
    }

    /// Acquires a connection, reads every committed record of `target`,
    /// and releases.
    ///
    /// # Errors
    ///
    /// Returns acquire errors or [`PoolError::Storage`] if the read fails.
    pub async fn fetch_records(&self, target: &BatchTarget) -> Result<Vec<StoredRecord>, PoolError> {
        let mut checkout = self.acquire().await?;
        let result = checkout.connection_mut()?.fetch_records(target).await;
        if let Err(error) = &result
            && error.is_connection_loss()
        {
            checkout.mark_broken();
        }
        checkout.release()?;
        Ok(result?)
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// The manager this pool opens connections with.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Stops handing out connections and drops idle ones. Outstanding
    /// checkouts stay valid; their connections are dropped on release.
    pub fn close(&self) {
        self.inner.semaphore.close();
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.idle.drain(..).collect()
        };
        tracing::info!(closed_idle = drained.len(), "connection pool closed");
    }

    /// Returns `true` once [`Pool::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
