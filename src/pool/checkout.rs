//! A connection on loan from a [`super::Pool`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

use super::connection_id::ConnectionId;
use super::connection_pool::{PoolInner, PooledConnection};
use super::manager::ConnectionManager;
use crate::error::PoolError;

/// Exclusive use of one pooled connection.
///
/// The connection goes back to the pool exactly once: through
/// [`Checkout::release`], [`super::Pool::release`], or when the checkout is
/// dropped. A connection released mid-transaction is rolled back before any
/// other caller can receive it.
pub struct Checkout<M: ConnectionManager> {
    pool: Arc<PoolInner<M>>,
    id: ConnectionId,
    conn: Option<PooledConnection<M::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    broken: bool,
}

impl<M: ConnectionManager> Checkout<M> {
    pub(crate) fn new(
        pool: Arc<PoolInner<M>>,
        conn: PooledConnection<M::Connection>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            id: conn.id,
            conn: Some(conn),
            permit: Some(permit),
            broken: false,
        }
    }

    /// Identity of the underlying connection. Stays valid after release.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once the connection went back to the pool.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// The connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReleaseProtocolViolation`] after release.
    pub fn connection(&self) -> Result<&M::Connection, PoolError> {
        self.conn
            .as_ref()
            .map(|c| &c.raw)
            .ok_or_else(|| self.released_error("used"))
    }

    /// The connection, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReleaseProtocolViolation`] after release.
    pub fn connection_mut(&mut self) -> Result<&mut M::Connection, PoolError> {
        let id = self.id;
        self.conn.as_mut().map(|c| &mut c.raw).ok_or_else(|| {
            PoolError::ReleaseProtocolViolation(format!("connection {id} used after release"))
        })
    }

    /// Flags the connection as unusable; it is discarded on release.
    pub const fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns the connection to its pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReleaseProtocolViolation`] if it was already
    /// released. Pool bookkeeping is unaffected by the failed call.
    pub fn release(&mut self) -> Result<(), PoolError> {
        let Some(conn) = self.conn.take() else {
            tracing::error!(connection_id = %self.id, "connection released twice");
            return Err(self.released_error("released"));
        };
        tracing::trace!(connection_id = %self.id, broken = self.broken, "connection released");
        self.pool.reclaim(conn, self.permit.take(), self.broken);
        Ok(())
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner<M>>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    fn released_error(&self, action: &str) -> PoolError {
        PoolError::ReleaseProtocolViolation(format!(
            "connection {} {action} after release",
            self.id
        ))
    }
}

impl<M: ConnectionManager> Drop for Checkout<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.reclaim(conn, self.permit.take(), self.broken);
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for Checkout<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::PoolConfig;
    use crate::persistence::memory::{MemoryManager, MemoryStore};
    use crate::pool::Pool;

    async fn pool() -> Pool<MemoryManager> {
        let store = Arc::new(MemoryStore::new());
        let Ok(pool) = Pool::connect(
            MemoryManager::new(store),
            PoolConfig::default().with_max_connections(1),
        )
        .await
        else {
            panic!("memory pool connects");
        };
        pool
    }

    #[tokio::test]
    async fn id_survives_release() {
        let pool = pool().await;
        let Ok(mut checkout) = pool.acquire().await else {
            panic!("acquire");
        };
        let id = checkout.connection_id();
        assert!(checkout.release().is_ok());
        assert_eq!(checkout.connection_id(), id);
        assert!(checkout.connection().is_err());
    }

    #[tokio::test]
    async fn debug_reports_state() {
        let pool = pool().await;
        let Ok(mut checkout) = pool.acquire().await else {
            panic!("acquire");
        };
        checkout.mark_broken();
        let rendered = format!("{checkout:?}");
        assert!(rendered.contains("broken: true"));
        assert!(rendered.contains("released: false"));
    }
}
