//! How the pool opens and checks connections.

use std::future::Future;

use crate::error::PoolError;
use crate::persistence::TransactionalConnection;

/// Opens and validates connections for a [`super::Pool`].
///
/// The pool owns every connection a manager produces; managers never keep
/// references to them.
pub trait ConnectionManager: Send + Sync + 'static {
    /// The session type handed out to callers.
    type Connection: TransactionalConnection;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, PoolError>> + Send;

    /// Probes an idle connection before it is handed out.
    ///
    /// An `Err` makes the pool discard the connection and try the next one.
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), PoolError>> + Send;

    /// Cheap synchronous check run on release. `true` discards the
    /// connection instead of returning it to the idle set.
    fn has_broken(&self, conn: &mut Self::Connection) -> bool;
}
