//! Bounded connection pool with scoped, auto-released checkouts.
//!
//! Capacity is a FIFO-fair [`tokio::sync::Semaphore`]: one permit per
//! connection that is checked out or being opened. Idle connections hold no
//! permit. A [`Checkout`] owns its permit and returns both the permit and
//! the connection exactly once, either through [`Checkout::release`] or on
//! drop.

pub mod checkout;
pub mod connection_id;
pub mod connection_pool;
pub mod manager;

pub use checkout::Checkout;
pub use connection_id::ConnectionId;
pub use connection_pool::{Pool, PoolStats};
pub use manager::ConnectionManager;
