//! # pgbatch
//!
//! Bounded connection pool with scoped checkouts, plus an all-or-nothing
//! batch writer for JSON documents.
//!
//! A [`pool::Pool`] hands out at most `max_connections` connections, serves
//! blocked callers in arrival order, and takes every connection back exactly
//! once, whether the caller releases it explicitly, drops it, or is
//! cancelled mid-transaction. [`batch::write_batch`] inserts an ordered set
//! of records inside one transaction in one round-trip: either all become
//! visible or none do.
//!
//! ## Architecture
//!
//! ```text
//! CLI (main.rs)
//!     │
//!     ├── Pool<M: ConnectionManager> (pool/)
//!     │       └── Checkout (auto-released on drop)
//!     │
//!     ├── write_batch → TransactionOutcome (batch/)
//!     │
//!     └── TransactionalConnection (persistence/)
//!             ├── PgSession (sqlx, PostgreSQL)
//!             └── MemoryConnection (in-process)
//! ```

pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod pool;
