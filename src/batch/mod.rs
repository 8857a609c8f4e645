//! Transactional batch writes.
//!
//! A [`BatchRequest`] is written by [`write_batch`] inside a single
//! transaction. Either every record becomes visible or none does; the
//! result is reported as a [`TransactionOutcome`] value rather than an
//! error so callers always learn which stage failed.

pub mod outcome;
pub mod request;
pub mod writer;

pub use outcome::{BatchRejection, FailureStage, RollbackCause, TransactionOutcome};
pub use request::{BatchRequest, BatchTarget};
pub use writer::write_batch;
