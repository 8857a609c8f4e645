//! Database models for persisted records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed row read back from a batch target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Storage-assigned sequence id. Monotonic in commit order, not
    /// necessarily contiguous.
    pub id: i64,
    /// The JSON document as written.
    pub payload: serde_json::Value,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}
