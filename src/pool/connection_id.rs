//! Identity of a pooled connection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle the pool stamps on a connection when it is opened.
///
/// The id follows the physical link through every checkout and is dropped
/// with it, so a replacement for a dead connection always gets a fresh one.
/// Logs carry it as `connection_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Only the pool opens connections, so only the pool mints ids.
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
