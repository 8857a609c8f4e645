//! Batch requests and their target statement.

use std::fmt;

use serde::Serialize;

use crate::error::PoolError;

/// PostgreSQL's identifier length limit (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LEN: usize = 63;

/// Table and JSONB column a batch is written into.
///
/// Identifiers are validated on construction because they are spliced into
/// SQL text; only the records themselves travel as bind parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTarget {
    table: String,
    column: String,
}

impl BatchTarget {
    /// Creates a target. `table` may be schema-qualified (`public.products_raw`).
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidRequest`] if either name is not a plain
    /// SQL identifier.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Result<Self, PoolError> {
        let table = table.into();
        let column = column.into();
        if !table.split('.').all(is_identifier) || table.split('.').count() > 2 {
            return Err(PoolError::InvalidRequest(format!(
                "invalid table name: {table:?}"
            )));
        }
        if !is_identifier(&column) {
            return Err(PoolError::InvalidRequest(format!(
                "invalid column name: {column:?}"
            )));
        }
        Ok(Self { table, column })
    }

    /// Target table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Target column name.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Single-statement insert taking every record as one `jsonb[]` bind.
    #[must_use]
    pub fn insert_statement(&self) -> String {
        format!(
            "INSERT INTO {} ({}) SELECT * FROM UNNEST($1::jsonb[])",
            self.table, self.column
        )
    }

    /// Read-back query returning `(id, document, created_at)` rows.
    #[must_use]
    pub fn select_statement(&self) -> String {
        format!(
            "SELECT id, {}, created_at FROM {} ORDER BY id",
            self.column, self.table
        )
    }
}

impl fmt::Display for BatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.table, self.column)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// An ordered group of records written under one transaction.
///
/// Consumed by the writer, so a request can never be applied partially or
/// reused after it reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    target: BatchTarget,
    records: Vec<serde_json::Value>,
}

impl BatchRequest {
    /// Creates a request from already-encoded JSON documents.
    #[must_use]
    pub fn new(target: BatchTarget, records: Vec<serde_json::Value>) -> Self {
        Self { target, records }
    }

    /// A batch of exactly one record.
    #[must_use]
    pub fn single(target: BatchTarget, record: serde_json::Value) -> Self {
        Self::new(target, vec![record])
    }

    /// Encodes each item with `serde` and keeps the input order.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidRequest`] naming the first item that
    /// cannot be represented as JSON.
    pub fn from_serializable<T: Serialize>(
        target: BatchTarget,
        items: &[T],
    ) -> Result<Self, PoolError> {
        let records = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::to_value(item)
                    .map_err(|e| PoolError::InvalidRequest(format!("record {index}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(target, records))
    }

    /// Where the records go.
    #[must_use]
    pub const fn target(&self) -> &BatchTarget {
        &self.target
    }

    /// The records, in application order.
    #[must_use]
    pub fn records(&self) -> &[serde_json::Value] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the request holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn into_parts(self) -> (BatchTarget, Vec<serde_json::Value>) {
        (self.target, self.records)
    }
}
