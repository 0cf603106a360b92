// ABOUTME: Abstract relational table store consumed by the vault
// ABOUTME: Defines the record type, store errors and the async TableStore trait

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;

/// One row keyed by column name, in column order
pub type Record = serde_json::Map<String, Value>;

/// Failures reported by a backing store
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Statement cancelled by the store's own timeout
    #[error("statement timed out: {0}")]
    Timeout(String),

    /// Request exceeded a size ceiling (URL length, payload, parameter count)
    #[error("request too large: {0}")]
    TooLarge(String),

    /// Ordering or filtering referenced a column the table does not have
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("table '{0}' does not exist")]
    UnknownTable(String),

    /// Row-level rejection (constraint, type mismatch)
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Size or timeout signal that should shrink the request instead of failing
    pub fn is_platform_limit(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::TooLarge(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// Ordering applied to a paged select
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ordering {
    /// Newest first; rows with equal `column` are ordered by `tiebreak` ascending
    Descending { column: String, tiebreak: String },
    Ascending(String),
    /// Physical order, stable only while nothing else writes to the table
    Unordered,
}

/// The opaque table store
///
/// All table arguments are physical table names. Implementations must make
/// every successful write durable before returning.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn count(&self, table: &str) -> Result<u64, StoreError>;

    async fn select_page(
        &self,
        table: &str,
        ordering: &Ordering,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// Up to `limit` identity values, in no particular order
    async fn select_ids(
        &self,
        table: &str,
        id_column: &str,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError>;

    /// Unconditional delete of every row; returns rows removed
    async fn delete_all(&self, table: &str) -> Result<u64, StoreError>;

    async fn delete_ids(
        &self,
        table: &str,
        id_column: &str,
        ids: &[Value],
    ) -> Result<u64, StoreError>;

    /// Insert all rows or none; returns rows inserted
    async fn insert(&self, table: &str, rows: &[Record]) -> Result<u64, StoreError>;

    /// Move any generator behind `id_column` past the largest stored id, after
    /// rows were written with explicit ids. Stores without generators do nothing.
    async fn sync_identity(&self, _table: &str, _id_column: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// The subset of `values` present in `column` (compared as text)
    async fn existing_values(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<String>, StoreError>;
}

/// Render a scalar JSON value as the text a store would compare against
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
