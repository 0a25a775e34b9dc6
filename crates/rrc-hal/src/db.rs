//! Persistent storage abstraction.
//!
//! The engine stores opaque blobs addressed by `(table, key)`. Controller
//! rows live under [`table::CONTROLLERS`] keyed by the hex IEEE address; each
//! exported RIB attribute gets its own row under [`table::RIB`].
//!
//! Storage failures are logged by the caller and never crash the worker; the
//! in-memory state stays authoritative until the next successful write.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Well-known table names.
pub mod table {
    /// One row per bound controller, keyed by hex IEEE address.
    pub const CONTROLLERS: &str = "controllers";
    /// One row per exported RIB attribute, keyed by
    /// `"<ieee-hex>/<identifier:02x>/<index:02x>"` (network-wide rows use
    /// `"net"` in place of the address).
    pub const RIB: &str = "rib";
    /// Engine-level values: `time_metrics`, uptime and privacy counters.
    pub const METRICS: &str = "metrics";
}

/// Errors from persistent storage.
#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("row not found: {table}/{key}")]
    NotFound { table: String, key: String },

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

/// Blob-per-key persistent store.
#[async_trait]
pub trait Database: Send + Sync {
    /// Read one row. `Ok(None)` when the row does not exist.
    async fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, DbError>;

    /// Create or replace one row.
    async fn write(&self, table: &str, key: &str, blob: &[u8]) -> Result<(), DbError>;

    /// Delete one row; deleting a missing row is a no-op.
    async fn delete(&self, table: &str, key: &str) -> Result<(), DbError>;

    /// All keys in a table, in unspecified order. Used for startup load.
    async fn keys(&self, table: &str) -> Result<Vec<String>, DbError>;

    /// Delete every row in a table whose key starts with `prefix`.
    async fn delete_prefix(&self, table: &str, prefix: &str) -> Result<(), DbError>;
}

/// In-memory database for tests and bring-up.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table. Test helper.
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    async fn write(&self, table: &str, key: &str, blob: &[u8]) -> Result<(), DbError> {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), DbError> {
        if let Some(t) = self.tables.write().await.get_mut(table) {
            t.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, table: &str) -> Result<Vec<String>, DbError> {
        Ok(self
            .tables
            .read()
            .await
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_prefix(&self, table: &str, prefix: &str) -> Result<(), DbError> {
        if let Some(t) = self.tables.write().await.get_mut(table) {
            t.retain(|k, _| !k.starts_with(prefix));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_delete_round_trip() {
        let db = MemoryDatabase::new();
        assert!(db.read(table::CONTROLLERS, "a").await.unwrap().is_none());

        db.write(table::CONTROLLERS, "a", b"blob").await.unwrap();
        assert_eq!(db.read(table::CONTROLLERS, "a").await.unwrap().unwrap(), b"blob");

        db.delete(table::CONTROLLERS, "a").await.unwrap();
        assert!(db.read(table::CONTROLLERS, "a").await.unwrap().is_none());

        // Deleting again is a no-op.
        db.delete(table::CONTROLLERS, "a").await.unwrap();
    }

    #[tokio::test]
    async fn delete_prefix_scopes_to_prefix() {
        let db = MemoryDatabase::new();
        db.write(table::RIB, "aa/02/00", b"x").await.unwrap();
        db.write(table::RIB, "aa/02/01", b"y").await.unwrap();
        db.write(table::RIB, "bb/02/00", b"z").await.unwrap();

        db.delete_prefix(table::RIB, "aa/").await.unwrap();
        assert_eq!(db.row_count(table::RIB).await, 1);
        assert!(db.read(table::RIB, "bb/02/00").await.unwrap().is_some());
    }
}
