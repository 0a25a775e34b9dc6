//! SQLite-backed [`Database`] implementation.
//!
//! Production storage backend with WAL mode and schema migrations. All rows
//! live in one key-value table keyed by `(tbl, key)`, matching the engine's
//! blob-per-key model.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::db::{Database, DbError};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// SQLite-based persistent store.
///
/// Thread-safe via an async mutex around the single connection, like every
/// other storage backend in this workspace: the engine worker is effectively
/// the only writer, so contention is not a concern.
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open (or create) a database file and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::OperationFailed(format!("failed to open database: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| DbError::OperationFailed(format!("failed to set pragmas: {}", e)))?;
        Self::run_migrations(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory database for tests.
    pub fn new_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DbError::OperationFailed(format!("failed to open database: {}", e)))?;
        Self::run_migrations(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn run_migrations(conn: &Connection) -> Result<(), DbError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )
        .map_err(|e| DbError::OperationFailed(format!("failed to create schema_version: {}", e)))?;

        let current: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        if current < 1 {
            Self::migrate_v1(conn)?;
        }
        Ok(())
    }

    /// Migration to schema version 1 - initial schema.
    fn migrate_v1(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                tbl  TEXT NOT NULL,
                key  TEXT NOT NULL,
                blob BLOB NOT NULL,
                PRIMARY KEY (tbl, key)
            );
            "#,
        )
        .map_err(|e| DbError::OperationFailed(format!("migration v1 failed: {}", e)))?;
        conn.execute("INSERT OR REPLACE INTO schema_version (version) VALUES (?1)", params![
            SCHEMA_VERSION
        ])
        .map_err(|e| DbError::OperationFailed(format!("failed to record version: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>, DbError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT blob FROM kv WHERE tbl = ?1 AND key = ?2",
            params![table, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| DbError::OperationFailed(format!("read failed: {}", e)))
    }

    async fn write(&self, table: &str, key: &str, blob: &[u8]) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO kv (tbl, key, blob) VALUES (?1, ?2, ?3)",
            params![table, key, blob],
        )
        .map_err(|e| DbError::OperationFailed(format!("write failed: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM kv WHERE tbl = ?1 AND key = ?2", params![table, key])
            .map_err(|e| DbError::OperationFailed(format!("delete failed: {}", e)))?;
        Ok(())
    }

    async fn keys(&self, table: &str) -> Result<Vec<String>, DbError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE tbl = ?1")
            .map_err(|e| DbError::OperationFailed(format!("keys failed: {}", e)))?;
        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| DbError::OperationFailed(format!("keys failed: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::OperationFailed(format!("keys failed: {}", e)))
    }

    async fn delete_prefix(&self, table: &str, prefix: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().await;
        // ESCAPE so keys containing SQL wildcards cannot over-match.
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        conn.execute(
            "DELETE FROM kv WHERE tbl = ?1 AND key LIKE ?2 ESCAPE '\\'",
            params![table, pattern],
        )
        .map_err(|e| DbError::OperationFailed(format!("delete_prefix failed: {}", e)))?;
        Ok(())
    }
}
