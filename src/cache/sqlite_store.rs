use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::{deadline_secs, unix_now, Cache};
use crate::error::CacheError;

const SCHEMA_VERSION: i64 = 1;

/// Single-table key-value store. Expired rows are filtered on read and
/// purged opportunistically on write.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        // Older layouts are plain cache data; safe to drop
        if version < SCHEMA_VERSION {
            conn.execute_batch("DROP TABLE IF EXISTS kv;")?;
        }

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS kv (
                 key        TEXT PRIMARY KEY,
                 value      TEXT NOT NULL,
                 expires_at INTEGER
             );

             CREATE INDEX IF NOT EXISTS idx_kv_expires_at
                 ON kv(expires_at);

             PRAGMA user_version = {SCHEMA_VERSION};"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }
}

impl Cache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM kv
                  WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, unix_now()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let conn = self.conn()?;
        let now = unix_now();
        conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, ttl.map(deadline_secs)],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
            params![key, unix_now()],
        )?;
        Ok(deleted > 0)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let updated = self.conn()?.execute(
            "UPDATE kv SET expires_at = ?1
              WHERE key = ?2 AND (expires_at IS NULL OR expires_at > ?3)",
            params![deadline_secs(ttl), key, unix_now()],
        )?;
        Ok(updated > 0)
    }
}
