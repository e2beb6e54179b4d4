//! SQLite implementation of the cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheNamespace, CachedValue, KvStore};
use crate::error::{Error, Result};

/// SQLite-based key-value store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Open a private store that lives as long as the returned value.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;

    Some(data_dir.join("assetrepo").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self.conn()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| Error::LockPoisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    namespace TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    value BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, key_hash)
);
"#;

/// SHA256 hash for stable, fixed-length keys.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

#[async_trait]
impl KvStore for SqliteStorage {
  async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CachedValue>> {
    let conn = self.conn()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT value, cached_at FROM kv_cache WHERE namespace = ? AND key_hash = ?",
        params![namespace.as_str(), key_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((value, cached_at)) => Ok(Some(CachedValue {
        value,
        cached_at: parse_datetime(&cached_at),
      })),
      None => Ok(None),
    }
  }

  async fn set(&self, namespace: CacheNamespace, key: &str, value: Vec<u8>) -> Result<()> {
    self.conn()?.execute(
      "INSERT OR REPLACE INTO kv_cache (namespace, key_hash, cache_key, value, cached_at)
       VALUES (?, ?, ?, ?, datetime('now'))",
      params![namespace.as_str(), key_hash(key), key, value],
    )?;

    Ok(())
  }

  async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<()> {
    self.conn()?.execute(
      "DELETE FROM kv_cache WHERE namespace = ? AND key_hash = ?",
      params![namespace.as_str(), key_hash(key)],
    )?;

    Ok(())
  }

  async fn clear(&self, namespace: CacheNamespace) -> Result<()> {
    self.conn()?.execute(
      "DELETE FROM kv_cache WHERE namespace = ?",
      params![namespace.as_str()],
    )?;

    Ok(())
  }

  async fn count(&self, namespace: CacheNamespace) -> Result<usize> {
    let count: i64 = self.conn()?.query_row(
      "SELECT COUNT(*) FROM kv_cache WHERE namespace = ?",
      params![namespace.as_str()],
      |row| row.get(0),
    )?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
///
/// SQLite stores `datetime('now')` as "YYYY-MM-DD HH:MM:SS". An unreadable
/// timestamp only loses metadata, so it falls back to the epoch.
fn parse_datetime(s: &str) -> DateTime<Utc> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .unwrap_or_default()
}
