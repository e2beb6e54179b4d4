//! Core traits and types for the caching system.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use crate::error::Result;

/// Logical partitions of the persistent store.
///
/// The first four hold cached repository data and are wiped together by a
/// cache clear. `Preferences` holds user state (registered sources, the
/// current selection) and survives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
  /// Version token per (source, repository)
  Version,
  /// Resource list per (source, repository)
  List,
  /// Downloaded file bytes per (source, repository, item)
  Blob,
  /// Content hash of the stored blob per (source, repository, item)
  Hash,
  Preferences,
}

impl CacheNamespace {
  /// Namespaces that hold cached repository data.
  pub const CACHE: [CacheNamespace; 4] = [
    CacheNamespace::Version,
    CacheNamespace::List,
    CacheNamespace::Blob,
    CacheNamespace::Hash,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      CacheNamespace::Version => "res-ver",
      CacheNamespace::List => "res-list",
      CacheNamespace::Blob => "res",
      CacheNamespace::Hash => "res-hash",
      CacheNamespace::Preferences => "prefs",
    }
  }
}

/// Composite key of a cache entry: `(source, repository[, item])`.
///
/// Serializes as the components joined with `,`. A `,` or `\` inside a
/// component is escaped with `\`, so distinct keys never serialize to the
/// same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub source: String,
  pub repository: String,
  pub item: Option<String>,
}

impl CacheKey {
  /// Key of repository level entries (version token, resource list).
  pub fn repository(source: impl Into<String>, repository: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      repository: repository.into(),
      item: None,
    }
  }

  /// Key of item level entries (file blob, hash marker).
  pub fn item(
    source: impl Into<String>,
    repository: impl Into<String>,
    item: impl Into<String>,
  ) -> Self {
    Self {
      source: source.into(),
      repository: repository.into(),
      item: Some(item.into()),
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{},{}",
      escape_component(&self.source),
      escape_component(&self.repository)
    )?;
    if let Some(item) = &self.item {
      write!(f, ",{}", escape_component(item))?;
    }
    Ok(())
  }
}

/// Escape a single key component.
pub fn escape_component(component: &str) -> String {
  let mut escaped = String::with_capacity(component.len());
  for c in component.chars() {
    if c == ',' || c == '\\' {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

/// A value read back from the store.
#[derive(Debug, Clone)]
pub struct CachedValue {
  pub value: Vec<u8>,
  /// When the value was written
  pub cached_at: DateTime<Utc>,
}

/// Async key-value store backing the cache.
///
/// Keys are serialized strings, scoped by namespace. Writes are last-write-wins.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CachedValue>>;

  async fn set(&self, namespace: CacheNamespace, key: &str, value: Vec<u8>) -> Result<()>;

  async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<()>;

  /// Drop every entry of a namespace.
  async fn clear(&self, namespace: CacheNamespace) -> Result<()>;

  /// Number of entries in a namespace.
  async fn count(&self, namespace: CacheNamespace) -> Result<usize>;
}

/// Conversion between a typed value and its stored bytes.
pub trait CacheValue: Sized + Send + Sync {
  fn encode(&self) -> Result<Vec<u8>>;

  fn decode(bytes: Vec<u8>) -> Result<Self>;
}

/// Blobs are stored as-is.
impl CacheValue for Bytes {
  fn encode(&self) -> Result<Vec<u8>> {
    Ok(self.to_vec())
  }

  fn decode(bytes: Vec<u8>) -> Result<Self> {
    Ok(Bytes::from(bytes))
  }
}

impl CacheValue for String {
  fn encode(&self) -> Result<Vec<u8>> {
    json_encode(self)
  }

  fn decode(bytes: Vec<u8>) -> Result<Self> {
    json_decode(&bytes)
  }
}

/// Encode a structured value as JSON.
pub fn json_encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
  Ok(serde_json::to_vec(value)?)
}

/// Decode a structured value from JSON.
pub fn json_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
  Ok(serde_json::from_slice(bytes)?)
}
