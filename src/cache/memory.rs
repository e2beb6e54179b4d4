//! In-memory store for tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::traits::{CacheNamespace, CachedValue, KvStore};
use crate::error::{Error, Result};

/// `HashMap` backed store that counts writes.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<(CacheNamespace, String), CachedValue>>,
  writes: AtomicUsize,
  /// When set, every `set` fails
  fail_writes: AtomicBool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn writes(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }

  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  /// Synchronous peek for assertions.
  pub fn peek(&self, namespace: CacheNamespace, key: &str) -> Option<Vec<u8>> {
    self
      .entries
      .lock()
      .ok()?
      .get(&(namespace, key.to_string()))
      .map(|v| v.value.clone())
  }
}

#[async_trait]
impl KvStore for MemoryStore {
  async fn get(&self, namespace: CacheNamespace, key: &str) -> Result<Option<CachedValue>> {
    let entries = self.entries.lock().map_err(|_| Error::LockPoisoned)?;
    Ok(entries.get(&(namespace, key.to_string())).cloned())
  }

  async fn set(&self, namespace: CacheNamespace, key: &str, value: Vec<u8>) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(Error::Io(std::io::Error::other("write refused")));
    }
    self.writes.fetch_add(1, Ordering::SeqCst);
    let mut entries = self.entries.lock().map_err(|_| Error::LockPoisoned)?;
    entries.insert(
      (namespace, key.to_string()),
      CachedValue {
        value,
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<()> {
    let mut entries = self.entries.lock().map_err(|_| Error::LockPoisoned)?;
    entries.remove(&(namespace, key.to_string()));
    Ok(())
  }

  async fn clear(&self, namespace: CacheNamespace) -> Result<()> {
    let mut entries = self.entries.lock().map_err(|_| Error::LockPoisoned)?;
    entries.retain(|(ns, _), _| *ns != namespace);
    Ok(())
  }

  async fn count(&self, namespace: CacheNamespace) -> Result<usize> {
    let entries = self.entries.lock().map_err(|_| Error::LockPoisoned)?;
    Ok(entries.keys().filter(|(ns, _)| *ns == namespace).count())
  }
}
