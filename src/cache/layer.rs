//! Typed view over one namespace of a key-value store.

use std::marker::PhantomData;
use std::sync::Arc;

use super::traits::{CacheNamespace, CacheValue, KvStore};
use crate::error::Result;

/// One namespace of the store, holding values of a single type.
pub struct CacheLayer<V> {
  store: Arc<dyn KvStore>,
  namespace: CacheNamespace,
  _value: PhantomData<fn() -> V>,
}

impl<V: CacheValue> CacheLayer<V> {
  pub fn new(store: Arc<dyn KvStore>, namespace: CacheNamespace) -> Self {
    Self {
      store,
      namespace,
      _value: PhantomData,
    }
  }

  pub fn namespace(&self) -> CacheNamespace {
    self.namespace
  }

  /// Read and decode the value stored under `key`.
  pub async fn get(&self, key: &str) -> Result<Option<V>> {
    match self.store.get(self.namespace, key).await? {
      Some(cached) => Ok(Some(V::decode(cached.value)?)),
      None => Ok(None),
    }
  }

  pub async fn set(&self, key: &str, value: &V) -> Result<()> {
    self.store.set(self.namespace, key, value.encode()?).await
  }

  pub async fn remove(&self, key: &str) -> Result<()> {
    self.store.remove(self.namespace, key).await
  }
}

impl<V> Clone for CacheLayer<V> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      namespace: self.namespace,
      _value: PhantomData,
    }
  }
}
