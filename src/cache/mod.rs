//! Persistent key-value cache.
//!
//! This module provides the storage side of resource caching:
//! - A namespaced async key-value store trait with a SQLite implementation
//! - Structured composite cache keys with a collision-free serialization
//! - Typed views over single namespaces

mod layer;
#[cfg(test)]
mod memory;
mod storage;
mod traits;

pub use layer::CacheLayer;
#[cfg(test)]
pub use memory::MemoryStore;
pub use storage::SqliteStorage;
pub use traits::{
  escape_component, json_decode, json_encode, CacheKey, CacheNamespace, CacheValue, CachedValue,
  KvStore,
};
