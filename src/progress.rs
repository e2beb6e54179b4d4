//! Per-item download progress shared between fetches and observers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fraction in `[0, 1]` of each item downloaded so far, keyed by item id.
#[derive(Debug, Clone, Default)]
pub struct ProgressMap {
  inner: Arc<Mutex<HashMap<String, f64>>>,
}

impl ProgressMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record progress for an item, clamped to `[0, 1]`.
  pub fn set(&self, id: &str, value: f64) {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    self.lock().insert(id.to_string(), value);
  }

  /// Record `loaded / total`. Nothing is recorded while `total` is unknown.
  pub fn set_fraction(&self, id: &str, loaded: u64, total: u64) {
    if total > 0 {
      self.set(id, loaded as f64 / total as f64);
    }
  }

  pub fn get(&self, id: &str) -> Option<f64> {
    self.lock().get(id).copied()
  }

  pub fn remove(&self, id: &str) {
    self.lock().remove(id);
  }

  pub fn clear(&self) {
    self.lock().clear();
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Copy of all entries.
  pub fn snapshot(&self) -> HashMap<String, f64> {
    self.lock().clone()
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, f64>> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
