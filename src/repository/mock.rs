//! In-memory sources and repositories for tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::remote::{RemoteRepository, Repository, SourceLoader};
use super::types::{FetchProgress, FetchRequest, ResourceItem, VersionToken};
use crate::error::{Error, Result};

pub fn item(id: &str, hash: &str) -> ResourceItem {
  ResourceItem {
    id: id.to_string(),
    name: format!("{id}.ab"),
    hash: hash.to_string(),
    url: None,
  }
}

/// Repository whose version, list and file contents are set by the test.
///
/// Every upstream call is counted so tests can assert on network traffic.
pub struct MockRepository {
  id: String,
  version: Mutex<String>,
  items: Mutex<Vec<ResourceItem>>,
  files: Mutex<HashMap<String, Bytes>>,
  /// Number of upcoming version calls that fail
  version_failures: AtomicUsize,
  /// Delay applied to every call
  latency: Mutex<Duration>,
  /// Pause between the two halves of a download
  chunk_pause: Mutex<Duration>,
  /// Items whose download is aborted upstream
  aborted: Mutex<HashSet<String>>,
  pub version_calls: AtomicUsize,
  pub list_calls: AtomicUsize,
  pub fetch_calls: AtomicUsize,
}

impl MockRepository {
  pub fn new(id: &str, version: &str, items: Vec<ResourceItem>) -> Self {
    let files = items
      .iter()
      .map(|item| (item.id.clone(), Bytes::from(format!("{}:{}", item.id, item.hash))))
      .collect();

    Self {
      id: id.to_string(),
      version: Mutex::new(version.to_string()),
      items: Mutex::new(items),
      files: Mutex::new(files),
      version_failures: AtomicUsize::new(0),
      latency: Mutex::new(Duration::ZERO),
      chunk_pause: Mutex::new(Duration::ZERO),
      aborted: Mutex::new(HashSet::new()),
      version_calls: AtomicUsize::new(0),
      list_calls: AtomicUsize::new(0),
      fetch_calls: AtomicUsize::new(0),
    }
  }

  pub fn shared(self) -> Arc<Self> {
    Arc::new(self)
  }

  /// Publish a new version with new items.
  pub fn publish(&self, version: &str, items: Vec<ResourceItem>) {
    let mut files = self.files.lock().unwrap();
    for item in &items {
      files.insert(
        item.id.clone(),
        Bytes::from(format!("{}:{}", item.id, item.hash)),
      );
    }
    *self.version.lock().unwrap() = version.to_string();
    *self.items.lock().unwrap() = items;
  }

  pub fn fail_next_versions(&self, count: usize) {
    self.version_failures.store(count, Ordering::SeqCst);
  }

  pub fn set_latency(&self, latency: Duration) {
    *self.latency.lock().unwrap() = latency;
  }

  pub fn set_chunk_pause(&self, pause: Duration) {
    *self.chunk_pause.lock().unwrap() = pause;
  }

  pub fn remove_file(&self, id: &str) {
    self.files.lock().unwrap().remove(id);
  }

  /// Make downloads of `id` end as aborted.
  pub fn abort_file(&self, id: &str) {
    self.aborted.lock().unwrap().insert(id.to_string());
  }

  pub fn network_calls(&self) -> usize {
    self.version_calls.load(Ordering::SeqCst)
      + self.list_calls.load(Ordering::SeqCst)
      + self.fetch_calls.load(Ordering::SeqCst)
  }

  async fn delay(&self) {
    let latency = *self.latency.lock().unwrap();
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }
  }
}

#[async_trait]
impl RemoteRepository for MockRepository {
  fn id(&self) -> &str {
    &self.id
  }

  fn name(&self) -> &str {
    &self.id
  }

  async fn resource_version(&self) -> Result<VersionToken> {
    self.version_calls.fetch_add(1, Ordering::SeqCst);
    self.delay().await;

    let failing = self
      .version_failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failing {
      return Err(Error::Io(std::io::Error::other("version endpoint unavailable")));
    }

    let version = self.version.lock().unwrap().clone();
    Ok(VersionToken::new(version))
  }

  async fn resource_list(&self, _version: &VersionToken) -> Result<Vec<ResourceItem>> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    self.delay().await;
    let items = self.items.lock().unwrap().clone();
    Ok(items)
  }

  async fn fetch_resource(&self, request: FetchRequest<'_>) -> Result<Bytes> {
    self.fetch_calls.fetch_add(1, Ordering::SeqCst);

    tokio::select! {
      _ = request.cancel.cancelled() => return Err(Error::Aborted),
      _ = self.delay() => {}
    }
    if self.aborted.lock().unwrap().contains(&request.item.id) {
      return Err(Error::Aborted);
    }

    let bytes = self
      .files
      .lock()
      .unwrap()
      .get(&request.item.id)
      .cloned()
      .ok_or_else(|| Error::Io(std::io::Error::other(format!("{} not found", request.item.id))))?;

    // Served in two chunks, each reported as it arrives.
    let total = bytes.len() as u64;
    (request.on_progress)(FetchProgress {
      loaded: total / 2,
      total,
    });
    let pause = *self.chunk_pause.lock().unwrap();
    if !pause.is_zero() {
      tokio::select! {
        _ = request.cancel.cancelled() => return Err(Error::Aborted),
        _ = tokio::time::sleep(pause) => {}
      }
    }
    (request.on_progress)(FetchProgress {
      loaded: total,
      total,
    });
    Ok(bytes)
  }
}

/// Source loader serving fixed repository lists.
#[derive(Default)]
pub struct MockLoader {
  sources: Mutex<HashMap<String, (Duration, Vec<Arc<MockRepository>>)>>,
  pub calls: AtomicUsize,
}

impl MockLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_source(self, source: &str, repositories: Vec<Arc<MockRepository>>) -> Self {
    self.add_source(source, Duration::ZERO, repositories);
    self
  }

  /// Register a source that takes `delay` to load.
  pub fn add_source(&self, source: &str, delay: Duration, repositories: Vec<Arc<MockRepository>>) {
    self
      .sources
      .lock()
      .unwrap()
      .insert(source.to_string(), (delay, repositories));
  }
}

#[async_trait]
impl SourceLoader for MockLoader {
  async fn load(&self, source: &str) -> Result<Vec<Repository>> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let entry = self.sources.lock().unwrap().get(source).cloned();
    let Some((delay, repositories)) = entry else {
      return Err(Error::InvalidSource(format!("{source} not found")));
    };

    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    Ok(
      repositories
        .into_iter()
        .map(|repo| repo as Repository)
        .collect(),
    )
  }
}
