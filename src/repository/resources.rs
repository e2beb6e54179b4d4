//! Versioned two-tier resource cache.
//!
//! Resolution of a repository's resource list costs one version request when
//! nothing changed upstream: the list is cached per `(source, repository)`
//! next to the version token it belongs to. Resource bytes are cached per
//! `(source, repository, item)` together with a hash marker, and served from
//! the store for as long as the marker matches the item's current hash.
//!
//! Batches run through a [`TaskPool`]. The shared pool is restarted by every
//! batch submitted to it, so an overlapping batch makes the older one come
//! back as `None`. Each batch settles only the tasks it submitted.

use bytes::Bytes;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{Active, RepositoryState, Selected};
use super::types::{FetchProgress, FetchRequest, ResourceFile, ResourceItem, VersionToken};
use crate::cache::{CacheKey, CacheLayer, CacheNamespace, CacheValue, KvStore};
use crate::error::{Error, Result};
use crate::notify::{BatchResult, Notice};
use crate::pool::{Outcome, TaskPool};
use crate::progress::ProgressMap;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Called with each resource once it is available.
pub type SuccessHook = Arc<dyn Fn(&ResourceFile) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct FetchTask {
  pub item: ResourceItem,
  pub on_success: Option<SuccessHook>,
}

/// Which pool a batch runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolChoice {
  /// The ambient pool; a new batch supersedes the running one
  #[default]
  Shared,
  /// A private pool, unaffected by other batches
  OneOff,
}

/// Files of a settled batch and how each item ended.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
  /// Fetched files in submission order
  pub files: Vec<ResourceFile>,
  /// Done items count as success, failed ones as error, aborted ones as skip
  pub summary: BatchResult,
}

type FetchPool = TaskPool<FetchTask, ResourceFile>;

struct Inner {
  store: Arc<dyn KvStore>,
  state: Arc<RepositoryState>,
  versions: CacheLayer<VersionToken>,
  lists: CacheLayer<Vec<ResourceItem>>,
  blobs: CacheLayer<Bytes>,
  hashes: CacheLayer<String>,
  retry: RetryPolicy,
  concurrency: usize,
}

#[derive(Clone)]
pub struct ResourceCache {
  inner: Arc<Inner>,
  pool: Arc<FetchPool>,
}

impl ResourceCache {
  pub fn new(
    store: Arc<dyn KvStore>,
    state: Arc<RepositoryState>,
    concurrency: usize,
    retry: RetryPolicy,
  ) -> Self {
    let inner = Arc::new(Inner {
      state,
      versions: CacheLayer::new(store.clone(), CacheNamespace::Version),
      lists: CacheLayer::new(store.clone(), CacheNamespace::List),
      blobs: CacheLayer::new(store.clone(), CacheNamespace::Blob),
      hashes: CacheLayer::new(store.clone(), CacheNamespace::Hash),
      store,
      retry,
      concurrency: concurrency.max(1),
    });
    let pool = Arc::new(build_pool(&inner));
    Self { inner, pool }
  }

  pub fn state(&self) -> &Arc<RepositoryState> {
    &self.inner.state
  }

  pub fn progress(&self) -> &ProgressMap {
    self.inner.state.progress()
  }

  /// Resource list of the selected repository.
  ///
  /// Returns an empty list, and caches nothing, when `cancel` fires first.
  pub async fn resolve_list(&self, cancel: &CancellationToken) -> Result<Vec<ResourceItem>> {
    let selected = self.inner.state.selected()?;
    match self.inner.resolve_list(&selected, cancel).await {
      Err(e) if e.is_abort() || cancel.is_cancelled() => {
        debug!("Resource list resolution of {} aborted", selected.source);
        Ok(Vec::new())
      }
      result => result,
    }
  }

  /// Fetch one resource, from the cache when its hash marker still matches.
  pub async fn get_resource(
    &self,
    item: &ResourceItem,
    on_success: Option<&SuccessHook>,
    cancel: &CancellationToken,
  ) -> Result<ResourceFile> {
    let result = self.inner.get_resource(item, on_success, cancel).await;
    if result.is_err() {
      self.progress().remove(&item.id);
    }
    result
  }

  /// Fetch many resources at once.
  ///
  /// Returns `Ok(None)` when the pool was restarted before the batch
  /// settled. Otherwise the fetched files come back in submission order;
  /// failed and aborted items are left out and only counted.
  pub async fn get_resources(
    &self,
    items: Vec<ResourceItem>,
    on_success: Option<SuccessHook>,
    pool: PoolChoice,
  ) -> Result<Option<FetchedBatch>> {
    self.inner.state.active()?;

    let tasks = items.into_iter().map(|item| FetchTask {
      item,
      on_success: on_success.clone(),
    });
    let submission = match pool {
      PoolChoice::Shared => self.pool.restart_with(tasks),
      PoolChoice::OneOff => build_pool(&self.inner).submit(tasks),
    };
    let outdated = submission.outdated_check();
    let settled = submission.wait().await;

    if outdated.is_outdated() {
      debug!("Discarding outdated resource batch");
      return Ok(None);
    }

    let mut batch = FetchedBatch::default();
    for settled in settled {
      match settled.outcome {
        Outcome::Done(file) => {
          batch.summary.success += 1;
          batch.files.push(file);
        }
        Outcome::Failed(_) => batch.summary.error += 1,
        Outcome::Aborted => batch.summary.skip += 1,
      }
    }
    info!("{}", batch.summary.notice("Fetched").message);

    Ok(Some(batch))
  }

  /// Abandon whatever batch the shared pool is running.
  pub fn cancel_shared(&self) {
    self.pool.restart();
  }

  /// Drop every cached version, list, blob and hash marker.
  pub async fn clear_cache(&self) -> Result<()> {
    for namespace in CacheNamespace::CACHE {
      self.inner.store.clear(namespace).await?;
    }
    info!("Resource cache cleared");
    Ok(())
  }
}

impl Inner {
  async fn resolve_list(
    &self,
    selected: &Selected,
    cancel: &CancellationToken,
  ) -> Result<Vec<ResourceItem>> {
    let repository = &selected.repository;
    let key = CacheKey::repository(&selected.source, repository.id()).to_string();

    let (latest, cached_version, cached_list) = tokio::join!(
      self
        .retry
        .run(Some(cancel), || repository.resource_version()),
      read(&self.versions, &key),
      read(&self.lists, &key),
    );
    let latest = latest?;
    if cancel.is_cancelled() {
      return Err(Error::Aborted);
    }

    let list = match (cached_version, cached_list) {
      (Some(cached), Some(list)) if cached == latest => {
        debug!("Resource list of {} is up to date at {}", key, latest);
        list
      }
      _ => {
        let list = tokio::select! {
          _ = cancel.cancelled() => return Err(Error::Aborted),
          list = repository.resource_list(&latest) => list?,
        };
        if cancel.is_cancelled() {
          return Err(Error::Aborted);
        }

        // List before token: a stored token always describes the stored list.
        self.lists.set(&key, &list).await?;
        self.versions.set(&key, &latest).await?;
        info!("Cached resource list of {} at {} ({} items)", key, latest, list.len());
        list
      }
    };

    self.state.set_version(selected, latest);
    Ok(list)
  }

  async fn get_resource(
    &self,
    item: &ResourceItem,
    on_success: Option<&SuccessHook>,
    cancel: &CancellationToken,
  ) -> Result<ResourceFile> {
    let active = self.state.active()?;
    let key = CacheKey::item(&active.source, active.repository.id(), &item.id).to_string();
    let progress = self.state.progress();

    if let Some(bytes) = self.cached_blob(&key, item).await {
      progress.set(&item.id, 1.0);
      let file = ResourceFile::new(&item.name, bytes);
      self.run_hook(on_success, &file);
      return Ok(file);
    }

    progress.set(&item.id, 0.0);
    let bytes = self.download(&active, item, cancel).await?;
    let file = ResourceFile::new(&item.name, bytes.clone());

    self.commit(key, item.hash.clone(), bytes);
    self.run_hook(on_success, &file);
    Ok(file)
  }

  async fn cached_blob(&self, key: &str, item: &ResourceItem) -> Option<Bytes> {
    let marker = read(&self.hashes, key).await?;
    if marker != item.hash {
      debug!("Hash of {} changed, refetching", key);
      return None;
    }
    read(&self.blobs, key).await
  }

  async fn download(
    &self,
    active: &Active,
    item: &ResourceItem,
    cancel: &CancellationToken,
  ) -> Result<Bytes> {
    let progress = self.state.progress();
    let on_progress = |p: FetchProgress| progress.set_fraction(&item.id, p.loaded, p.total);

    active
      .repository
      .fetch_resource(FetchRequest {
        version: &active.version,
        item,
        on_progress: &on_progress,
        cancel,
      })
      .await
  }

  /// Persist blob and hash marker in the background.
  fn commit(&self, key: String, hash: String, bytes: Bytes) {
    let blobs = self.blobs.clone();
    let hashes = self.hashes.clone();

    tokio::spawn(async move {
      // Blob before marker: a marker never points at a missing blob.
      let result = async {
        blobs.set(&key, &bytes).await?;
        hashes.set(&key, &hash).await
      }
      .await;

      match result {
        Ok(()) => debug!("Cached resource {} ({} bytes)", key, bytes.len()),
        Err(e) => warn!("Failed to cache resource {}: {}", key, e),
      }
    });
  }

  fn run_hook(&self, hook: Option<&SuccessHook>, file: &ResourceFile) {
    let Some(hook) = hook else { return };

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| hook(file)))
      .unwrap_or_else(|_| Err("handler panicked".to_string()));
    if let Err(e) = result {
      error!("Handling resource {} failed: {}", file.name, e);
      self
        .state
        .notifier()
        .notify(Notice::error(format!("Handle resource \"{}\" failed: {}", file.name, e)));
    }
  }
}

/// Read from a cache layer, treating store failures as misses.
async fn read<V: CacheValue>(layer: &CacheLayer<V>, key: &str) -> Option<V> {
  match layer.get(key).await {
    Ok(value) => value,
    Err(e) => {
      warn!("Failed to read {} from {}: {}", key, layer.namespace().as_str(), e);
      None
    }
  }
}

fn build_pool(inner: &Arc<Inner>) -> FetchPool {
  let handler_inner = Arc::clone(inner);
  let progress = inner.state.progress().clone();
  let abort_progress = progress.clone();
  let notifier = Arc::clone(inner.state.notifier());

  TaskPool::new(inner.concurrency, move |task: FetchTask, cancel| {
    let inner = Arc::clone(&handler_inner);
    async move {
      inner
        .get_resource(&task.item, task.on_success.as_ref(), &cancel)
        .await
    }
  })
  .on_error(move |e, task| {
    error!("Get resource {} failed: {}", task.item.id, e);
    progress.remove(&task.item.id);
    notifier.notify(Notice::error(format!(
      "Get resource \"{}\" failed: {}",
      task.item.name, e
    )));
  })
  .on_abort(move |task| {
    warn!("Get resource {} aborted", task.item.id);
    abort_progress.remove(&task.item.id);
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{json_decode, MemoryStore};
  use crate::notify::tests::RecordingNotifier;
  use crate::repository::mock::{item, MockLoader, MockRepository};
  use crate::repository::sources::Preferences;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  struct Fixture {
    cache: ResourceCache,
    state: Arc<RepositoryState>,
    repo: Arc<MockRepository>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
  }

  async fn fixture() -> Fixture {
    let f = unselected();
    f.state.apply_source("pkgA").await.unwrap();
    f
  }

  fn unselected() -> Fixture {
    let repo = MockRepository::new("cn", "v1", vec![item("1", "h1"), item("2", "h2")]).shared();
    let loader = Arc::new(MockLoader::new().with_source("pkgA", vec![repo.clone()]));
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let state = Arc::new(RepositoryState::new(
      loader,
      Preferences::new(store.clone()),
      notifier.clone(),
      RetryPolicy::default(),
    ));
    let cache = ResourceCache::new(
      store.clone(),
      state.clone(),
      DEFAULT_CONCURRENCY,
      RetryPolicy::default(),
    );
    Fixture {
      cache,
      state,
      repo,
      store,
      notifier,
    }
  }

  fn hash_marker(store: &MemoryStore, key: &str) -> Option<String> {
    store
      .peek(CacheNamespace::Hash, key)
      .map(|bytes| json_decode(&bytes).unwrap())
  }

  /// Poll until `check` holds; background commits land asynchronously.
  async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
      if check() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
  }

  #[tokio::test]
  async fn test_first_resolution_fetches_and_caches_everything() {
    let f = fixture().await;
    let cancel = CancellationToken::new();

    let items = f.cache.resolve_list(&cancel).await.unwrap();
    assert_eq!(items, vec![item("1", "h1"), item("2", "h2")]);
    assert_eq!(f.state.version(), Some(VersionToken::new("v1")));

    let files = f
      .cache
      .get_resources(items.clone(), None, PoolChoice::Shared)
      .await
      .unwrap()
      .unwrap()
      .files;
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].bytes, Bytes::from("1:h1"));
    assert_eq!(files[1].name, "2.ab");
    assert_eq!(f.repo.fetch_calls.load(Ordering::SeqCst), 2);

    eventually(|| {
      hash_marker(&f.store, "pkgA,cn,1").as_deref() == Some("h1")
        && hash_marker(&f.store, "pkgA,cn,2").as_deref() == Some("h2")
    })
    .await;

    // Unchanged version: list and items come from the cache.
    let writes = f.store.writes();
    let again = f.cache.resolve_list(&cancel).await.unwrap();
    assert_eq!(again, items);
    let batch = f
      .cache
      .get_resources(again, None, PoolChoice::Shared)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(batch.files.len(), 2);
    assert_eq!(f.repo.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.repo.fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.store.writes(), writes);
    assert_eq!(f.cache.progress().get("1"), Some(1.0));
  }

  #[tokio::test]
  async fn test_clear_cache_forces_fresh_resolution() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    let items = f.cache.resolve_list(&cancel).await.unwrap();
    f.cache.get_resource(&items[0], None, &cancel).await.unwrap();
    eventually(|| hash_marker(&f.store, "pkgA,cn,1").is_some()).await;

    f.cache.clear_cache().await.unwrap();
    assert!(f.store.peek(CacheNamespace::Version, "pkgA,cn").is_none());
    assert!(f.store.peek(CacheNamespace::List, "pkgA,cn").is_none());
    assert!(f.store.peek(CacheNamespace::Blob, "pkgA,cn,1").is_none());
    assert!(f.store.peek(CacheNamespace::Hash, "pkgA,cn,1").is_none());

    f.cache.resolve_list(&cancel).await.unwrap();
    assert_eq!(f.repo.version_calls.load(Ordering::SeqCst), 2);
    assert_eq!(f.repo.list_calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_clear_cache_keeps_preferences() {
    let f = fixture().await;
    f.cache.clear_cache().await.unwrap();
    assert!(f
      .store
      .peek(CacheNamespace::Preferences, "current-source")
      .is_some());
  }

  #[tokio::test]
  async fn test_changed_hash_refetches_and_overwrites() {
    let f = fixture().await;
    let cancel = CancellationToken::new();
    let items = f.cache.resolve_list(&cancel).await.unwrap();
    f.cache.get_resource(&items[0], None, &cancel).await.unwrap();
    eventually(|| hash_marker(&f.store, "pkgA,cn,1").is_some()).await;

    f.repo.publish("v2", vec![item("1", "h1b")]);
    let items = f.cache.resolve_list(&cancel).await.unwrap();
    assert_eq!(f.state.version(), Some(VersionToken::new("v2")));

    let file = f.cache.get_resource(&items[0], None, &cancel).await.unwrap();
    assert_eq!(file.bytes, Bytes::from("1:h1b"));
    assert_eq!(f.repo.fetch_calls.load(Ordering::SeqCst), 2);

    eventually(|| hash_marker(&f.store, "pkgA,cn,1").as_deref() == Some("h1b")).await;
    assert_eq!(
      f.store.peek(CacheNamespace::Blob, "pkgA,cn,1").unwrap(),
      b"1:h1b".to_vec()
    );
  }

  #[tokio::test]
  async fn test_overlapping_shared_batch_discards_the_older_one() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    f.repo.set_latency(Duration::from_millis(50));

    let first = {
      let cache = f.cache.clone();
      let items = items.clone();
      tokio::spawn(async move { cache.get_resources(items, None, PoolChoice::Shared).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = f
      .cache
      .get_resources(items, None, PoolChoice::Shared)
      .await
      .unwrap();

    assert!(first.await.unwrap().unwrap().is_none());
    assert_eq!(second.map(|batch| batch.files.len()), Some(2));
    assert!(f.notifier.messages().is_empty());
  }

  #[tokio::test]
  async fn test_one_off_batch_survives_shared_restart() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    f.repo.set_latency(Duration::from_millis(30));

    let one_off = {
      let cache = f.cache.clone();
      let items = items.clone();
      tokio::spawn(async move { cache.get_resources(items, None, PoolChoice::OneOff).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    f.cache.cancel_shared();

    let batch = one_off.await.unwrap().unwrap().unwrap();
    assert_eq!(batch.files.len(), 2);
  }

  #[tokio::test]
  async fn test_progress_is_removed_after_abort() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    f.repo.set_latency(Duration::from_millis(50));

    let batch = {
      let cache = f.cache.clone();
      let items = vec![items[1].clone()];
      tokio::spawn(async move { cache.get_resources(items, None, PoolChoice::Shared).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.cache.progress().get("2"), Some(0.0));

    f.cache.cancel_shared();

    assert!(batch.await.unwrap().unwrap().is_none());
    assert_eq!(f.cache.progress().get("2"), None);
    assert!(f.notifier.messages().is_empty());
  }

  #[tokio::test]
  async fn test_failed_item_is_reported_and_dropped() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    f.repo.remove_file("2");

    let batch = f
      .cache
      .get_resources(items, None, PoolChoice::Shared)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(batch.files.len(), 1);
    assert_eq!(batch.files[0].name, "1.ab");
    assert_eq!(
      batch.summary,
      BatchResult {
        success: 1,
        skip: 0,
        error: 1
      }
    );
    assert_eq!(f.cache.progress().get("2"), None);
    let messages = f.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Get resource \"2.ab\" failed:"));
  }

  #[tokio::test]
  async fn test_hook_runs_and_its_failure_is_contained() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let hook: SuccessHook = {
      let seen = seen.clone();
      Arc::new(move |file: &ResourceFile| {
        seen.fetch_add(1, Ordering::SeqCst);
        if file.name == "2.ab" {
          Err("disk full".to_string())
        } else {
          Ok(())
        }
      })
    };

    let batch = f
      .cache
      .get_resources(items, Some(hook), PoolChoice::OneOff)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(batch.files.len(), 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(
      f.notifier.messages(),
      vec!["Handle resource \"2.ab\" failed: disk full".to_string()]
    );
  }

  #[tokio::test]
  async fn test_uninitialized_calls_fail() {
    let f = unselected();
    let cancel = CancellationToken::new();
    assert!(matches!(
      f.cache.resolve_list(&cancel).await,
      Err(Error::Uninitialized)
    ));

    // Selected, but no version resolved yet.
    f.state.apply_source("pkgA").await.unwrap();
    assert!(matches!(
      f.cache.get_resource(&item("1", "h1"), None, &cancel).await,
      Err(Error::Uninitialized)
    ));
    assert!(matches!(
      f.cache
        .get_resources(vec![item("1", "h1")], None, PoolChoice::Shared)
        .await,
      Err(Error::Uninitialized)
    ));
    assert_eq!(f.repo.network_calls(), 0);
  }

  #[tokio::test]
  async fn test_cancelled_resolution_commits_nothing() {
    let f = fixture().await;
    f.repo.set_latency(Duration::from_millis(50));
    let cancel = CancellationToken::new();

    let resolving = {
      let cache = f.cache.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { cache.resolve_list(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    assert!(resolving.await.unwrap().unwrap().is_empty());
    assert!(f.store.peek(CacheNamespace::Version, "pkgA,cn").is_none());
    assert!(f.store.peek(CacheNamespace::List, "pkgA,cn").is_none());
    assert_eq!(f.state.version(), None);
  }

  #[tokio::test]
  async fn test_version_fetch_is_retried() {
    let f = fixture().await;
    let cancel = CancellationToken::new();

    f.repo.fail_next_versions(2);
    assert_eq!(f.cache.resolve_list(&cancel).await.unwrap().len(), 2);
    assert_eq!(f.repo.version_calls.load(Ordering::SeqCst), 3);

    f.repo.fail_next_versions(3);
    assert!(matches!(
      f.cache.resolve_list(&cancel).await,
      Err(Error::RetriesExhausted { attempts: 3, .. })
    ));
  }

  #[tokio::test]
  async fn test_list_write_failure_fails_resolution() {
    let f = fixture().await;
    f.store.fail_writes(true);

    assert!(f
      .cache
      .resolve_list(&CancellationToken::new())
      .await
      .is_err());
    assert_eq!(f.state.version(), None);
  }

  #[tokio::test]
  async fn test_download_progress_is_reported_per_chunk() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    f.repo.set_chunk_pause(Duration::from_millis(50));

    let fetching = {
      let cache = f.cache.clone();
      let item = items[0].clone();
      tokio::spawn(async move { cache.get_resource(&item, None, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(f.cache.progress().get("1"), Some(0.5));

    let file = fetching.await.unwrap().unwrap();
    assert_eq!(file.bytes, Bytes::from("1:h1"));
    assert_eq!(f.cache.progress().get("1"), Some(1.0));
    assert_eq!(f.repo.fetch_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_aborted_item_counts_as_skipped() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    f.repo.abort_file("2");

    let batch = f
      .cache
      .get_resources(items, None, PoolChoice::Shared)
      .await
      .unwrap()
      .unwrap();

    assert_eq!(batch.files, vec![ResourceFile::new("1.ab", Bytes::from("1:h1"))]);
    assert_eq!(
      batch.summary,
      BatchResult {
        success: 1,
        skip: 1,
        error: 0
      }
    );
    assert_eq!(f.cache.progress().get("2"), None);
    assert!(f.notifier.messages().is_empty());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_shared_batches_keep_their_own_files() {
    let f = fixture().await;
    let items = f.cache.resolve_list(&CancellationToken::new()).await.unwrap();
    let start = Arc::new(tokio::sync::Barrier::new(2));

    let callers: Vec<_> = items
      .into_iter()
      .map(|item| {
        let cache = f.cache.clone();
        let start = start.clone();
        tokio::spawn(async move {
          let bytes = Bytes::from(format!("{}:{}", item.id, item.hash));
          let expected = ResourceFile::new(&item.name, bytes);
          for _ in 0..200 {
            start.wait().await;
            let batch = cache
              .get_resources(vec![item.clone()], None, PoolChoice::Shared)
              .await
              .unwrap();
            if let Some(batch) = batch {
              assert_eq!(batch.files, vec![expected.clone()]);
              assert_eq!(batch.summary.success, 1);
            }
          }
        })
      })
      .collect();

    for caller in callers {
      caller.await.unwrap();
    }
    assert!(f.notifier.messages().is_empty());
  }
}
