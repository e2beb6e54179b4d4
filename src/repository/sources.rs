//! User-registered sources and remembered selections.

use std::sync::Arc;
use tracing::info;

use super::state::RepositoryState;
use super::types::RepositorySource;
use crate::cache::{escape_component, CacheLayer, CacheNamespace, KvStore};
use crate::error::{Error, Result};

const SOURCE_LIST_KEY: &str = "source-list";
const CURRENT_SOURCE_KEY: &str = "current-source";

/// Name that would clash with the "no source" entry of a picker.
pub const RESERVED_SOURCE_NAME: &str = "Disabled";

fn repository_key(source: &str) -> String {
  format!("repo-id,{}", escape_component(source))
}

/// Small persistent settings kept next to the cache, but never cleared with it.
#[derive(Clone)]
pub struct Preferences {
  sources: CacheLayer<Vec<RepositorySource>>,
  values: CacheLayer<String>,
}

impl Preferences {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    Self {
      sources: CacheLayer::new(store.clone(), CacheNamespace::Preferences),
      values: CacheLayer::new(store, CacheNamespace::Preferences),
    }
  }

  pub async fn sources(&self) -> Result<Vec<RepositorySource>> {
    Ok(self.sources.get(SOURCE_LIST_KEY).await?.unwrap_or_default())
  }

  pub async fn set_sources(&self, sources: &[RepositorySource]) -> Result<()> {
    self.sources.set(SOURCE_LIST_KEY, &sources.to_vec()).await
  }

  pub async fn current_source(&self) -> Result<Option<String>> {
    self.values.get(CURRENT_SOURCE_KEY).await
  }

  pub async fn set_current_source(&self, source: Option<&str>) -> Result<()> {
    self.set_or_remove(CURRENT_SOURCE_KEY, source).await
  }

  /// Repository last selected for `source`.
  pub async fn repository_for(&self, source: &str) -> Result<Option<String>> {
    self.values.get(&repository_key(source)).await
  }

  pub async fn set_repository_for(&self, source: &str, id: Option<&str>) -> Result<()> {
    self.set_or_remove(&repository_key(source), id).await
  }

  async fn set_or_remove(&self, key: &str, value: Option<&str>) -> Result<()> {
    match value {
      Some(value) => self.values.set(key, &value.to_string()).await,
      None => self.values.remove(key).await,
    }
  }
}

pub struct SourceRegistry {
  prefs: Preferences,
  state: Arc<RepositoryState>,
}

impl SourceRegistry {
  pub fn new(prefs: Preferences, state: Arc<RepositoryState>) -> Self {
    Self { prefs, state }
  }

  pub async fn list(&self) -> Result<Vec<RepositorySource>> {
    self.prefs.sources().await
  }

  /// Look a source up by name, then by URL.
  pub async fn find(&self, name_or_url: &str) -> Result<Option<RepositorySource>> {
    let sources = self.list().await?;
    let by_name = sources.iter().find(|s| s.name == name_or_url);
    let found = by_name.or_else(|| sources.iter().find(|s| s.url == name_or_url));
    Ok(found.cloned())
  }

  pub async fn check_new_name(&self, name: &str) -> Result<bool> {
    if name.is_empty() || name == RESERVED_SOURCE_NAME {
      return Ok(false);
    }
    Ok(!self.list().await?.iter().any(|s| s.name == name))
  }

  pub async fn check_new_url(&self, url: &str) -> Result<bool> {
    if url.is_empty() {
      return Ok(false);
    }
    Ok(!self.list().await?.iter().any(|s| s.url == url))
  }

  pub async fn add(&self, source: RepositorySource) -> Result<()> {
    if !self.check_new_name(&source.name).await? {
      return Err(Error::InvalidSource(format!(
        "name \"{}\" is empty, reserved or already used",
        source.name
      )));
    }
    if !self.check_new_url(&source.url).await? {
      return Err(Error::InvalidSource(format!(
        "url \"{}\" is empty or already used",
        source.url
      )));
    }

    let mut sources = self.list().await?;
    info!("Adding source {} ({})", source.name, source.url);
    sources.push(source);
    self.prefs.set_sources(&sources).await
  }

  /// Add every seed source that conflicts with nothing already registered.
  pub async fn seed(&self, seeds: &[RepositorySource]) -> Result<usize> {
    let mut added = 0;
    for source in seeds {
      if self.check_new_name(&source.name).await? && self.check_new_url(&source.url).await? {
        self.add(source.clone()).await?;
        added += 1;
      }
    }
    Ok(added)
  }

  /// Remove the source called `name`, clearing the selection if it uses it.
  pub async fn remove(&self, name: &str) -> Result<Option<RepositorySource>> {
    let mut sources = self.list().await?;
    let Some(index) = sources.iter().position(|s| s.name == name) else {
      return Ok(None);
    };
    let removed = sources.remove(index);

    if self.state.selecting_source().as_deref() == Some(removed.url.as_str()) {
      self.state.clear().await;
    }

    self.prefs.set_sources(&sources).await?;
    self.prefs.set_repository_for(&removed.url, None).await?;
    info!("Removed source {}", removed.name);
    Ok(Some(removed))
  }

  /// Make `source` current, or drop the selection for `None`.
  pub async fn select(&self, source: Option<&RepositorySource>) -> Result<bool> {
    match source {
      Some(source) => self.state.apply_source(&source.url).await,
      None => {
        self.state.clear().await;
        Ok(true)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::notify::LogNotifier;
  use crate::repository::mock::{item, MockLoader, MockRepository};
  use crate::retry::RetryPolicy;

  fn source(name: &str, url: &str) -> RepositorySource {
    RepositorySource {
      name: name.into(),
      url: url.into(),
    }
  }

  fn registry() -> (SourceRegistry, Arc<RepositoryState>, Preferences) {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let prefs = Preferences::new(store);
    let repo = MockRepository::new("cn", "v1", vec![item("1", "h1")]).shared();
    let loader = Arc::new(MockLoader::new().with_source("pkgA", vec![repo]));
    let state = Arc::new(RepositoryState::new(
      loader,
      prefs.clone(),
      Arc::new(LogNotifier),
      RetryPolicy::default(),
    ));
    (
      SourceRegistry::new(prefs.clone(), state.clone()),
      state,
      prefs,
    )
  }

  #[tokio::test]
  async fn test_name_and_url_checks() {
    let (registry, _, _) = registry();
    registry.add(source("A", "pkgA")).await.unwrap();

    assert!(!registry.check_new_name("A").await.unwrap());
    assert!(!registry.check_new_name("Disabled").await.unwrap());
    assert!(!registry.check_new_name("").await.unwrap());
    assert!(registry.check_new_name("B").await.unwrap());

    assert!(!registry.check_new_url("pkgA").await.unwrap());
    assert!(registry.check_new_url("pkgB").await.unwrap());
  }

  #[tokio::test]
  async fn test_add_rejects_conflicts() {
    let (registry, _, _) = registry();
    registry.add(source("A", "pkgA")).await.unwrap();

    assert!(matches!(
      registry.add(source("A", "pkgB")).await,
      Err(Error::InvalidSource(_))
    ));
    assert!(matches!(
      registry.add(source("B", "pkgA")).await,
      Err(Error::InvalidSource(_))
    ));
    assert_eq!(registry.list().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_find_by_name_or_url() {
    let (registry, _, _) = registry();
    registry.add(source("A", "pkgA")).await.unwrap();

    assert_eq!(registry.find("A").await.unwrap().unwrap().url, "pkgA");
    assert_eq!(registry.find("pkgA").await.unwrap().unwrap().name, "A");
    assert!(registry.find("nope").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_removing_selected_source_clears_state() {
    let (registry, state, prefs) = registry();
    let a = source("A", "pkgA");
    registry.add(a.clone()).await.unwrap();
    assert!(registry.select(Some(&a)).await.unwrap());
    assert!(prefs.repository_for("pkgA").await.unwrap().is_some());

    let removed = registry.remove("A").await.unwrap();

    assert_eq!(removed, Some(a));
    assert!(state.source().is_none());
    assert!(prefs.repository_for("pkgA").await.unwrap().is_none());
    assert!(registry.list().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_removing_other_source_keeps_selection() {
    let (registry, state, _) = registry();
    let a = source("A", "pkgA");
    registry.add(a.clone()).await.unwrap();
    registry.add(source("B", "pkgB")).await.unwrap();
    registry.select(Some(&a)).await.unwrap();

    registry.remove("B").await.unwrap();
    assert_eq!(state.source().as_deref(), Some("pkgA"));
    assert_eq!(registry.remove("B").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_seed_skips_conflicts() {
    let (registry, _, _) = registry();
    registry.add(source("A", "pkgA")).await.unwrap();

    let added = registry
      .seed(&[source("A", "other"), source("B", "pkgB"), source("Disabled", "x")])
      .await
      .unwrap();
    assert_eq!(added, 1);
    assert_eq!(registry.list().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_repository_keys_are_escaped() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let prefs = Preferences::new(store);
    prefs.set_repository_for("a,b", Some("1")).await.unwrap();
    prefs.set_repository_for("a", Some("2")).await.unwrap();

    assert_eq!(prefs.repository_for("a,b").await.unwrap().as_deref(), Some("1"));
    assert_eq!(prefs.repository_for("a").await.unwrap().as_deref(), Some("2"));
    prefs.set_repository_for("a,b", None).await.unwrap();
    assert_eq!(prefs.repository_for("a,b").await.unwrap(), None);
  }
}
