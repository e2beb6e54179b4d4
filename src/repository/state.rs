//! Selection state: which source and repository are active.
//!
//! ```text
//! Empty --apply_source--> Loading --loaded--> Ready
//!   ^                        |                  |
//!   +-------- clear ---------+------------------+
//! ```
//!
//! Several loads may overlap. Only the one whose source still matches the
//! loading marker when it settles is allowed to touch the state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use super::remote::{Repository, SourceLoader};
use super::sources::Preferences;
use super::types::VersionToken;
use crate::error::{Error, Result};
use crate::notify::{Notice, Notifier};
use crate::progress::ProgressMap;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
  Empty,
  /// A source is being loaded; an older one may still be current
  Loading { source: String },
  Ready { source: String },
}

/// The selected source and repository.
#[derive(Clone)]
pub struct Selected {
  pub source: String,
  pub repository: Repository,
}

/// A selection whose version has been resolved.
#[derive(Clone)]
pub struct Active {
  pub source: String,
  pub repository: Repository,
  pub version: VersionToken,
}

#[derive(Default)]
struct Selection {
  loading: Option<String>,
  source: Option<String>,
  repositories: Vec<Repository>,
  repository_id: Option<String>,
  version: Option<VersionToken>,
}

impl Selection {
  fn repository(&self) -> Option<&Repository> {
    let id = self.repository_id.as_deref()?;
    self.repositories.iter().find(|repo| repo.id() == id)
  }
}

pub struct RepositoryState {
  loader: Arc<dyn SourceLoader>,
  prefs: Preferences,
  notifier: Arc<dyn Notifier>,
  retry: RetryPolicy,
  progress: ProgressMap,
  selection: Mutex<Selection>,
}

impl RepositoryState {
  pub fn new(
    loader: Arc<dyn SourceLoader>,
    prefs: Preferences,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      loader,
      prefs,
      notifier,
      retry,
      progress: ProgressMap::new(),
      selection: Mutex::new(Selection::default()),
    }
  }

  pub fn phase(&self) -> Phase {
    let selection = self.lock();
    match (&selection.loading, &selection.source) {
      (Some(source), _) => Phase::Loading {
        source: source.clone(),
      },
      (None, Some(source)) => Phase::Ready {
        source: source.clone(),
      },
      (None, None) => Phase::Empty,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.lock().loading.is_some()
  }

  /// The source being loaded, or else the current one.
  pub fn selecting_source(&self) -> Option<String> {
    let selection = self.lock();
    selection.loading.clone().or_else(|| selection.source.clone())
  }

  pub fn source(&self) -> Option<String> {
    self.lock().source.clone()
  }

  pub fn repositories(&self) -> Vec<Repository> {
    self.lock().repositories.clone()
  }

  pub fn repository(&self) -> Option<Repository> {
    self.lock().repository().cloned()
  }

  pub fn version(&self) -> Option<VersionToken> {
    self.lock().version.clone()
  }

  pub fn progress(&self) -> &ProgressMap {
    &self.progress
  }

  pub fn notifier(&self) -> &Arc<dyn Notifier> {
    &self.notifier
  }

  /// Current source and repository, or `Error::Uninitialized`.
  pub fn selected(&self) -> Result<Selected> {
    let selection = self.lock();
    match (&selection.source, selection.repository()) {
      (Some(source), Some(repository)) => Ok(Selected {
        source: source.clone(),
        repository: Arc::clone(repository),
      }),
      _ => Err(Error::Uninitialized),
    }
  }

  /// Current selection with its resolved version, or `Error::Uninitialized`.
  pub fn active(&self) -> Result<Active> {
    let selection = self.lock();
    match (&selection.source, selection.repository(), &selection.version) {
      (Some(source), Some(repository), Some(version)) => Ok(Active {
        source: source.clone(),
        repository: Arc::clone(repository),
        version: version.clone(),
      }),
      _ => Err(Error::Uninitialized),
    }
  }

  /// Record the resolved version, unless the selection moved on meanwhile.
  pub fn set_version(&self, selected: &Selected, version: VersionToken) -> bool {
    let mut selection = self.lock();
    let still_selected = selection.source.as_deref() == Some(selected.source.as_str())
      && selection.repository_id.as_deref() == Some(selected.repository.id());
    if still_selected {
      selection.version = Some(version);
    }
    still_selected
  }

  /// Load `source` and make it current.
  ///
  /// Returns `Ok(false)` when a newer `apply_source` or `clear` superseded
  /// this call; its result is then discarded. Failures are also reported
  /// through the notifier.
  pub async fn apply_source(&self, source: &str) -> Result<bool> {
    self.lock().loading = Some(source.to_string());

    let loaded = self.retry.run(None, || self.loader.load(source)).await;
    let remembered = match &loaded {
      Ok(_) => self.prefs.repository_for(source).await.unwrap_or_else(|e| {
        warn!("Failed to read remembered repository for {}: {}", source, e);
        None
      }),
      Err(_) => None,
    };

    let repositories = {
      let mut selection = self.lock();
      if selection.loading.as_deref() != Some(source) {
        return Ok(false);
      }
      selection.loading = None;

      let repositories = match loaded {
        Ok(repositories) => repositories,
        Err(e) => {
          drop(selection);
          self
            .notifier
            .notify(Notice::error(format!("Load repo {source} failed: {e}")));
          return Err(e);
        }
      };

      let repository_id = remembered
        .filter(|id| repositories.iter().any(|repo| repo.id() == id))
        .or_else(|| repositories.first().map(|repo| repo.id().to_string()));

      selection.source = Some(source.to_string());
      selection.repositories = repositories;
      selection.repository_id = repository_id.clone();
      selection.version = None;
      self.progress.clear();
      repository_id
    };

    info!("Applied source {}", source);
    self.persist_selection(source, repositories.as_deref()).await;
    Ok(true)
  }

  /// Switch to another repository of the current source.
  pub async fn select_repository(&self, id: &str) -> Result<()> {
    let source = {
      let mut selection = self.lock();
      let source = selection.source.clone().ok_or(Error::Uninitialized)?;
      if !selection.repositories.iter().any(|repo| repo.id() == id) {
        return Err(Error::InvalidSource(format!(
          "repository {id} not found in {source}"
        )));
      }
      if selection.repository_id.as_deref() != Some(id) {
        selection.repository_id = Some(id.to_string());
        selection.version = None;
      }
      source
    };

    self.prefs.set_repository_for(&source, Some(id)).await
  }

  /// Drop the selection. The persistent cache is left alone.
  pub async fn clear(&self) {
    {
      let mut selection = self.lock();
      *selection = Selection::default();
    }
    self.progress.clear();

    if let Err(e) = self.prefs.set_current_source(None).await {
      warn!("Failed to forget current source: {}", e);
    }
  }

  /// Re-apply the source that was current in the previous session.
  pub async fn restore(&self) -> Result<bool> {
    match self.prefs.current_source().await? {
      Some(source) => self.apply_source(&source).await,
      None => Ok(false),
    }
  }

  async fn persist_selection(&self, source: &str, repository_id: Option<&str>) {
    if let Err(e) = self.prefs.set_current_source(Some(source)).await {
      warn!("Failed to remember current source: {}", e);
    }
    if let Err(e) = self.prefs.set_repository_for(source, repository_id).await {
      warn!("Failed to remember repository for {}: {}", source, e);
    }
  }

  fn lock(&self) -> MutexGuard<'_, Selection> {
    self.selection.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
