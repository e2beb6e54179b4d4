use crate::cache::{KvStore, SqliteStorage};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::notify::{BatchResult, Notifier};
use crate::query::{Query, QueryState};
use crate::repository::{
  FetchedBatch, HttpSourceLoader, PoolChoice, Preferences, RepositorySource, RepositoryState,
  ResourceCache, ResourceFile, ResourceItem, SourceRegistry, SuccessHook,
};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How often download progress is reported
const PROGRESS_TICK: Duration = Duration::from_millis(250);

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// List registered sources
  Sources,
  /// Register a source
  Add {
    name: String,
    /// Package name on the CDN or full manifest URL
    url: String,
  },
  /// Unregister a source
  Remove { name: String },
  /// Select a source by name, or by package name / URL
  Use {
    source: String,
    /// Repository to select within the source
    #[arg(short, long)]
    repo: Option<String>,
  },
  /// List repositories of the selected source
  Repos,
  /// List resources of the selected repository
  List,
  /// Download resources of the selected repository
  Fetch {
    /// Item ids to fetch
    ids: Vec<String>,
    /// Fetch every item
    #[arg(short, long)]
    all: bool,
    /// Output directory
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
  },
  /// Drop every cached version, list and file
  ClearCache,
  /// Drop the current selection
  Clear,
}

/// Main application state
pub struct App {
  config: Config,
  state: Arc<RepositoryState>,
  registry: SourceRegistry,
  resources: ResourceCache,
  /// Resource list of the selected repository
  list: Query<Vec<ResourceItem>>,
  events: EventHandler,
  /// Last reported (complete, total) download counts
  last_progress: Option<(usize, usize)>,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let cache_path = config.cache_path().ok_or_else(|| {
      eyre!(
        "Could not determine a cache location. Set cache_path in the config file or {}.",
        crate::config::CACHE_PATH_ENV
      )
    })?;
    debug!("Opening cache at {}", cache_path.display());
    let store: Arc<dyn KvStore> = Arc::new(SqliteStorage::open(&cache_path)?);

    let client = reqwest::Client::builder()
      .user_agent(concat!("assetrepo/", env!("CARGO_PKG_VERSION")))
      .build()?;
    let loader = Arc::new(HttpSourceLoader::new(client, &config.cdn_base)?);

    let events = EventHandler::new();
    let notifier: Arc<dyn Notifier> = Arc::new(events.sender());
    let prefs = Preferences::new(store.clone());
    let state = Arc::new(RepositoryState::new(
      loader,
      prefs.clone(),
      notifier,
      config.retry,
    ));
    let registry = SourceRegistry::new(prefs, state.clone());
    let resources = ResourceCache::new(store, state.clone(), config.concurrency, config.retry);

    let list = {
      let resources = resources.clone();
      Query::new(move |cancel| {
        let resources = resources.clone();
        async move {
          resources
            .resolve_list(&cancel)
            .await
            .map_err(|e| e.to_string())
        }
      })
    };

    Ok(Self {
      config,
      state,
      registry,
      resources,
      list,
      events,
      last_progress: None,
    })
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    let seeded = self.registry.seed(&self.config.sources).await?;
    if seeded > 0 {
      debug!("Registered {} sources from config", seeded);
    }

    if let Err(e) = self.state.restore().await {
      warn!("Failed to restore previous selection: {}", e);
    }
    self.drain_events();

    let result = self.execute(command).await;
    self.drain_events();
    result
  }

  async fn execute(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Sources => self.print_sources().await,
      Command::Add { name, url } => {
        self
          .registry
          .add(RepositorySource {
            name: name.clone(),
            url,
          })
          .await?;
        println!("Added source {}", name);
        Ok(())
      }
      Command::Remove { name } => match self.registry.remove(&name).await? {
        Some(_) => {
          println!("Removed source {}", name);
          Ok(())
        }
        None => Err(eyre!("Unknown source: {}", name)),
      },
      Command::Use { source, repo } => self.use_source(&source, repo.as_deref()).await,
      Command::Repos => {
        self.require_selection()?;
        self.print_repositories();
        Ok(())
      }
      Command::List => {
        for item in self.resolve_list().await? {
          println!("{}\t{}\t{}", item.id, item.name, item.hash);
        }
        Ok(())
      }
      Command::Fetch { ids, all, out } => self.fetch(&ids, all, &out).await,
      Command::ClearCache => {
        self.resources.clear_cache().await?;
        println!("Cache cleared");
        Ok(())
      }
      Command::Clear => {
        self.registry.select(None).await?;
        println!("Selection cleared");
        Ok(())
      }
    }
  }

  async fn print_sources(&self) -> Result<()> {
    let current = self.state.source();
    for source in self.registry.list().await? {
      let marker = if current.as_deref() == Some(source.url.as_str()) {
        "*"
      } else {
        " "
      };
      println!("{} {}\t{}", marker, source.name, source.url);
    }
    Ok(())
  }

  fn print_repositories(&self) {
    let selected = self.state.repository().map(|repo| repo.id().to_string());
    for repo in self.state.repositories() {
      let marker = if selected.as_deref() == Some(repo.id()) {
        "*"
      } else {
        " "
      };
      println!("{} {}\t{}", marker, repo.id(), repo.name());
    }
  }

  async fn use_source(&mut self, name_or_url: &str, repo: Option<&str>) -> Result<()> {
    let source = match self.registry.find(name_or_url).await? {
      Some(source) => source,
      None => RepositorySource {
        name: name_or_url.to_string(),
        url: name_or_url.to_string(),
      },
    };

    self.registry.select(Some(&source)).await?;
    if let Some(id) = repo {
      self.state.select_repository(id).await?;
    }

    println!("Using {}", source.name);
    self.print_repositories();
    Ok(())
  }

  fn require_selection(&self) -> Result<()> {
    self
      .state
      .selected()
      .map(|_| ())
      .map_err(|_| eyre!("No source selected. Run `assetrepo use <source>` first."))
  }

  async fn resolve_list(&mut self) -> Result<Vec<ResourceItem>> {
    self.require_selection()?;
    self.list.refetch();
    match self.list.settle().await {
      QueryState::Success(items) => Ok(items.clone()),
      QueryState::Error(e) => Err(eyre!("Failed to resolve resource list: {}", e)),
      QueryState::Idle | QueryState::Loading => Ok(Vec::new()),
    }
  }

  async fn fetch(&mut self, ids: &[String], all: bool, out: &Path) -> Result<()> {
    let items = self.resolve_list().await?;
    let (chosen, unknown) = choose_items(items, ids, all)?;
    for id in &unknown {
      warn!("Unknown item {}", id);
    }

    std::fs::create_dir_all(out)
      .map_err(|e| eyre!("Failed to create {}: {}", out.display(), e))?;
    let hook = write_to(out.to_path_buf());

    let requested = chosen.len();
    let resources = self.resources.clone();
    let fetch = resources.get_resources(chosen, Some(hook), PoolChoice::Shared);
    tokio::pin!(fetch);
    let mut ticker = tokio::time::interval(PROGRESS_TICK);

    let batch = loop {
      tokio::select! {
        batch = &mut fetch => break batch?,
        _ = ticker.tick() => self.report_progress(requested),
        _ = tokio::signal::ctrl_c() => resources.cancel_shared(),
      }
    };
    self.report_progress(requested);

    let Some(batch) = batch else {
      println!("Fetch cancelled");
      return Ok(());
    };
    println!("{}", summarize(&batch, unknown.len()).notice("Fetched"));
    Ok(())
  }

  fn report_progress(&mut self, total: usize) {
    let sender = self.events.sender();
    for (item, value) in self.resources.progress().snapshot() {
      sender.send(Event::Progress { item, value });
    }
    self.drain_events_with_total(total);
  }

  fn drain_events(&mut self) {
    self.drain_events_with_total(0);
  }

  fn drain_events_with_total(&mut self, total: usize) {
    let mut complete = None;
    while let Some(event) = self.events.try_next() {
      match event {
        Event::Notice(notice) => eprintln!("{}", notice),
        Event::Progress { value, .. } => {
          let count = complete.get_or_insert(0);
          if value >= 1.0 {
            *count += 1;
          }
        }
      }
    }

    if let Some(complete) = complete {
      let counts = (complete, total);
      if total > 0 && self.last_progress != Some(counts) {
        eprintln!("Downloaded {}/{}", complete, total);
        self.last_progress = Some(counts);
      }
    }
  }
}

/// Split the requested ids into known items and unknown ids.
fn choose_items(
  items: Vec<ResourceItem>,
  ids: &[String],
  all: bool,
) -> Result<(Vec<ResourceItem>, Vec<String>)> {
  if all {
    return Ok((items, Vec::new()));
  }
  if ids.is_empty() {
    return Err(eyre!("Nothing to fetch. Pass item ids or --all."));
  }

  let unknown = ids
    .iter()
    .filter(|id| !items.iter().any(|item| &item.id == *id))
    .cloned()
    .collect();
  let chosen = items
    .into_iter()
    .filter(|item| ids.contains(&item.id))
    .collect();
  Ok((chosen, unknown))
}

/// Batch counts, with ids missing from the list counted as skipped.
fn summarize(batch: &FetchedBatch, unknown: usize) -> BatchResult {
  BatchResult {
    skip: batch.summary.skip + unknown,
    ..batch.summary
  }
}

/// Hook writing every fetched file into `dir`.
fn write_to(dir: PathBuf) -> SuccessHook {
  write_with(dir, |path, bytes| std::fs::write(path, bytes))
}

/// Hook handing every fetched file to `write`, named after the last
/// component of its file name.
fn write_with<W>(dir: PathBuf, write: W) -> SuccessHook
where
  W: Fn(&Path, &[u8]) -> std::io::Result<()> + Send + Sync + 'static,
{
  Arc::new(move |file: &ResourceFile| -> std::result::Result<(), String> {
    let name = Path::new(&file.name)
      .file_name()
      .ok_or_else(|| format!("invalid file name {:?}", file.name))?;
    write(&dir.join(name), &file.bytes).map_err(|e| e.to_string())
  })
}
