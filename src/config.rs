use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::repository::{RepositorySource, DEFAULT_CDN_BASE, DEFAULT_CONCURRENCY};
use crate::retry::RetryPolicy;

/// Overrides `cache_path`.
pub const CACHE_PATH_ENV: &str = "ASSETREPO_CACHE_PATH";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// SQLite cache file (defaults to the platform data directory)
  pub cache_path: Option<PathBuf>,
  /// Maximum number of concurrent resource downloads
  pub concurrency: usize,
  pub retry: RetryPolicy,
  /// Base URL that bare package names are resolved against
  pub cdn_base: String,
  /// Directory for daily rotated log files; logs go to stderr when unset
  pub log_dir: Option<PathBuf>,
  /// Sources registered on first use
  pub sources: Vec<RepositorySource>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_path: None,
      concurrency: DEFAULT_CONCURRENCY,
      retry: RetryPolicy::default(),
      cdn_base: DEFAULT_CDN_BASE.to_string(),
      log_dir: None,
      sources: Vec::new(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./assetrepo.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/assetrepo/config.yaml
  ///
  /// Without any file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Some(path) = std::env::var_os(CACHE_PATH_ENV) {
      config.cache_path = Some(PathBuf::from(path));
    }
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("assetrepo.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("assetrepo").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is a valid, default configuration.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// The cache file to open, if one can be determined.
  pub fn cache_path(&self) -> Option<PathBuf> {
    self
      .cache_path
      .clone()
      .or_else(crate::cache::SqliteStorage::default_path)
  }
}
