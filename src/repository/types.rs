use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::cache::{json_decode, json_encode, CacheValue};
use crate::error::Result;

/// A source registered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySource {
  pub name: String,
  /// Bare package name or full `http(s)://` URL of the source manifest
  pub url: String,
}

/// One repository as listed in a source manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryDescriptor {
  #[serde(deserialize_with = "string_or_number")]
  pub id: String,
  pub name: String,
  /// Root of the repository API, relative to the manifest URL or absolute
  pub base_url: String,
}

/// One fetchable resource of a repository version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceItem {
  #[serde(deserialize_with = "string_or_number")]
  pub id: String,
  pub name: String,
  /// Content fingerprint; changes whenever the upstream bytes change
  pub hash: String,
  /// Explicit download location, when the repository provides one
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
}

/// Identifies a snapshot of a repository's resource list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(pub String);

impl VersionToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for VersionToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl CacheValue for VersionToken {
  fn encode(&self) -> Result<Vec<u8>> {
    json_encode(self)
  }

  fn decode(bytes: Vec<u8>) -> Result<Self> {
    json_decode(&bytes)
  }
}

impl CacheValue for Vec<ResourceItem> {
  fn encode(&self) -> Result<Vec<u8>> {
    json_encode(self)
  }

  fn decode(bytes: Vec<u8>) -> Result<Self> {
    json_decode(&bytes)
  }
}

impl CacheValue for Vec<RepositorySource> {
  fn encode(&self) -> Result<Vec<u8>> {
    json_encode(self)
  }

  fn decode(bytes: Vec<u8>) -> Result<Self> {
    json_decode(&bytes)
  }
}

/// Downloaded (or cached) resource content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
  pub name: String,
  pub bytes: Bytes,
}

impl ResourceFile {
  pub fn new(name: impl Into<String>, bytes: Bytes) -> Self {
    Self {
      name: name.into(),
      bytes,
    }
  }
}

/// Download progress. `total` is 0 when the size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
  pub loaded: u64,
  pub total: u64,
}

/// Arguments of a single resource download.
pub struct FetchRequest<'a> {
  pub version: &'a VersionToken,
  pub item: &'a ResourceItem,
  pub on_progress: &'a (dyn Fn(FetchProgress) + Send + Sync),
  pub cancel: &'a CancellationToken,
}

/// Upstream ids may be strings or numbers; both become strings.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Id {
    Text(String),
    Number(serde_json::Number),
  }

  Ok(match Id::deserialize(deserializer)? {
    Id::Text(s) => s,
    Id::Number(n) => n.to_string(),
  })
}
