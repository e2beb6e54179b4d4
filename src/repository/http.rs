//! HTTP implementations of the source loader and repository.
//!
//! A source manifest is a JSON array of repository descriptors. Each
//! repository exposes, relative to its base URL:
//! - `version`: the current version token as plain text
//! - `<version>/list.json`: the resource list of that version
//! - `<version>/files/<id>`: resource bytes, unless the item carries a `url`

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::remote::{RemoteRepository, Repository, SourceLoader};
use super::types::{FetchProgress, FetchRequest, RepositoryDescriptor, ResourceItem, VersionToken};
use crate::error::{Error, Result};

pub const DEFAULT_CDN_BASE: &str = "https://unpkg.com/";

/// Preallocation cap for downloads with a declared length.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Turn a source identifier into the URL of its manifest.
///
/// Full `http(s)://` URLs are taken as-is; anything else is treated as a
/// package name on the CDN.
pub fn resolve_source_url(source: &str, cdn_base: &Url) -> Result<Url> {
  let source = source.trim();
  if source.is_empty() {
    return Err(Error::InvalidSource("empty source".to_string()));
  }

  let lower = source.to_ascii_lowercase();
  if lower.starts_with("http://") || lower.starts_with("https://") {
    return Url::parse(source).map_err(|e| Error::InvalidSource(format!("{source}: {e}")));
  }

  cdn_base
    .join(source)
    .map_err(|e| Error::InvalidSource(format!("{source}: {e}")))
}

/// Make sure relative joins append to the base instead of replacing its last segment.
fn as_directory(mut url: Url) -> Url {
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
  let status = response.status();
  if status.is_success() {
    Ok(response)
  } else {
    Err(Error::Status {
      url: response.url().to_string(),
      status,
    })
  }
}

/// Loads source manifests over HTTP.
#[derive(Clone)]
pub struct HttpSourceLoader {
  client: reqwest::Client,
  cdn_base: Url,
}

impl HttpSourceLoader {
  pub fn new(client: reqwest::Client, cdn_base: &str) -> Result<Self> {
    let cdn_base = Url::parse(cdn_base)
      .map_err(|e| Error::InvalidSource(format!("CDN base {cdn_base}: {e}")))?;

    Ok(Self {
      client,
      cdn_base: as_directory(cdn_base),
    })
  }
}

#[async_trait]
impl SourceLoader for HttpSourceLoader {
  async fn load(&self, source: &str) -> Result<Vec<Repository>> {
    let manifest_url = resolve_source_url(source, &self.cdn_base)?;
    debug!("Loading source manifest {}", manifest_url);

    let response = check_status(self.client.get(manifest_url.clone()).send().await?)?;
    let descriptors: Vec<RepositoryDescriptor> = response.json().await?;

    descriptors
      .into_iter()
      .map(|descriptor| {
        let base = manifest_url
          .join(&descriptor.base_url)
          .map_err(|e| Error::InvalidSource(format!("{}: {}", descriptor.base_url, e)))?;
        Ok(Arc::new(HttpRepository::new(self.client.clone(), descriptor, base)) as Repository)
      })
      .collect()
  }
}

/// Repository served over plain HTTP.
pub struct HttpRepository {
  client: reqwest::Client,
  id: String,
  name: String,
  base: Url,
}

impl HttpRepository {
  pub fn new(client: reqwest::Client, descriptor: RepositoryDescriptor, base: Url) -> Self {
    Self {
      client,
      id: descriptor.id,
      name: descriptor.name,
      base: as_directory(base),
    }
  }

  /// Base URL with percent-encoded path segments appended.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| Error::InvalidSource(format!("{} cannot be a base URL", self.base)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn resource_url(&self, version: &VersionToken, item: &ResourceItem) -> Result<Url> {
    match &item.url {
      Some(url) => self
        .base
        .join(url)
        .map_err(|e| Error::InvalidSource(format!("{url}: {e}"))),
      None => self.endpoint(&[version.as_str(), "files", &item.id]),
    }
  }
}

#[async_trait]
impl RemoteRepository for HttpRepository {
  fn id(&self) -> &str {
    &self.id
  }

  fn name(&self) -> &str {
    &self.name
  }

  async fn resource_version(&self) -> Result<VersionToken> {
    let url = self.endpoint(&["version"])?;
    let response = check_status(self.client.get(url).send().await?)?;
    let text = response.text().await?;
    Ok(VersionToken::new(text.trim()))
  }

  async fn resource_list(&self, version: &VersionToken) -> Result<Vec<ResourceItem>> {
    let url = self.endpoint(&[version.as_str(), "list.json"])?;
    let response = check_status(self.client.get(url).send().await?)?;
    Ok(response.json().await?)
  }

  async fn fetch_resource(&self, request: FetchRequest<'_>) -> Result<Bytes> {
    let url = self.resource_url(request.version, request.item)?;
    debug!("Downloading {}", url);

    let response = tokio::select! {
      _ = request.cancel.cancelled() => return Err(Error::Aborted),
      response = self.client.get(url).send() => check_status(response?)?,
    };

    let total = response.content_length().unwrap_or(0);
    let mut body = BytesMut::with_capacity(total.min(MAX_PREALLOC) as usize);
    let mut loaded = 0u64;
    let mut stream = response.bytes_stream();

    loop {
      let chunk = tokio::select! {
        _ = request.cancel.cancelled() => return Err(Error::Aborted),
        chunk = stream.next() => chunk,
      };
      let Some(chunk) = chunk else { break };
      let chunk = chunk?;

      loaded += chunk.len() as u64;
      body.extend_from_slice(&chunk);
      (request.on_progress)(FetchProgress { loaded, total });
    }

    Ok(body.freeze())
  }
}
