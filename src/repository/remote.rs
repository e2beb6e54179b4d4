//! Seams to the upstream world: sources and their repositories.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use super::types::{FetchRequest, ResourceItem, VersionToken};
use crate::error::Result;

/// A named collection of resources served by a source.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
  /// Stable identifier within the source
  fn id(&self) -> &str;

  fn name(&self) -> &str;

  /// Current version token of the resource list.
  async fn resource_version(&self) -> Result<VersionToken>;

  /// Resource list belonging to `version`.
  async fn resource_list(&self, version: &VersionToken) -> Result<Vec<ResourceItem>>;

  /// Download one resource, reporting progress and honouring `request.cancel`.
  async fn fetch_resource(&self, request: FetchRequest<'_>) -> Result<Bytes>;
}

pub type Repository = Arc<dyn RemoteRepository>;

/// Resolves a source identifier to the repositories it offers.
#[async_trait]
pub trait SourceLoader: Send + Sync {
  async fn load(&self, source: &str) -> Result<Vec<Repository>>;
}
