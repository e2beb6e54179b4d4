//! Remote repositories, their selection and the resource cache in front of them.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;
pub mod remote;
pub mod resources;
pub mod sources;
pub mod state;
pub mod types;

pub use http::{resolve_source_url, HttpRepository, HttpSourceLoader, DEFAULT_CDN_BASE};
pub use remote::{RemoteRepository, Repository, SourceLoader};
pub use resources::{
  FetchTask, FetchedBatch, PoolChoice, ResourceCache, SuccessHook, DEFAULT_CONCURRENCY,
};
pub use sources::{Preferences, SourceRegistry, RESERVED_SOURCE_NAME};
pub use state::{Active, Phase, RepositoryState, Selected};
pub use types::{
  FetchProgress, FetchRequest, RepositoryDescriptor, RepositorySource, ResourceFile, ResourceItem,
  VersionToken,
};
