//! Error type shared by the library modules.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// An operation needed a selected repository or a resolved version.
  #[error("Repository not initialized")]
  Uninitialized,

  /// Cooperative cancellation. Never reported as a failure.
  #[error("abort")]
  Aborted,

  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{url} responded with {status}")]
  Status {
    url: String,
    status: reqwest::StatusCode,
  },

  #[error("Cache store error: {0}")]
  Store(#[from] rusqlite::Error),

  #[error("Cache store lock poisoned")]
  LockPoisoned,

  #[error("Failed to encode or decode cached value: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("Invalid source: {0}")]
  InvalidSource(String),

  #[error("Gave up after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: usize, last: Box<Error> },

  #[error("Task panicked: {0}")]
  TaskPanicked(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Whether this error stands for a cancelled operation rather than a failure.
  pub fn is_abort(&self) -> bool {
    match self {
      Error::Aborted => true,
      Error::RetriesExhausted { last, .. } => last.is_abort(),
      _ => false,
    }
  }
}
