//! Retry with cancellation.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// How often and how fast a failed upstream call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total number of attempts, including the first one
  pub attempts: usize,
  /// Pause between attempts
  #[serde(rename = "delay_ms", with = "millis")]
  pub delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      delay: Duration::ZERO,
    }
  }
}

impl RetryPolicy {
  /// Run `operation` until it succeeds or the attempts are used up.
  ///
  /// When `cancel` fires, the attempt in flight is dropped and the call
  /// returns [`Error::Aborted`] without trying again.
  pub async fn run<T, F, Fut>(&self, cancel: Option<&CancellationToken>, mut operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let attempts = self.attempts.max(1);
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);

    let mut attempt = 1;
    loop {
      let result = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Aborted),
        result = operation() => result,
      };

      let error = match result {
        Ok(value) => return Ok(value),
        Err(e) if e.is_abort() => return Err(e),
        Err(e) => e,
      };

      if attempt >= attempts {
        return Err(if attempts == 1 {
          error
        } else {
          Error::RetriesExhausted {
            attempts,
            last: Box::new(error),
          }
        });
      }

      debug!(attempt, "Attempt failed, retrying: {}", error);
      attempt += 1;

      if !self.delay.is_zero() {
        tokio::select! {
          _ = cancel.cancelled() => return Err(Error::Aborted),
          _ = tokio::time::sleep(self.delay) => {}
        }
      }
    }
  }
}

mod millis {
  use serde::{Deserialize, Deserializer};
  use std::time::Duration;

  pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
  where
    D: Deserializer<'de>,
  {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
  }
}
