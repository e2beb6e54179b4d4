//! User-facing notices.

use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Success,
  Warning,
  Error,
}

/// A short message meant for the user, as opposed to a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

impl Notice {
  pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Error, message)
  }
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let tag = match self.level {
      NoticeLevel::Info => "info",
      NoticeLevel::Success => "ok",
      NoticeLevel::Warning => "warn",
      NoticeLevel::Error => "error",
    };
    write!(f, "[{}] {}", tag, self.message)
  }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
  fn notify(&self, notice: Notice);
}

/// Notifier that only writes notices to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, notice: Notice) {
    match notice.level {
      NoticeLevel::Info | NoticeLevel::Success => info!("{}", notice.message),
      NoticeLevel::Warning => warn!("{}", notice.message),
      NoticeLevel::Error => error!("{}", notice.message),
    }
  }
}

/// Counts of a batch file operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
  pub success: usize,
  pub skip: usize,
  pub error: usize,
}

impl BatchResult {
  /// Summary such as `Fetched 3 files, skipped 1, failed 2`.
  pub fn notice(&self, action: &str) -> Notice {
    let mut parts = vec![format!(
      "{} {} file{}",
      action,
      self.success,
      if self.success > 1 { "s" } else { "" }
    )];
    if self.skip > 0 {
      parts.push(format!("skipped {}", self.skip));
    }
    if self.error > 0 {
      parts.push(format!("failed {}", self.error));
    }

    let level = if self.success > 0 {
      NoticeLevel::Success
    } else if self.skip > 0 {
      NoticeLevel::Warning
    } else if self.error > 0 {
      NoticeLevel::Error
    } else {
      NoticeLevel::Info
    };

    Notice::new(level, parts.join(", "))
  }
}
