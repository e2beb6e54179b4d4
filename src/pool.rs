//! Bounded-concurrency task pool with generation-based cancellation.
//!
//! A `TaskPool` runs one handler over a growing list of tasks, at most
//! `concurrency` at a time. Calling [`TaskPool::restart`] starts a new
//! generation: tasks from older generations that have not started yet are
//! dropped without running, running ones see their cancellation token fire,
//! and whatever they eventually return is reported as aborted.
//!
//! # Example
//!
//! ```ignore
//! let pool = TaskPool::new(8, |url: String, cancel| async move { download(&url, cancel).await })
//!   .on_error(|err, url| tracing::error!("{url}: {err}"));
//!
//! let batch = pool.restart_with(urls);
//! let outdated = batch.outdated_check();
//! let settled = batch.wait().await;
//! if outdated.is_outdated() {
//!   // a newer batch took over, discard
//! }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Error, Result};

type Handler<T, R> =
  Arc<dyn Fn(T, CancellationToken) -> BoxFuture<'static, Result<R>> + Send + Sync>;
type ErrorCallback<T> = Arc<dyn Fn(&Error, &T) + Send + Sync>;
type AbortCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// How a task settled.
#[derive(Debug)]
pub enum Outcome<R> {
  Done(R),
  Failed(Error),
  /// Cancelled, or superseded by a newer generation
  Aborted,
}

impl<R> Outcome<R> {
  pub fn is_done(&self) -> bool {
    matches!(self, Outcome::Done(_))
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, Outcome::Failed(_))
  }

  pub fn is_aborted(&self) -> bool {
    matches!(self, Outcome::Aborted)
  }

  pub fn into_done(self) -> Option<R> {
    match self {
      Outcome::Done(value) => Some(value),
      _ => None,
    }
  }
}

/// A task together with its outcome.
#[derive(Debug)]
pub struct Settled<T, R> {
  pub task: T,
  pub outcome: Outcome<R>,
}

/// Tasks of the current generation and the token they were handed.
struct Batch<T, R> {
  token: CancellationToken,
  pending: Vec<(T, JoinHandle<Outcome<R>>)>,
}

pub struct TaskPool<T, R> {
  gate: Arc<Semaphore>,
  handler: Handler<T, R>,
  on_error: Option<ErrorCallback<T>>,
  on_abort: Option<AbortCallback<T>>,
  generation: Arc<AtomicU64>,
  batch: Mutex<Batch<T, R>>,
}

impl<T, R> TaskPool<T, R>
where
  T: Clone + Send + Sync + 'static,
  R: Send + 'static,
{
  /// Create a pool admitting at most `concurrency` running handlers.
  pub fn new<F, Fut>(concurrency: usize, handler: F) -> Self
  where
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
  {
    Self {
      gate: Arc::new(Semaphore::new(concurrency.max(1))),
      handler: Arc::new(move |task, token| handler(task, token).boxed()),
      on_error: None,
      on_abort: None,
      generation: Arc::new(AtomicU64::new(0)),
      batch: Mutex::new(Batch {
        token: CancellationToken::new(),
        pending: Vec::new(),
      }),
    }
  }

  /// Called for every task whose handler failed.
  pub fn on_error(mut self, callback: impl Fn(&Error, &T) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Arc::new(callback));
    self
  }

  /// Called for every running task that ended up aborted.
  pub fn on_abort(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
    self.on_abort = Some(Arc::new(callback));
    self
  }

  pub fn generation(&self) -> u64 {
    self.generation.load(Ordering::SeqCst)
  }

  /// Start a new generation, abandoning everything submitted before.
  pub fn restart(&self) -> &Self {
    self.advance(&mut self.lock_batch());
    self
  }

  /// Submit tasks to the current generation.
  pub fn add_tasks(&self, tasks: impl IntoIterator<Item = T>) -> &Self {
    let mut batch = self.lock_batch();
    let pending = self.spawn_all(&batch, tasks);
    batch.pending.extend(pending);
    self
  }

  /// Wait for every task added since the last `restart` or `wait`.
  ///
  /// Outcomes come back in submission order.
  pub async fn wait(&self) -> Vec<Settled<T, R>> {
    let pending = std::mem::take(&mut self.lock_batch().pending);
    settle(pending).await
  }

  /// Start a new generation and submit `tasks` to it in one step.
  ///
  /// The returned [`Submission`] owns its tasks: no other caller's `wait`
  /// can settle them, and its outdated check belongs to the generation the
  /// tasks were spawned in.
  pub fn restart_with(&self, tasks: impl IntoIterator<Item = T>) -> Submission<T, R> {
    let mut batch = self.lock_batch();
    self.advance(&mut batch);
    self.submission(&batch, tasks)
  }

  /// Submit `tasks` to the current generation, apart from the tasks `wait`
  /// settles.
  pub fn submit(&self, tasks: impl IntoIterator<Item = T>) -> Submission<T, R> {
    let batch = self.lock_batch();
    self.submission(&batch, tasks)
  }

  /// Snapshot the current generation.
  pub fn outdated_check(&self) -> OutdatedCheck {
    OutdatedCheck {
      generation: self.generation(),
      current: Arc::clone(&self.generation),
    }
  }

  fn advance(&self, batch: &mut Batch<T, R>) {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let previous = std::mem::replace(&mut batch.token, CancellationToken::new());
    if !batch.pending.is_empty() {
      debug!(
        generation,
        abandoned = batch.pending.len(),
        "Restarting pool with outstanding tasks"
      );
    }
    previous.cancel();
    batch.pending.clear();
  }

  // The generation only moves under the batch lock, so holding `batch`
  // pins it for the whole submission.
  fn spawn_all(
    &self,
    batch: &Batch<T, R>,
    tasks: impl IntoIterator<Item = T>,
  ) -> Vec<(T, JoinHandle<Outcome<R>>)> {
    let generation = self.generation.load(Ordering::SeqCst);
    tasks
      .into_iter()
      .map(|task| {
        let handle = tokio::spawn(self.run(task.clone(), generation, batch.token.clone()));
        (task, handle)
      })
      .collect()
  }

  fn submission(
    &self,
    batch: &Batch<T, R>,
    tasks: impl IntoIterator<Item = T>,
  ) -> Submission<T, R> {
    Submission {
      check: self.outdated_check(),
      pending: self.spawn_all(batch, tasks),
    }
  }

  fn run(
    &self,
    task: T,
    generation: u64,
    token: CancellationToken,
  ) -> impl Future<Output = Outcome<R>> + Send + 'static {
    let gate = Arc::clone(&self.gate);
    let handler = Arc::clone(&self.handler);
    let on_error = self.on_error.clone();
    let on_abort = self.on_abort.clone();
    let current = Arc::clone(&self.generation);

    async move {
      let Ok(_permit) = gate.acquire_owned().await else {
        return Outcome::Aborted;
      };

      if current.load(Ordering::SeqCst) != generation {
        return Outcome::Aborted;
      }

      let result = AssertUnwindSafe(async { handler(task.clone(), token.clone()).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Error::TaskPanicked(panic_message(&*panic))));

      let superseded = current.load(Ordering::SeqCst) != generation;
      match result {
        Ok(value) if !superseded => Outcome::Done(value),
        Err(e) if !superseded && !token.is_cancelled() && !e.is_abort() => {
          if let Some(callback) = &on_error {
            guarded("error", || callback(&e, &task));
          }
          Outcome::Failed(e)
        }
        _ => {
          if let Some(callback) = &on_abort {
            guarded("abort", || callback(&task));
          }
          Outcome::Aborted
        }
      }
    }
  }

  fn lock_batch(&self) -> MutexGuard<'_, Batch<T, R>> {
    self.batch.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Tasks submitted in one step, settled by whoever holds them.
pub struct Submission<T, R> {
  check: OutdatedCheck,
  pending: Vec<(T, JoinHandle<Outcome<R>>)>,
}

impl<T, R> Submission<T, R> {
  /// Check against the generation these tasks were spawned in.
  pub fn outdated_check(&self) -> OutdatedCheck {
    self.check.clone()
  }

  /// Wait for these tasks only, in submission order.
  pub async fn wait(self) -> Vec<Settled<T, R>> {
    settle(self.pending).await
  }
}

async fn settle<T, R>(pending: Vec<(T, JoinHandle<Outcome<R>>)>) -> Vec<Settled<T, R>> {
  let mut settled = Vec::with_capacity(pending.len());
  for (task, handle) in pending {
    let outcome = match handle.await {
      Ok(outcome) => outcome,
      Err(e) => Outcome::Failed(Error::TaskPanicked(e.to_string())),
    };
    settled.push(Settled { task, outcome });
  }
  settled
}

/// Reports whether the pool was restarted after this check was taken.
#[derive(Debug, Clone)]
pub struct OutdatedCheck {
  generation: u64,
  current: Arc<AtomicU64>,
}

impl OutdatedCheck {
  pub fn is_outdated(&self) -> bool {
    self.current.load(Ordering::SeqCst) != self.generation
  }
}

/// Run a user callback, logging instead of propagating a panic.
fn guarded(kind: &str, callback: impl FnOnce()) {
  if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(callback)) {
    error!("Task pool {} callback panicked: {}", kind, panic_message(&*panic));
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
