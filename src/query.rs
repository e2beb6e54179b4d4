//! Cancel-on-recompute async query.
//!
//! A `Query<T>` owns a fetcher and the state of its latest run. Starting a
//! new run cancels the token handed to the previous one, so a fetcher that
//! honours its token stops early and its result is never observed.
//!
//! # Example
//!
//! ```ignore
//! let resources = cache.clone();
//! let mut list = Query::new(move |cancel| {
//!   let resources = resources.clone();
//!   async move { resources.resolve_list(&cancel).await.map_err(|e| e.to_string()) }
//! });
//!
//! list.fetch();
//! // the selection changed: start over, the old run sees its token fire
//! list.refetch();
//!
//! match list.settle().await {
//!   QueryState::Success(items) => show(items),
//!   QueryState::Error(e) => report(e),
//!   _ => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Query has not been started, or was cancelled
  Idle,
  Loading,
  Success(T),
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

type FetcherFn<T> = Box<dyn Fn(CancellationToken) -> BoxFuture<T> + Send + Sync>;

struct Run<T> {
  token: CancellationToken,
  receiver: oneshot::Receiver<Result<T, String>>,
}

pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  run: Option<Run<T>>,
  fetched_at: Option<Instant>,
  runs: u64,
}

impl<T: Send + 'static> Query<T> {
  /// Create a query around `fetcher`, which is called with a fresh token
  /// for every run.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move |token| Box::pin(fetcher(token))),
      run: None,
      fetched_at: None,
      runs: 0,
    }
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Number of runs started so far.
  pub fn runs(&self) -> u64 {
    self.runs
  }

  /// Time since the last successful run.
  pub fn age(&self) -> Option<Duration> {
    self.fetched_at.map(|t| t.elapsed())
  }

  /// Start a run unless one is in flight.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start();
  }

  /// Cancel the run in flight, if any, and start a new one.
  pub fn refetch(&mut self) {
    self.abandon();
    self.start();
  }

  /// Cancel the run in flight and go back to idle.
  pub fn cancel(&mut self) {
    if self.abandon() && self.state.is_loading() {
      self.state = QueryState::Idle;
    }
  }

  /// Pick up the result of the current run without blocking.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(run) = &mut self.run else {
      return false;
    };

    match run.receiver.try_recv() {
      Ok(result) => {
        self.finish(Ok(result));
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.finish(Err(()));
        true
      }
    }
  }

  /// Wait for the current run and return the resulting state.
  pub async fn settle(&mut self) -> &QueryState<T> {
    if let Some(run) = &mut self.run {
      let result = (&mut run.receiver).await.map_err(|_| ());
      self.finish(result);
    }
    &self.state
  }

  fn start(&mut self) {
    let (tx, rx) = oneshot::channel();
    let token = CancellationToken::new();
    let future = (self.fetcher)(token.clone());

    self.runs += 1;
    self.state = QueryState::Loading;
    self.run = Some(Run {
      token,
      receiver: rx,
    });

    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
  }

  fn abandon(&mut self) -> bool {
    match self.run.take() {
      Some(run) => {
        run.token.cancel();
        true
      }
      None => false,
    }
  }

  fn finish(&mut self, received: Result<Result<T, String>, ()>) {
    self.run = None;
    self.state = match received {
      Ok(Ok(data)) => {
        self.fetched_at = Some(Instant::now());
        QueryState::Success(data)
      }
      Ok(Err(error)) => QueryState::Error(error),
      Err(()) => QueryState::Error("Query task ended without a result".to_string()),
    };
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .field("runs", &self.runs)
      .finish_non_exhaustive()
  }
}
