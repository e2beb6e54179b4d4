pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod notify;
pub mod pool;
pub mod progress;
pub mod query;
pub mod repository;
pub mod retry;

pub use error::{Error, Result};
