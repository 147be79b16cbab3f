//! CLI subcommands. Each one is a thin adapter over the library; `main`
//! only parses arguments and picks one.

pub mod auth;
pub mod cleanup;
pub mod serve;
pub mod sync;
pub mod token;

use std::sync::Arc;

use crate::clockify::ClockifyError;
use crate::config::{ConfigError, Settings};
use crate::oura::OuraError;
use crate::queue::QueueError;
use crate::runner::SyncRunner;
use crate::scheduler::SchedulerError;
use crate::sync::SyncError;
use crate::token_store::{open_store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Oura(#[from] OuraError),

  #[error(transparent)]
  Clockify(#[from] ClockifyError),

  #[error(transparent)]
  Sync(#[from] SyncError),

  #[error(transparent)]
  Queue(#[from] QueueError),

  #[error(transparent)]
  Scheduler(#[from] SchedulerError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("OAuth callback failed: {0}")]
  Callback(String),
}

/// Open the configured token store and wrap it with the settings.
pub async fn open_runner(settings: Settings) -> Result<SyncRunner, CommandError> {
  let store = open_store(&settings.storage).await?;
  tracing::debug!("Token storage: {}", store.describe());
  Ok(SyncRunner::new(Arc::new(settings), store))
}
