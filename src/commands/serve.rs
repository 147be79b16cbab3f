use actix_web::web;
use std::net::TcpListener;
use std::sync::Arc;

use super::CommandError;
use crate::queue::{SyncQueue, Trigger};
use crate::runner::SyncRunner;
use crate::scheduler::SyncScheduler;
use crate::server::{self, AppState};

/// Long-running mode: worker, cron trigger and HTTP shell in one process.
/// One `schedule` job is queued right away so a fresh start syncs without
/// waiting for the first tick.
pub async fn run(runner: SyncRunner) -> Result<(), CommandError> {
  let settings = runner.settings().clone();

  let (queue, worker) = SyncQueue::start(Arc::new(runner.clone()));

  let mut scheduler = SyncScheduler::new(&settings.sync.schedule, queue.clone()).await?;
  scheduler.start().await?;

  tracing::info!("🚀 Running initial sync");
  queue.enqueue(Trigger::Schedule).await?;

  let address = settings.server.address();
  let listener = TcpListener::bind(&address)?;
  tracing::info!("✅ Web server running on http://{}", address);
  tracing::info!("   GET  /          health and auth status");
  tracing::info!("   GET  /auth      start Oura authorization");
  tracing::info!("   GET  /callback  OAuth callback");
  tracing::info!("   POST /sync      queue a manual sync");
  tracing::info!("   GET  /status    last run outcome");
  if settings.server.basic_auth.is_none() {
    tracing::warn!("BASIC_AUTH_USERNAME/BASIC_AUTH_PASSWORD not set; HTTP routes are unauthenticated");
  }

  let state = web::Data::new(AppState::new(runner, queue));
  // Runs until SIGINT/SIGTERM.
  server::run(listener, state)?.await?;

  tracing::info!("👋 Shutting down");
  if let Err(e) = scheduler.shutdown().await {
    tracing::warn!("Scheduler did not stop cleanly: {}", e);
  }
  worker.abort();
  Ok(())
}
