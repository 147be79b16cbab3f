//! One sync run, wired to the real clients
//!
//! Every trigger (cron tick, queued job, HTTP request, CLI) ends up in
//! `SyncRunner::run`. Each run builds its own clients so no token state is
//! shared between runs.

use chrono::Utc;
use std::sync::Arc;

use crate::clockify::ClockifyClient;
use crate::config::Settings;
use crate::oura::{OuraClient, OuraError};
use crate::sync::{sync_sleep_sessions, DateRange, SyncError, SyncResult};
use crate::token_store::{StoreError, TokenStore};

#[derive(Clone)]
pub struct SyncRunner {
  settings: Arc<Settings>,
  store: Arc<dyn TokenStore>,
}

impl SyncRunner {
  pub fn new(settings: Arc<Settings>, store: Arc<dyn TokenStore>) -> Self {
    Self { settings, store }
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn store(&self) -> Arc<dyn TokenStore> {
    self.store.clone()
  }

  /// Oura client seeded from config and the token store.
  pub async fn oura_client(&self) -> Result<OuraClient, OuraError> {
    OuraClient::from_store(self.settings.oura.clone(), self.store.clone()).await
  }

  /// Whether a sync could authenticate against Oura right now.
  pub async fn has_oura_token(&self) -> Result<bool, StoreError> {
    if self.settings.oura.access_token.is_some() {
      return Ok(true);
    }
    Ok(self.store.load().await?.is_some())
  }

  /// Sync the configured default range ending today.
  pub async fn run_default(&self) -> Result<SyncResult, SyncError> {
    let range = self.settings.sync.default_range(Utc::now().date_naive());
    self.run(range).await
  }

  pub async fn run(&self, range: DateRange) -> Result<SyncResult, SyncError> {
    let mut oura = self.oura_client().await?;
    if !oura.has_access_token() {
      tracing::error!("❌ No Oura access token found; run `auth` or set OURA_ACCESS_TOKEN");
      return Err(OuraError::Auth("No Oura access token available".into()).into());
    }
    oura.ensure_fresh_token().await?;

    let mut clockify = ClockifyClient::new(self.settings.clockify.clone())?;
    clockify.initialize().await?;

    sync_sleep_sessions(&mut oura, &clockify, &range, &self.settings.sync.options()).await
  }
}
