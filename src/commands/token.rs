use chrono::{DateTime, Utc};
use serde::Serialize;

use super::CommandError;
use crate::models::token::token_preview;
use crate::models::TokenRecord;
use crate::runner::SyncRunner;

#[derive(Debug, Serialize, PartialEq)]
pub struct TokenStatus {
  pub storage: String,
  pub is_authenticated: bool,
  pub source: Option<&'static str>,
  pub access_token: Option<String>,
  pub has_refresh_token: bool,
  pub expires_at: Option<String>,
  pub expired: bool,
  pub needs_refresh: bool,
}

/// Summarize the stored record, falling back to seed tokens from the
/// environment. Secrets are shown as a short prefix only.
pub fn describe(storage: String, stored: Option<&TokenRecord>, seed_access: Option<&str>, now: DateTime<Utc>) -> TokenStatus {
  match stored {
    Some(record) => TokenStatus {
      storage,
      is_authenticated: true,
      source: Some("store"),
      access_token: Some(token_preview(&record.access_token)),
      has_refresh_token: record.has_refresh_token(),
      expires_at: record.expires_at_utc().map(|t| t.to_rfc3339()),
      expired: record.is_expired_at(now),
      needs_refresh: record.needs_refresh_at(now),
    },
    None => TokenStatus {
      storage,
      is_authenticated: seed_access.is_some(),
      source: seed_access.map(|_| "environment"),
      access_token: seed_access.map(token_preview),
      has_refresh_token: false,
      expires_at: None,
      expired: false,
      needs_refresh: false,
    },
  }
}

pub async fn status(runner: &SyncRunner) -> Result<TokenStatus, CommandError> {
  let store = runner.store();
  let stored = store.load().await?;
  let status = describe(
    store.describe(),
    stored.as_ref(),
    runner.settings().oura.access_token.as_deref(),
    Utc::now(),
  );

  println!("Storage:        {}", status.storage);
  println!("Authenticated:  {}", status.is_authenticated);
  if let Some(source) = status.source {
    println!("Source:         {}", source);
  }
  if let Some(token) = &status.access_token {
    println!("Access token:   {}", token);
  }
  println!("Refresh token:  {}", if status.has_refresh_token { "present" } else { "missing" });
  if let Some(expires_at) = &status.expires_at {
    println!("Expires at:     {}", expires_at);
  }
  if status.expired {
    println!("⚠️  Access token has expired");
  } else if status.needs_refresh {
    println!("⚠️  Access token expires within 5 minutes");
  }
  if !status.is_authenticated {
    println!("Run `oura-clockify-sync auth` to connect Oura.");
  }

  Ok(status)
}

pub async fn reset(runner: &SyncRunner) -> Result<(), CommandError> {
  let store = runner.store();
  store.clear().await?;
  tracing::info!("🧹 Cleared stored Oura tokens from {}", store.describe());
  println!("Stored Oura tokens removed. Run `oura-clockify-sync auth` to reconnect.");
  Ok(())
}

pub async fn refresh(runner: &SyncRunner) -> Result<TokenRecord, CommandError> {
  let mut oura = runner.oura_client().await?;
  let record = oura.refresh_access_token().await?;
  println!(
    "✅ Refreshed access token {} (expires {})",
    token_preview(&record.access_token),
    record
      .expires_at_utc()
      .map(|t| t.to_rfc3339())
      .unwrap_or_else(|| "unknown".into())
  );
  Ok(record)
}
