//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories
//! - Fake sleep source and time entry sink for the sync engine

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::clockify::{ClockifyConfig, ClockifyError};
use crate::config::{ServerConfig, Settings, SyncConfig, TokenStorage};
use crate::models::{CreateTimeEntryRequest, SleepSession, TimeEntry, TimeInterval, TokenRecord};
use crate::oura::{OuraConfig, OuraError};
use crate::sync::{DateRange, EntrySink, SleepSource, SyncError};

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// Token record valid for one more day
pub fn mock_token_record(access: &str, refresh: &str) -> TokenRecord {
  TokenRecord {
    access_token: access.to_string(),
    refresh_token: refresh.to_string(),
    expires_at: (Utc::now() + Duration::days(1)).timestamp_millis(),
    token_type: "Bearer".to_string(),
    scope: Some("daily".to_string()),
  }
}

/// Oura config pointing both auth and API at `base`
pub fn mock_oura_config(base: &str, access: Option<&str>, refresh: Option<&str>) -> OuraConfig {
  OuraConfig {
    client_id: "client-id".to_string(),
    client_secret: "client-secret".to_string(),
    redirect_uri: "http://localhost:5555/callback".to_string(),
    scopes: "daily".to_string(),
    auth_base: base.trim_end_matches('/').to_string(),
    api_base: base.trim_end_matches('/').to_string(),
    access_token: access.map(str::to_string),
    refresh_token: refresh.map(str::to_string),
    http_timeout: std::time::Duration::from_secs(5),
  }
}

/// Clockify config with no pacing delay
pub fn mock_clockify_config(base: &str) -> ClockifyConfig {
  ClockifyConfig {
    api_token: "clockify-key".to_string(),
    api_base: base.trim_end_matches('/').to_string(),
    project_name: "Sleep".to_string(),
    api_delay: std::time::Duration::ZERO,
    http_timeout: std::time::Duration::from_secs(5),
  }
}

/// Session ending `total_sleep_duration` seconds after `bedtime_start`
pub fn mock_sleep_session(day: &str, bedtime_start: &str, total_sleep_duration: i64, efficiency: u8) -> SleepSession {
  let start: DateTime<FixedOffset> = bedtime_start.parse().expect("valid bedtime_start");
  let end = start + Duration::seconds(total_sleep_duration);
  build_session(day, start, end, total_sleep_duration, efficiency)
}

pub fn mock_sleep_session_with_end(
  day: &str,
  bedtime_start: &str,
  bedtime_end: &str,
  total_sleep_duration: i64,
  efficiency: u8,
) -> SleepSession {
  build_session(
    day,
    bedtime_start.parse().expect("valid bedtime_start"),
    bedtime_end.parse().expect("valid bedtime_end"),
    total_sleep_duration,
    efficiency,
  )
}

fn build_session(
  day: &str,
  bedtime_start: DateTime<FixedOffset>,
  bedtime_end: DateTime<FixedOffset>,
  total_sleep_duration: i64,
  efficiency: u8,
) -> SleepSession {
  SleepSession {
    id: None,
    day: NaiveDate::parse_from_str(day, "%Y-%m-%d").expect("valid day"),
    bedtime_start,
    bedtime_end,
    total_sleep_duration,
    efficiency,
    period_type: Some("long_sleep".to_string()),
    score: None,
    rem_sleep_duration: None,
    deep_sleep_duration: None,
    light_sleep_duration: None,
    awake_time: None,
  }
}

/// Full settings with both APIs at `base`, in-memory tokens and no pacing
pub fn mock_settings(base: &str) -> Settings {
  Settings {
    oura: mock_oura_config(base, None, None),
    clockify: mock_clockify_config(base),
    sync: SyncConfig {
      start_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
      sync_days: Some(7),
      schedule: "0 * * * *".to_string(),
      api_delay: std::time::Duration::ZERO,
      rate_limit_backoff: std::time::Duration::ZERO,
    },
    storage: TokenStorage::None,
    server: ServerConfig {
      host: "127.0.0.1".to_string(),
      port: 0,
      basic_auth: None,
    },
    log_level: "debug".to_string(),
  }
}

pub fn mock_time_entry(id: &str, description: &str) -> TimeEntry {
  TimeEntry {
    id: id.to_string(),
    description: description.to_string(),
    time_interval: TimeInterval::default(),
    billable: false,
    project_id: None,
  }
}

pub fn mock_create_request(description: &str) -> CreateTimeEntryRequest {
  CreateTimeEntryRequest {
    start: "2024-03-01T23:10:00Z".parse().expect("valid start"),
    end: "2024-03-02T06:40:00Z".parse().expect("valid end"),
    billable: false,
    description: description.to_string(),
    project_id: None,
  }
}

/// ---------------------------------------------------------------------------
/// Engine Fakes
/// ---------------------------------------------------------------------------

/// Returns a fixed list of sessions, or an error once if built with `failing`.
pub struct FakeSource {
  sessions: Vec<SleepSession>,
  error: Option<OuraError>,
  pub fetches: usize,
}

impl FakeSource {
  pub fn new(sessions: Vec<SleepSession>) -> Self {
    Self {
      sessions,
      error: None,
      fetches: 0,
    }
  }

  pub fn failing(error: OuraError) -> Self {
    Self {
      sessions: Vec::new(),
      error: Some(error),
      fetches: 0,
    }
  }
}

#[async_trait]
impl SleepSource for FakeSource {
  async fn sleep_sessions(&mut self, _range: &DateRange) -> Result<Vec<SleepSession>, SyncError> {
    self.fetches += 1;
    match self.error.take() {
      Some(e) => Err(e.into()),
      None => Ok(self.sessions.clone()),
    }
  }
}

#[derive(Default)]
struct SinkState {
  entries: Vec<TimeEntry>,
  created: Vec<CreateTimeEntryRequest>,
  list_calls: usize,
  create_calls: usize,
  call_times: Vec<tokio::time::Instant>,
}

/// In-memory destination. Create calls are numbered from 1; `fail_at` maps a
/// call number to the HTTP status it fails with.
#[derive(Default)]
pub struct FakeSink {
  state: Mutex<SinkState>,
  fail_at: HashMap<usize, u16>,
  list_failure: Option<u16>,
}

impl FakeSink {
  pub fn failing_at(failures: &[(usize, u16)]) -> Self {
    Self {
      fail_at: failures.iter().copied().collect(),
      ..Self::default()
    }
  }

  pub fn fail_listing(mut self, status: u16) -> Self {
    self.list_failure = Some(status);
    self
  }

  pub fn entries(&self) -> Vec<TimeEntry> {
    self.state.lock().unwrap().entries.clone()
  }

  pub fn created(&self) -> Vec<CreateTimeEntryRequest> {
    self.state.lock().unwrap().created.clone()
  }

  pub fn list_calls(&self) -> usize {
    self.state.lock().unwrap().list_calls
  }

  pub fn create_calls(&self) -> usize {
    self.state.lock().unwrap().create_calls
  }

  pub fn call_times(&self) -> Vec<tokio::time::Instant> {
    self.state.lock().unwrap().call_times.clone()
  }
}

#[async_trait]
impl EntrySink for FakeSink {
  async fn existing_entries(&self, _range: &DateRange) -> Result<Vec<TimeEntry>, SyncError> {
    let mut state = self.state.lock().unwrap();
    state.list_calls += 1;
    if let Some(status) = self.list_failure {
      return Err(ClockifyError::Api {
        status,
        body: "list failed".into(),
      }
      .into());
    }
    Ok(state.entries.clone())
  }

  async fn create_entry(&self, request: CreateTimeEntryRequest) -> Result<TimeEntry, SyncError> {
    let mut state = self.state.lock().unwrap();
    state.create_calls += 1;
    state.call_times.push(tokio::time::Instant::now());

    if let Some(status) = self.fail_at.get(&state.create_calls) {
      return Err(ClockifyError::Api {
        status: *status,
        body: "write failed".into(),
      }
      .into());
    }

    let entry = TimeEntry {
      id: format!("entry-{}", state.create_calls),
      description: request.description.clone(),
      time_interval: TimeInterval {
        start: Some(request.start),
        end: Some(request.end),
        duration: None,
      },
      billable: request.billable,
      project_id: request.project_id.clone(),
    };
    state.entries.push(entry.clone());
    state.created.push(request);
    Ok(entry)
  }
}
