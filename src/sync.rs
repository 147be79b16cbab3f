//! Sleep session reconciliation
//!
//! One pass over the source sessions for a date range: sessions whose marker
//! already appears in a destination entry are skipped, the rest are written
//! one at a time with a pause after each write. A failed write is counted and
//! the pass moves on; only the two read calls can fail the whole run.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::clockify::{is_session_synced, ClockifyClient, ClockifyError};
use crate::models::{CreateTimeEntryRequest, SleepSession, TimeEntry};
use crate::oura::{OuraClient, OuraError};

const SLEEP_PREFIX: &str = "🛌 Sleep";

/// ---------------------------------------------------------------------------
/// Inputs and Outputs
/// ---------------------------------------------------------------------------

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl DateRange {
  pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
    Self { start, end }
  }

  /// `[today - days, today]`, clamped at the earliest representable date.
  pub fn last_days(days: u32, today: NaiveDate) -> Self {
    Self {
      start: today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN),
      end: today,
    }
  }
}

impl fmt::Display for DateRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} to {}", self.start, self.end)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
  /// Pause after every successful write.
  pub api_delay: Duration,
  /// Extra pause after a write rejected with HTTP 429.
  pub rate_limit_backoff: Duration,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      api_delay: Duration::from_millis(50),
      rate_limit_backoff: Duration::from_millis(200),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
  pub synced_count: usize,
  pub skipped_count: usize,
  pub failed_count: usize,
  pub total_sessions: usize,
  pub existing_sleep_entries_count: usize,
}

impl SyncResult {
  pub fn is_partial(&self) -> bool {
    self.failed_count > 0
  }
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error(transparent)]
  Source(#[from] OuraError),

  #[error(transparent)]
  Destination(#[from] ClockifyError),
}

impl SyncError {
  pub fn status(&self) -> Option<u16> {
    match self {
      SyncError::Source(e) => e.status(),
      SyncError::Destination(e) => e.status(),
    }
  }

  pub fn is_rate_limited(&self) -> bool {
    self.status() == Some(429)
  }

  /// The user has to re-run the Oura authorization flow.
  pub fn is_auth(&self) -> bool {
    matches!(self, SyncError::Source(e) if e.is_auth())
  }
}

/// ---------------------------------------------------------------------------
/// Engine Seams
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait SleepSource: Send {
  async fn sleep_sessions(&mut self, range: &DateRange) -> Result<Vec<SleepSession>, SyncError>;
}

#[async_trait]
pub trait EntrySink: Send + Sync {
  async fn existing_entries(&self, range: &DateRange) -> Result<Vec<TimeEntry>, SyncError>;
  async fn create_entry(&self, request: CreateTimeEntryRequest) -> Result<TimeEntry, SyncError>;
}

#[async_trait]
impl SleepSource for OuraClient {
  async fn sleep_sessions(&mut self, range: &DateRange) -> Result<Vec<SleepSession>, SyncError> {
    Ok(self.get_sleep_sessions(range.start, range.end, None).await?)
  }
}

#[async_trait]
impl EntrySink for ClockifyClient {
  async fn existing_entries(&self, range: &DateRange) -> Result<Vec<TimeEntry>, SyncError> {
    Ok(self.list_time_entries(range.start, range.end).await?)
  }

  async fn create_entry(&self, request: CreateTimeEntryRequest) -> Result<TimeEntry, SyncError> {
    Ok(self.create_time_entry(request).await?)
  }
}

/// ---------------------------------------------------------------------------
/// Session Identity and Formatting
/// ---------------------------------------------------------------------------

/// `{day}_{HH:MM}` with the start time in UTC. Duration and efficiency are
/// not part of the identity. Two sessions starting in the same minute of the
/// same day collide; changing the scheme would orphan existing markers.
pub fn session_id<Tz: TimeZone>(day: NaiveDate, bedtime_start: &DateTime<Tz>) -> String {
  let start_utc = bedtime_start.with_timezone(&Utc);
  format!("{}_{}", day.format("%Y-%m-%d"), start_utc.format("%H:%M"))
}

pub fn session_marker(session_id: &str) -> String {
  format!("[Oura:{}]", session_id)
}

/// Whole minutes, rounded half up.
pub fn duration_minutes(total_seconds: i64) -> i64 {
  (total_seconds + 30).div_euclid(60)
}

pub fn format_duration(total_minutes: i64) -> String {
  format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}

pub fn sleep_description(session: &SleepSession, session_id: &str) -> String {
  format!(
    "{} - {} ({}% efficiency) {}",
    SLEEP_PREFIX,
    format_duration(duration_minutes(session.total_sleep_duration)),
    session.efficiency,
    session_marker(session_id)
  )
}

/// Entries this tool wrote, marker or not.
pub fn is_sleep_entry(entry: &TimeEntry) -> bool {
  entry.description.contains(SLEEP_PREFIX) || entry.description.contains("[Oura:")
}

fn entry_request(session: &SleepSession, session_id: &str) -> CreateTimeEntryRequest {
  CreateTimeEntryRequest {
    start: session.bedtime_start.with_timezone(&Utc),
    end: session.bedtime_end.with_timezone(&Utc),
    billable: false,
    description: sleep_description(session, session_id),
    project_id: None,
  }
}

/// ---------------------------------------------------------------------------
/// Sync Engine
/// ---------------------------------------------------------------------------

/// Not safe to run concurrently against the same workspace and range;
/// callers serialize runs (see `queue`).
pub async fn sync_sleep_sessions<S, D>(
  source: &mut S,
  sink: &D,
  range: &DateRange,
  options: &SyncOptions,
) -> Result<SyncResult, SyncError>
where
  S: SleepSource + ?Sized,
  D: EntrySink + ?Sized,
{
  tracing::info!("🔍 Fetching Oura sleep sessions from {}", range);
  let sessions = source.sleep_sessions(range).await?;

  let existing = sink.existing_entries(range).await?;
  let mut result = SyncResult {
    total_sessions: sessions.len(),
    existing_sleep_entries_count: existing
      .iter()
      .filter(|e| e.description.contains(SLEEP_PREFIX))
      .count(),
    ..SyncResult::default()
  };
  tracing::info!(
    "Found {} sleep sessions and {} existing sleep entries",
    result.total_sessions,
    result.existing_sleep_entries_count
  );

  // Ids written during this pass, so a session repeated by the source is
  // not written twice.
  let mut written: HashSet<String> = HashSet::new();

  for session in &sessions {
    let id = session_id(session.day, &session.bedtime_start);

    if written.contains(&id) || is_session_synced(&id, &existing) {
      tracing::debug!("⏭️ Skipping {} (already synced)", id);
      result.skipped_count += 1;
      continue;
    }

    match sink.create_entry(entry_request(session, &id)).await {
      Ok(entry) => {
        result.synced_count += 1;
        tracing::info!(
          "✅ Synced {} ({}) as entry {}",
          id,
          format_duration(duration_minutes(session.total_sleep_duration)),
          entry.id
        );
        written.insert(id);
        tokio::time::sleep(options.api_delay).await;
      }
      Err(e) => {
        result.failed_count += 1;
        tracing::error!("❌ Failed to sync {}: {}", id, e);
        if e.is_rate_limited() {
          tracing::warn!("Rate limited by Clockify, backing off {:?}", options.rate_limit_backoff);
          tokio::time::sleep(options.rate_limit_backoff).await;
        }
      }
    }
  }

  tracing::info!(
    "📊 Sync complete: {} synced, {} skipped, {} failed of {} sessions",
    result.synced_count,
    result.skipped_count,
    result.failed_count,
    result.total_sessions
  );
  Ok(result)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
