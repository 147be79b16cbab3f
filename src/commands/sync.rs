use chrono::{NaiveDate, Utc};

use super::CommandError;
use crate::runner::SyncRunner;
use crate::sync::{DateRange, SyncResult};

/// Range for a one-off run: explicit dates win over `--days`, which wins over
/// the configured default.
pub fn resolve_range(
  runner: &SyncRunner,
  start: Option<NaiveDate>,
  end: Option<NaiveDate>,
  days: Option<u32>,
  today: NaiveDate,
) -> DateRange {
  let end = end.unwrap_or(today);
  match (start, days) {
    (Some(start), _) => DateRange::new(start, end),
    (None, Some(days)) => DateRange::last_days(days, end),
    (None, None) => {
      let default = runner.settings().sync.default_range(today);
      DateRange::new(default.start, end)
    }
  }
}

pub async fn run(
  runner: SyncRunner,
  start: Option<NaiveDate>,
  end: Option<NaiveDate>,
  days: Option<u32>,
) -> Result<SyncResult, CommandError> {
  let range = resolve_range(&runner, start, end, days, Utc::now().date_naive());
  tracing::info!("🚀 Starting manual sync for {}", range);

  let result = match runner.run(range).await {
    Ok(result) => result,
    Err(e) => {
      if e.is_auth() {
        tracing::error!("❌ Oura authorization is no longer valid; run `auth` again");
      }
      return Err(e.into());
    }
  };

  println!(
    "Synced {} | Skipped {} | Failed {} | Sessions {} | Existing sleep entries {}",
    result.synced_count,
    result.skipped_count,
    result.failed_count,
    result.total_sessions,
    result.existing_sleep_entries_count
  );
  Ok(result)
}
