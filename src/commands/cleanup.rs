use chrono::Utc;
use serde::Serialize;

use super::CommandError;
use crate::clockify::ClockifyClient;
use crate::models::TimeEntry;
use crate::runner::SyncRunner;
use crate::sync::{is_sleep_entry, DateRange, SyncOptions};

pub const DEFAULT_CLEANUP_DAYS: u32 = 730;
const PREVIEW_COUNT: usize = 5;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
  pub found_count: usize,
  pub deleted_count: usize,
  pub failed_count: usize,
}

/// Delete entries one at a time. Failures are counted, never fatal; a 429
/// adds the rate-limit backoff before the next delete.
pub async fn delete_entries(
  client: &ClockifyClient,
  entries: &[TimeEntry],
  options: &SyncOptions,
) -> CleanupResult {
  let mut result = CleanupResult {
    found_count: entries.len(),
    ..CleanupResult::default()
  };

  for entry in entries {
    match client.delete_time_entry(&entry.id).await {
      Ok(()) => {
        result.deleted_count += 1;
        tracing::info!(
          "✅ Deleted entry {}/{}: {}",
          result.deleted_count,
          result.found_count,
          entry.description
        );
        tokio::time::sleep(options.api_delay).await;
      }
      Err(e) => {
        result.failed_count += 1;
        tracing::error!("❌ Failed to delete entry {}: {}", entry.id, e);
        if e.is_rate_limited() {
          tracing::warn!("⏸️ Rate limit hit, waiting {:?}", options.rate_limit_backoff);
          tokio::time::sleep(options.rate_limit_backoff).await;
        }
      }
    }
  }

  result
}

/// Find sleep entries in the last `days` days; delete them only with `confirm`.
pub async fn run(runner: SyncRunner, days: u32, confirm: bool) -> Result<CleanupResult, CommandError> {
  let settings = runner.settings();
  let mut client = ClockifyClient::new(settings.clockify.clone())?;
  client.initialize().await?;

  let range = DateRange::last_days(days, Utc::now().date_naive());
  tracing::info!("📊 Fetching time entries from {}", range);
  let entries: Vec<TimeEntry> = client
    .list_time_entries(range.start, range.end)
    .await?
    .into_iter()
    .filter(is_sleep_entry)
    .collect();

  if entries.is_empty() {
    println!("✅ No sleep entries found to delete.");
    return Ok(CleanupResult::default());
  }

  println!("Found {} sleep entries:", entries.len());
  for entry in entries.iter().take(PREVIEW_COUNT) {
    println!("   - {}", entry.description);
  }
  if entries.len() > PREVIEW_COUNT {
    println!("   ... and {} more", entries.len() - PREVIEW_COUNT);
  }

  if !confirm {
    println!("\nDry run. Re-run with --yes to delete these entries.");
    return Ok(CleanupResult {
      found_count: entries.len(),
      ..CleanupResult::default()
    });
  }

  let result = delete_entries(&client, &entries, &settings.sync.options()).await;
  println!(
    "\n🎉 Cleanup complete: {} found, {} deleted, {} failed",
    result.found_count, result.deleted_count, result.failed_count
  );
  if result.failed_count > 0 {
    println!("⚠️  Some entries failed to delete. Run cleanup again to retry.");
  }
  Ok(result)
}
