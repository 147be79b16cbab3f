//! Cron trigger: every tick enqueues a `schedule` job.

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::queue::{SyncQueue, Trigger};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  #[error("Invalid sync schedule {expr:?}: {source}")]
  InvalidSchedule {
    expr: String,
    #[source]
    source: JobSchedulerError,
  },

  #[error(transparent)]
  Scheduler(#[from] JobSchedulerError),
}

/// Accepts classic 5-field cron and adds the seconds field the scheduler
/// expects. Expressions that already have 6 or 7 fields pass through.
pub fn normalize_cron(expr: &str) -> String {
  let fields: Vec<&str> = expr.split_whitespace().collect();
  if fields.len() == 5 {
    format!("0 {}", fields.join(" "))
  } else {
    fields.join(" ")
  }
}

pub fn describe_schedule(expr: &str) -> String {
  let normalized: Vec<&str> = expr.split_whitespace().collect();
  match normalized.join(" ").as_str() {
    "* * * * *" => "Every minute".into(),
    "0 * * * *" => "Every hour".into(),
    "0 */6 * * *" => "Every 6 hours".into(),
    "0 0 * * *" => "Daily at midnight".into(),
    "0 6 * * *" => "Daily at 6 AM".into(),
    other => other.to_string(),
  }
}

pub struct SyncScheduler {
  scheduler: JobScheduler,
}

impl SyncScheduler {
  /// Register the cron job; nothing runs until `start`.
  pub async fn new(schedule: &str, queue: SyncQueue) -> Result<Self, SchedulerError> {
    let scheduler = JobScheduler::new().await?;
    scheduler.add(sync_job(schedule, queue)?).await?;

    tracing::info!("📅 Sync schedule: {} ({})", schedule, describe_schedule(schedule));
    Ok(Self { scheduler })
  }

  pub async fn start(&self) -> Result<(), SchedulerError> {
    self.scheduler.start().await?;
    tracing::info!("✅ Scheduler started");
    Ok(())
  }

  pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
    self.scheduler.shutdown().await?;
    tracing::info!("🛑 Scheduler stopped");
    Ok(())
  }
}

fn sync_job(schedule: &str, queue: SyncQueue) -> Result<Job, SchedulerError> {
  let cron = normalize_cron(schedule);
  Job::new_async(&cron, move |_uuid, _l| {
    let queue = queue.clone();
    Box::pin(async move {
      if let Err(e) = queue.enqueue(Trigger::Schedule).await {
        tracing::error!("❌ Could not enqueue scheduled sync: {}", e);
      }
    })
  })
  .map_err(|source| SchedulerError::InvalidSchedule {
    expr: schedule.to_string(),
    source,
  })
}
