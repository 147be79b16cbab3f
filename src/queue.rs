//! Sync job queue
//!
//! Scheduled and manual triggers both enqueue jobs here. A single worker task
//! drains the queue one job at a time, so two sync runs never overlap. A
//! failed job is recorded and dropped; the next scheduled job is the retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::runner::SyncRunner;
use crate::sync::{SyncError, SyncResult};

/// ---------------------------------------------------------------------------
/// Job Payload
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
  Schedule,
  Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
  pub triggered_by: Trigger,
  pub timestamp: DateTime<Utc>,
}

impl SyncJob {
  pub fn new(triggered_by: Trigger) -> Self {
    Self {
      triggered_by,
      timestamp: Utc::now(),
    }
  }
}

#[derive(Debug, Clone)]
struct QueuedJob {
  id: Uuid,
  job: SyncJob,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("Sync worker is not running")]
  Closed,
}

/// ---------------------------------------------------------------------------
/// Status
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
  Completed,
  Partial,
  Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningJob {
  pub job_id: Uuid,
  pub triggered_by: Trigger,
  pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
  pub job_id: Uuid,
  pub triggered_by: Trigger,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub state: RunState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<SyncResult>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub auth_required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
  pub pending: usize,
  pub running: Option<RunningJob>,
  pub last_run: Option<RunOutcome>,
  pub jobs_processed: usize,
}

/// ---------------------------------------------------------------------------
/// Worker
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobHandler: Send + Sync {
  async fn handle(&self, job: &SyncJob) -> Result<SyncResult, SyncError>;
}

#[async_trait]
impl JobHandler for SyncRunner {
  async fn handle(&self, _job: &SyncJob) -> Result<SyncResult, SyncError> {
    self.run_default().await
  }
}

#[derive(Clone)]
pub struct SyncQueue {
  sender: mpsc::UnboundedSender<QueuedJob>,
  status: Arc<RwLock<SyncStatus>>,
}

impl SyncQueue {
  /// Spawn the worker. It stops once every `SyncQueue` clone is dropped.
  pub fn start<H>(handler: Arc<H>) -> (Self, JoinHandle<()>)
  where
    H: JobHandler + ?Sized + 'static,
  {
    let (sender, receiver) = mpsc::unbounded_channel();
    let status = Arc::new(RwLock::new(SyncStatus::default()));
    let worker = tokio::spawn(run_worker(receiver, handler, status.clone()));
    tracing::info!("👷 Sync worker started");
    (Self { sender, status }, worker)
  }

  pub async fn enqueue(&self, triggered_by: Trigger) -> Result<Uuid, QueueError> {
    let queued = QueuedJob {
      id: Uuid::new_v4(),
      job: SyncJob::new(triggered_by),
    };
    let id = queued.id;

    self.status.write().await.pending += 1;
    if self.sender.send(queued).is_err() {
      self.status.write().await.pending -= 1;
      return Err(QueueError::Closed);
    }

    tracing::info!("📥 Queued sync job {} ({:?})", id, triggered_by);
    Ok(id)
  }

  pub async fn status(&self) -> SyncStatus {
    self.status.read().await.clone()
  }
}

async fn run_worker<H>(
  mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
  handler: Arc<H>,
  status: Arc<RwLock<SyncStatus>>,
) where
  H: JobHandler + ?Sized,
{
  while let Some(QueuedJob { id, job }) = receiver.recv().await {
    let started_at = Utc::now();
    {
      let mut status = status.write().await;
      status.pending = status.pending.saturating_sub(1);
      status.running = Some(RunningJob {
        job_id: id,
        triggered_by: job.triggered_by,
        started_at,
      });
    }
    tracing::info!("🕐 Sync job {} started (triggered by {:?})", id, job.triggered_by);

    let outcome = match handler.handle(&job).await {
      Ok(result) => {
        let state = if result.is_partial() {
          RunState::Partial
        } else {
          RunState::Completed
        };
        tracing::info!("✅ Job {} finished: {:?}", id, state);
        RunOutcome {
          job_id: id,
          triggered_by: job.triggered_by,
          started_at,
          finished_at: Utc::now(),
          state,
          result: Some(result),
          error: None,
          auth_required: false,
        }
      }
      Err(e) => {
        tracing::error!("❌ Job {} failed: {}. Will retry on next scheduled run", id, e);
        RunOutcome {
          job_id: id,
          triggered_by: job.triggered_by,
          started_at,
          finished_at: Utc::now(),
          state: RunState::Failed,
          result: None,
          error: Some(e.to_string()),
          auth_required: e.is_auth(),
        }
      }
    };

    let mut status = status.write().await;
    status.running = None;
    status.last_run = Some(outcome);
    status.jobs_processed += 1;
  }

  tracing::info!("Sync worker stopped");
}
