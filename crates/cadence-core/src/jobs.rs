//! Time-triggered jobs.
//!
//! The scheduler contract: a job fires at or after `fire_at`, carrying its
//! opaque payload to `callback_url`, and may fire more than once. Creating a
//! job with an existing id replaces the earlier one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::CoreError;

/// Callback route the reminder jobs are registered against.
pub const REMINDER_CALLBACK_URL: &str = "/api/reminders/callback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub fire_at: DateTime<Utc>,
    pub payload: Value,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredJob {
    pub job_id: String,
    pub payload: Value,
    pub callback_url: String,
    pub fired_at: DateTime<Utc>,
}

/// Job id for a reminder. Deterministic, so re-scheduling a reminder overwrites its job.
pub fn reminder_job_id(reminder_id: Uuid) -> String {
    format!("reminder-{}", reminder_id)
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn create_job(&self, job: ScheduledJob) -> Result<(), CoreError>;

    /// Removes a job. Returns `false` when it had already fired or never existed.
    async fn delete_job(&self, job_id: &str) -> Result<bool, CoreError>;
}

type JobTable = Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>;

/// In-process scheduler built on tokio timers.
///
/// Fired jobs are handed to the receiver returned by [`TokioJobScheduler::new`];
/// whoever owns that receiver plays the role of the callback endpoint.
pub struct TokioJobScheduler {
    jobs: JobTable,
    generation: AtomicU64,
    fired_tx: mpsc::UnboundedSender<FiredJob>,
}

impl TokioJobScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FiredJob>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            fired_tx,
        };
        (scheduler, fired_rx)
    }

    /// Ids of jobs that have not fired yet.
    pub fn pending_job_ids(&self) -> Vec<String> {
        self.jobs
            .lock()
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock_jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (u64, JoinHandle<()>)>>, CoreError> {
        self.jobs
            .lock()
            .map_err(|_| CoreError::Transient("job table lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobScheduler for TokioJobScheduler {
    async fn create_job(&self, job: ScheduledJob) -> Result<(), CoreError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let delay = (job.fire_at - Utc::now()).to_std().unwrap_or_default();

        let jobs = Arc::clone(&self.jobs);
        let fired_tx = self.fired_tx.clone();
        let job_id = job.job_id.clone();

        let mut table = self.lock_jobs()?;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Ok(mut table) = jobs.lock() {
                // A newer job with the same id may have replaced this one.
                if table.get(&job.job_id).map(|(gen, _)| *gen) == Some(generation) {
                    table.remove(&job.job_id);
                }
            }

            let fired = FiredJob {
                job_id: job.job_id,
                payload: job.payload,
                callback_url: job.callback_url,
                fired_at: Utc::now(),
            };
            if fired_tx.send(fired).is_err() {
                tracing::warn!("job fired but its callback receiver is gone");
            }
        });

        if let Some((_, previous)) = table.insert(job_id.clone(), (generation, handle)) {
            previous.abort();
            tracing::debug!(job_id = %job_id, "replaced existing job");
        }
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool, CoreError> {
        let removed = self.lock_jobs()?.remove(job_id);
        match removed {
            Some((_, handle)) => {
                handle.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for TokioJobScheduler {
    fn drop(&mut self) {
        if let Ok(mut table) = self.jobs.lock() {
            for (_, (_, handle)) in table.drain() {
                handle.abort();
            }
        }
    }
}
