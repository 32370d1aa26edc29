//! Turns due dates into pending reminders, each backed by exactly one scheduled job.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{with_timeout, CoreError};
use crate::events::{CorrelationId, ReminderJobPayload};
use crate::jobs::{reminder_job_id, JobScheduler, ScheduledJob, REMINDER_CALLBACK_URL};
use crate::models::{DeliveryRecord, DeliveryStatus, NotificationChannel, Reminder};
use crate::repository::{ReminderRepository, Repository, TaskRepository};

pub struct ReminderScheduler {
    repo: Arc<dyn Repository>,
    jobs: Arc<dyn JobScheduler>,
    call_timeout: Duration,
    default_channel: NotificationChannel,
}

impl ReminderScheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        jobs: Arc<dyn JobScheduler>,
        call_timeout: Duration,
        default_channel: NotificationChannel,
    ) -> Self {
        Self {
            repo,
            jobs,
            call_timeout,
            default_channel,
        }
    }

    /// Persists a pending reminder and registers the job that will fire it.
    ///
    /// `remind_at` must lie strictly in the future and the task must belong to `user_id`.
    /// A task holds at most one pending reminder per time and channel; asking for
    /// an occupied slot returns the reminder already there.
    #[tracing::instrument(skip(self, correlation_id), fields(correlation_id = %correlation_id))]
    pub async fn schedule_reminder(
        &self,
        task_id: Uuid,
        user_id: &str,
        remind_at: DateTime<Utc>,
        channel: NotificationChannel,
        correlation_id: CorrelationId,
    ) -> Result<Reminder, CoreError> {
        if remind_at <= Utc::now() {
            return Err(CoreError::Validation(format!(
                "remind_at {} is not in the future",
                remind_at.to_rfc3339()
            )));
        }

        match with_timeout(self.call_timeout, self.repo.find_task_by_id(task_id)).await? {
            Some(task) if task.user_id == user_id => {}
            _ => return Err(CoreError::NotFound(format!("task {} for user {}", task_id, user_id))),
        }

        let reminder = Reminder::pending(task_id, user_id, remind_at, channel);
        match with_timeout(self.call_timeout, self.repo.insert_reminder(&reminder)).await {
            Ok(()) => {}
            Err(CoreError::Conflict(reason)) => {
                // Same slot already pending: a duplicate or concurrent schedule request.
                let existing = with_timeout(
                    self.call_timeout,
                    self.repo.find_pending_reminder(task_id, remind_at, channel),
                )
                .await?;
                return match existing {
                    Some(existing) => {
                        info!(reminder_id = %existing.id, %task_id, remind_at = %remind_at, "reminder already scheduled");
                        Ok(existing)
                    }
                    None => Err(CoreError::Conflict(reason)),
                };
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.register_job(&reminder, correlation_id).await {
            // A reminder without a job would stay pending forever.
            let record = DeliveryRecord {
                status: DeliveryStatus::Failed,
                retry_count: 0,
                error_message: Some(format!("job registration failed: {}", e)),
            };
            if let Err(record_err) =
                with_timeout(self.call_timeout, self.repo.record_delivery(reminder.id, record)).await
            {
                warn!(reminder_id = %reminder.id, error = %record_err, "could not mark unscheduled reminder failed");
            }
            return Err(e);
        }

        info!(reminder_id = %reminder.id, %task_id, remind_at = %remind_at, channel = %channel, "reminder scheduled");
        Ok(reminder)
    }

    /// Schedules one reminder per offset before `due_at`.
    ///
    /// Offsets that already lie in the past are skipped, not failed.
    pub async fn schedule_reminders_for_task(
        &self,
        task_id: Uuid,
        due_at: DateTime<Utc>,
        offsets: &[ChronoDuration],
        correlation_id: CorrelationId,
    ) -> Result<Vec<Reminder>, CoreError> {
        let task = with_timeout(self.call_timeout, self.repo.find_task_by_id(task_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {}", task_id)))?;

        let now = Utc::now();
        let mut scheduled = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let remind_at = due_at - *offset;
            if remind_at <= now {
                info!(%task_id, offset_minutes = offset.num_minutes(), "reminder time already passed, skipping");
                continue;
            }

            match self
                .schedule_reminder(task_id, &task.user_id, remind_at, self.default_channel, correlation_id)
                .await
            {
                Ok(reminder) => scheduled.push(reminder),
                // The clock may have moved past remind_at since the check above.
                Err(CoreError::Validation(reason)) => {
                    info!(%task_id, %reason, "reminder skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(scheduled)
    }

    /// Cancels every pending reminder of the task and removes their jobs.
    ///
    /// Running it again is harmless: nothing is pending the second time.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_reminders(&self, task_id: Uuid) -> Result<usize, CoreError> {
        let cancelled = with_timeout(self.call_timeout, self.repo.cancel_pending_reminders(task_id)).await?;

        for reminder in &cancelled {
            let job_id = reminder_job_id(reminder.id);
            match with_timeout(self.call_timeout, self.jobs.delete_job(&job_id)).await {
                Ok(true) => debug!(%job_id, "reminder job removed"),
                Ok(false) => debug!(%job_id, "reminder job already fired or absent"),
                // The reminder is cancelled in the store, so a stray fire is skipped anyway.
                Err(e) => warn!(%job_id, error = %e, "failed to remove reminder job"),
            }
        }

        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "pending reminders cancelled");
        }
        Ok(cancelled.len())
    }

    /// Replaces the task's reminders with fresh ones against `new_due_at`.
    ///
    /// Returns the number cancelled and the reminders scheduled.
    pub async fn reschedule_reminders(
        &self,
        task_id: Uuid,
        new_due_at: DateTime<Utc>,
        offsets: &[ChronoDuration],
        correlation_id: CorrelationId,
    ) -> Result<(usize, Vec<Reminder>), CoreError> {
        let cancelled = self.cancel_reminders(task_id).await?;
        let scheduled = self
            .schedule_reminders_for_task(task_id, new_due_at, offsets, correlation_id)
            .await?;
        Ok((cancelled, scheduled))
    }

    /// Registers the job for an already persisted pending reminder.
    ///
    /// The job id is derived from the reminder id, so this overwrites any job
    /// still registered for it. An overdue reminder fires straight away.
    pub async fn rearm(&self, reminder: &Reminder, correlation_id: CorrelationId) -> Result<(), CoreError> {
        if reminder.delivery_status != DeliveryStatus::Pending {
            return Err(CoreError::Validation(format!(
                "reminder {} is {}, not pending",
                reminder.id, reminder.delivery_status
            )));
        }
        self.register_job(reminder, correlation_id).await
    }

    async fn register_job(&self, reminder: &Reminder, correlation_id: CorrelationId) -> Result<(), CoreError> {
        let payload = ReminderJobPayload {
            reminder_id: reminder.id,
            task_id: reminder.task_id,
            user_id: reminder.user_id.clone(),
            correlation_id,
        };
        let job = ScheduledJob {
            job_id: reminder_job_id(reminder.id),
            fire_at: reminder.remind_at,
            payload: serde_json::to_value(&payload)?,
            callback_url: REMINDER_CALLBACK_URL.to_string(),
        };
        with_timeout(self.call_timeout, self.jobs.create_job(job)).await
    }
}
