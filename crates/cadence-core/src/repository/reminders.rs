use crate::error::CoreError;
use crate::models::{DeliveryRecord, DeliveryStatus, NotificationChannel, OutboxEntry, Reminder};
use crate::repository::{ReminderRepository, SqliteRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
impl ReminderRepository for SqliteRepository {
    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO reminders
            (id, task_id, user_id, remind_at, notification_channel, delivery_status, retry_count, error_message, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(reminder.id)
        .bind(reminder.task_id)
        .bind(&reminder.user_id)
        .bind(reminder.remind_at)
        .bind(reminder.notification_channel)
        .bind(reminder.delivery_status)
        .bind(reminder.retry_count)
        .bind(&reminder.error_message)
        .bind(reminder.created_at)
        .bind(reminder.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            CoreError::from_insert(
                e,
                &format!(
                    "a pending {} reminder for task {} at {} already exists",
                    reminder.notification_channel,
                    reminder.task_id,
                    reminder.remind_at.to_rfc3339()
                ),
            )
        })?;
        Ok(())
    }

    async fn find_pending_reminder(
        &self,
        task_id: Uuid,
        remind_at: DateTime<Utc>,
        channel: NotificationChannel,
    ) -> Result<Option<Reminder>, CoreError> {
        let reminder = sqlx::query_as(
            r#"SELECT * FROM reminders
            WHERE task_id = $1 AND remind_at = $2 AND notification_channel = $3 AND delivery_status = $4"#,
        )
        .bind(task_id)
        .bind(remind_at)
        .bind(channel)
        .bind(DeliveryStatus::Pending)
        .fetch_optional(self.pool())
        .await?;
        Ok(reminder)
    }

    async fn find_reminder_by_id(&self, id: Uuid) -> Result<Option<Reminder>, CoreError> {
        let reminder = sqlx::query_as("SELECT * FROM reminders WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(reminder)
    }

    async fn find_reminders_for_task(&self, task_id: Uuid) -> Result<Vec<Reminder>, CoreError> {
        let reminders = sqlx::query_as("SELECT * FROM reminders WHERE task_id = $1 ORDER BY remind_at, created_at")
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;
        Ok(reminders)
    }

    async fn find_pending_reminders(&self) -> Result<Vec<Reminder>, CoreError> {
        let reminders = sqlx::query_as("SELECT * FROM reminders WHERE delivery_status = $1 ORDER BY remind_at")
            .bind(DeliveryStatus::Pending)
            .fetch_all(self.pool())
            .await?;
        Ok(reminders)
    }

    async fn cancel_pending_reminders(&self, task_id: Uuid) -> Result<Vec<Reminder>, CoreError> {
        let cancelled = sqlx::query_as(
            r#"UPDATE reminders
            SET delivery_status = $1, updated_at = $2
            WHERE task_id = $3 AND delivery_status = $4
            RETURNING *
            "#,
        )
        .bind(DeliveryStatus::Cancelled)
        .bind(Utc::now())
        .bind(task_id)
        .bind(DeliveryStatus::Pending)
        .fetch_all(self.pool())
        .await?;
        Ok(cancelled)
    }

    async fn record_delivery(&self, id: Uuid, record: DeliveryRecord) -> Result<bool, CoreError> {
        if !DeliveryStatus::Pending.can_transition_to(record.status) {
            return Err(CoreError::Validation(format!(
                "reminder cannot move from pending to {}",
                record.status
            )));
        }

        let result = sqlx::query(
            r#"UPDATE reminders
            SET delivery_status = $1, retry_count = $2, error_message = $3, updated_at = $4
            WHERE id = $5 AND delivery_status = $6
            "#,
        )
        .bind(record.status)
        .bind(record.retry_count)
        .bind(&record.error_message)
        .bind(Utc::now())
        .bind(id)
        .bind(DeliveryStatus::Pending)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_reminder(&self, id: Uuid, stale_before: DateTime<Utc>) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"UPDATE reminders
            SET claimed_at = $1, updated_at = $1
            WHERE id = $2 AND delivery_status = $3 AND (claimed_at IS NULL OR claimed_at < $4)
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(DeliveryStatus::Pending)
        .bind(stale_before)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn enqueue_outbox(&self, entry: &OutboxEntry) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO notification_outbox
            (id, user_id, task_id, channel, subject, body, correlation_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.id)
        .bind(&entry.user_id)
        .bind(entry.task_id)
        .bind(entry.channel)
        .bind(&entry.subject)
        .bind(&entry.body)
        .bind(&entry.correlation_id)
        .bind(entry.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_outbox_entries(&self, task_id: Uuid) -> Result<Vec<OutboxEntry>, CoreError> {
        let entries = sqlx::query_as("SELECT * FROM notification_outbox WHERE task_id = $1 ORDER BY created_at")
            .bind(task_id)
            .fetch_all(self.pool())
            .await?;
        Ok(entries)
    }
}
