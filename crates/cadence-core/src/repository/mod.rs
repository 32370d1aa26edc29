use crate::db::DbPool;
use crate::error::CoreError;
use crate::events::CorrelationId;
use crate::models::{
    CreateTaskRequest, DeliveryRecord, LedgerEntry, LedgerOutcome, NewTaskData, NotificationChannel,
    OutboxEntry, RecurrencePattern, Reminder, Task, TaskSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

// Re-export domain modules
pub mod tasks;
pub mod patterns;
pub mod reminders;
pub mod ledger;

// Traits are defined in this module and implemented in respective domain modules

/// Domain-specific trait for task operations
#[async_trait]
pub trait TaskRepository {
    /// Inserts a task, plus its recurrence pattern when one is supplied.
    async fn add_task(&self, data: NewTaskData) -> Result<(Task, Option<RecurrencePattern>), CoreError>;
    async fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>, CoreError>;
    async fn find_tasks_by_short_id_prefix(&self, short_id: &str) -> Result<Vec<Task>, CoreError>;
    async fn find_tasks(&self, user_id: Option<&str>) -> Result<Vec<Task>, CoreError>;
    /// The generated instance whose `parent_task_id` is `parent_id`, if any.
    async fn find_child_of(&self, parent_id: Uuid) -> Result<Option<Task>, CoreError>;
    /// Creates a generated instance, joins it to its parent's series and advances
    /// the series pattern in one transaction.
    ///
    /// A second instance for the same parent fails with [`CoreError::Conflict`].
    async fn create_task_instance(&self, request: CreateTaskRequest) -> Result<Task, CoreError>;
    async fn complete_task(&self, id: Uuid) -> Result<Task, CoreError>;
    /// Returns the updated task and its previous due date.
    async fn update_due_date(
        &self,
        id: Uuid,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<(Task, Option<DateTime<Utc>>), CoreError>;
    /// Deletes the task. Its series pattern is removed with the last task that references it.
    async fn delete_task(&self, id: Uuid) -> Result<Task, CoreError>;
    /// Captures an immutable snapshot, including the id of the task's series pattern.
    async fn capture_snapshot(&self, task: &Task) -> Result<TaskSnapshot, CoreError>;
}

/// Domain-specific trait for recurrence pattern lookups
#[async_trait]
pub trait PatternRepository {
    async fn find_pattern_by_id(&self, id: Uuid) -> Result<Option<RecurrencePattern>, CoreError>;
    /// The pattern of the series the task belongs to, if it is recurring.
    async fn find_pattern_for_task(&self, task_id: Uuid) -> Result<Option<RecurrencePattern>, CoreError>;
}

/// Domain-specific trait for reminder operations
#[async_trait]
pub trait ReminderRepository {
    async fn insert_reminder(&self, reminder: &Reminder) -> Result<(), CoreError>;
    async fn find_reminder_by_id(&self, id: Uuid) -> Result<Option<Reminder>, CoreError>;
    async fn find_reminders_for_task(&self, task_id: Uuid) -> Result<Vec<Reminder>, CoreError>;
    async fn find_pending_reminders(&self) -> Result<Vec<Reminder>, CoreError>;
    /// The pending reminder occupying a (task, time, channel) slot.
    async fn find_pending_reminder(
        &self,
        task_id: Uuid,
        remind_at: DateTime<Utc>,
        channel: NotificationChannel,
    ) -> Result<Option<Reminder>, CoreError>;
    /// Atomically moves every pending reminder of the task to `cancelled`, returning those moved.
    async fn cancel_pending_reminders(&self, task_id: Uuid) -> Result<Vec<Reminder>, CoreError>;
    /// Writes a terminal outcome onto a pending reminder.
    ///
    /// Returns `false` when the reminder was no longer pending.
    async fn record_delivery(&self, id: Uuid, record: DeliveryRecord) -> Result<bool, CoreError>;
    /// Marks a pending reminder as being delivered.
    ///
    /// Returns `false` when it is no longer pending or another worker holds a
    /// claim taken at or after `stale_before`.
    async fn claim_reminder(&self, id: Uuid, stale_before: DateTime<Utc>) -> Result<bool, CoreError>;
    async fn enqueue_outbox(&self, entry: &OutboxEntry) -> Result<(), CoreError>;
    async fn find_outbox_entries(&self, task_id: Uuid) -> Result<Vec<OutboxEntry>, CoreError>;
}

/// Domain-specific trait for the processed-events ledger
#[async_trait]
pub trait LedgerRepository {
    async fn is_event_processed(&self, idempotency_key: &str) -> Result<bool, CoreError>;
    /// Upserts the outcome for a key. A `processed` entry is never downgraded.
    async fn record_event_outcome(
        &self,
        idempotency_key: &str,
        event_type: &str,
        correlation_id: CorrelationId,
        outcome: LedgerOutcome,
        detail: Option<String>,
    ) -> Result<(), CoreError>;
    async fn find_event_outcome(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>, CoreError>;
}

/// Main repository trait that composes all domain traits
#[async_trait]
pub trait Repository:
    TaskRepository +
    PatternRepository +
    ReminderRepository +
    LedgerRepository +
    Send +
    Sync
{
    // This trait automatically composes all domain-specific repositories
    // Individual domain operations are defined in their respective traits
}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool for internal use across modules
    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Repository for SqliteRepository {}
