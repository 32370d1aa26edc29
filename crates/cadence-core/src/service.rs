use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{publish_event, EventBus};
use crate::error::{with_timeout, CoreError};
use crate::events::{topics, CorrelationId, TaskEvent, TaskEventType, TaskUpdateEvent};
use crate::models::{CreateTaskRequest, NewTaskData, RecurrencePattern, Task, TaskSnapshot};
use crate::repository::{Repository, TaskRepository};

/// Creates task instances on behalf of the orchestrator.
///
/// The correlation id travels with the call so the resulting `created` event
/// belongs to the same causal chain as the completion that triggered it.
#[async_trait]
pub trait TaskCreationClient: Send + Sync {
    async fn create_task(
        &self,
        request: CreateTaskRequest,
        correlation_id: CorrelationId,
    ) -> Result<Uuid, CoreError>;
}

/// In-process task service: mutates the store and announces every change on the bus.
pub struct LocalTaskService {
    repo: Arc<dyn Repository>,
    bus: Arc<dyn EventBus>,
    call_timeout: Duration,
}

impl LocalTaskService {
    pub fn new(repo: Arc<dyn Repository>, bus: Arc<dyn EventBus>, call_timeout: Duration) -> Self {
        Self { repo, bus, call_timeout }
    }

    pub async fn add_task(&self, data: NewTaskData) -> Result<(Task, Option<RecurrencePattern>), CoreError> {
        let (task, pattern) = with_timeout(self.call_timeout, self.repo.add_task(data)).await?;
        let correlation_id = CorrelationId::new();
        info!(task_id = %task.id, %correlation_id, recurring = pattern.is_some(), "task created");

        let snapshot = TaskSnapshot::capture(&task, pattern.as_ref().map(|p| p.id));
        self.announce(TaskEvent::new(TaskEventType::Created, snapshot, correlation_id))
            .await;
        Ok((task, pattern))
    }

    pub async fn complete_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let task = with_timeout(self.call_timeout, self.repo.complete_task(id)).await?;
        let correlation_id = CorrelationId::new();
        info!(task_id = %task.id, %correlation_id, "task completed");

        let snapshot = with_timeout(self.call_timeout, self.repo.capture_snapshot(&task)).await?;
        self.announce(TaskEvent::new(TaskEventType::Completed, snapshot, correlation_id))
            .await;
        Ok(task)
    }

    /// Moves (or clears) a task's due date and publishes an `updated` event
    /// carrying the previous value.
    pub async fn change_due_date(&self, id: Uuid, due_at: Option<DateTime<Utc>>) -> Result<Task, CoreError> {
        let (task, previous) = with_timeout(self.call_timeout, self.repo.update_due_date(id, due_at)).await?;
        let correlation_id = CorrelationId::new();
        info!(task_id = %task.id, %correlation_id, ?previous, due_at = ?task.due_at, "task due date changed");

        let snapshot = with_timeout(self.call_timeout, self.repo.capture_snapshot(&task)).await?;
        let event = TaskEvent::new(TaskEventType::Updated, snapshot, correlation_id).with_previous_due_at(previous);
        self.announce(event).await;
        Ok(task)
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let existing = with_timeout(self.call_timeout, self.repo.find_task_by_id(id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {}", id)))?;
        // Snapshot first: the row is gone afterwards.
        let snapshot = with_timeout(self.call_timeout, self.repo.capture_snapshot(&existing)).await?;

        let task = with_timeout(self.call_timeout, self.repo.delete_task(id)).await?;
        let correlation_id = CorrelationId::new();
        info!(task_id = %task.id, %correlation_id, "task deleted");

        self.announce(TaskEvent::new(TaskEventType::Deleted, snapshot, correlation_id))
            .await;
        Ok(task)
    }

    /// Publishes the lifecycle event plus its live-update twin.
    ///
    /// The store write has already committed, so a bus failure is logged rather than
    /// returned; consumers recover through redelivery or a later change.
    async fn announce(&self, event: TaskEvent) {
        let update = TaskUpdateEvent::from_task_event(&event);

        if let Err(e) = with_timeout(
            self.call_timeout,
            publish_event(self.bus.as_ref(), topics::TASK_EVENTS, &event),
        )
        .await
        {
            warn!(task_id = %event.task_id, correlation_id = %event.correlation_id, error = %e, "failed to publish task event");
        }

        if let Err(e) = with_timeout(
            self.call_timeout,
            publish_event(self.bus.as_ref(), topics::TASK_UPDATES, &update),
        )
        .await
        {
            warn!(task_id = %event.task_id, error = %e, "failed to publish task update");
        }
    }
}

#[async_trait]
impl TaskCreationClient for LocalTaskService {
    #[tracing::instrument(
        skip(self, request),
        fields(correlation_id = %correlation_id, parent_task_id = ?request.parent_task_id)
    )]
    async fn create_task(
        &self,
        request: CreateTaskRequest,
        correlation_id: CorrelationId,
    ) -> Result<Uuid, CoreError> {
        let task = with_timeout(self.call_timeout, self.repo.create_task_instance(request)).await?;
        info!(task_id = %task.id, due_at = ?task.due_at, "task instance created");

        let snapshot = with_timeout(self.call_timeout, self.repo.capture_snapshot(&task)).await?;
        self.announce(TaskEvent::new(TaskEventType::Created, snapshot, correlation_id))
            .await;
        Ok(task.id)
    }
}
