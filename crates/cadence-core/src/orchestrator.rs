//! Regenerates the next instance of a recurring task once the current one is completed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{with_timeout, CoreError};
use crate::events::{TaskEvent, TaskEventType};
use crate::models::{CreateTaskRequest, TaskStatus};
use crate::recurrence::compute_next_due_date;
use crate::repository::{PatternRepository, Repository, TaskRepository};
use crate::service::TaskCreationClient;

/// What handling a task event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationOutcome {
    /// Not a completion, or the task is not part of a recurring series
    Ignored,
    /// The snapshot named a pattern the store no longer has
    PatternMissing,
    SeriesEnded,
    /// A redelivery: the next instance exists already
    AlreadyGenerated(Uuid),
    Created(Uuid),
}

pub struct RecurringTaskOrchestrator {
    repo: Arc<dyn Repository>,
    creator: Arc<dyn TaskCreationClient>,
    call_timeout: Duration,
}

impl RecurringTaskOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        creator: Arc<dyn TaskCreationClient>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            creator,
            call_timeout,
        }
    }

    /// Creates the next instance of a completed recurring task.
    ///
    /// Safe to call any number of times with the same event: the existence
    /// check on `parent_task_id`, backed by a unique index in the store, lets at
    /// most one child through.
    #[tracing::instrument(
        skip(self, event),
        fields(correlation_id = %event.correlation_id, task_id = %event.task_id)
    )]
    pub async fn handle_task_completed(&self, event: &TaskEvent) -> Result<OrchestrationOutcome, CoreError> {
        if event.event_type != TaskEventType::Completed {
            return Ok(OrchestrationOutcome::Ignored);
        }
        let Some(pattern_id) = event.task.recurrence_pattern_id else {
            debug!("completed task is not recurring");
            return Ok(OrchestrationOutcome::Ignored);
        };

        // The pattern is always read from the store, never from the snapshot.
        let pattern = match with_timeout(self.call_timeout, self.repo.find_pattern_by_id(pattern_id)).await? {
            Some(pattern) => pattern,
            None => {
                warn!(%pattern_id, "recurrence pattern referenced by task is missing");
                return Ok(OrchestrationOutcome::PatternMissing);
            }
        };

        let current_due = event
            .task
            .due_at
            .or(event.task.completed_at)
            .unwrap_or(event.timestamp);

        let Some(next_due) = compute_next_due_date(&pattern, current_due)? else {
            info!(
                %pattern_id,
                current_occurrence = pattern.current_occurrence,
                "recurring series has ended"
            );
            return Ok(OrchestrationOutcome::SeriesEnded);
        };

        if let Some(existing) = with_timeout(self.call_timeout, self.repo.find_child_of(event.task_id)).await? {
            info!(child_id = %existing.id, "next instance already generated, skipping");
            return Ok(OrchestrationOutcome::AlreadyGenerated(existing.id));
        }

        let request = CreateTaskRequest {
            user_id: event.task.user_id.clone(),
            title: event.task.title.clone(),
            description: event.task.description.clone(),
            priority: event.task.priority,
            status: TaskStatus::Todo,
            due_at: Some(next_due),
            parent_task_id: Some(event.task_id),
        };

        match with_timeout(
            self.call_timeout,
            self.creator.create_task(request, event.correlation_id),
        )
        .await
        {
            Ok(child_id) => {
                info!(%child_id, %next_due, "next instance created");
                Ok(OrchestrationOutcome::Created(child_id))
            }
            Err(CoreError::Conflict(reason)) => {
                // Lost a race against a concurrent copy of this event.
                match with_timeout(self.call_timeout, self.repo.find_child_of(event.task_id)).await? {
                    Some(existing) => {
                        info!(child_id = %existing.id, "concurrent delivery created the instance first");
                        Ok(OrchestrationOutcome::AlreadyGenerated(existing.id))
                    }
                    None => Err(CoreError::Conflict(reason)),
                }
            }
            Err(e) => Err(e),
        }
    }
}
