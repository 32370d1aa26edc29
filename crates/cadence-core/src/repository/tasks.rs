use crate::error::CoreError;
use crate::models::{
    CreateTaskRequest, NewTaskData, RecurrencePattern, Task, TaskPriority, TaskSnapshot, TaskStatus,
};
use crate::recurrence::validate_pattern;
use crate::repository::{SqliteRepository, TaskRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

#[async_trait]
impl TaskRepository for SqliteRepository {
    async fn add_task(&self, data: NewTaskData) -> Result<(Task, Option<RecurrencePattern>), CoreError> {
        if data.title.trim().is_empty() {
            return Err(CoreError::Validation("task title must not be empty".to_string()));
        }

        let now = Utc::now();
        let mut task = Task {
            id: Uuid::now_v7(),
            user_id: data.user_id,
            title: data.title,
            description: data.description,
            status: TaskStatus::Todo,
            priority: data.priority.unwrap_or(TaskPriority::Medium),
            due_at: data.due_at,
            completed_at: None,
            parent_task_id: None,
            recurrence_pattern_id: None,
            created_at: now,
            updated_at: now,
        };

        let pattern = match data.recurrence {
            Some(pattern_data) => {
                if task.due_at.is_none() {
                    return Err(CoreError::Validation(
                        "a recurring task needs a due date to anchor its pattern".to_string(),
                    ));
                }
                let pattern = pattern_data.into_pattern(task.id);
                validate_pattern(&pattern)?;
                Some(pattern)
            }
            None => None,
        };

        task.recurrence_pattern_id = pattern.as_ref().map(|p| p.id);

        let mut tx = self.pool().begin().await?;
        // The task references its pattern, so the pattern row goes in first.
        if let Some(pattern) = &pattern {
            Self::insert_pattern(&mut tx, pattern).await?;
        }
        Self::insert_task(&mut tx, &task).await?;
        tx.commit().await?;

        Ok((task, pattern))
    }

    async fn find_task_by_id(&self, id: Uuid) -> Result<Option<Task>, CoreError> {
        let task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(task)
    }

    async fn find_tasks_by_short_id_prefix(&self, short_id: &str) -> Result<Vec<Task>, CoreError> {
        // Ids are stored as 16-byte blobs, so match against their hex form.
        let mut pattern: String = short_id
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        pattern.push('%');

        let tasks: Vec<Task> = sqlx::query_as("SELECT * FROM tasks WHERE lower(hex(id)) LIKE $1")
            .bind(pattern)
            .fetch_all(self.pool())
            .await?;
        Ok(tasks)
    }

    async fn find_tasks(&self, user_id: Option<&str>) -> Result<Vec<Task>, CoreError> {
        let tasks = match user_id {
            Some(user_id) => {
                sqlx::query_as("SELECT * FROM tasks WHERE user_id = $1 ORDER BY created_at")
                    .bind(user_id)
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM tasks ORDER BY created_at")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        Ok(tasks)
    }

    async fn find_child_of(&self, parent_id: Uuid) -> Result<Option<Task>, CoreError> {
        let task = sqlx::query_as("SELECT * FROM tasks WHERE parent_task_id = $1")
            .bind(parent_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(task)
    }

    async fn create_task_instance(&self, request: CreateTaskRequest) -> Result<Task, CoreError> {
        let now = Utc::now();
        let mut task = Task {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            title: request.title,
            description: request.description,
            status: request.status,
            priority: request.priority,
            due_at: request.due_at,
            completed_at: None,
            parent_task_id: request.parent_task_id,
            recurrence_pattern_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;

        // The insert comes first so the write lock and the unique index on
        // parent_task_id decide any race before the pattern is touched.
        Self::insert_task(&mut tx, &task).await?;

        if let Some(parent_id) = task.parent_task_id {
            task.recurrence_pattern_id = Self::inherit_pattern(&mut tx, task.id, parent_id).await?;
            if let Some(pattern_id) = task.recurrence_pattern_id {
                Self::advance_pattern(&mut tx, pattern_id).await?;
            }
        }

        tx.commit().await?;
        Ok(task)
    }

    async fn complete_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let now = Utc::now();
        let completed: Option<Task> = sqlx::query_as(
            r#"UPDATE tasks
            SET status = $1, completed_at = $2, updated_at = $2
            WHERE id = $3 AND status != $1
            RETURNING *
            "#,
        )
        .bind(TaskStatus::Completed)
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match completed {
            Some(task) => Ok(task),
            None => match self.find_task_by_id(id).await? {
                Some(_) => Err(CoreError::Validation(format!("task {} is already completed", id))),
                None => Err(CoreError::NotFound(format!("task {}", id))),
            },
        }
    }

    async fn update_due_date(
        &self,
        id: Uuid,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<(Task, Option<DateTime<Utc>>), CoreError> {
        let mut tx = self.pool().begin().await?;

        let current: Task = sqlx::query_as("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {}", id)))?;

        let updated: Task = sqlx::query_as(
            r#"UPDATE tasks
            SET due_at = $1, updated_at = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(due_at)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((updated, current.due_at))
    }

    async fn delete_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let mut tx = self.pool().begin().await?;

        let deleted: Task = sqlx::query_as("DELETE FROM tasks WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {}", id)))?;

        if let Some(pattern_id) = deleted.recurrence_pattern_id {
            if Self::prune_pattern(&mut tx, pattern_id).await? {
                debug!(%pattern_id, "last task of the series deleted, pattern removed");
            }
        }

        tx.commit().await?;
        Ok(deleted)
    }

    async fn capture_snapshot(&self, task: &Task) -> Result<TaskSnapshot, CoreError> {
        Ok(TaskSnapshot::capture(task, task.recurrence_pattern_id))
    }
}

impl SqliteRepository {
    async fn insert_task(conn: &mut SqliteConnection, task: &Task) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO tasks
            (id, user_id, title, description, status, priority, due_at, completed_at, parent_task_id,
             recurrence_pattern_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(task.id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.due_at)
        .bind(task.completed_at)
        .bind(task.parent_task_id)
        .bind(task.recurrence_pattern_id)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            CoreError::from_insert(
                e,
                &format!(
                    "an instance generated from {} already exists",
                    task.parent_task_id.map(|p| p.to_string()).unwrap_or_default()
                ),
            )
        })?;
        Ok(())
    }
}
