use anyhow::Result;
use cadence_core::pipeline::Pipeline;
use cadence_core::repository::TaskRepository;

use crate::cli::ListCommand;
use crate::views::table::{display_tasks, ViewTask};

pub async fn list_tasks(pipeline: &Pipeline, command: ListCommand) -> Result<()> {
    let repo = pipeline.repository();
    let tasks = repo.find_tasks(command.user.as_deref()).await?;

    let mut view_tasks = Vec::with_capacity(tasks.len());
    for task in tasks {
        let snapshot = repo.capture_snapshot(&task).await?;
        view_tasks.push(ViewTask {
            id: task.id,
            title: task.title,
            status: task.status,
            priority: task.priority,
            due_at: task.due_at,
            recurring: snapshot.recurrence_pattern_id.is_some(),
            generated: task.parent_task_id.is_some(),
        });
    }

    display_tasks(&view_tasks);

    Ok(())
}
