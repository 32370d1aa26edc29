use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::models::Task;
use cadence_core::repository::{Repository, TaskRepository};

pub async fn resolve_task(repo: &dyn Repository, short_id: &str) -> Result<Task> {
    if short_id.len() < 2 {
        return Err(anyhow!(CoreError::Validation(
            "Short ID must be at least 2 characters long.".to_string()
        )));
    }
    let mut tasks = repo.find_tasks_by_short_id_prefix(short_id).await?;
    match tasks.len() {
        0 => Err(anyhow!(CoreError::NotFound(format!(
            "No task found with ID prefix '{}'",
            short_id
        )))),
        1 => Ok(tasks.remove(0)),
        _ => {
            let task_info: Vec<(String, String)> = tasks
                .into_iter()
                .map(|t| (t.id.to_string(), t.title))
                .collect();
            Err(anyhow!(CoreError::AmbiguousId(task_info)))
        }
    }
}
