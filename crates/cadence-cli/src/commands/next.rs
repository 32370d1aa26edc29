use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::pipeline::Pipeline;
use cadence_core::recurrence::upcoming_due_dates;
use cadence_core::repository::{PatternRepository, TaskRepository};
use chrono::Utc;

use crate::cli::NextCommand;
use crate::util::resolve_task;
use crate::views::table::display_schedule;

pub async fn preview_next(pipeline: &Pipeline, command: NextCommand) -> Result<()> {
    let repo = pipeline.repository();
    let task = resolve_task(repo.as_ref(), &command.id).await?;

    let pattern_id = repo
        .capture_snapshot(&task)
        .await?
        .recurrence_pattern_id
        .ok_or_else(|| anyhow!(CoreError::Validation(format!("'{}' is not a recurring task", task.title))))?;
    let pattern = repo
        .find_pattern_by_id(pattern_id)
        .await?
        .ok_or_else(|| anyhow!(CoreError::NotFound(format!("Recurrence pattern {} not found", pattern_id))))?;

    let now = Utc::now();
    let from = task.due_at.unwrap_or(now);
    let dates = upcoming_due_dates(&pattern, from, now, command.count)?;

    println!(
        "Upcoming occurrences of '{}' ({} every {}, occurrence {}):",
        task.title, pattern.pattern_type, pattern.interval, pattern.current_occurrence
    );
    display_schedule(&dates);
    Ok(())
}
