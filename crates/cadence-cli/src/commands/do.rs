use anyhow::Result;
use cadence_core::models::TaskStatus;
use cadence_core::pipeline::{Pipeline, PipelineInbox};
use cadence_core::repository::TaskRepository;
use owo_colors::{OwoColorize, Style};

use crate::cli::DoCommand;
use crate::util::resolve_task;

pub async fn do_task(pipeline: &Pipeline, inbox: &mut PipelineInbox, command: DoCommand) -> Result<()> {
    let task = resolve_task(pipeline.repository().as_ref(), &command.id).await?;
    if task.status == TaskStatus::Completed {
        println!("Task '{}' is already completed.", task.title);
        return Ok(());
    }

    let recurring = pipeline
        .repository()
        .capture_snapshot(&task)
        .await?
        .recurrence_pattern_id
        .is_some();

    let completed = pipeline.tasks().complete_task(task.id).await?;
    pipeline.drain(inbox).await;

    let success_style = Style::new().green().bold();
    println!("{} Completed task: '{}'", "✓".style(success_style), completed.title);

    if !recurring {
        return Ok(());
    }
    match pipeline.repository().find_child_of(completed.id).await? {
        Some(next) => {
            let due = next
                .due_at
                .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "no due date".to_string());
            println!(
                "  {} Next instance {} due {}",
                "→".style(Style::new().blue()),
                next.id.to_string().yellow(),
                due.cyan()
            );
        }
        None => println!("  {} The series has ended.", "→".style(Style::new().blue())),
    }

    Ok(())
}
