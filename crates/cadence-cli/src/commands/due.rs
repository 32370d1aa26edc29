use anyhow::Result;
use cadence_core::models::DeliveryStatus;
use cadence_core::pipeline::{Pipeline, PipelineInbox};
use cadence_core::repository::ReminderRepository;
use owo_colors::{OwoColorize, Style};

use crate::cli::DueCommand;
use crate::parser::parse_due_date;
use crate::util::resolve_task;

pub async fn change_due_date(pipeline: &Pipeline, inbox: &mut PipelineInbox, command: DueCommand) -> Result<()> {
    let task = resolve_task(pipeline.repository().as_ref(), &command.id).await?;
    let due_at = match (&command.date, command.clear) {
        (_, true) | (None, _) => None,
        (Some(date), false) => Some(parse_due_date(date)?),
    };

    let updated = pipeline.tasks().change_due_date(task.id, due_at).await?;
    pipeline.drain(inbox).await;

    let pending = pipeline
        .repository()
        .find_reminders_for_task(updated.id)
        .await?
        .into_iter()
        .filter(|r| r.delivery_status == DeliveryStatus::Pending)
        .count();

    let success_style = Style::new().green().bold();
    match updated.due_at {
        Some(due_at) => println!(
            "{} '{}' is now due {}",
            "✓".style(success_style),
            updated.title,
            due_at.format("%Y-%m-%d %H:%M UTC").to_string().cyan()
        ),
        None => println!("{} Cleared the due date of '{}'", "✓".style(success_style), updated.title),
    }
    println!("  {} Pending reminders: {}", "→".style(Style::new().blue()), pending);

    Ok(())
}
