use anyhow::Result;
use cadence_core::pipeline::Pipeline;
use cadence_core::repository::ReminderRepository;

use crate::cli::{CancelRemindersCommand, RemindersCommand};
use crate::util::resolve_task;
use crate::views::table::display_reminders;

pub async fn list_reminders(pipeline: &Pipeline, command: RemindersCommand) -> Result<()> {
    let task = resolve_task(pipeline.repository().as_ref(), &command.id).await?;
    let reminders = pipeline.repository().find_reminders_for_task(task.id).await?;
    println!("Reminders for '{}':", task.title);
    display_reminders(&reminders);
    Ok(())
}

pub async fn cancel_reminders(pipeline: &Pipeline, command: CancelRemindersCommand) -> Result<()> {
    let task = resolve_task(pipeline.repository().as_ref(), &command.id).await?;
    let cancelled = pipeline.reminders().cancel_reminders(task.id).await?;
    println!("Cancelled {} pending reminder(s) for '{}'", cancelled, task.title);
    Ok(())
}
