use anyhow::Result;
use cadence_core::pipeline::{Pipeline, PipelineInbox};
use dialoguer::Confirm;

use crate::cli::DeleteCommand;
use crate::util::resolve_task;

pub async fn delete_task(pipeline: &Pipeline, inbox: &mut PipelineInbox, command: DeleteCommand) -> Result<()> {
    let task = resolve_task(pipeline.repository().as_ref(), &command.id).await?;

    if !command.force {
        let confirmation = Confirm::new()
            .with_prompt(format!("Are you sure you want to delete task '{}'?", task.title))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirmation {
            println!("Deletion cancelled.");
            return Ok(());
        }
    }

    let deleted = pipeline.tasks().delete_task(task.id).await?;
    pipeline.drain(inbox).await;
    println!("Deleted task: '{}'", deleted.title);
    Ok(())
}
