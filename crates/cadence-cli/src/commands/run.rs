use std::sync::Arc;

use anyhow::Result;
use cadence_core::pipeline::{Pipeline, PipelineInbox};
use owo_colors::OwoColorize;
use tracing::{info, warn};

/// Runs the pipeline until Ctrl-C, after re-arming reminders lost with the previous process.
pub async fn run_worker(pipeline: Arc<Pipeline>, inbox: PipelineInbox) -> Result<()> {
    let rearmed = pipeline.rearm_pending_reminders().await?;
    println!(
        "{} Worker running, {} pending reminder(s) re-armed. Press Ctrl-C to stop.",
        "●".green(),
        rearmed
    );

    pipeline
        .run(inbox, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("worker stopped");
    println!("Worker stopped.");
    Ok(())
}
