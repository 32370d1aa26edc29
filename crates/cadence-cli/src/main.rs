use std::sync::Arc;

use clap::Parser;
use owo_colors::{OwoColorize, Style};
use tracing_subscriber::EnvFilter;

use cadence_core::db;
use cadence_core::error::CoreError;
use cadence_core::pipeline::Pipeline;
use cadence_core::repository::{Repository, SqliteRepository};

mod cli;
mod commands;
mod config;
mod parser;
mod util;
mod views;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    let config = match config::Config::new() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Invalid configuration: {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let database_path = config.database_path.clone();
    let pipeline_config = match config.into_pipeline_config() {
        Ok(pipeline_config) => pipeline_config,
        Err(e) => {
            eprintln!("{} Invalid configuration: {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let db_pool = match db::establish_connection(&database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    let repository: Arc<dyn Repository> = Arc::new(SqliteRepository::new(db_pool));
    let (pipeline, mut inbox, _bus) = Pipeline::in_process(repository, pipeline_config);
    let pipeline = Arc::new(pipeline);

    let result = match cli.command {
        cli::Commands::Add(command) => commands::add::add_task(&pipeline, &mut inbox, command).await,
        cli::Commands::List(command) => commands::list::list_tasks(&pipeline, command).await,
        cli::Commands::Do(command) => commands::r#do::do_task(&pipeline, &mut inbox, command).await,
        cli::Commands::Due(command) => commands::due::change_due_date(&pipeline, &mut inbox, command).await,
        cli::Commands::Delete(command) => commands::delete::delete_task(&pipeline, &mut inbox, command).await,
        cli::Commands::Reminders(command) => commands::reminders::list_reminders(&pipeline, command).await,
        cli::Commands::CancelReminders(command) => {
            commands::reminders::cancel_reminders(&pipeline, command).await
        }
        cli::Commands::Next(command) => commands::next::preview_next(&pipeline, command).await,
        cli::Commands::Run => commands::run::run_worker(Arc::clone(&pipeline), inbox).await,
    };

    if let Err(e) = result {
        handle_error(e);
        std::process::exit(1);
    }
}

fn handle_error(err: anyhow::Error) {
    let error_style = Style::new().red().bold();

    match err.downcast_ref::<CoreError>() {
        Some(CoreError::NotFound(s)) => {
            eprintln!("{} {}", "Error:".style(error_style), s);
        }
        Some(CoreError::AmbiguousId(tasks)) => {
            eprintln!("{}", "Error: Ambiguous ID.".style(error_style));
            eprintln!("Did you mean one of these?");
            for (id, title) in tasks {
                eprintln!("  {} ({})", id.yellow(), title);
            }
        }
        Some(CoreError::Validation(s)) => {
            eprintln!("{} Invalid input: {}", "Error:".style(error_style), s);
        }
        Some(CoreError::Timeout(limit)) => {
            eprintln!(
                "{} An outbound call did not finish within {}",
                "Error:".style(error_style),
                format!("{:?}", limit).yellow()
            );
        }
        _ => eprintln!("{} {}", "Error:".style(error_style), err),
    }
}
