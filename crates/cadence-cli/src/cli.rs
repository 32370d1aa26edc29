use cadence_core::models::{PatternType, TaskPriority};
use clap::{Args, Parser, Subcommand};

/// Cadence: recurring tasks, reminders and notifications from the command line
#[derive(Parser, Debug)]
#[command(name = "cadence", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Add a new task, optionally recurring
    Add(AddCommand),
    /// List tasks
    List(ListCommand),
    /// Mark a task as completed
    Do(DoCommand),
    /// Change or clear a task's due date
    Due(DueCommand),
    /// Delete a task
    Delete(DeleteCommand),
    /// Show the reminders of a task
    Reminders(RemindersCommand),
    /// Cancel every pending reminder of a task
    CancelReminders(CancelRemindersCommand),
    /// Preview the next due dates of a recurring task
    Next(NextCommand),
    /// Run the pipeline worker until interrupted
    Run,
}

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// The title of the task
    pub title: String,
    /// The description of the task
    #[clap(short, long)]
    pub description: Option<String>,
    /// The due date of the task (e.g. "tomorrow 9am", "2025-03-01 17:00")
    #[clap(long)]
    pub due: Option<String>,
    /// The priority of the task (low, medium, high)
    #[clap(short, long)]
    pub priority: Option<TaskPriority>,
    /// Owner of the task
    #[clap(long, default_value = "local")]
    pub user: String,
    #[command(flatten)]
    pub recurrence: RecurrenceArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RecurrenceArgs {
    /// Repeat the task (daily, weekly, monthly)
    #[clap(long)]
    pub every: Option<PatternType>,
    /// Repeat every N days, weeks or months
    #[clap(long, requires = "every", value_parser = clap::value_parser!(u32).range(1..=365))]
    pub interval: Option<u32>,
    /// Weekdays for weekly recurrence (e.g. "mon,wed,fri")
    #[clap(long, requires = "every")]
    pub on: Option<String>,
    /// Day of month for monthly recurrence (1-31)
    #[clap(long, requires = "every", value_parser = clap::value_parser!(u32).range(1..=31))]
    pub day: Option<u32>,
    /// Stop after this many occurrences in total
    #[clap(long, requires = "every", conflicts_with = "until", value_parser = clap::value_parser!(u32).range(1..))]
    pub count: Option<u32>,
    /// Stop once this date has passed (e.g. "2025-12-31")
    #[clap(long, requires = "every")]
    pub until: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// Only show tasks owned by this user
    #[clap(long)]
    pub user: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct DoCommand {
    /// The ID (or unique prefix) of the task to complete
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct DueCommand {
    /// The ID (or unique prefix) of the task
    pub id: String,
    /// The new due date
    #[clap(required_unless_present = "clear")]
    pub date: Option<String>,
    /// Remove the due date instead
    #[clap(long, conflicts_with = "date")]
    pub clear: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// The ID (or unique prefix) of the task to delete
    pub id: String,
    /// Delete without asking for confirmation
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RemindersCommand {
    /// The ID (or unique prefix) of the task
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CancelRemindersCommand {
    /// The ID (or unique prefix) of the task
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct NextCommand {
    /// The ID (or unique prefix) of a recurring task
    pub id: String,
    /// How many due dates to preview
    #[clap(short = 'n', long, default_value_t = 5)]
    pub count: usize,
}
