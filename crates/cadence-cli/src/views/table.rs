use cadence_core::models::{DeliveryStatus, Reminder, TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use chrono_humanize::Humanize;
use comfy_table::{Attribute, Cell, Color, Row, Table};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ViewTask {
    pub id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub recurring: bool,
    pub generated: bool,
}

pub fn display_tasks(tasks: &[ViewTask]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Title", "Status", "Priority", "Due Date"]);

    for task in tasks {
        let mut row = Row::new();
        row.add_cell(Cell::new(task.id.to_string()));

        let mut display_title = String::new();
        if task.recurring {
            display_title.push('↻');
            display_title.push(' ');
        }
        display_title.push_str(&task.title);
        if task.generated {
            display_title.push_str(" (next)");
        }

        let mut title_cell = Cell::new(display_title);
        title_cell = match task.status {
            TaskStatus::Completed => title_cell.add_attribute(Attribute::CrossedOut).fg(Color::DarkGrey),
            TaskStatus::Todo | TaskStatus::InProgress => match task.priority {
                TaskPriority::High => title_cell.fg(Color::Red).add_attribute(Attribute::Bold),
                TaskPriority::Medium => title_cell.fg(Color::Yellow),
                TaskPriority::Low => title_cell,
            },
        };
        row.add_cell(title_cell);

        let status_cell = Cell::new(task.status.to_string());
        row.add_cell(match task.status {
            TaskStatus::Completed => status_cell.fg(Color::Green),
            _ => status_cell,
        });
        row.add_cell(Cell::new(task.priority.to_string()));
        row.add_cell(due_cell(task.due_at, task.status != TaskStatus::Completed));
        table.add_row(row);
    }

    println!("{table}");
}

pub fn display_reminders(reminders: &[Reminder]) {
    if reminders.is_empty() {
        println!("No reminders found.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Remind At", "Channel", "Status", "Retries", "Error"]);

    for reminder in reminders {
        let mut row = Row::new();
        row.add_cell(Cell::new(reminder.id.to_string()));
        row.add_cell(Cell::new(format!(
            "{} ({})",
            reminder.remind_at.format("%Y-%m-%d %H:%M UTC"),
            reminder.remind_at.humanize()
        )));
        row.add_cell(Cell::new(reminder.notification_channel.to_string()));

        let status_cell = Cell::new(reminder.delivery_status.to_string());
        row.add_cell(match reminder.delivery_status {
            DeliveryStatus::Pending => status_cell.fg(Color::Yellow),
            DeliveryStatus::Sent => status_cell.fg(Color::Green),
            DeliveryStatus::Failed => status_cell.fg(Color::Red).add_attribute(Attribute::Bold),
            DeliveryStatus::Cancelled => status_cell.fg(Color::DarkGrey),
        });
        row.add_cell(Cell::new(reminder.retry_count));
        row.add_cell(Cell::new(reminder.error_message.as_deref().unwrap_or("")));
        table.add_row(row);
    }

    println!("{table}");
}

pub fn display_schedule(dates: &[DateTime<Utc>]) {
    if dates.is_empty() {
        println!("No upcoming occurrences; the series has ended.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["#", "Due Date", "Weekday", "When"]);
    for (index, due_at) in dates.iter().enumerate() {
        table.add_row(vec![
            Cell::new(index + 1),
            Cell::new(due_at.format("%Y-%m-%d %H:%M UTC")),
            Cell::new(due_at.format("%A")),
            Cell::new(due_at.humanize()),
        ]);
    }

    println!("{table}");
}

fn due_cell(due_at: Option<DateTime<Utc>>, open: bool) -> Cell {
    let Some(due_at) = due_at else {
        return Cell::new("None");
    };
    let now = Utc::now();
    let cell = Cell::new(due_at.humanize());
    if !open {
        cell
    } else if due_at < now {
        cell.fg(Color::Red)
    } else if due_at.date_naive() == now.date_naive() {
        cell.fg(Color::Yellow)
    } else {
        cell
    }
}
