use anyhow::{anyhow, Result};
use cadence_core::models::{EndCondition, NewPatternData, NewTaskData, PatternType};
use cadence_core::pipeline::{Pipeline, PipelineInbox};
use cadence_core::repository::ReminderRepository;
use owo_colors::{OwoColorize, Style};

use crate::cli::{AddCommand, RecurrenceArgs};
use crate::parser::{parse_due_date, parse_weekdays};

pub async fn add_task(pipeline: &Pipeline, inbox: &mut PipelineInbox, command: AddCommand) -> Result<()> {
    let due_at = command.due.as_deref().map(parse_due_date).transpose()?;
    let recurrence = build_pattern(&command.recurrence)?;

    let data = NewTaskData {
        user_id: command.user,
        title: command.title,
        description: command.description,
        priority: command.priority,
        due_at,
        recurrence,
    };

    let (task, pattern) = pipeline.tasks().add_task(data).await?;
    pipeline.drain(inbox).await;
    let reminders = pipeline.repository().find_reminders_for_task(task.id).await?;

    let success_style = Style::new().green().bold();
    let info_style = Style::new().blue();
    let subtle_style = Style::new().bright_black();

    let kind = if pattern.is_some() { "recurring task" } else { "task" };
    println!("{} Created {}: {}", "✓".style(success_style), kind, task.title.bright_white().bold());
    println!("  {} Task ID: {}", "→".style(info_style), task.id.to_string().yellow());
    if let Some(due_at) = task.due_at {
        println!(
            "  {} Due: {}",
            "→".style(info_style),
            due_at.format("%Y-%m-%d %H:%M UTC").to_string().cyan()
        );
    }
    if let Some(pattern) = &pattern {
        println!("  {} Repeats: {}", "→".style(info_style), describe_pattern(pattern.pattern_type, pattern.interval));
    }
    println!("  {} Reminders scheduled: {}", "→".style(info_style), reminders.len());

    if pattern.is_some() {
        println!(
            "\n   {} Preview upcoming: cadence next {}",
            "•".style(subtle_style),
            task.id.to_string().yellow()
        );
    }

    Ok(())
}

/// Turns the recurrence flags into pattern data, or `None` for a one-off task.
pub fn build_pattern(args: &RecurrenceArgs) -> Result<Option<NewPatternData>> {
    let Some(pattern_type) = args.every else {
        return Ok(None);
    };

    let days_of_week = match (&args.on, pattern_type) {
        (Some(on), PatternType::Weekly) => parse_weekdays(on)?,
        (Some(_), _) => return Err(anyhow!("--on only applies to weekly recurrence")),
        (None, _) => Vec::new(),
    };
    if args.day.is_some() && pattern_type != PatternType::Monthly {
        return Err(anyhow!("--day only applies to monthly recurrence"));
    }

    let (end_condition, occurrence_count, end_date) = match (args.count, &args.until) {
        (Some(count), _) => (EndCondition::AfterOccurrences, Some(count), None),
        (None, Some(until)) => (EndCondition::ByDate, None, Some(parse_due_date(until)?)),
        (None, None) => (EndCondition::Never, None, None),
    };

    Ok(Some(NewPatternData {
        pattern_type,
        interval: args.interval.unwrap_or(1),
        days_of_week,
        day_of_month: args.day,
        end_condition,
        occurrence_count,
        end_date,
    }))
}

fn describe_pattern(pattern_type: PatternType, interval: u32) -> String {
    let unit = match pattern_type {
        PatternType::Daily => "day",
        PatternType::Weekly => "week",
        PatternType::Monthly => "month",
    };
    if interval == 1 {
        format!("every {}", unit)
    } else {
        format!("every {} {}s", interval, unit)
    }
}
