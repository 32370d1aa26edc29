//! Recurrence engine.
//!
//! Pure, deterministic date arithmetic for daily, weekly and monthly patterns.
//! Nothing in here touches the store or the clock except [`compute_next_due_date`],
//! which reads `Utc::now()` once and delegates to [`compute_next_due_date_at`].

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::error::CoreError;
use crate::models::{EndCondition, PatternType, RecurrencePattern};

pub const MIN_INTERVAL: u32 = 1;
pub const MAX_INTERVAL: u32 = 365;

/// Checks the structural invariants of a pattern.
///
/// - `interval` must be within `1..=365`
/// - `days_of_week` only on weekly patterns, each within `0..=6`
/// - `day_of_month` only on monthly patterns, within `1..=31`
/// - exactly the field matching `end_condition` is populated
pub fn validate_pattern(pattern: &RecurrencePattern) -> Result<(), CoreError> {
    if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&pattern.interval) {
        return Err(CoreError::Validation(format!(
            "interval must be between {} and {}, got {}",
            MIN_INTERVAL, MAX_INTERVAL, pattern.interval
        )));
    }

    if !pattern.days_of_week.is_empty() {
        if pattern.pattern_type != PatternType::Weekly {
            return Err(CoreError::Validation(
                "days_of_week is only allowed on weekly patterns".to_string(),
            ));
        }
        if let Some(day) = pattern.days_of_week.iter().find(|d| **d > 6) {
            return Err(CoreError::Validation(format!(
                "days_of_week entries must be between 0 and 6, got {}",
                day
            )));
        }
    }

    if let Some(day) = pattern.day_of_month {
        if pattern.pattern_type != PatternType::Monthly {
            return Err(CoreError::Validation(
                "day_of_month is only allowed on monthly patterns".to_string(),
            ));
        }
        if !(1..=31).contains(&day) {
            return Err(CoreError::Validation(format!(
                "day_of_month must be between 1 and 31, got {}",
                day
            )));
        }
    }

    match (pattern.end_condition, pattern.occurrence_count, pattern.end_date) {
        (EndCondition::Never, None, None) => Ok(()),
        (EndCondition::AfterOccurrences, Some(count), None) if count >= 1 => Ok(()),
        (EndCondition::AfterOccurrences, Some(_), None) => Err(CoreError::Validation(
            "occurrence_count must be at least 1".to_string(),
        )),
        (EndCondition::ByDate, None, Some(_)) => Ok(()),
        (condition, _, _) => Err(CoreError::Validation(format!(
            "end condition '{}' requires exactly its own bound to be set",
            condition
        ))),
    }
}

/// Whether the series may produce another instance at `now`.
pub fn should_continue(pattern: &RecurrencePattern, now: DateTime<Utc>) -> bool {
    match pattern.end_condition {
        EndCondition::Never => true,
        EndCondition::AfterOccurrences => pattern
            .occurrence_count
            .map_or(false, |count| pattern.current_occurrence < count),
        EndCondition::ByDate => pattern.end_date.map_or(false, |end| now < end),
    }
}

/// Computes the due date of the instance that follows `current_due_date`.
///
/// Returns `Ok(None)` when the series has ended.
pub fn compute_next_due_date(
    pattern: &RecurrencePattern,
    current_due_date: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CoreError> {
    compute_next_due_date_at(pattern, current_due_date, Utc::now())
}

/// Same as [`compute_next_due_date`] with an explicit clock reading.
pub fn compute_next_due_date_at(
    pattern: &RecurrencePattern,
    current_due_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CoreError> {
    validate_pattern(pattern)?;

    if !should_continue(pattern, now) {
        return Ok(None);
    }

    let next = next_occurrence_after(pattern, current_due_date)?;

    if pattern.end_condition == EndCondition::ByDate {
        if let Some(end) = pattern.end_date {
            if next > end {
                return Ok(None);
            }
        }
    }

    Ok(Some(next))
}

/// Previews up to `limit` future due dates, advancing `current_occurrence` as the
/// orchestrator would after each generated instance.
pub fn upcoming_due_dates(
    pattern: &RecurrencePattern,
    current_due_date: DateTime<Utc>,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<DateTime<Utc>>, CoreError> {
    let mut cursor = pattern.clone();
    let mut due = current_due_date;
    let mut dates = Vec::with_capacity(limit.min(64));

    while dates.len() < limit {
        match compute_next_due_date_at(&cursor, due, now)? {
            Some(next) => {
                dates.push(next);
                due = next;
                cursor.current_occurrence = cursor.current_occurrence.saturating_add(1);
            }
            None => break,
        }
    }
    Ok(dates)
}

/// The naive next occurrence strictly after `anchor`, ignoring end conditions.
fn next_occurrence_after(
    pattern: &RecurrencePattern,
    anchor: DateTime<Utc>,
) -> Result<DateTime<Utc>, CoreError> {
    let interval = i64::from(pattern.interval);
    let next = match pattern.pattern_type {
        PatternType::Daily => anchor.checked_add_signed(Duration::days(interval)),
        PatternType::Weekly => next_weekly(anchor, interval, &pattern.days_of_week),
        PatternType::Monthly => next_monthly(anchor, pattern.interval, pattern.day_of_month),
    };
    next.ok_or_else(|| CoreError::Validation(format!("next occurrence after {} is out of range", anchor)))
}

fn next_weekly(anchor: DateTime<Utc>, interval: i64, days_of_week: &[u8]) -> Option<DateTime<Utc>> {
    let anchor_day = i64::from(anchor.weekday().num_days_from_monday());

    let mut days: Vec<i64> = days_of_week.iter().map(|d| i64::from(*d)).collect();
    days.sort_unstable();
    days.dedup();
    if days.is_empty() {
        days.push(anchor_day);
    }

    // A later selected day in the anchor's own week wins.
    if let Some(day) = days.iter().find(|d| **d > anchor_day) {
        return anchor.checked_add_signed(Duration::days(day - anchor_day));
    }

    // Otherwise jump `interval` weeks from the anchor week's Monday.
    let offset = 7 * interval + days[0] - anchor_day;
    anchor.checked_add_signed(Duration::days(offset))
}

fn next_monthly(anchor: DateTime<Utc>, interval: u32, day_of_month: Option<u32>) -> Option<DateTime<Utc>> {
    let months = anchor.year() as i64 * 12 + i64::from(anchor.month0()) + i64::from(interval);
    let year = i32::try_from(months.div_euclid(12)).ok()?;
    let month = u32::try_from(months.rem_euclid(12)).ok()? + 1;

    let wanted = day_of_month.unwrap_or_else(|| anchor.day());
    let day = wanted.min(days_in_month(year, month)?);

    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| date.and_time(anchor.time()).and_utc())
}

/// Number of days in `month` (1-based) of `year`.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from(next_first.signed_duration_since(first).num_days()).ok()
}
