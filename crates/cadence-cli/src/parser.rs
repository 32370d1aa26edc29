use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use chrono_english::{parse_date_string, Dialect};

pub fn parse_due_date(date_str: &str) -> Result<DateTime<Utc>> {
    parse_date_string(date_str, Utc::now(), Dialect::Us)
        .map_err(|e| anyhow!("Failed to parse date '{}': {}", date_str, e))
}

/// Parses a comma separated weekday list into day numbers, 0 = Monday.
pub fn parse_weekdays(input: &str) -> Result<Vec<u8>> {
    match input.trim().to_lowercase().as_str() {
        "weekdays" | "workdays" => return Ok(vec![0, 1, 2, 3, 4]),
        "weekends" => return Ok(vec![5, 6]),
        _ => {}
    }

    let mut days = Vec::new();
    for raw in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day = match raw.to_lowercase().as_str() {
            "mon" | "monday" => 0,
            "tue" | "tues" | "tuesday" => 1,
            "wed" | "wednesday" => 2,
            "thu" | "thur" | "thurs" | "thursday" => 3,
            "fri" | "friday" => 4,
            "sat" | "saturday" => 5,
            "sun" | "sunday" => 6,
            _ => return Err(anyhow!("Unknown weekday '{}'. Use mon, tue, wed, thu, fri, sat or sun", raw)),
        };
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(anyhow!("No weekdays given"));
    }
    days.sort_unstable();
    Ok(days)
}
