//! Event envelopes exchanged over the bus.
//!
//! Every envelope carries `schema_version`, `event_type`, `timestamp` and a
//! `correlation_id`. Events caused by an upstream event reuse its correlation id,
//! so a whole recurrence or reminder chain can be traced end to end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{NotificationChannel, Reminder, TaskSnapshot};

pub const SCHEMA_VERSION: u32 = 1;

/// Bus topics.
pub mod topics {
    pub const TASK_EVENTS: &str = "task-events";
    pub const REMINDERS: &str = "reminders";
    /// Lightweight live-UI stream with short retention
    pub const TASK_UPDATES: &str = "task-updates";
}

/// Maximum number of transport wrappers peeled off an inbound payload.
const MAX_WRAPPER_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Task events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEventType {
    Created,
    Updated,
    Completed,
    Deleted,
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEventType::Created => write!(f, "created"),
            TaskEventType::Updated => write!(f, "updated"),
            TaskEventType::Completed => write!(f, "completed"),
            TaskEventType::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub schema_version: u32,
    pub event_type: TaskEventType,
    pub task_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub task: TaskSnapshot,
    /// Set on `updated` events whose due date changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_due_at: Option<DateTime<Utc>>,
}

impl TaskEvent {
    pub fn new(event_type: TaskEventType, task: TaskSnapshot, correlation_id: CorrelationId) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_type,
            task_id: task.id,
            user_id: task.user_id.clone(),
            timestamp: Utc::now(),
            correlation_id,
            task,
            previous_due_at: None,
        }
    }

    pub fn with_previous_due_at(mut self, previous: Option<DateTime<Utc>>) -> Self {
        self.previous_due_at = previous;
        self
    }

    /// Whether this `updated` event moved the task's due date.
    pub fn due_date_changed(&self) -> bool {
        self.event_type == TaskEventType::Updated && self.previous_due_at != self.task.due_at
    }

    /// `event_type:task_id:timestamp`
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}:{}", self.event_type, self.task_id, self.timestamp.to_rfc3339())
    }
}

// ============================================================================
// Reminder events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderEventType {
    ReminderDue,
    ReminderSent,
    ReminderFailed,
}

impl fmt::Display for ReminderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderEventType::ReminderDue => write!(f, "reminder_due"),
            ReminderEventType::ReminderSent => write!(f, "reminder_sent"),
            ReminderEventType::ReminderFailed => write!(f, "reminder_failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderEvent {
    pub schema_version: u32,
    pub event_type: ReminderEventType,
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub remind_at: DateTime<Utc>,
    pub notification_channel: NotificationChannel,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ReminderEvent {
    pub fn from_reminder(
        event_type: ReminderEventType,
        reminder: &Reminder,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_type,
            reminder_id: reminder.id,
            task_id: reminder.task_id,
            user_id: reminder.user_id.clone(),
            timestamp: Utc::now(),
            correlation_id,
            remind_at: reminder.remind_at,
            notification_channel: reminder.notification_channel,
            retry_count: reminder.retry_count,
            error_message: reminder.error_message.clone(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.event_type, self.reminder_id)
    }
}

// ============================================================================
// Live UI updates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskUpdateKind {
    Created,
    Updated,
    Completed,
    Deleted,
    Notification,
}

impl From<TaskEventType> for TaskUpdateKind {
    fn from(value: TaskEventType) -> Self {
        match value {
            TaskEventType::Created => TaskUpdateKind::Created,
            TaskEventType::Updated => TaskUpdateKind::Updated,
            TaskEventType::Completed => TaskUpdateKind::Completed,
            TaskEventType::Deleted => TaskUpdateKind::Deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdateEvent {
    pub schema_version: u32,
    pub event_type: TaskUpdateKind,
    pub task_id: Uuid,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskUpdateEvent {
    pub fn new(
        kind: TaskUpdateKind,
        task_id: Uuid,
        user_id: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_type: kind,
            task_id,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            correlation_id,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn from_task_event(event: &TaskEvent) -> Self {
        Self::new(event.event_type.into(), event.task_id, event.user_id.clone(), event.correlation_id)
            .with_message(event.task.title.clone())
    }
}

// ============================================================================
// Scheduled job payloads
// ============================================================================

/// Body delivered to the reminder callback when its job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderJobPayload {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub correlation_id: CorrelationId,
}

// ============================================================================
// Inbound decoding
// ============================================================================

/// Strips transport wrappers (CloudEvents-style `data`, possibly a JSON string)
/// until the canonical envelope with an `event_type` field is reached.
pub fn unwrap_transport(value: Value) -> Result<Value, CoreError> {
    let mut current = value;
    for _ in 0..=MAX_WRAPPER_DEPTH {
        if current.get("event_type").is_some() {
            return Ok(current);
        }
        current = match current {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::String(raw)) => serde_json::from_str(&raw)?,
                Some(inner @ Value::Object(_)) => inner,
                _ => {
                    return Err(CoreError::Validation(
                        "payload has neither event_type nor a data wrapper".to_string(),
                    ))
                }
            },
            Value::String(raw) => serde_json::from_str(&raw)?,
            _ => return Err(CoreError::Validation("payload is not a JSON object".to_string())),
        };
    }
    Err(CoreError::Validation("payload is wrapped too deeply".to_string()))
}

fn check_schema_version(value: &Value) -> Result<(), CoreError> {
    match value.get("schema_version").and_then(Value::as_u64) {
        Some(version) if version > u64::from(SCHEMA_VERSION) => Err(CoreError::Validation(format!(
            "unsupported schema_version {}",
            version
        ))),
        _ => Ok(()),
    }
}

/// Decodes an inbound task event, unwrapping any outer transport wrapper first.
pub fn decode_task_event(value: Value) -> Result<TaskEvent, CoreError> {
    let canonical = unwrap_transport(value)?;
    check_schema_version(&canonical)?;
    Ok(serde_json::from_value(canonical)?)
}

/// Decodes a reminder job body, accepting the same wrappers as events.
pub fn decode_job_payload(value: Value) -> Result<ReminderJobPayload, CoreError> {
    let canonical = if value.get("reminder_id").is_some() {
        value
    } else {
        match value {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::String(raw)) => serde_json::from_str(&raw)?,
                Some(inner) => inner,
                None => Value::Object(map),
            },
            Value::String(raw) => serde_json::from_str(&raw)?,
            other => other,
        }
    };
    Ok(serde_json::from_value(canonical)?)
}
