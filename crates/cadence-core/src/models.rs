use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task status: {0}")]
pub struct ParseTaskStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseTaskStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" | "pending" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            _ => Err(ParseTaskStatusError(s.to_string())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid task priority: {0}")]
pub struct ParseTaskPriorityError(String);

impl FromStr for TaskPriority {
    type Err = ParseTaskPriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(ParseTaskPriorityError(s.to_string())),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// The completed task this instance was generated from, if any
    pub parent_task_id: Option<Uuid>,
    /// The series this task belongs to; shared by the root and every generated instance
    pub recurrence_pattern_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable view of a task captured when an event is published.
///
/// Generated instances carry the id of the pattern their root was created with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence_pattern_id: Option<Uuid>,
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
}

impl TaskSnapshot {
    pub fn capture(task: &Task, recurrence_pattern_id: Option<Uuid>) -> Self {
        Self {
            id: task.id,
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            due_at: task.due_at,
            completed_at: task.completed_at,
            recurrence_pattern_id,
            parent_task_id: task.parent_task_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTaskData {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TaskPriority>,
    pub due_at: Option<DateTime<Utc>>,
    /// When present, the task becomes the root of a recurring series
    pub recurrence: Option<NewPatternData>,
}

impl Default for NewTaskData {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            title: String::new(),
            description: None,
            priority: None,
            due_at: None,
            recurrence: None,
        }
    }
}

/// Body of a task-creation call. Mirrors what the task service accepts over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateTaskRequest {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub parent_task_id: Option<Uuid>,
}

// ============================================================================
// Recurrence patterns
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid pattern type: {0}")]
pub struct ParsePatternTypeError(String);

impl FromStr for PatternType {
    type Err = ParsePatternTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" => Ok(PatternType::Daily),
            "weekly" | "week" => Ok(PatternType::Weekly),
            "monthly" | "month" => Ok(PatternType::Monthly),
            _ => Err(ParsePatternTypeError(s.to_string())),
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternType::Daily => write!(f, "daily"),
            PatternType::Weekly => write!(f, "weekly"),
            PatternType::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EndCondition {
    Never,
    AfterOccurrences,
    ByDate,
}

impl fmt::Display for EndCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndCondition::Never => write!(f, "never"),
            EndCondition::AfterOccurrences => write!(f, "after_occurrences"),
            EndCondition::ByDate => write!(f, "by_date"),
        }
    }
}

/// How a completed recurring task regenerates its next instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrencePattern {
    pub id: Uuid,
    /// The recurring root task that owns this pattern
    pub task_id: Uuid,
    pub pattern_type: PatternType,
    pub interval: u32,
    /// Weekdays for weekly patterns, 0 = Monday .. 6 = Sunday
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub day_of_month: Option<u32>,
    pub end_condition: EndCondition,
    pub occurrence_count: Option<u32>,
    pub end_date: Option<DateTime<Utc>>,
    /// Occurrences generated so far, the root counting as the first
    pub current_occurrence: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RecurrencePattern {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            pattern_type: PatternType::Daily,
            interval: 1,
            days_of_week: Vec::new(),
            day_of_month: None,
            end_condition: EndCondition::Never,
            occurrence_count: None,
            end_date: None,
            current_occurrence: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Data required to attach a recurrence pattern to a new root task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatternData {
    pub pattern_type: PatternType,
    pub interval: u32,
    pub days_of_week: Vec<u8>,
    pub day_of_month: Option<u32>,
    pub end_condition: EndCondition,
    pub occurrence_count: Option<u32>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for NewPatternData {
    fn default() -> Self {
        Self {
            pattern_type: PatternType::Daily,
            interval: 1,
            days_of_week: Vec::new(),
            day_of_month: None,
            end_condition: EndCondition::Never,
            occurrence_count: None,
            end_date: None,
        }
    }
}

impl NewPatternData {
    /// Builds the persisted pattern for `task_id`, starting at the first occurrence.
    pub fn into_pattern(self, task_id: Uuid) -> RecurrencePattern {
        let now = Utc::now();
        RecurrencePattern {
            id: Uuid::now_v7(),
            task_id,
            pattern_type: self.pattern_type,
            interval: self.interval,
            days_of_week: self.days_of_week,
            day_of_month: self.day_of_month,
            end_condition: self.end_condition,
            occurrence_count: self.occurrence_count,
            end_date: self.end_date,
            current_occurrence: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// Reminders
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
    Sms,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid notification channel: {0}")]
pub struct ParseNotificationChannelError(String);

impl FromStr for NotificationChannel {
    type Err = ParseNotificationChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_app" | "in-app" | "inapp" => Ok(NotificationChannel::InApp),
            "email" => Ok(NotificationChannel::Email),
            "sms" => Ok(NotificationChannel::Sms),
            _ => Err(ParseNotificationChannelError(s.to_string())),
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationChannel::InApp => write!(f, "in_app"),
            NotificationChannel::Email => write!(f, "email"),
            NotificationChannel::Sms => write!(f, "sms"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    /// Sent, failed and cancelled reminders never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        self == DeliveryStatus::Pending && next.is_terminal()
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Reminder {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub remind_at: DateTime<Utc>,
    pub notification_channel: NotificationChannel,
    pub delivery_status: DeliveryStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn pending(
        task_id: Uuid,
        user_id: impl Into<String>,
        remind_at: DateTime<Utc>,
        channel: NotificationChannel,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            task_id,
            user_id: user_id.into(),
            remind_at,
            notification_channel: channel,
            delivery_status: DeliveryStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Final outcome written back onto a reminder after dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

// ============================================================================
// Audit ledger and notification outbox
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerOutcome {
    Processed,
    Failed,
}

/// One row of the processed-events ledger, keyed by the event's idempotency key
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub idempotency_key: String,
    pub event_type: String,
    pub correlation_id: String,
    pub outcome: LedgerOutcome,
    pub detail: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// A notification waiting for an external email/SMS relay to pick it up
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub user_id: String,
    pub task_id: Uuid,
    pub channel: NotificationChannel,
    pub subject: String,
    pub body: String,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Pipeline configuration - core version
// This is separate from the CLI config to allow for type differences
// ============================================================================

/// Bounded exponential backoff used by the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-based). The first attempt is immediate.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor)
    }

    /// Longest a full delivery can take when every attempt runs into `attempt_timeout`.
    pub fn worst_case(&self, attempt_timeout: Duration) -> Duration {
        (1..=self.max_attempts.max(1)).fold(Duration::ZERO, |total, attempt| {
            total
                .saturating_add(self.delay_before(attempt))
                .saturating_add(attempt_timeout)
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on every call to the store, bus, scheduler or a channel
    pub call_timeout: Duration,
    /// How long before the due date each reminder fires
    pub reminder_offsets: Vec<ChronoDuration>,
    pub default_channel: NotificationChannel,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            reminder_offsets: vec![ChronoDuration::minutes(60), ChronoDuration::minutes(15)],
            default_channel: NotificationChannel::InApp,
            retry: RetryPolicy::default(),
        }
    }
}
