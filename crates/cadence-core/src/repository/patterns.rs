use crate::error::CoreError;
use crate::models::{EndCondition, PatternType, RecurrencePattern};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

/// The pattern of the series `$1` belongs to.
const SERIES_PATTERN_SQL: &str = r#"
    SELECT rp.*
    FROM recurrence_patterns rp
    JOIN tasks t ON t.recurrence_pattern_id = rp.id
    WHERE t.id = $1
"#;

/// Storage shape of a pattern; `days_of_week` is kept as a comma-separated list.
#[derive(Debug, FromRow)]
pub(crate) struct PatternRow {
    id: Uuid,
    task_id: Uuid,
    pattern_type: PatternType,
    repeat_interval: i64,
    days_of_week: Option<String>,
    day_of_month: Option<i64>,
    end_condition: EndCondition,
    occurrence_count: Option<i64>,
    end_date: Option<DateTime<Utc>>,
    current_occurrence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn to_u32(value: i64, column: &str) -> Result<u32, CoreError> {
    u32::try_from(value).map_err(|_| CoreError::Validation(format!("{} out of range: {}", column, value)))
}

impl TryFrom<PatternRow> for RecurrencePattern {
    type Error = CoreError;

    fn try_from(row: PatternRow) -> Result<Self, Self::Error> {
        let days_of_week = match row.days_of_week.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(|d| {
                    d.trim()
                        .parse::<u8>()
                        .map_err(|_| CoreError::Validation(format!("invalid weekday '{}'", d)))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(RecurrencePattern {
            id: row.id,
            task_id: row.task_id,
            pattern_type: row.pattern_type,
            interval: to_u32(row.repeat_interval, "repeat_interval")?,
            days_of_week,
            day_of_month: row.day_of_month.map(|d| to_u32(d, "day_of_month")).transpose()?,
            end_condition: row.end_condition,
            occurrence_count: row.occurrence_count.map(|c| to_u32(c, "occurrence_count")).transpose()?,
            end_date: row.end_date,
            current_occurrence: to_u32(row.current_occurrence, "current_occurrence")?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn encode_days(days: &[u8]) -> Option<String> {
    if days.is_empty() {
        None
    } else {
        Some(days.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(","))
    }
}

impl SqliteRepository {
    pub(crate) async fn insert_pattern(
        conn: &mut SqliteConnection,
        pattern: &RecurrencePattern,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO recurrence_patterns
            (id, task_id, pattern_type, repeat_interval, days_of_week, day_of_month, end_condition,
             occurrence_count, end_date, current_occurrence, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(pattern.id)
        .bind(pattern.task_id)
        .bind(pattern.pattern_type)
        .bind(i64::from(pattern.interval))
        .bind(encode_days(&pattern.days_of_week))
        .bind(pattern.day_of_month.map(i64::from))
        .bind(pattern.end_condition)
        .bind(pattern.occurrence_count.map(i64::from))
        .bind(pattern.end_date)
        .bind(i64::from(pattern.current_occurrence))
        .bind(pattern.created_at)
        .bind(pattern.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| CoreError::from_insert(e, "task already owns a recurrence pattern"))?;
        Ok(())
    }

    pub(crate) async fn series_pattern(
        conn: &mut SqliteConnection,
        task_id: Uuid,
    ) -> Result<Option<RecurrencePattern>, CoreError> {
        let row: Option<PatternRow> = sqlx::query_as::<Sqlite, PatternRow>(SERIES_PATTERN_SQL)
            .bind(task_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(RecurrencePattern::try_from).transpose()
    }

    /// Copies the parent's series onto a freshly inserted instance.
    pub(crate) async fn inherit_pattern(
        conn: &mut SqliteConnection,
        task_id: Uuid,
        parent_id: Uuid,
    ) -> Result<Option<Uuid>, CoreError> {
        let pattern_id: Option<Option<Uuid>> = sqlx::query_scalar(
            r#"UPDATE tasks
            SET recurrence_pattern_id = (SELECT recurrence_pattern_id FROM tasks WHERE id = $1)
            WHERE id = $2
            RETURNING recurrence_pattern_id"#,
        )
        .bind(parent_id)
        .bind(task_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(pattern_id.flatten())
    }

    /// Drops the pattern once no task of its series is left.
    pub(crate) async fn prune_pattern(conn: &mut SqliteConnection, pattern_id: Uuid) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"DELETE FROM recurrence_patterns
            WHERE id = $1
              AND NOT EXISTS (SELECT 1 FROM tasks WHERE recurrence_pattern_id = $1)"#,
        )
        .bind(pattern_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Bumps `current_occurrence` after an instance has been generated.
    pub(crate) async fn advance_pattern(conn: &mut SqliteConnection, pattern_id: Uuid) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE recurrence_patterns
            SET current_occurrence = current_occurrence + 1, updated_at = $1
            WHERE id = $2"#,
        )
        .bind(Utc::now())
        .bind(pattern_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl super::PatternRepository for SqliteRepository {
    async fn find_pattern_by_id(&self, id: Uuid) -> Result<Option<RecurrencePattern>, CoreError> {
        let row: Option<PatternRow> = sqlx::query_as("SELECT * FROM recurrence_patterns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.map(RecurrencePattern::try_from).transpose()
    }

    async fn find_pattern_for_task(&self, task_id: Uuid) -> Result<Option<RecurrencePattern>, CoreError> {
        let mut conn = self.pool().acquire().await?;
        Self::series_pattern(&mut conn, task_id).await
    }
}
