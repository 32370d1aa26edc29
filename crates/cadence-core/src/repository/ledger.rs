use crate::error::CoreError;
use crate::events::CorrelationId;
use crate::models::{LedgerEntry, LedgerOutcome};
use crate::repository::{LedgerRepository, SqliteRepository};
use async_trait::async_trait;
use chrono::Utc;

#[async_trait]
impl LedgerRepository for SqliteRepository {
    async fn is_event_processed(&self, idempotency_key: &str) -> Result<bool, CoreError> {
        let outcome: Option<LedgerOutcome> =
            sqlx::query_scalar("SELECT outcome FROM processed_events WHERE idempotency_key = $1")
                .bind(idempotency_key)
                .fetch_optional(self.pool())
                .await?;
        Ok(outcome == Some(LedgerOutcome::Processed))
    }

    async fn record_event_outcome(
        &self,
        idempotency_key: &str,
        event_type: &str,
        correlation_id: CorrelationId,
        outcome: LedgerOutcome,
        detail: Option<String>,
    ) -> Result<(), CoreError> {
        // A failed attempt may be overwritten by a later success, never the reverse.
        sqlx::query(
            r#"INSERT INTO processed_events (idempotency_key, event_type, correlation_id, outcome, detail, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO UPDATE
            SET outcome = excluded.outcome, detail = excluded.detail, processed_at = excluded.processed_at
            WHERE processed_events.outcome != 'processed'
            "#,
        )
        .bind(idempotency_key)
        .bind(event_type)
        .bind(correlation_id.to_string())
        .bind(outcome)
        .bind(detail)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_event_outcome(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>, CoreError> {
        let entry = sqlx::query_as("SELECT * FROM processed_events WHERE idempotency_key = $1")
            .bind(idempotency_key)
            .fetch_optional(self.pool())
            .await?;
        Ok(entry)
    }
}
