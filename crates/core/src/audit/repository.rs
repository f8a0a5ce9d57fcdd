use super::event::{AuditEvent, EventOutcome, EventSeverity, EventType};
use super::traits::{AuditBackend, AuditFilter};
use crate::database::DatabasePool;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

/// Postgres-backed append-only audit sink.
pub struct DatabaseAuditRepository {
    db: DatabasePool,
}

impl DatabaseAuditRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<AuditEvent> {
        let event_type: String = row.try_get("event_type")?;
        let severity: String = row.try_get("severity")?;
        let outcome: String = row.try_get("outcome")?;
        let metadata: serde_json::Value = row.try_get("metadata")?;

        Ok(AuditEvent {
            id: row.try_get("id")?,
            event_type: serde_json::from_value(serde_json::Value::String(event_type.clone()))
                .unwrap_or(EventType::Custom(event_type)),
            severity: match severity.as_str() {
                "warning" => EventSeverity::Warning,
                "critical" => EventSeverity::Critical,
                _ => EventSeverity::Info,
            },
            timestamp: row.try_get("timestamp")?,
            actor_id: row.try_get("actor_id")?,
            request_id: row.try_get("request_id")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            description: row.try_get("description")?,
            metadata: serde_json::from_value(metadata).unwrap_or_default(),
            previous_values: row.try_get("previous_values")?,
            new_values: row.try_get("new_values")?,
            outcome: match outcome.as_str() {
                "failure" => EventOutcome::Failure,
                "partial" => EventOutcome::Partial,
                _ => EventOutcome::Success,
            },
        })
    }
}

#[async_trait]
impl AuditBackend for DatabaseAuditRepository {
    async fn store_event(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_events
             (id, event_type, severity, timestamp, actor_id, request_id,
              resource_type, resource_id, description, metadata,
              previous_values, new_values, outcome)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&event.id)
        .bind(event.event_type.to_string())
        .bind(event.severity.to_string().to_lowercase())
        .bind(event.timestamp)
        .bind(&event.actor_id)
        .bind(&event.request_id)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.description)
        .bind(serde_json::to_value(&event.metadata)?)
        .bind(&event.previous_values)
        .bind(&event.new_values)
        .bind(event.outcome.to_string())
        .execute(self.db.get())
        .await?;

        Ok(())
    }

    async fn retrieve_events(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let limit = filter.limit.unwrap_or(100).min(1000);
        let offset = filter.offset.unwrap_or(0);

        let rows = sqlx::query(
            "SELECT * FROM audit_events
             WHERE ($1::timestamptz IS NULL OR timestamp >= $1)
               AND ($2::timestamptz IS NULL OR timestamp <= $2)
               AND ($3::text IS NULL OR actor_id = $3)
               AND ($4::text IS NULL OR resource_type = $4)
               AND ($5::text IS NULL OR resource_id = $5)
             ORDER BY timestamp DESC
             LIMIT $6 OFFSET $7",
        )
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(&filter.actor_id)
        .bind(&filter.resource_type)
        .bind(&filter.resource_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn count_events(&self, filter: &AuditFilter) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM audit_events
             WHERE ($1::timestamptz IS NULL OR timestamp >= $1)
               AND ($2::timestamptz IS NULL OR timestamp <= $2)
               AND ($3::text IS NULL OR actor_id = $3)
               AND ($4::text IS NULL OR resource_type = $4)
               AND ($5::text IS NULL OR resource_id = $5)",
        )
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(&filter.actor_id)
        .bind(&filter.resource_type)
        .bind(&filter.resource_id)
        .fetch_one(self.db.get())
        .await?;

        Ok(count as u64)
    }

    async fn cleanup_old_events(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_events WHERE timestamp < $1")
            .bind(older_than)
            .execute(self.db.get())
            .await?;

        Ok(result.rows_affected())
    }
}
