use super::AuthzRepository;
use crate::models::PermissionChangeHistory;
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

impl AuthzRepository {
    /// Append one change-history entry inside the mutation's transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn append_history(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entity_type: &str,
        entity_id: Uuid,
        operation: &str,
        previous_state: Option<&serde_json::Value>,
        new_state: Option<&serde_json::Value>,
        performed_by: Option<Uuid>,
        metadata: Option<&serde_json::Value>,
        is_rollbackable: bool,
    ) -> Result<PermissionChangeHistory> {
        let entry = sqlx::query_as::<_, PermissionChangeHistory>(
            "INSERT INTO permission_change_history
             (id, entity_type, entity_id, operation, previous_state, new_state,
              performed_by, performed_at, metadata, is_rollbackable)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8, $9)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(entity_type)
        .bind(entity_id)
        .bind(operation)
        .bind(previous_state)
        .bind(new_state)
        .bind(performed_by)
        .bind(metadata)
        .bind(is_rollbackable)
        .fetch_one(&mut **tx)
        .await?;

        Ok(entry)
    }

    /// Append the rollback entry and mark the original as rolled back.
    pub async fn append_rollback_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        original: &PermissionChangeHistory,
        performed_by: Option<Uuid>,
    ) -> Result<PermissionChangeHistory> {
        let entry = sqlx::query_as::<_, PermissionChangeHistory>(
            "INSERT INTO permission_change_history
             (id, entity_type, entity_id, operation, previous_state, new_state,
              performed_by, performed_at, rollback_of, is_rollbackable)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), $8, false)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&original.entity_type)
        .bind(original.entity_id)
        .bind(format!("rollback_{}", original.operation))
        .bind(&original.new_state)
        .bind(&original.previous_state)
        .bind(performed_by)
        .bind(original.id)
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query(
            "UPDATE permission_change_history SET rolled_back_at = NOW() WHERE id = $1",
        )
        .bind(original.id)
        .execute(&mut **tx)
        .await?;

        Ok(entry)
    }

    pub async fn get_history_entry(
        &self,
        change_id: Uuid,
    ) -> Result<Option<PermissionChangeHistory>> {
        let entry = sqlx::query_as::<_, PermissionChangeHistory>(
            "SELECT * FROM permission_change_history WHERE id = $1",
        )
        .bind(change_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(entry)
    }

    /// Lock the entry row for the rollback transaction.
    pub async fn get_history_entry_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        change_id: Uuid,
    ) -> Result<PermissionChangeHistory> {
        let entry = sqlx::query_as::<_, PermissionChangeHistory>(
            "SELECT * FROM permission_change_history WHERE id = $1 FOR UPDATE",
        )
        .bind(change_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::RollbackNotPossible, "Change entry not found"))?;

        Ok(entry)
    }

    pub async fn list_history_for_entity(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PermissionChangeHistory>> {
        let entries = sqlx::query_as::<_, PermissionChangeHistory>(
            "SELECT * FROM permission_change_history
             WHERE entity_type = $1 AND entity_id = $2
             ORDER BY performed_at DESC LIMIT $3",
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(self.db.get())
        .await?;

        Ok(entries)
    }

    pub async fn delete_history_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM permission_change_history WHERE performed_at < $1")
                .bind(cutoff)
                .execute(self.db.get())
                .await?;

        Ok(result.rows_affected())
    }
}
