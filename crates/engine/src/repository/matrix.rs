use super::AuthzRepository;
use crate::models::PermissionMatrixEntry;
use authz_core::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Input to a matrix upsert.
#[derive(Debug, Clone)]
pub struct MatrixRow {
    pub user_profile_id: Uuid,
    pub permission_key: String,
    pub is_allowed: bool,
    pub granted_by: Vec<String>,
    pub priority: i32,
    pub expires_at: DateTime<Utc>,
}

impl AuthzRepository {
    pub async fn get_matrix_entry(
        &self,
        user_profile_id: Uuid,
        permission_key: &str,
    ) -> Result<Option<PermissionMatrixEntry>> {
        let entry = sqlx::query_as::<_, PermissionMatrixEntry>(
            "SELECT * FROM permission_matrix
             WHERE user_profile_id = $1 AND permission_key = $2
               AND expires_at > NOW()",
        )
        .bind(user_profile_id)
        .bind(permission_key)
        .fetch_optional(self.db.get())
        .await?;

        Ok(entry)
    }

    /// Atomic upsert on `(user_profile_id, permission_key)`, keeping the
    /// higher priority when both layers contribute the same key.
    pub async fn upsert_matrix_entry(&self, row: &MatrixRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO permission_matrix
             (id, user_profile_id, permission_key, is_allowed, granted_by,
              priority, expires_at, computed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
             ON CONFLICT (user_profile_id, permission_key)
             DO UPDATE SET is_allowed = $4,
                           granted_by = $5,
                           priority = GREATEST(permission_matrix.priority, $6),
                           expires_at = $7,
                           computed_at = NOW()",
        )
        .bind(Uuid::new_v4())
        .bind(row.user_profile_id)
        .bind(&row.permission_key)
        .bind(row.is_allowed)
        .bind(serde_json::json!(row.granted_by))
        .bind(row.priority)
        .bind(row.expires_at)
        .execute(self.db.get())
        .await?;

        Ok(())
    }

    pub async fn delete_matrix_rows_for_user(&self, user_profile_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM permission_matrix WHERE user_profile_id = $1")
            .bind(user_profile_id)
            .execute(self.db.get())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn delete_expired_matrix_rows(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM permission_matrix WHERE expires_at < $1")
            .bind(now)
            .execute(self.db.get())
            .await?;

        Ok(result.rows_affected())
    }
}
