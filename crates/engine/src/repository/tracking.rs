use super::AuthzRepository;
use crate::models::{ActiveUserTracking, PermissionCheckLog, PermissionTemplate, TemplateApplication};
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

impl AuthzRepository {
    // Active-user tracking

    /// Bump the rolling check counter, restarting the window when it has
    /// lapsed and flipping `is_high_priority` above the threshold.
    pub async fn record_user_activity(
        &self,
        user_profile_id: Uuid,
        window: chrono::Duration,
        high_priority_threshold: i64,
    ) -> Result<()> {
        let window_start_cutoff = Utc::now() - window;

        sqlx::query(
            "INSERT INTO active_user_tracking
             (user_profile_id, check_count, window_started_at, last_check_at, is_high_priority)
             VALUES ($1, 1, NOW(), NOW(), false)
             ON CONFLICT (user_profile_id)
             DO UPDATE SET
               check_count = CASE
                 WHEN active_user_tracking.window_started_at < $2 THEN 1
                 ELSE active_user_tracking.check_count + 1
               END,
               window_started_at = CASE
                 WHEN active_user_tracking.window_started_at < $2 THEN NOW()
                 ELSE active_user_tracking.window_started_at
               END,
               last_check_at = NOW(),
               is_high_priority = CASE
                 WHEN active_user_tracking.window_started_at < $2 THEN false
                 ELSE active_user_tracking.check_count + 1 >= $3
               END",
        )
        .bind(user_profile_id)
        .bind(window_start_cutoff)
        .bind(high_priority_threshold)
        .execute(self.db.get())
        .await?;

        Ok(())
    }

    /// High-priority users checked within the last day, most active first.
    pub async fn get_high_priority_users(&self, limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_profile_id FROM active_user_tracking
             WHERE is_high_priority = true AND last_check_at > NOW() - INTERVAL '24 hours'
             ORDER BY check_count DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    /// Regular users active in the last 48 hours with more than 10 checks.
    pub async fn get_regular_active_users(&self, limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_profile_id FROM active_user_tracking
             WHERE is_high_priority = false
               AND last_check_at > NOW() - INTERVAL '48 hours'
               AND check_count > 10
             ORDER BY check_count DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    pub async fn get_user_tracking(
        &self,
        user_profile_id: Uuid,
    ) -> Result<Option<ActiveUserTracking>> {
        let tracking = sqlx::query_as::<_, ActiveUserTracking>(
            "SELECT * FROM active_user_tracking WHERE user_profile_id = $1",
        )
        .bind(user_profile_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(tracking)
    }

    /// Reset counters for users without recent activity (daily job).
    pub async fn reset_inactive_trackers(&self, inactive_for: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - inactive_for;

        let result = sqlx::query(
            "UPDATE active_user_tracking SET
               check_count = 0, is_high_priority = false, window_started_at = NOW()
             WHERE last_check_at < $1",
        )
        .bind(cutoff)
        .execute(self.db.get())
        .await?;

        Ok(result.rows_affected())
    }

    // Check log

    pub async fn insert_check_log(&self, log: &PermissionCheckLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO permission_check_logs
             (id, user_profile_id, resource, action, scope, resource_id,
              is_allowed, denied_reason, duration_ms, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(log.id)
        .bind(log.user_profile_id)
        .bind(&log.resource)
        .bind(&log.action)
        .bind(&log.scope)
        .bind(&log.resource_id)
        .bind(log.is_allowed)
        .bind(&log.denied_reason)
        .bind(log.duration_ms)
        .bind(&log.metadata)
        .bind(log.created_at)
        .execute(self.db.get())
        .await?;

        Ok(())
    }

    pub async fn delete_check_logs_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM permission_check_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.db.get())
            .await?;

        Ok(result.rows_affected())
    }

    // Templates

    pub async fn get_template_by_id(
        &self,
        template_id: Uuid,
    ) -> Result<Option<PermissionTemplate>> {
        let template = sqlx::query_as::<_, PermissionTemplate>(
            "SELECT * FROM permission_templates WHERE id = $1",
        )
        .bind(template_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(template)
    }

    pub async fn get_template_by_code(&self, code: &str) -> Result<Option<PermissionTemplate>> {
        let template = sqlx::query_as::<_, PermissionTemplate>(
            "SELECT * FROM permission_templates WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(self.db.get())
        .await?;

        Ok(template)
    }

    pub async fn list_templates(&self, limit: i64, offset: i64) -> Result<Vec<PermissionTemplate>> {
        let templates = sqlx::query_as::<_, PermissionTemplate>(
            "SELECT * FROM permission_templates ORDER BY name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.get())
        .await?;

        Ok(templates)
    }

    pub async fn insert_template(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        code: &str,
        name: &str,
        description: Option<&str>,
        permission_codes: &[String],
    ) -> Result<PermissionTemplate> {
        let template = sqlx::query_as::<_, PermissionTemplate>(
            "INSERT INTO permission_templates
             (id, code, name, description, permissions, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, true, NOW(), NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(serde_json::json!(permission_codes))
        .fetch_one(&mut **tx)
        .await?;

        Ok(template)
    }

    pub async fn insert_template_application(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        template_id: Uuid,
        user_profile_id: Uuid,
        applied_by: Option<Uuid>,
    ) -> Result<TemplateApplication> {
        let application = sqlx::query_as::<_, TemplateApplication>(
            "INSERT INTO template_applications
             (id, template_id, user_profile_id, is_active, applied_by, created_at)
             VALUES ($1, $2, $3, true, $4, NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(template_id)
        .bind(user_profile_id)
        .bind(applied_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(application)
    }

    pub async fn set_template_application_active(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        application_id: Uuid,
        is_active: bool,
    ) -> Result<TemplateApplication> {
        let application = sqlx::query_as::<_, TemplateApplication>(
            "UPDATE template_applications SET is_active = $2 WHERE id = $1 RETURNING *",
        )
        .bind(application_id)
        .bind(is_active)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| {
            Error::new(
                ErrorCode::PermissionNotFound,
                "Template application not found",
            )
        })?;

        Ok(application)
    }
}
