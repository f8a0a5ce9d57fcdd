use super::AuthzRepository;
use crate::models::{Permission, ResourcePermission, UserPermission, UserProfile};
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

impl AuthzRepository {
    pub async fn get_user_profile(&self, user_profile_id: Uuid) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT id, is_superadmin, is_active, department_id, position_id
             FROM user_profiles WHERE id = $1",
        )
        .bind(user_profile_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(profile)
    }

    /// The direct grant row for `(user, permission)`, regardless of state.
    pub async fn get_user_permission(
        &self,
        user_profile_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Option<UserPermission>> {
        let row = sqlx::query_as::<_, UserPermission>(
            "SELECT * FROM user_permissions
             WHERE user_profile_id = $1 AND permission_id = $2",
        )
        .bind(user_profile_id)
        .bind(permission_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(row)
    }

    /// Direct grants for a permission ordered by the direct-layer tie-break:
    /// highest priority first, newer row first on ties.
    pub async fn get_effective_user_permissions(
        &self,
        user_profile_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Vec<UserPermission>> {
        let rows = sqlx::query_as::<_, UserPermission>(
            "SELECT * FROM user_permissions
             WHERE user_profile_id = $1 AND permission_id = $2
               AND (valid_from IS NULL OR valid_from <= NOW())
               AND (valid_until IS NULL OR valid_until > NOW())
             ORDER BY priority DESC, created_at DESC",
        )
        .bind(user_profile_id)
        .bind(permission_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_user_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_profile_id: Uuid,
        permission_id: Uuid,
        conditions: Option<&serde_json::Value>,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        priority: i32,
        is_temporary: bool,
        grant_reason: Option<&str>,
        granted_by: Option<Uuid>,
    ) -> Result<UserPermission> {
        let row = sqlx::query_as::<_, UserPermission>(
            "INSERT INTO user_permissions
             (id, user_profile_id, permission_id, is_granted, conditions,
              valid_from, valid_until, priority, is_temporary, grant_reason,
              granted_by, created_at, updated_at)
             VALUES ($1, $2, $3, true, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_profile_id)
        .bind(permission_id)
        .bind(conditions)
        .bind(valid_from)
        .bind(valid_until)
        .bind(priority)
        .bind(is_temporary)
        .bind(grant_reason)
        .bind(granted_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Reactivate a previously revoked grant row in place.
    #[allow(clippy::too_many_arguments)]
    pub async fn reactivate_user_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row_id: Uuid,
        conditions: Option<&serde_json::Value>,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        priority: i32,
        is_temporary: bool,
        grant_reason: Option<&str>,
        granted_by: Option<Uuid>,
    ) -> Result<UserPermission> {
        let row = sqlx::query_as::<_, UserPermission>(
            "UPDATE user_permissions SET
               is_granted = true, conditions = $2, valid_from = $3,
               valid_until = $4, priority = $5, is_temporary = $6,
               grant_reason = $7, granted_by = $8, revoke_reason = NULL,
               updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(row_id)
        .bind(conditions)
        .bind(valid_from)
        .bind(valid_until)
        .bind(priority)
        .bind(is_temporary)
        .bind(grant_reason)
        .bind(granted_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Flip an active grant to revoked, keeping the row for history.
    pub async fn revoke_user_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_profile_id: Uuid,
        permission_id: Uuid,
        revoke_reason: &str,
    ) -> Result<UserPermission> {
        let row = sqlx::query_as::<_, UserPermission>(
            "UPDATE user_permissions SET
               is_granted = false, revoke_reason = $3, updated_at = NOW()
             WHERE user_profile_id = $1 AND permission_id = $2 AND is_granted = true
             RETURNING *",
        )
        .bind(user_profile_id)
        .bind(permission_id)
        .bind(revoke_reason)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| {
            Error::new(
                ErrorCode::PermissionNotFound,
                "No active grant to revoke for this user and permission",
            )
        })?;

        Ok(row)
    }

    pub async fn delete_user_permission_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        row_id: Uuid,
    ) -> Result<()> {
        sqlx::query("DELETE FROM user_permissions WHERE id = $1")
            .bind(row_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Restore a user-permission row from a serialized previous state
    /// (rollback of revoke/update).
    pub async fn restore_user_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        state: &UserPermission,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_permissions
             (id, user_profile_id, permission_id, is_granted, conditions,
              valid_from, valid_until, priority, is_temporary, grant_reason,
              granted_by, revoke_reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
             ON CONFLICT (user_profile_id, permission_id)
             DO UPDATE SET is_granted = $4, conditions = $5, valid_from = $6,
                           valid_until = $7, priority = $8, is_temporary = $9,
                           grant_reason = $10, granted_by = $11,
                           revoke_reason = $12, updated_at = NOW()",
        )
        .bind(state.id)
        .bind(state.user_profile_id)
        .bind(state.permission_id)
        .bind(state.is_granted)
        .bind(&state.conditions)
        .bind(state.valid_from)
        .bind(state.valid_until)
        .bind(state.priority)
        .bind(state.is_temporary)
        .bind(&state.grant_reason)
        .bind(state.granted_by)
        .bind(&state.revoke_reason)
        .bind(state.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // Resource-scoped grants

    /// Active, granted resource permission for one object instance.
    pub async fn get_active_resource_permission(
        &self,
        user_profile_id: Uuid,
        permission_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<ResourcePermission>> {
        let row = sqlx::query_as::<_, ResourcePermission>(
            "SELECT * FROM resource_permissions
             WHERE user_profile_id = $1 AND permission_id = $2
               AND resource_type = $3 AND resource_id = $4
               AND is_granted = true
               AND (valid_from IS NULL OR valid_from <= NOW())
               AND (valid_until IS NULL OR valid_until > NOW())",
        )
        .bind(user_profile_id)
        .bind(permission_id)
        .bind(resource_type)
        .bind(resource_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(row)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_resource_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_profile_id: Uuid,
        permission_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        conditions: Option<&serde_json::Value>,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        grant_reason: Option<&str>,
        granted_by: Option<Uuid>,
    ) -> Result<ResourcePermission> {
        let row = sqlx::query_as::<_, ResourcePermission>(
            "INSERT INTO resource_permissions
             (id, user_profile_id, permission_id, resource_type, resource_id,
              is_granted, conditions, valid_from, valid_until, grant_reason,
              granted_by, created_at)
             VALUES ($1, $2, $3, $4, $5, true, $6, $7, $8, $9, $10, NOW())
             ON CONFLICT (user_profile_id, permission_id, resource_type, resource_id)
             DO UPDATE SET is_granted = true, conditions = $6, valid_from = $7,
                           valid_until = $8, grant_reason = $9, granted_by = $10
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_profile_id)
        .bind(permission_id)
        .bind(resource_type)
        .bind(resource_id)
        .bind(conditions)
        .bind(valid_from)
        .bind(valid_until)
        .bind(grant_reason)
        .bind(granted_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    pub async fn revoke_resource_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_profile_id: Uuid,
        permission_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<ResourcePermission> {
        let row = sqlx::query_as::<_, ResourcePermission>(
            "UPDATE resource_permissions SET is_granted = false
             WHERE user_profile_id = $1 AND permission_id = $2
               AND resource_type = $3 AND resource_id = $4 AND is_granted = true
             RETURNING *",
        )
        .bind(user_profile_id)
        .bind(permission_id)
        .bind(resource_type)
        .bind(resource_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| {
            Error::new(
                ErrorCode::PermissionNotFound,
                "No active resource grant for this instance",
            )
        })?;

        Ok(row)
    }

    // Effective-permission aggregation

    /// All permission codes a user currently holds through direct grants
    /// and role-derived grants. Used for delegation validation and warm-up.
    pub async fn get_effective_permission_codes(
        &self,
        user_profile_id: Uuid,
    ) -> Result<Vec<String>> {
        let user_roles = self.get_active_user_roles(user_profile_id).await?;
        let role_ids: Vec<Uuid> = user_roles.iter().map(|ur| ur.role_id).collect();
        let expanded = self.expand_inherited_roles(&role_ids).await?;

        let codes = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT p.code FROM permissions p
             WHERE p.is_active = true AND (
               EXISTS (
                 SELECT 1 FROM user_permissions up
                 WHERE up.permission_id = p.id
                   AND up.user_profile_id = $1 AND up.is_granted = true
                   AND (up.valid_from IS NULL OR up.valid_from <= NOW())
                   AND (up.valid_until IS NULL OR up.valid_until > NOW())
               )
               OR EXISTS (
                 SELECT 1 FROM role_permissions rp
                 WHERE rp.permission_id = p.id
                   AND rp.role_id = ANY($2) AND rp.is_granted = true
                   AND (rp.valid_from IS NULL OR rp.valid_from <= NOW())
                   AND (rp.valid_until IS NULL OR rp.valid_until > NOW())
               )
             )",
        )
        .bind(user_profile_id)
        .bind(&expanded)
        .fetch_all(self.db.get())
        .await?;

        Ok(codes)
    }

    /// Effective permissions with their grant sources, used by the matrix
    /// recompute and warm-up batches. Returns (permission, source, priority)
    /// where source is `direct` or the role name.
    pub async fn get_effective_permissions_detailed(
        &self,
        user_profile_id: Uuid,
    ) -> Result<Vec<(Permission, String, i32)>> {
        let mut out: Vec<(Permission, String, i32)> = Vec::new();

        let direct = sqlx::query_as::<_, Permission>(
            "SELECT p.* FROM permissions p
             INNER JOIN user_permissions up ON up.permission_id = p.id
             WHERE up.user_profile_id = $1 AND up.is_granted = true
               AND p.is_active = true
               AND (up.valid_from IS NULL OR up.valid_from <= NOW())
               AND (up.valid_until IS NULL OR up.valid_until > NOW())",
        )
        .bind(user_profile_id)
        .fetch_all(self.db.get())
        .await?;

        for permission in direct {
            out.push((permission, "direct".to_string(), crate::models::MATRIX_PRIORITY_DIRECT));
        }

        let user_roles = self.get_active_user_roles(user_profile_id).await?;
        let role_ids: Vec<Uuid> = user_roles.iter().map(|ur| ur.role_id).collect();
        let expanded = self.expand_inherited_roles(&role_ids).await?;

        if !expanded.is_empty() {
            let rows = sqlx::query_as::<_, Permission>(
                "SELECT DISTINCT p.* FROM permissions p
                 INNER JOIN role_permissions rp ON rp.permission_id = p.id
                 WHERE rp.role_id = ANY($1) AND rp.is_granted = true
                   AND p.is_active = true
                   AND (rp.valid_from IS NULL OR rp.valid_from <= NOW())
                   AND (rp.valid_until IS NULL OR rp.valid_until > NOW())",
            )
            .bind(&expanded)
            .fetch_all(self.db.get())
            .await?;

            for permission in rows {
                out.push((permission, "role".to_string(), crate::models::MATRIX_PRIORITY_ROLE));
            }
        }

        Ok(out)
    }

    /// Users affected by a permission mutation: direct holders plus holders
    /// of any role carrying the permission.
    pub async fn get_users_affected_by_permission(
        &self,
        permission_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT user_profile_id FROM user_permissions
             WHERE permission_id = $1
             UNION
             SELECT DISTINCT ur.user_profile_id FROM user_roles ur
             INNER JOIN role_permissions rp ON rp.role_id = ur.role_id
             WHERE rp.permission_id = $1 AND ur.is_active = true",
        )
        .bind(permission_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    /// Roles carrying a permission (for role-cache invalidation).
    pub async fn get_roles_with_permission(&self, permission_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT role_id FROM role_permissions WHERE permission_id = $1",
        )
        .bind(permission_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    // Nightly sweep

    /// Flip expired direct grants to revoked. Returns affected user ids.
    pub async fn expire_user_permissions(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE user_permissions SET
               is_granted = false, revoke_reason = 'expired', updated_at = NOW()
             WHERE is_granted = true AND valid_until IS NOT NULL AND valid_until < $1
             RETURNING user_profile_id",
        )
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;

        Ok(ids)
    }

    /// Deactivate expired role assignments. Returns affected user ids.
    pub async fn expire_user_roles(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE user_roles SET is_active = false
             WHERE is_active = true AND valid_until IS NOT NULL AND valid_until < $1
             RETURNING user_profile_id",
        )
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;

        Ok(ids)
    }

    /// Temporary grants expiring within the window, for the daily notice.
    pub async fn get_expiring_temporary_grants(
        &self,
        within: chrono::Duration,
    ) -> Result<Vec<(Uuid, String, DateTime<Utc>)>> {
        let cutoff = Utc::now() + within;

        let rows: Vec<(Uuid, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT up.user_profile_id, p.code, up.valid_until
             FROM user_permissions up
             INNER JOIN permissions p ON p.id = up.permission_id
             WHERE up.is_granted = true AND up.is_temporary = true
               AND up.valid_until IS NOT NULL
               AND up.valid_until > NOW()
               AND up.valid_until < $1
             ORDER BY up.user_profile_id, up.valid_until",
        )
        .bind(cutoff)
        .fetch_all(self.db.get())
        .await?;

        Ok(rows)
    }
}
