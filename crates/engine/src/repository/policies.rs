use super::AuthzRepository;
use crate::dto::{CreatePolicyRequest, UpdatePolicyRequest};
use crate::models::{PermissionPolicy, PolicyAssignment};
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

impl AuthzRepository {
    pub async fn get_policy_by_id(&self, policy_id: Uuid) -> Result<Option<PermissionPolicy>> {
        let policy = sqlx::query_as::<_, PermissionPolicy>(
            "SELECT * FROM permission_policies WHERE id = $1",
        )
        .bind(policy_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(policy)
    }

    pub async fn list_policies(&self, limit: i64, offset: i64) -> Result<Vec<PermissionPolicy>> {
        let policies = sqlx::query_as::<_, PermissionPolicy>(
            "SELECT * FROM permission_policies ORDER BY priority, name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.get())
        .await?;

        Ok(policies)
    }

    pub async fn create_policy(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &CreatePolicyRequest,
    ) -> Result<PermissionPolicy> {
        let policy = sqlx::query_as::<_, PermissionPolicy>(
            "INSERT INTO permission_policies
             (id, code, name, description, policy_type, rules, priority,
              is_active, grant_permissions, deny_permissions, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8, $9, NOW(), NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&request.code)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.policy_type)
        .bind(&request.rules)
        .bind(request.priority)
        .bind(request.grant_permissions.as_ref().map(|c| serde_json::json!(c)))
        .bind(request.deny_permissions.as_ref().map(|c| serde_json::json!(c)))
        .fetch_one(&mut **tx)
        .await?;

        Ok(policy)
    }

    pub async fn update_policy(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        policy_id: Uuid,
        request: &UpdatePolicyRequest,
    ) -> Result<PermissionPolicy> {
        let policy = sqlx::query_as::<_, PermissionPolicy>(
            "UPDATE permission_policies SET
               name = COALESCE($2, name),
               description = COALESCE($3, description),
               rules = COALESCE($4, rules),
               priority = COALESCE($5, priority),
               is_active = COALESCE($6, is_active),
               grant_permissions = COALESCE($7, grant_permissions),
               deny_permissions = COALESCE($8, deny_permissions),
               updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(policy_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.rules)
        .bind(request.priority)
        .bind(request.is_active)
        .bind(request.grant_permissions.as_ref().map(|c| serde_json::json!(c)))
        .bind(request.deny_permissions.as_ref().map(|c| serde_json::json!(c)))
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::PolicyNotFound, "Policy not found"))?;

        Ok(policy)
    }

    pub async fn delete_policy(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        policy_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query("DELETE FROM permission_policies WHERE id = $1")
            .bind(policy_id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::new(ErrorCode::PolicyNotFound, "Policy not found"));
        }

        Ok(())
    }

    // Assignments

    pub async fn insert_policy_assignment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        policy_id: Uuid,
        principal_type: &str,
        principal_id: Uuid,
        conditions: Option<&serde_json::Value>,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        assigned_by: Option<Uuid>,
    ) -> Result<PolicyAssignment> {
        let assignment = sqlx::query_as::<_, PolicyAssignment>(
            "INSERT INTO policy_assignments
             (id, policy_id, principal_type, principal_id, conditions,
              valid_from, valid_until, assigned_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
             ON CONFLICT (policy_id, principal_type, principal_id)
             DO UPDATE SET conditions = $5, valid_from = $6, valid_until = $7,
                           assigned_by = $8
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(policy_id)
        .bind(principal_type)
        .bind(principal_id)
        .bind(conditions)
        .bind(valid_from)
        .bind(valid_until)
        .bind(assigned_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(assignment)
    }

    pub async fn delete_policy_assignment(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        policy_id: Uuid,
        principal_type: &str,
        principal_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM policy_assignments
             WHERE policy_id = $1 AND principal_type = $2 AND principal_id = $3",
        )
        .bind(policy_id)
        .bind(principal_type)
        .bind(principal_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::new(
                ErrorCode::PolicyNotFound,
                "Policy assignment not found",
            ));
        }

        Ok(())
    }

    /// Users a policy reaches directly or through a role (for invalidation).
    pub async fn get_users_affected_by_policy(&self, policy_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT principal_id FROM policy_assignments
             WHERE policy_id = $1 AND principal_type = 'USER'
             UNION
             SELECT DISTINCT ur.user_profile_id FROM user_roles ur
             INNER JOIN policy_assignments pa ON pa.principal_id = ur.role_id
             WHERE pa.policy_id = $1 AND pa.principal_type = 'ROLE'
               AND ur.is_active = true",
        )
        .bind(policy_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    /// Active policies applicable to a user through any principal kind
    /// (user, held roles, department, position), sorted by priority
    /// (lower value first).
    pub async fn get_applicable_policies(
        &self,
        user_profile_id: Uuid,
        role_ids: &[Uuid],
        department_id: Option<Uuid>,
        position_id: Option<Uuid>,
    ) -> Result<Vec<PermissionPolicy>> {
        let policies = sqlx::query_as::<_, PermissionPolicy>(
            "SELECT DISTINCT p.* FROM permission_policies p
             INNER JOIN policy_assignments pa ON pa.policy_id = p.id
             WHERE p.is_active = true
               AND (pa.valid_from IS NULL OR pa.valid_from <= NOW())
               AND (pa.valid_until IS NULL OR pa.valid_until > NOW())
               AND (
                 (pa.principal_type = 'USER' AND pa.principal_id = $1)
                 OR (pa.principal_type = 'ROLE' AND pa.principal_id = ANY($2))
                 OR (pa.principal_type = 'DEPARTMENT' AND pa.principal_id = $3)
                 OR (pa.principal_type = 'POSITION' AND pa.principal_id = $4)
               )
             ORDER BY p.priority",
        )
        .bind(user_profile_id)
        .bind(role_ids)
        .bind(department_id)
        .bind(position_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(policies)
    }

    /// Drop assignments whose validity window has closed.
    pub async fn delete_expired_policy_assignments(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM policy_assignments
             WHERE valid_until IS NOT NULL AND valid_until < $1",
        )
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}
