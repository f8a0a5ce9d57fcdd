use super::AuthzRepository;
use crate::dto::{CreateRoleRequest, UpdateRoleRequest};
use crate::models::{Role, RolePermission, UserRole};
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

impl AuthzRepository {
    pub async fn get_role_by_id(&self, role_id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(self.db.get())
            .await?;

        Ok(role)
    }

    pub async fn get_role_by_code(&self, code: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE code = $1")
            .bind(code)
            .fetch_optional(self.db.get())
            .await?;

        Ok(role)
    }

    pub async fn list_roles(&self, limit: i64, offset: i64) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles ORDER BY hierarchy_level, name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.get())
        .await?;

        Ok(roles)
    }

    pub async fn create_role(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &CreateRoleRequest,
    ) -> Result<Role> {
        let role = sqlx::query_as::<_, Role>(
            "INSERT INTO roles
             (id, code, name, description, hierarchy_level, is_system_role,
              is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, true, NOW(), NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&request.code)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.hierarchy_level)
        .bind(request.is_system_role)
        .fetch_one(&mut **tx)
        .await?;

        Ok(role)
    }

    pub async fn update_role(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        role_id: Uuid,
        request: &UpdateRoleRequest,
    ) -> Result<Role> {
        let role = sqlx::query_as::<_, Role>(
            "UPDATE roles SET
               name = COALESCE($2, name),
               description = COALESCE($3, description),
               hierarchy_level = COALESCE($4, hierarchy_level),
               is_active = COALESCE($5, is_active),
               updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(role_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.hierarchy_level)
        .bind(request.is_active)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::RoleNotFound, "Role not found"))?;

        Ok(role)
    }

    pub async fn delete_role(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        role_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::new(ErrorCode::RoleNotFound, "Role not found"));
        }

        Ok(())
    }

    pub async fn count_active_role_holders(&self, role_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_roles WHERE role_id = $1 AND is_active = true",
        )
        .bind(role_id)
        .fetch_one(self.db.get())
        .await?;

        Ok(count)
    }

    // Hierarchy edges

    pub async fn set_parent_role(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        role_id: Uuid,
        parent_role_id: Uuid,
        inherit_permissions: bool,
    ) -> Result<()> {
        self.check_hierarchy_cycle(tx, role_id, parent_role_id)
            .await?;

        sqlx::query(
            "INSERT INTO role_hierarchy (role_id, parent_role_id, inherit_permissions)
             VALUES ($1, $2, $3)
             ON CONFLICT (role_id, parent_role_id)
             DO UPDATE SET inherit_permissions = $3",
        )
        .bind(role_id)
        .bind(parent_role_id)
        .bind(inherit_permissions)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// BFS from the candidate parent upward; adding the edge must not make
    /// `role_id` its own ancestor.
    async fn check_hierarchy_cycle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        role_id: Uuid,
        parent_role_id: Uuid,
    ) -> Result<()> {
        if role_id == parent_role_id {
            return Err(Error::new(
                ErrorCode::RoleHierarchyCycle,
                "A role cannot be its own parent",
            ));
        }

        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::from([parent_role_id]);

        while let Some(current) = queue.pop_front() {
            if current == role_id {
                return Err(Error::new(
                    ErrorCode::RoleHierarchyCycle,
                    "Role hierarchy would form a cycle",
                ));
            }
            if !visited.insert(current) {
                continue;
            }

            let parents = sqlx::query_scalar::<_, Uuid>(
                "SELECT parent_role_id FROM role_hierarchy WHERE role_id = $1",
            )
            .bind(current)
            .fetch_all(&mut **tx)
            .await?;

            queue.extend(parents);
        }

        Ok(())
    }

    /// Expand a set of roles to include every transitively inherited parent
    /// reachable over `inherit_permissions = true` edges.
    pub async fn expand_inherited_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut visited: HashSet<Uuid> = role_ids.iter().copied().collect();
        let mut queue: VecDeque<Uuid> = role_ids.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            let parents = sqlx::query_scalar::<_, Uuid>(
                "SELECT parent_role_id FROM role_hierarchy
                 WHERE role_id = $1 AND inherit_permissions = true",
            )
            .bind(current)
            .fetch_all(self.db.get())
            .await?;

            for parent in parents {
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }

        Ok(visited.into_iter().collect())
    }

    // Role-permission edges

    pub async fn get_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<Option<RolePermission>> {
        let edge = sqlx::query_as::<_, RolePermission>(
            "SELECT * FROM role_permissions WHERE role_id = $1 AND permission_id = $2",
        )
        .bind(role_id)
        .bind(permission_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(edge)
    }

    pub async fn list_role_permissions(&self, role_id: Uuid) -> Result<Vec<RolePermission>> {
        let edges = sqlx::query_as::<_, RolePermission>(
            "SELECT * FROM role_permissions WHERE role_id = $1",
        )
        .bind(role_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(edges)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_role_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        role_id: Uuid,
        permission_id: Uuid,
        is_granted: bool,
        conditions: Option<&serde_json::Value>,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        grant_reason: Option<&str>,
        granted_by: Option<Uuid>,
    ) -> Result<RolePermission> {
        let edge = sqlx::query_as::<_, RolePermission>(
            "INSERT INTO role_permissions
             (id, role_id, permission_id, is_granted, conditions, valid_from,
              valid_until, grant_reason, granted_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
             ON CONFLICT (role_id, permission_id)
             DO UPDATE SET is_granted = $4, conditions = $5, valid_from = $6,
                           valid_until = $7, grant_reason = $8, granted_by = $9
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(role_id)
        .bind(permission_id)
        .bind(is_granted)
        .bind(conditions)
        .bind(valid_from)
        .bind(valid_until)
        .bind(grant_reason)
        .bind(granted_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(edge)
    }

    pub async fn delete_role_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::new(
                ErrorCode::PermissionNotFound,
                "Role permission edge not found",
            ));
        }

        Ok(())
    }

    // User-role assignments

    pub async fn get_active_user_roles(&self, user_profile_id: Uuid) -> Result<Vec<UserRole>> {
        let rows = sqlx::query_as::<_, UserRole>(
            "SELECT * FROM user_roles
             WHERE user_profile_id = $1 AND is_active = true
               AND (valid_from IS NULL OR valid_from <= NOW())
               AND (valid_until IS NULL OR valid_until > NOW())",
        )
        .bind(user_profile_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(rows)
    }

    pub async fn assign_role_to_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_profile_id: Uuid,
        role_id: Uuid,
        valid_from: Option<DateTime<Utc>>,
        valid_until: Option<DateTime<Utc>>,
        assigned_by: Option<Uuid>,
    ) -> Result<UserRole> {
        let row = sqlx::query_as::<_, UserRole>(
            "INSERT INTO user_roles
             (id, user_profile_id, role_id, is_active, valid_from, valid_until,
              assigned_by, created_at)
             VALUES ($1, $2, $3, true, $4, $5, $6, NOW())
             ON CONFLICT (user_profile_id, role_id)
             DO UPDATE SET is_active = true, valid_from = $4, valid_until = $5,
                           assigned_by = $6
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_profile_id)
        .bind(role_id)
        .bind(valid_from)
        .bind(valid_until)
        .bind(assigned_by)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    pub async fn deactivate_user_role(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_profile_id: Uuid,
        role_id: Uuid,
    ) -> Result<UserRole> {
        let row = sqlx::query_as::<_, UserRole>(
            "UPDATE user_roles SET is_active = false
             WHERE user_profile_id = $1 AND role_id = $2 AND is_active = true
             RETURNING *",
        )
        .bind(user_profile_id)
        .bind(role_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::RoleNotFound, "User role assignment not found"))?;

        Ok(row)
    }

    /// Users currently holding a role (for invalidation fan-out).
    pub async fn get_role_holder_ids(&self, role_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT user_profile_id FROM user_roles
             WHERE role_id = $1 AND is_active = true",
        )
        .bind(role_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    /// Active role-permission grants for a permission across a role set,
    /// joined with role names for `granted_by` attribution. Explicit deny
    /// edges are included so the caller can weigh them.
    pub async fn get_role_grants_for_permission(
        &self,
        role_ids: &[Uuid],
        permission_id: Uuid,
    ) -> Result<Vec<(RolePermission, String)>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, RolePermission>(
            "SELECT rp.* FROM role_permissions rp
             INNER JOIN roles r ON r.id = rp.role_id
             WHERE rp.role_id = ANY($1) AND rp.permission_id = $2
               AND r.is_active = true
               AND (rp.valid_from IS NULL OR rp.valid_from <= NOW())
               AND (rp.valid_until IS NULL OR rp.valid_until > NOW())",
        )
        .bind(role_ids)
        .bind(permission_id)
        .fetch_all(self.db.get())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for edge in rows {
            let name = sqlx::query_scalar::<_, String>("SELECT name FROM roles WHERE id = $1")
                .bind(edge.role_id)
                .fetch_one(self.db.get())
                .await?;
            out.push((edge, name));
        }

        Ok(out)
    }
}
