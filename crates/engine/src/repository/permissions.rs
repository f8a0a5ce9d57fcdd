use super::AuthzRepository;
use crate::conditions::sanitize_search_input;
use crate::dto::{CreatePermissionRequest, PermissionListQuery, UpdatePermissionRequest};
use crate::models::Permission;
use authz_core::{Error, ErrorCode, Result};
use sqlx::{Postgres, Transaction};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

impl AuthzRepository {
    pub async fn get_permission_by_id(&self, permission_id: Uuid) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE id = $1",
        )
        .bind(permission_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(permission)
    }

    pub async fn get_permission_by_code(&self, code: &str) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(self.db.get())
        .await?;

        Ok(permission)
    }

    /// Find the active permission addressed by `(resource, action, scope)`.
    pub async fn find_permission_by_triple(
        &self,
        resource: &str,
        action: &str,
        scope: Option<&str>,
    ) -> Result<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions
             WHERE resource = $1 AND action = $2
               AND (scope = $3 OR (scope IS NULL AND $3 IS NULL))
               AND is_active = true",
        )
        .bind(resource)
        .bind(action)
        .bind(scope)
        .fetch_optional(self.db.get())
        .await?;

        Ok(permission)
    }

    pub async fn list_permissions(&self, query: &PermissionListQuery) -> Result<Vec<Permission>> {
        let limit = query.limit.unwrap_or(100).clamp(1, 500);
        let offset = query.offset.unwrap_or(0).max(0);
        let search = query
            .search
            .as_deref()
            .map(sanitize_search_input)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions
             WHERE ($1::text IS NULL OR resource = $1)
               AND ($2::text IS NULL OR action = $2)
               AND ($3::text IS NULL OR group_name = $3)
               AND ($4::boolean IS NULL OR is_active = $4)
               AND ($5::text IS NULL OR code ILIKE $5 OR name ILIKE $5)
             ORDER BY resource, action
             LIMIT $6 OFFSET $7",
        )
        .bind(&query.resource)
        .bind(&query.action)
        .bind(&query.group_name)
        .bind(query.is_active)
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.get())
        .await?;

        Ok(permissions)
    }

    pub async fn list_permissions_by_group(&self, group_name: &str) -> Result<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT * FROM permissions WHERE group_name = $1 AND is_active = true
             ORDER BY resource, action",
        )
        .bind(group_name)
        .fetch_all(self.db.get())
        .await?;

        Ok(permissions)
    }

    pub async fn create_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &CreatePermissionRequest,
    ) -> Result<Permission> {
        let permission = sqlx::query_as::<_, Permission>(
            "INSERT INTO permissions
             (id, code, name, description, resource, action, scope,
              is_system_permission, group_name, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true, NOW(), NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&request.code)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.resource)
        .bind(&request.action)
        .bind(&request.scope)
        .bind(request.is_system_permission)
        .bind(&request.group_name)
        .fetch_one(&mut **tx)
        .await?;

        Ok(permission)
    }

    pub async fn update_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        permission_id: Uuid,
        request: &UpdatePermissionRequest,
    ) -> Result<Permission> {
        let permission = sqlx::query_as::<_, Permission>(
            "UPDATE permissions SET
               name = COALESCE($2, name),
               description = COALESCE($3, description),
               group_name = COALESCE($4, group_name),
               is_active = COALESCE($5, is_active),
               updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(permission_id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(&request.group_name)
        .bind(request.is_active)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Permission not found"))?;

        Ok(permission)
    }

    pub async fn delete_permission(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        permission_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(permission_id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::new(
                ErrorCode::PermissionNotFound,
                "Permission not found",
            ));
        }

        Ok(())
    }

    // Dependency edges

    pub async fn get_dependency_ids(&self, permission_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT depends_on_id FROM permission_dependencies WHERE permission_id = $1",
        )
        .bind(permission_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(ids)
    }

    pub async fn replace_dependencies(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        permission_id: Uuid,
        depends_on: &[Uuid],
    ) -> Result<()> {
        // Verify every dependency exists before touching edges
        for dep_id in depends_on {
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM permissions WHERE id = $1",
            )
            .bind(dep_id)
            .fetch_one(&mut **tx)
            .await?;

            if exists == 0 {
                return Err(Error::new(
                    ErrorCode::PermissionDependencyNotFound,
                    format!("Dependency permission {} does not exist", dep_id),
                ));
            }
        }

        self.check_dependency_cycle(tx, permission_id, depends_on)
            .await?;

        sqlx::query("DELETE FROM permission_dependencies WHERE permission_id = $1")
            .bind(permission_id)
            .execute(&mut **tx)
            .await?;

        for dep_id in depends_on {
            sqlx::query(
                "INSERT INTO permission_dependencies (permission_id, depends_on_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(permission_id)
            .bind(dep_id)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// BFS over the candidate dependency graph inside the mutation
    /// transaction; rejects when the new edges would close a cycle.
    async fn check_dependency_cycle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        permission_id: Uuid,
        new_deps: &[Uuid],
    ) -> Result<()> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = new_deps.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if current == permission_id {
                return Err(Error::new(
                    ErrorCode::PermissionDependencyCycle,
                    "Permission dependencies would form a cycle",
                ));
            }
            if !visited.insert(current) {
                continue;
            }

            let next = sqlx::query_scalar::<_, Uuid>(
                "SELECT depends_on_id FROM permission_dependencies WHERE permission_id = $1",
            )
            .bind(current)
            .fetch_all(&mut **tx)
            .await?;

            queue.extend(next);
        }

        Ok(())
    }
}
