use crate::dto::{CreatePermissionRequest, PermissionListQuery, UpdatePermissionRequest};
use crate::invalidation::InvalidationFabric;
use crate::models::{Permission, PermissionAction, PermissionScope};
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct PermissionService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
}

impl PermissionService {
    pub fn new(
        repository: AuthzRepository,
        fabric: InvalidationFabric,
        audit: AuditLogger,
    ) -> Self {
        Self {
            repository,
            fabric,
            audit,
        }
    }

    pub async fn get_permission(&self, permission_id: Uuid) -> Result<Permission> {
        self.repository
            .get_permission_by_id(permission_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Permission not found"))
    }

    pub async fn list_permissions(&self, query: &PermissionListQuery) -> Result<Vec<Permission>> {
        self.repository.list_permissions(query).await
    }

    pub async fn list_by_group(&self, group_name: &str) -> Result<Vec<Permission>> {
        self.repository.list_permissions_by_group(group_name).await
    }

    pub async fn create_permission(
        &self,
        actor: &RequestContext,
        request: CreatePermissionRequest,
    ) -> Result<Permission> {
        validate_action(&request.action)?;
        if let Some(scope) = &request.scope {
            validate_scope(scope)?;
        }

        if self
            .repository
            .get_permission_by_code(&request.code)
            .await?
            .is_some()
        {
            return Err(Error::new(
                ErrorCode::PermissionAlreadyExists,
                format!("Permission code '{}' already exists", request.code),
            ));
        }

        if self
            .repository
            .find_permission_by_triple(
                &request.resource,
                &request.action,
                request.scope.as_deref(),
            )
            .await?
            .is_some()
        {
            return Err(Error::new(
                ErrorCode::PermissionCombinationExists,
                format!(
                    "A permission for ({}, {}, {}) already exists",
                    request.resource,
                    request.action,
                    request.scope.as_deref().unwrap_or("none")
                ),
            ));
        }

        let mut tx = self.repository.db().begin().await?;
        let permission = self.repository.create_permission(&mut tx, &request).await?;

        if !request.dependencies.is_empty() {
            self.repository
                .replace_dependencies(&mut tx, permission.id, &request.dependencies)
                .await?;
        }

        self.repository
            .append_history(
                &mut tx,
                "permission",
                permission.id,
                "create",
                None,
                Some(&serde_json::to_value(&permission)?),
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        tx.commit().await?;

        self.audit
            .log_entity_change(
                EventType::PermissionCreated,
                &actor.profile_id.to_string(),
                "permission",
                &permission.id.to_string(),
                None,
                Some(serde_json::to_value(&permission)?),
            )
            .await;

        info!(permission_id = %permission.id, code = %permission.code, "Permission created");
        Ok(permission)
    }

    pub async fn update_permission(
        &self,
        actor: &RequestContext,
        permission_id: Uuid,
        request: UpdatePermissionRequest,
    ) -> Result<Permission> {
        let existing = self.get_permission(permission_id).await?;
        if existing.is_system_permission {
            return Err(Error::new(
                ErrorCode::SystemPermissionImmutable,
                "System permissions cannot be modified",
            ));
        }

        let previous = serde_json::to_value(&existing)?;

        let mut tx = self.repository.db().begin().await?;
        let updated = self
            .repository
            .update_permission(&mut tx, permission_id, &request)
            .await?;

        if let Some(dependencies) = &request.dependencies {
            self.repository
                .replace_dependencies(&mut tx, permission_id, dependencies)
                .await?;
        }

        self.repository
            .append_history(
                &mut tx,
                "permission",
                permission_id,
                "update",
                Some(&previous),
                Some(&serde_json::to_value(&updated)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_permission_mutation(permission_id).await?;

        self.audit
            .log_entity_change(
                EventType::PermissionUpdated,
                &actor.profile_id.to_string(),
                "permission",
                &permission_id.to_string(),
                Some(previous),
                Some(serde_json::to_value(&updated)?),
            )
            .await;

        Ok(updated)
    }

    pub async fn delete_permission(
        &self,
        actor: &RequestContext,
        permission_id: Uuid,
    ) -> Result<()> {
        let existing = self.get_permission(permission_id).await?;
        if existing.is_system_permission {
            return Err(Error::new(
                ErrorCode::SystemPermissionDeleteForbidden,
                "System permissions cannot be deleted",
            ));
        }

        // Discover affected users while the edges still exist
        let affected = self
            .repository
            .get_users_affected_by_permission(permission_id)
            .await?;
        let affected_roles = self
            .repository
            .get_roles_with_permission(permission_id)
            .await?;

        let previous = serde_json::to_value(&existing)?;

        let mut tx = self.repository.db().begin().await?;
        self.repository
            .append_history(
                &mut tx,
                "permission",
                permission_id,
                "delete",
                Some(&previous),
                None,
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        self.repository
            .delete_permission(&mut tx, permission_id)
            .await?;
        tx.commit().await?;

        for role_id in affected_roles {
            let _ = self.fabric.on_role_mutation(role_id).await;
        }
        self.fabric.invalidate_users(&affected).await;

        self.audit
            .log_entity_change(
                EventType::PermissionDeleted,
                &actor.profile_id.to_string(),
                "permission",
                &permission_id.to_string(),
                Some(previous),
                None,
            )
            .await;

        info!(permission_id = %permission_id, "Permission deleted");
        Ok(())
    }
}

fn validate_action(action: &str) -> Result<()> {
    if PermissionAction::from_str(action).is_none() {
        return Err(Error::new(
            ErrorCode::PermissionInvalidAction,
            format!("Unknown action '{}'", action),
        ));
    }
    Ok(())
}

fn validate_scope(scope: &str) -> Result<()> {
    if PermissionScope::from_str(scope).is_none() {
        return Err(Error::new(
            ErrorCode::PermissionInvalidScope,
            format!("Unknown scope '{}'", scope),
        ));
    }
    Ok(())
}
