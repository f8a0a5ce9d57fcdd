use crate::conditions::{validate_conditions, ConditionSchema};
use crate::dto::{
    AssignRoleRequest, CreateRoleRequest, GrantRolePermissionRequest, UpdateRoleRequest,
};
use crate::invalidation::InvalidationFabric;
use crate::models::{Role, RolePermission, UserRole};
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct RoleService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
}

impl RoleService {
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

    pub async fn get_role(&self, role_id: Uuid) -> Result<Role> {
        self.repository
            .get_role_by_id(role_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::RoleNotFound, "Role not found"))
    }

    pub async fn list_roles(&self, limit: i64, offset: i64) -> Result<Vec<Role>> {
        self.repository
            .list_roles(limit.clamp(1, 500), offset.max(0))
            .await
    }

    pub async fn list_role_permissions(&self, role_id: Uuid) -> Result<Vec<RolePermission>> {
        self.get_role(role_id).await?;
        self.repository.list_role_permissions(role_id).await
    }

    pub async fn create_role(
        &self,
        actor: &RequestContext,
        request: CreateRoleRequest,
    ) -> Result<Role> {
        if self
            .repository
            .get_role_by_code(&request.code)
            .await?
            .is_some()
        {
            return Err(Error::new(
                ErrorCode::RoleAlreadyExists,
                format!("Role code '{}' already exists", request.code),
            ));
        }

        let mut tx = self.repository.db().begin().await?;
        let role = self.repository.create_role(&mut tx, &request).await?;

        for permission_id in &request.permission_ids {
            self.repository
                .upsert_role_permission(
                    &mut tx,
                    role.id,
                    *permission_id,
                    true,
                    None,
                    None,
                    None,
                    None,
                    Some(actor.profile_id),
                )
                .await?;
        }

        for parent in &request.parent_roles {
            self.repository
                .set_parent_role(&mut tx, role.id, parent.role_id, parent.inherit_permissions)
                .await?;
        }

        self.repository
            .append_history(
                &mut tx,
                "role",
                role.id,
                "create",
                None,
                Some(&serde_json::to_value(&role)?),
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        tx.commit().await?;

        self.audit
            .log_entity_change(
                EventType::RoleCreated,
                &actor.profile_id.to_string(),
                "role",
                &role.id.to_string(),
                None,
                Some(serde_json::to_value(&role)?),
            )
            .await;

        info!(role_id = %role.id, code = %role.code, "Role created");
        Ok(role)
    }

    pub async fn update_role(
        &self,
        actor: &RequestContext,
        role_id: Uuid,
        request: UpdateRoleRequest,
    ) -> Result<Role> {
        let existing = self.get_role(role_id).await?;
        if existing.is_system_role {
            return Err(Error::new(
                ErrorCode::SystemRoleImmutable,
                "System roles cannot be modified",
            ));
        }

        let previous = serde_json::to_value(&existing)?;

        let mut tx = self.repository.db().begin().await?;
        let updated = self.repository.update_role(&mut tx, role_id, &request).await?;
        self.repository
            .append_history(
                &mut tx,
                "role",
                role_id,
                "update",
                Some(&previous),
                Some(&serde_json::to_value(&updated)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_role_mutation(role_id).await?;

        self.audit
            .log_entity_change(
                EventType::RoleUpdated,
                &actor.profile_id.to_string(),
                "role",
                &role_id.to_string(),
                Some(previous),
                Some(serde_json::to_value(&updated)?),
            )
            .await;

        Ok(updated)
    }

    pub async fn delete_role(&self, actor: &RequestContext, role_id: Uuid) -> Result<()> {
        let existing = self.get_role(role_id).await?;
        if existing.is_system_role {
            return Err(Error::new(
                ErrorCode::SystemRoleImmutable,
                "System roles cannot be deleted",
            ));
        }

        let holders = self.repository.count_active_role_holders(role_id).await?;
        if holders > 0 {
            return Err(Error::new(
                ErrorCode::RoleInUse,
                format!("Role is still assigned to {} active users", holders),
            ));
        }

        let previous = serde_json::to_value(&existing)?;

        let mut tx = self.repository.db().begin().await?;
        self.repository
            .append_history(
                &mut tx,
                "role",
                role_id,
                "delete",
                Some(&previous),
                None,
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        self.repository.delete_role(&mut tx, role_id).await?;
        tx.commit().await?;

        self.fabric.on_role_mutation(role_id).await?;

        self.audit
            .log_entity_change(
                EventType::RoleDeleted,
                &actor.profile_id.to_string(),
                "role",
                &role_id.to_string(),
                Some(previous),
                None,
            )
            .await;

        info!(role_id = %role_id, "Role deleted");
        Ok(())
    }

    /// Add a parent edge to the role DAG; cycle-checked in-transaction.
    pub async fn add_parent_role(
        &self,
        actor: &RequestContext,
        role_id: Uuid,
        parent_role_id: Uuid,
        inherit_permissions: bool,
    ) -> Result<()> {
        let role = self.get_role(role_id).await?;
        if role.is_system_role {
            return Err(Error::new(
                ErrorCode::SystemRoleImmutable,
                "System role hierarchy cannot be modified",
            ));
        }
        self.get_role(parent_role_id).await?;

        let mut tx = self.repository.db().begin().await?;
        self.repository
            .set_parent_role(&mut tx, role_id, parent_role_id, inherit_permissions)
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "role",
                role_id,
                "update",
                None,
                Some(&serde_json::json!({
                    "parent_role_id": parent_role_id,
                    "inherit_permissions": inherit_permissions
                })),
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_role_mutation(role_id).await?;
        Ok(())
    }

    pub async fn grant_role_permission(
        &self,
        actor: &RequestContext,
        role_id: Uuid,
        request: GrantRolePermissionRequest,
    ) -> Result<RolePermission> {
        let role = self.get_role(role_id).await?;
        if role.is_system_role {
            return Err(Error::new(
                ErrorCode::SystemRoleImmutable,
                "System role permissions cannot be modified",
            ));
        }

        self.repository
            .get_permission_by_id(request.permission_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Permission not found"))?;

        let conditions = match &request.conditions {
            Some(conditions) => Some(validate_conditions(conditions, ConditionSchema::Grant)?),
            None => None,
        };

        let previous = self
            .repository
            .get_role_permission(role_id, request.permission_id)
            .await?
            .map(|edge| serde_json::to_value(&edge))
            .transpose()?;

        let mut tx = self.repository.db().begin().await?;
        let edge = self
            .repository
            .upsert_role_permission(
                &mut tx,
                role_id,
                request.permission_id,
                request.is_granted,
                conditions.as_ref(),
                request.valid_from,
                request.valid_until,
                request.grant_reason.as_deref(),
                Some(actor.profile_id),
            )
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "role_permission",
                edge.id,
                if previous.is_some() { "update" } else { "grant" },
                previous.as_ref(),
                Some(&serde_json::to_value(&edge)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_role_mutation(role_id).await?;

        self.audit
            .log_entity_change(
                EventType::RolePermissionGranted,
                &actor.profile_id.to_string(),
                "role",
                &role_id.to_string(),
                previous,
                Some(serde_json::to_value(&edge)?),
            )
            .await;

        Ok(edge)
    }

    pub async fn revoke_role_permission(
        &self,
        actor: &RequestContext,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<()> {
        let role = self.get_role(role_id).await?;
        if role.is_system_role {
            return Err(Error::new(
                ErrorCode::SystemRoleImmutable,
                "System role permissions cannot be modified",
            ));
        }

        let previous = self
            .repository
            .get_role_permission(role_id, permission_id)
            .await?
            .ok_or_else(|| {
                Error::new(ErrorCode::PermissionNotFound, "Role permission edge not found")
            })?;

        let mut tx = self.repository.db().begin().await?;
        self.repository
            .append_history(
                &mut tx,
                "role_permission",
                previous.id,
                "revoke",
                Some(&serde_json::to_value(&previous)?),
                None,
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        self.repository
            .delete_role_permission(&mut tx, role_id, permission_id)
            .await?;
        tx.commit().await?;

        self.fabric.on_role_mutation(role_id).await?;

        self.audit
            .log_entity_change(
                EventType::RolePermissionRevoked,
                &actor.profile_id.to_string(),
                "role",
                &role_id.to_string(),
                Some(serde_json::to_value(&previous)?),
                None,
            )
            .await;

        Ok(())
    }

    pub async fn assign_role(
        &self,
        actor: &RequestContext,
        user_profile_id: Uuid,
        request: AssignRoleRequest,
    ) -> Result<UserRole> {
        self.repository
            .get_user_profile(user_profile_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::UserNotFound, "User profile not found"))?;
        self.get_role(request.role_id).await?;

        let mut tx = self.repository.db().begin().await?;
        let assignment = self
            .repository
            .assign_role_to_user(
                &mut tx,
                user_profile_id,
                request.role_id,
                request.valid_from,
                request.valid_until,
                Some(actor.profile_id),
            )
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "user_role",
                assignment.id,
                "grant",
                None,
                Some(&serde_json::to_value(&assignment)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(user_profile_id).await;

        self.audit
            .log_grant_change(
                EventType::RoleAssigned,
                &actor.profile_id.to_string(),
                &user_profile_id.to_string(),
                &format!("role {}", request.role_id),
                None,
                Some(serde_json::to_value(&assignment)?),
            )
            .await;

        Ok(assignment)
    }

    pub async fn remove_role(
        &self,
        actor: &RequestContext,
        user_profile_id: Uuid,
        role_id: Uuid,
    ) -> Result<()> {
        let mut tx = self.repository.db().begin().await?;
        let deactivated = self
            .repository
            .deactivate_user_role(&mut tx, user_profile_id, role_id)
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "user_role",
                deactivated.id,
                "revoke",
                Some(&serde_json::to_value(&deactivated)?),
                None,
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(user_profile_id).await;

        self.audit
            .log_grant_change(
                EventType::RoleRevoked,
                &actor.profile_id.to_string(),
                &user_profile_id.to_string(),
                &format!("role {}", role_id),
                Some(serde_json::to_value(&deactivated)?),
                None,
            )
            .await;

        Ok(())
    }
}
