use crate::conditions::{validate_conditions, ConditionSchema};
use crate::dto::{
    GrantResourcePermissionRequest, GrantUserPermissionRequest, RevokeUserPermissionRequest,
};
use crate::invalidation::InvalidationFabric;
use crate::models::{ResourcePermission, UserPermission, CRITICAL_PERMISSION_CODES};
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use tracing::info;
use uuid::Uuid;

/// Default priority within the direct layer.
const DEFAULT_GRANT_PRIORITY: i32 = 100;

#[derive(Clone)]
pub struct GrantService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
}

impl GrantService {
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

    pub fn repository(&self) -> &AuthzRepository {
        &self.repository
    }

    /// Grant a permission directly to a user.
    ///
    /// An existing active grant is a conflict; a previously revoked row is
    /// reactivated in place so the history chain stays on one row.
    pub async fn grant_user_permission(
        &self,
        actor: &RequestContext,
        user_profile_id: Uuid,
        request: GrantUserPermissionRequest,
    ) -> Result<UserPermission> {
        self.repository
            .get_user_profile(user_profile_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::UserNotFound, "User profile not found"))?;

        self.repository
            .get_permission_by_id(request.permission_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Permission not found"))?;

        let conditions = match &request.conditions {
            Some(conditions) => Some(validate_conditions(conditions, ConditionSchema::Grant)?),
            None => None,
        };

        let priority = request.priority.unwrap_or(DEFAULT_GRANT_PRIORITY);
        let existing = self
            .repository
            .get_user_permission(user_profile_id, request.permission_id)
            .await?;

        let mut tx = self.repository.db().begin().await?;

        let (granted, previous) = match existing {
            Some(row) if row.is_granted => {
                return Err(Error::new(
                    ErrorCode::PermissionAlreadyGranted,
                    "Permission is already granted to this user",
                ));
            }
            Some(row) => {
                let previous = serde_json::to_value(&row)?;
                let reactivated = self
                    .repository
                    .reactivate_user_permission(
                        &mut tx,
                        row.id,
                        conditions.as_ref(),
                        request.valid_from,
                        request.valid_until,
                        priority,
                        request.is_temporary,
                        request.grant_reason.as_deref(),
                        Some(actor.profile_id),
                    )
                    .await?;
                (reactivated, Some(previous))
            }
            None => {
                let inserted = self
                    .repository
                    .insert_user_permission(
                        &mut tx,
                        user_profile_id,
                        request.permission_id,
                        conditions.as_ref(),
                        request.valid_from,
                        request.valid_until,
                        priority,
                        request.is_temporary,
                        request.grant_reason.as_deref(),
                        Some(actor.profile_id),
                    )
                    .await?;
                (inserted, None)
            }
        };

        self.repository
            .append_history(
                &mut tx,
                "user_permission",
                granted.id,
                "grant",
                previous.as_ref(),
                Some(&serde_json::to_value(&granted)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        // Invalidation completes before the response returns
        self.fabric.on_user_mutation(user_profile_id).await;

        self.audit
            .log_grant_change(
                EventType::PermissionGranted,
                &actor.profile_id.to_string(),
                &user_profile_id.to_string(),
                &format!("permission {}", request.permission_id),
                previous,
                Some(serde_json::to_value(&granted)?),
            )
            .await;

        info!(
            user_id = %user_profile_id,
            permission_id = %request.permission_id,
            "User permission granted"
        );
        Ok(granted)
    }

    /// Revoke a direct grant. Requires a reason; critical permission codes
    /// additionally require `force_revoke`.
    pub async fn revoke_user_permission(
        &self,
        actor: &RequestContext,
        user_profile_id: Uuid,
        request: RevokeUserPermissionRequest,
    ) -> Result<UserPermission> {
        let permission = self
            .repository
            .get_permission_by_id(request.permission_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Permission not found"))?;

        if CRITICAL_PERMISSION_CODES.contains(&permission.code.as_str()) && !request.force_revoke {
            return Err(Error::new(
                ErrorCode::PermissionDenied,
                format!(
                    "Revoking critical permission '{}' requires force_revoke",
                    permission.code
                ),
            ));
        }

        let previous = self
            .repository
            .get_user_permission(user_profile_id, request.permission_id)
            .await?
            .filter(|row| row.is_granted)
            .map(|row| serde_json::to_value(&row))
            .transpose()?;

        let mut tx = self.repository.db().begin().await?;
        let revoked = self
            .repository
            .revoke_user_permission(
                &mut tx,
                user_profile_id,
                request.permission_id,
                &request.revoke_reason,
            )
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "user_permission",
                revoked.id,
                "revoke",
                previous.as_ref(),
                Some(&serde_json::to_value(&revoked)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(user_profile_id).await;

        self.audit
            .log_grant_change(
                EventType::PermissionRevoked,
                &actor.profile_id.to_string(),
                &user_profile_id.to_string(),
                &format!(
                    "permission {} (reason: {})",
                    permission.code, request.revoke_reason
                ),
                previous,
                Some(serde_json::to_value(&revoked)?),
            )
            .await;

        info!(
            user_id = %user_profile_id,
            permission_code = %permission.code,
            "User permission revoked"
        );
        Ok(revoked)
    }

    /// Grant a permission for one specific object instance.
    pub async fn grant_resource_permission(
        &self,
        actor: &RequestContext,
        user_profile_id: Uuid,
        request: GrantResourcePermissionRequest,
    ) -> Result<ResourcePermission> {
        self.repository
            .get_user_profile(user_profile_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::UserNotFound, "User profile not found"))?;
        self.repository
            .get_permission_by_id(request.permission_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Permission not found"))?;

        let conditions = match &request.conditions {
            Some(conditions) => Some(validate_conditions(conditions, ConditionSchema::Grant)?),
            None => None,
        };

        let mut tx = self.repository.db().begin().await?;
        let granted = self
            .repository
            .insert_resource_permission(
                &mut tx,
                user_profile_id,
                request.permission_id,
                &request.resource_type,
                &request.resource_id,
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
                "resource_permission",
                granted.id,
                "grant",
                None,
                Some(&serde_json::to_value(&granted)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(user_profile_id).await;

        self.audit
            .log_grant_change(
                EventType::ResourcePermissionGranted,
                &actor.profile_id.to_string(),
                &user_profile_id.to_string(),
                &format!(
                    "permission {} on {}/{}",
                    request.permission_id, request.resource_type, request.resource_id
                ),
                None,
                Some(serde_json::to_value(&granted)?),
            )
            .await;

        Ok(granted)
    }

    pub async fn revoke_resource_permission(
        &self,
        actor: &RequestContext,
        user_profile_id: Uuid,
        permission_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<ResourcePermission> {
        let mut tx = self.repository.db().begin().await?;
        let revoked = self
            .repository
            .revoke_resource_permission(
                &mut tx,
                user_profile_id,
                permission_id,
                resource_type,
                resource_id,
            )
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "resource_permission",
                revoked.id,
                "revoke",
                Some(&serde_json::to_value(&revoked)?),
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
                EventType::ResourcePermissionRevoked,
                &actor.profile_id.to_string(),
                &user_profile_id.to_string(),
                &format!(
                    "permission {} on {}/{}",
                    permission_id, resource_type, resource_id
                ),
                Some(serde_json::to_value(&revoked)?),
                None,
            )
            .await;

        Ok(revoked)
    }

    /// Effective permission codes for a user (direct + role-derived).
    pub async fn get_effective_codes(&self, user_profile_id: Uuid) -> Result<Vec<String>> {
        self.repository
            .get_effective_permission_codes(user_profile_id)
            .await
    }
}
