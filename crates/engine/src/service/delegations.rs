use crate::dto::{CreateDelegationRequest, ExtendDelegationRequest, RevokeDelegationRequest};
use crate::invalidation::InvalidationFabric;
use crate::models::PermissionDelegation;
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct DelegationService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
}

impl DelegationService {
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

    pub async fn get_delegation(&self, delegation_id: Uuid) -> Result<PermissionDelegation> {
        self.repository
            .get_delegation_by_id(delegation_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::DelegationNotFound, "Delegation not found"))
    }

    pub async fn list_for_delegator(
        &self,
        delegator_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PermissionDelegation>> {
        self.repository
            .list_delegations_by_delegator(delegator_id, limit.clamp(1, 500), offset.max(0))
            .await
    }

    /// Create a delegation. The delegator may only delegate permission
    /// codes they presently hold (direct + role-derived); the failure lists
    /// every code that is not held and nothing is written.
    pub async fn create_delegation(
        &self,
        actor: &RequestContext,
        request: CreateDelegationRequest,
    ) -> Result<PermissionDelegation> {
        let delegator_id = actor.profile_id;
        let now = Utc::now();
        let valid_from = request.valid_from.unwrap_or(now);

        if valid_from >= request.valid_until {
            return Err(Error::new(
                ErrorCode::DelegationInvalidWindow,
                "valid_from must be earlier than valid_until",
            ));
        }
        if request.valid_until <= now {
            return Err(Error::new(
                ErrorCode::DelegationInvalidWindow,
                "valid_until must be in the future",
            ));
        }

        self.repository
            .get_user_profile(request.delegate_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::UserNotFound, "Delegate profile not found"))?;

        // Every permission code must exist and be held by the delegator now
        for code in &request.permissions {
            if self.repository.get_permission_by_code(code).await?.is_none() {
                return Err(Error::new(
                    ErrorCode::PermissionCodeNotFound,
                    format!("Permission code '{}' does not exist", code),
                ));
            }
        }

        let held = self
            .repository
            .get_effective_permission_codes(delegator_id)
            .await?;
        let missing: Vec<&String> = request
            .permissions
            .iter()
            .filter(|code| !held.contains(code))
            .collect();

        if !missing.is_empty() {
            return Err(Error::new(
                ErrorCode::DelegationNotHeld,
                format!(
                    "Delegator does not hold: {}",
                    missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }

        let mut tx = self.repository.db().begin().await?;
        let delegation = self
            .repository
            .insert_delegation(
                &mut tx,
                delegator_id,
                request.delegate_id,
                &request.permissions,
                request.reason.as_deref(),
                valid_from,
                request.valid_until,
            )
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_delegation",
                delegation.id,
                "grant",
                None,
                Some(&serde_json::to_value(&delegation)?),
                Some(delegator_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(request.delegate_id).await;

        self.audit
            .log_entity_change(
                EventType::DelegationCreated,
                &delegator_id.to_string(),
                "permission_delegation",
                &delegation.id.to_string(),
                None,
                Some(serde_json::to_value(&delegation)?),
            )
            .await;

        info!(
            delegation_id = %delegation.id,
            delegator = %delegator_id,
            delegate = %request.delegate_id,
            "Delegation created"
        );
        Ok(delegation)
    }

    /// Revoke a delegation. Permitted to the delegator or any superadmin;
    /// an already-revoked delegation is a conflict.
    pub async fn revoke_delegation(
        &self,
        actor: &RequestContext,
        delegation_id: Uuid,
        request: RevokeDelegationRequest,
    ) -> Result<PermissionDelegation> {
        let delegation = self.get_delegation(delegation_id).await?;

        if delegation.delegator_id != actor.profile_id && !actor.is_superadmin {
            return Err(Error::new(
                ErrorCode::DelegationNotDelegator,
                "Only the delegator or a superadmin may revoke a delegation",
            ));
        }
        if delegation.is_revoked {
            return Err(Error::new(
                ErrorCode::DelegationAlreadyRevoked,
                "Delegation is already revoked",
            ));
        }

        let previous = serde_json::to_value(&delegation)?;

        let mut tx = self.repository.db().begin().await?;
        let revoked = self
            .repository
            .mark_delegation_revoked(&mut tx, delegation_id, actor.profile_id, &request.reason)
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_delegation",
                delegation_id,
                "revoke",
                Some(&previous),
                Some(&serde_json::to_value(&revoked)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(delegation.delegate_id).await;

        self.audit
            .log_entity_change(
                EventType::DelegationRevoked,
                &actor.profile_id.to_string(),
                "permission_delegation",
                &delegation_id.to_string(),
                Some(previous),
                Some(serde_json::to_value(&revoked)?),
            )
            .await;

        Ok(revoked)
    }

    /// Extend a delegation's window. Only the delegator may extend, and
    /// only strictly forward.
    pub async fn extend_delegation(
        &self,
        actor: &RequestContext,
        delegation_id: Uuid,
        request: ExtendDelegationRequest,
    ) -> Result<PermissionDelegation> {
        let delegation = self.get_delegation(delegation_id).await?;

        if delegation.delegator_id != actor.profile_id {
            return Err(Error::new(
                ErrorCode::DelegationNotDelegator,
                "Only the delegator may extend a delegation",
            ));
        }
        if delegation.is_revoked {
            return Err(Error::new(
                ErrorCode::DelegationAlreadyRevoked,
                "A revoked delegation cannot be extended",
            ));
        }
        if request.valid_until <= delegation.valid_until {
            return Err(Error::new(
                ErrorCode::DelegationInvalidWindow,
                "New valid_until must be later than the current one",
            ));
        }

        let previous = serde_json::to_value(&delegation)?;

        let mut tx = self.repository.db().begin().await?;
        let extended = self
            .repository
            .extend_delegation(&mut tx, delegation_id, request.valid_until)
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_delegation",
                delegation_id,
                "update",
                Some(&previous),
                Some(&serde_json::to_value(&extended)?),
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(delegation.delegate_id).await;

        self.audit
            .log_entity_change(
                EventType::DelegationExtended,
                &actor.profile_id.to_string(),
                "permission_delegation",
                &delegation_id.to_string(),
                Some(previous),
                Some(serde_json::to_value(&extended)?),
            )
            .await;

        Ok(extended)
    }
}
