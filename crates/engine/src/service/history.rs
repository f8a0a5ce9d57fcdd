use crate::invalidation::InvalidationFabric;
use crate::models::{PermissionChangeHistory, UserPermission};
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use tokio::time::{timeout, Duration};
use tracing::info;
use uuid::Uuid;

/// Change-history queries and rollback (C5).
///
/// Rollback dispatches on `(entity_type, operation)`:
///
/// | entity               | grant              | revoke               | update                 |
/// |----------------------|--------------------|----------------------|------------------------|
/// | user/role permission | delete the edge    | recreate prev. state | restore prev. state    |
/// | template_application | mark inactive      | reactivate           | —                      |
/// | permission_delegation| set revoked        | clear revoked        | —                      |
///
/// The rollback writes a `rollback_<original>` entry linked via
/// `rollback_of`, marks the original `rolled_back_at`, and is itself
/// non-rollbackable. A missing `previous_state` where one is required is a
/// fatal rollback failure.
#[derive(Clone)]
pub struct HistoryService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
    transaction_timeout: Duration,
}

impl HistoryService {
    pub fn new(
        repository: AuthzRepository,
        fabric: InvalidationFabric,
        audit: AuditLogger,
        transaction_timeout_secs: u64,
    ) -> Self {
        Self {
            repository,
            fabric,
            audit,
            transaction_timeout: Duration::from_secs(transaction_timeout_secs),
        }
    }

    pub async fn get_entry(&self, change_id: Uuid) -> Result<PermissionChangeHistory> {
        self.repository
            .get_history_entry(change_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::RollbackNotPossible, "Change entry not found"))
    }

    pub async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PermissionChangeHistory>> {
        self.repository
            .list_history_for_entity(entity_type, entity_id, limit.clamp(1, 500))
            .await
    }

    /// Undo a prior mutation by replaying its rollback payload.
    pub async fn rollback(
        &self,
        actor: &RequestContext,
        change_id: Uuid,
    ) -> Result<PermissionChangeHistory> {
        let entry = timeout(self.transaction_timeout, self.run_rollback(actor, change_id))
            .await
            .map_err(|_| {
                Error::new(
                    ErrorCode::PermissionDbTransactionError,
                    "Rollback transaction exceeded its deadline",
                )
            })??;

        self.audit
            .log_entity_change(
                EventType::RollbackApplied,
                &actor.profile_id.to_string(),
                &entry.entity_type.clone(),
                &entry.entity_id.to_string(),
                None,
                Some(serde_json::to_value(&entry)?),
            )
            .await;

        Ok(entry)
    }

    async fn run_rollback(
        &self,
        actor: &RequestContext,
        change_id: Uuid,
    ) -> Result<PermissionChangeHistory> {
        let mut tx = self.repository.db().begin().await?;
        let original = self
            .repository
            .get_history_entry_for_update(&mut tx, change_id)
            .await?;

        if !original.is_rollbackable {
            return Err(Error::new(
                ErrorCode::RollbackNotPossible,
                "Change entry is not rollbackable",
            ));
        }
        if original.rolled_back_at.is_some() {
            return Err(Error::new(
                ErrorCode::RollbackNotPossible,
                "Change entry was already rolled back",
            ));
        }

        let affected_user = match (original.entity_type.as_str(), original.operation.as_str()) {
            ("user_permission", "grant") => {
                // Undo a grant by deleting the created edge
                let affected = Self::user_from_state(original.new_state.as_ref());
                self.repository
                    .delete_user_permission_row(&mut tx, original.entity_id)
                    .await?;
                affected
            }
            ("user_permission", "revoke") | ("user_permission", "update") => {
                // Recreate or restore from the previous state
                let state = original.previous_state.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorCode::RollbackNotPossible,
                        "previous_state is required to roll back this operation",
                    )
                })?;
                let row: UserPermission = serde_json::from_value(state.clone())?;
                let user_id = row.user_profile_id;
                self.repository.restore_user_permission(&mut tx, &row).await?;
                Some(user_id)
            }
            ("role_permission", "grant") => {
                let state = original.new_state.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorCode::RollbackNotPossible,
                        "new_state is required to roll back a role grant",
                    )
                })?;
                let row: crate::models::RolePermission = serde_json::from_value(state.clone())?;
                self.repository
                    .delete_role_permission(&mut tx, row.role_id, row.permission_id)
                    .await?;
                None
            }
            ("role_permission", "revoke") | ("role_permission", "update") => {
                let state = original.previous_state.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorCode::RollbackNotPossible,
                        "previous_state is required to roll back this operation",
                    )
                })?;
                let row: crate::models::RolePermission = serde_json::from_value(state.clone())?;
                self.repository
                    .upsert_role_permission(
                        &mut tx,
                        row.role_id,
                        row.permission_id,
                        row.is_granted,
                        row.conditions.as_ref(),
                        row.valid_from,
                        row.valid_until,
                        row.grant_reason.as_deref(),
                        row.granted_by,
                    )
                    .await?;
                None
            }
            ("template_application", "grant") => {
                self.repository
                    .set_template_application_active(&mut tx, original.entity_id, false)
                    .await?;
                Self::user_from_state(original.new_state.as_ref())
            }
            ("template_application", "revoke") => {
                self.repository
                    .set_template_application_active(&mut tx, original.entity_id, true)
                    .await?;
                Self::user_from_state(original.previous_state.as_ref())
            }
            ("permission_delegation", "grant") => {
                let revoked = self
                    .repository
                    .mark_delegation_revoked(
                        &mut tx,
                        original.entity_id,
                        actor.profile_id,
                        "rolled back",
                    )
                    .await?;
                Some(revoked.delegate_id)
            }
            ("permission_delegation", "revoke") => {
                let restored = self
                    .repository
                    .mark_delegation_unrevoked(&mut tx, original.entity_id)
                    .await?;
                Some(restored.delegate_id)
            }
            ("user_role", "grant") => {
                let state = original.new_state.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorCode::RollbackNotPossible,
                        "new_state is required to roll back a role assignment",
                    )
                })?;
                let row: crate::models::UserRole = serde_json::from_value(state.clone())?;
                self.repository
                    .deactivate_user_role(&mut tx, row.user_profile_id, row.role_id)
                    .await?;
                Some(row.user_profile_id)
            }
            ("user_role", "revoke") => {
                let state = original.previous_state.as_ref().ok_or_else(|| {
                    Error::new(
                        ErrorCode::RollbackNotPossible,
                        "previous_state is required to roll back this operation",
                    )
                })?;
                let row: crate::models::UserRole = serde_json::from_value(state.clone())?;
                self.repository
                    .assign_role_to_user(
                        &mut tx,
                        row.user_profile_id,
                        row.role_id,
                        row.valid_from,
                        row.valid_until,
                        row.assigned_by,
                    )
                    .await?;
                Some(row.user_profile_id)
            }
            (entity_type, operation) => {
                return Err(Error::new(
                    ErrorCode::RollbackNotPossible,
                    format!(
                        "No rollback handler for {} / {}",
                        entity_type, operation
                    ),
                ));
            }
        };

        let rollback_entry = self
            .repository
            .append_rollback_entry(&mut tx, &original, Some(actor.profile_id))
            .await?;
        tx.commit().await?;

        if let Some(user_id) = affected_user {
            self.fabric.on_user_mutation(user_id).await;
        }

        info!(
            change_id = %change_id,
            rollback_id = %rollback_entry.id,
            entity_type = %original.entity_type,
            operation = %original.operation,
            "Rollback applied"
        );

        Ok(rollback_entry)
    }

    fn user_from_state(state: Option<&serde_json::Value>) -> Option<Uuid> {
        state
            .and_then(|s| s.get("user_profile_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}
