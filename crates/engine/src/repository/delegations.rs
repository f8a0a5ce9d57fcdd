use super::AuthzRepository;
use crate::models::PermissionDelegation;
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

impl AuthzRepository {
    pub async fn get_delegation_by_id(
        &self,
        delegation_id: Uuid,
    ) -> Result<Option<PermissionDelegation>> {
        let delegation = sqlx::query_as::<_, PermissionDelegation>(
            "SELECT * FROM permission_delegations WHERE id = $1",
        )
        .bind(delegation_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(delegation)
    }

    pub async fn list_delegations_by_delegator(
        &self,
        delegator_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PermissionDelegation>> {
        let delegations = sqlx::query_as::<_, PermissionDelegation>(
            "SELECT * FROM permission_delegations
             WHERE delegator_id = $1
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(delegator_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.get())
        .await?;

        Ok(delegations)
    }

    /// Active delegations where the user is the delegate, for check-time
    /// contribution of delegated codes.
    pub async fn get_active_delegations_to(
        &self,
        delegate_id: Uuid,
    ) -> Result<Vec<PermissionDelegation>> {
        let delegations = sqlx::query_as::<_, PermissionDelegation>(
            "SELECT * FROM permission_delegations
             WHERE delegate_id = $1 AND is_revoked = false
               AND valid_from <= NOW() AND valid_until > NOW()",
        )
        .bind(delegate_id)
        .fetch_all(self.db.get())
        .await?;

        Ok(delegations)
    }

    pub async fn insert_delegation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delegator_id: Uuid,
        delegate_id: Uuid,
        permission_codes: &[String],
        reason: Option<&str>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<PermissionDelegation> {
        let delegation = sqlx::query_as::<_, PermissionDelegation>(
            "INSERT INTO permission_delegations
             (id, delegator_id, delegate_id, permissions, reason, valid_from,
              valid_until, is_revoked, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(delegator_id)
        .bind(delegate_id)
        .bind(serde_json::json!(permission_codes))
        .bind(reason)
        .bind(valid_from)
        .bind(valid_until)
        .fetch_one(&mut **tx)
        .await?;

        Ok(delegation)
    }

    pub async fn mark_delegation_revoked(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delegation_id: Uuid,
        revoked_by: Uuid,
        reason: &str,
    ) -> Result<PermissionDelegation> {
        let delegation = sqlx::query_as::<_, PermissionDelegation>(
            "UPDATE permission_delegations SET
               is_revoked = true, revoked_by = $2, revoked_at = NOW(),
               revoked_reason = $3
             WHERE id = $1
             RETURNING *",
        )
        .bind(delegation_id)
        .bind(revoked_by)
        .bind(reason)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::DelegationNotFound, "Delegation not found"))?;

        Ok(delegation)
    }

    /// Undo a revocation (rollback path).
    pub async fn mark_delegation_unrevoked(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delegation_id: Uuid,
    ) -> Result<PermissionDelegation> {
        let delegation = sqlx::query_as::<_, PermissionDelegation>(
            "UPDATE permission_delegations SET
               is_revoked = false, revoked_by = NULL, revoked_at = NULL,
               revoked_reason = NULL
             WHERE id = $1
             RETURNING *",
        )
        .bind(delegation_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::DelegationNotFound, "Delegation not found"))?;

        Ok(delegation)
    }

    pub async fn extend_delegation(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        delegation_id: Uuid,
        valid_until: DateTime<Utc>,
    ) -> Result<PermissionDelegation> {
        let delegation = sqlx::query_as::<_, PermissionDelegation>(
            "UPDATE permission_delegations SET valid_until = $2
             WHERE id = $1
             RETURNING *",
        )
        .bind(delegation_id)
        .bind(valid_until)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| Error::new(ErrorCode::DelegationNotFound, "Delegation not found"))?;

        Ok(delegation)
    }
}
