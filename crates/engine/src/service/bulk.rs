use crate::dto::{
    BulkErrorItem, BulkGrantRequest, BulkOperationResult, BulkRevokeRequest, BulkSummary,
};
use crate::invalidation::InvalidationFabric;
use crate::models::CRITICAL_PERMISSION_CODES;
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use std::collections::{HashMap, HashSet};
use tokio::time::{timeout, Duration};
use tracing::info;
use uuid::Uuid;

const DEFAULT_BULK_PRIORITY: i32 = 100;

/// Transactional multi-target grant/revoke (C14).
///
/// One database transaction carries every successful row; per-(target,
/// permission) failures are collected and reported without aborting the
/// batch. The whole transaction runs under the 30-second mutation deadline.
#[derive(Clone)]
pub struct BulkOperationService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
    transaction_timeout: Duration,
}

impl BulkOperationService {
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

    pub async fn bulk_grant(
        &self,
        actor: &RequestContext,
        request: BulkGrantRequest,
    ) -> Result<BulkOperationResult> {
        let result = timeout(self.transaction_timeout, self.run_bulk_grant(actor, &request))
            .await
            .map_err(|_| {
                Error::new(
                    ErrorCode::PermissionDbTransactionError,
                    "Bulk grant transaction exceeded its deadline",
                )
            })??;

        self.audit
            .log_bulk_operation(
                EventType::BulkGrant,
                &actor.profile_id.to_string(),
                result.processed,
                result.failed,
            )
            .await;

        Ok(result)
    }

    pub async fn bulk_revoke(
        &self,
        actor: &RequestContext,
        request: BulkRevokeRequest,
    ) -> Result<BulkOperationResult> {
        let result = timeout(self.transaction_timeout, self.run_bulk_revoke(actor, &request))
            .await
            .map_err(|_| {
                Error::new(
                    ErrorCode::PermissionDbTransactionError,
                    "Bulk revoke transaction exceeded its deadline",
                )
            })??;

        self.audit
            .log_bulk_operation(
                EventType::BulkRevoke,
                &actor.profile_id.to_string(),
                result.processed,
                result.failed,
            )
            .await;

        Ok(result)
    }

    async fn run_bulk_grant(
        &self,
        actor: &RequestContext,
        request: &BulkGrantRequest,
    ) -> Result<BulkOperationResult> {
        // Resolve permission codes once up front; unknown codes fail every
        // target pairing but do not abort the batch.
        let mut permissions: HashMap<String, Uuid> = HashMap::new();
        let mut unknown_codes: HashSet<String> = HashSet::new();
        for code in &request.permission_codes {
            match self.repository.get_permission_by_code(code).await? {
                Some(permission) => {
                    permissions.insert(code.clone(), permission.id);
                }
                None => {
                    unknown_codes.insert(code.clone());
                }
            }
        }

        let mut existing_users: HashSet<Uuid> = HashSet::new();
        let mut missing_users: HashSet<Uuid> = HashSet::new();
        for user_id in &request.user_ids {
            if self.repository.get_user_profile(*user_id).await?.is_some() {
                existing_users.insert(*user_id);
            } else {
                missing_users.insert(*user_id);
            }
        }

        let mut errors: Vec<BulkErrorItem> = Vec::new();
        let mut summary = BulkSummary::default();
        let mut touched_users: HashSet<Uuid> = HashSet::new();

        let mut tx = self.repository.db().begin().await?;

        for user_id in &request.user_ids {
            for code in &request.permission_codes {
                if missing_users.contains(user_id) {
                    errors.push(BulkErrorItem {
                        target_id: *user_id,
                        permission_code: code.clone(),
                        error: "User profile not found".to_string(),
                    });
                    continue;
                }
                if unknown_codes.contains(code) {
                    errors.push(BulkErrorItem {
                        target_id: *user_id,
                        permission_code: code.clone(),
                        error: "Permission code not found".to_string(),
                    });
                    continue;
                }

                let permission_id = permissions[code];
                let existing = self
                    .repository
                    .get_user_permission(*user_id, permission_id)
                    .await?;

                let granted = match existing {
                    Some(row) if row.is_granted => {
                        summary.skipped += 1;
                        touched_users.insert(*user_id);
                        continue;
                    }
                    Some(row) => {
                        self.repository
                            .reactivate_user_permission(
                                &mut tx,
                                row.id,
                                None,
                                None,
                                request.valid_until,
                                DEFAULT_BULK_PRIORITY,
                                request.is_temporary,
                                request.grant_reason.as_deref(),
                                Some(actor.profile_id),
                            )
                            .await?
                    }
                    None => {
                        self.repository
                            .insert_user_permission(
                                &mut tx,
                                *user_id,
                                permission_id,
                                None,
                                None,
                                request.valid_until,
                                DEFAULT_BULK_PRIORITY,
                                request.is_temporary,
                                request.grant_reason.as_deref(),
                                Some(actor.profile_id),
                            )
                            .await?
                    }
                };

                self.repository
                    .append_history(
                        &mut tx,
                        "user_permission",
                        granted.id,
                        "grant",
                        None,
                        Some(&serde_json::to_value(&granted)?),
                        Some(actor.profile_id),
                        Some(&serde_json::json!({ "bulk": true })),
                        true,
                    )
                    .await?;

                summary.created += 1;
                touched_users.insert(*user_id);
            }
        }

        tx.commit().await?;

        let touched: Vec<Uuid> = touched_users.into_iter().collect();
        self.fabric.invalidate_users(&touched).await;

        let processed = summary.created + summary.skipped;
        let failed = errors.len() as u64;

        info!(
            processed = processed,
            failed = failed,
            "Bulk grant completed"
        );

        Ok(BulkOperationResult {
            processed,
            failed,
            summary,
            errors,
        })
    }

    async fn run_bulk_revoke(
        &self,
        actor: &RequestContext,
        request: &BulkRevokeRequest,
    ) -> Result<BulkOperationResult> {
        // Critical codes may only be revoked under force_revoke
        for code in &request.permission_codes {
            if CRITICAL_PERMISSION_CODES.contains(&code.as_str()) && !request.force_revoke {
                return Err(Error::new(
                    ErrorCode::PermissionDenied,
                    format!("Revoking critical permission '{}' requires force_revoke", code),
                ));
            }
        }

        let mut permissions: HashMap<String, Uuid> = HashMap::new();
        let mut unknown_codes: HashSet<String> = HashSet::new();
        for code in &request.permission_codes {
            match self.repository.get_permission_by_code(code).await? {
                Some(permission) => {
                    permissions.insert(code.clone(), permission.id);
                }
                None => {
                    unknown_codes.insert(code.clone());
                }
            }
        }

        let mut errors: Vec<BulkErrorItem> = Vec::new();
        let mut summary = BulkSummary::default();
        let mut touched_users: HashSet<Uuid> = HashSet::new();

        let mut tx = self.repository.db().begin().await?;

        for user_id in &request.user_ids {
            for code in &request.permission_codes {
                if unknown_codes.contains(code) {
                    errors.push(BulkErrorItem {
                        target_id: *user_id,
                        permission_code: code.clone(),
                        error: "Permission code not found".to_string(),
                    });
                    continue;
                }

                let permission_id = permissions[code];
                let previous = self
                    .repository
                    .get_user_permission(*user_id, permission_id)
                    .await?;

                match previous {
                    Some(row) if row.is_granted => {
                        let previous_state = serde_json::to_value(&row)?;
                        let revoked = self
                            .repository
                            .revoke_user_permission(
                                &mut tx,
                                *user_id,
                                permission_id,
                                &request.revoke_reason,
                            )
                            .await?;
                        self.repository
                            .append_history(
                                &mut tx,
                                "user_permission",
                                revoked.id,
                                "revoke",
                                Some(&previous_state),
                                Some(&serde_json::to_value(&revoked)?),
                                Some(actor.profile_id),
                                Some(&serde_json::json!({ "bulk": true })),
                                true,
                            )
                            .await?;
                        summary.created += 1;
                        touched_users.insert(*user_id);
                    }
                    _ => {
                        errors.push(BulkErrorItem {
                            target_id: *user_id,
                            permission_code: code.clone(),
                            error: "No active grant to revoke".to_string(),
                        });
                    }
                }
            }
        }

        tx.commit().await?;

        let touched: Vec<Uuid> = touched_users.into_iter().collect();
        self.fabric.invalidate_users(&touched).await;

        let processed = summary.created + summary.skipped;
        let failed = errors.len() as u64;

        info!(
            processed = processed,
            failed = failed,
            "Bulk revoke completed"
        );

        Ok(BulkOperationResult {
            processed,
            failed,
            summary,
            errors,
        })
    }
}
