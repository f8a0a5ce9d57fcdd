//! Invalidation fabric.
//!
//! After any mutation the affected users' cache entries and matrix rows
//! must be dropped before the mutation's response returns. Fan-out runs
//! with bounded parallelism under the cache breaker; a failed invalidation
//! degrades (metric + history entry) instead of failing the mutation,
//! because the authoritative store has already committed.

use crate::cache::PermissionCacheService;
use crate::matrix::PermissionMatrixService;
use crate::repository::AuthzRepository;
use authz_core::{CheckMetrics, CircuitBreaker, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Concurrent invalidations in flight per fan-out.
const FANOUT_CONCURRENCY: usize = 8;

#[derive(Clone)]
pub struct InvalidationFabric {
    repository: AuthzRepository,
    cache: PermissionCacheService,
    matrix: PermissionMatrixService,
    cache_breaker: Arc<CircuitBreaker>,
    metrics: CheckMetrics,
}

impl InvalidationFabric {
    pub fn new(
        repository: AuthzRepository,
        cache: PermissionCacheService,
        matrix: PermissionMatrixService,
        cache_breaker: Arc<CircuitBreaker>,
        metrics: CheckMetrics,
    ) -> Self {
        Self {
            repository,
            cache,
            matrix,
            cache_breaker,
            metrics,
        }
    }

    /// Invalidate one user's cache and matrix state.
    pub async fn invalidate_user(&self, user_id: Uuid) {
        let cache_result = self
            .cache_breaker
            .execute(
                || async { self.cache.invalidate_user_cache(user_id).await },
                Some(0),
            )
            .await;

        if let Err(e) = cache_result {
            self.record_failure("user_cache", user_id, &e).await;
        }

        if let Err(e) = self.matrix.invalidate_user(user_id).await {
            self.record_failure("matrix", user_id, &e).await;
        }
    }

    /// Fan out invalidation to many users with bounded parallelism.
    pub async fn invalidate_users(&self, user_ids: &[Uuid]) {
        if user_ids.is_empty() {
            return;
        }

        debug!(count = user_ids.len(), "Invalidation fan-out starting");

        stream::iter(user_ids.iter().copied())
            .for_each_concurrent(FANOUT_CONCURRENCY, |user_id| async move {
                self.invalidate_user(user_id).await;
            })
            .await;
    }

    /// After a permission mutation: affected users are the direct holders
    /// union role holders; affected roles get their cache dropped too.
    pub async fn on_permission_mutation(&self, permission_id: Uuid) -> Result<()> {
        let affected_users = self
            .repository
            .get_users_affected_by_permission(permission_id)
            .await?;
        let affected_roles = self
            .repository
            .get_roles_with_permission(permission_id)
            .await?;

        for role_id in affected_roles {
            if let Err(e) = self.cache.invalidate_role_cache(role_id).await {
                self.record_failure("role_cache", role_id, &e).await;
            }
        }

        self.invalidate_users(&affected_users).await;
        Ok(())
    }

    /// After a role mutation: the role key plus every active holder.
    pub async fn on_role_mutation(&self, role_id: Uuid) -> Result<()> {
        if let Err(e) = self.cache.invalidate_role_cache(role_id).await {
            self.record_failure("role_cache", role_id, &e).await;
        }

        let holders = self.repository.get_role_holder_ids(role_id).await?;
        self.invalidate_users(&holders).await;
        Ok(())
    }

    /// After a grant/revoke/delegation change touching one user.
    pub async fn on_user_mutation(&self, user_id: Uuid) {
        self.invalidate_user(user_id).await;
    }

    /// After a policy mutation: every user the policy reaches.
    pub async fn on_policy_mutation(&self, policy_id: Uuid) -> Result<()> {
        let affected = self
            .repository
            .get_users_affected_by_policy(policy_id)
            .await?;
        self.invalidate_users(&affected).await;
        Ok(())
    }

    /// Degraded path: count the failure and leave a history trace, but let
    /// the mutation stand.
    async fn record_failure(&self, target: &str, entity_id: Uuid, error: &authz_core::Error) {
        warn!(
            target = target,
            entity_id = %entity_id,
            error = %error,
            "Invalidation failed, continuing degraded"
        );
        self.metrics
            .invalidation_failures_total
            .with_label_values(&[target])
            .inc();

        let db = self.repository.db().clone();
        if let Ok(mut tx) = db.begin().await {
            let _ = self
                .repository
                .append_history(
                    &mut tx,
                    "cache",
                    entity_id,
                    "invalidation_failed",
                    None,
                    None,
                    None,
                    Some(&serde_json::json!({ "target": target, "error": error.to_string() })),
                    false,
                )
                .await;
            let _ = tx.commit().await;
        }
    }
}
