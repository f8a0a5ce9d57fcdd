//! Permission matrix service.
//!
//! Maintains the per-user pre-computed effective-permission table used as
//! the first lookup layer of the check engine. Rows carry a 24-hour expiry
//! and the maximum priority of their contributing layers (direct = 100,
//! role = 50). Policy-derived outcomes are never written to the matrix.

use crate::models::PermissionMatrixEntry;
use crate::repository::{AuthzRepository, MatrixRow};
use authz_core::config::MatrixConfig;
use authz_core::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct PermissionMatrixService {
    repository: AuthzRepository,
    config: MatrixConfig,
}

impl PermissionMatrixService {
    pub fn new(repository: AuthzRepository, config: MatrixConfig) -> Self {
        Self { repository, config }
    }

    /// O(1) lookup of a pre-computed decision.
    pub async fn lookup(
        &self,
        user_profile_id: Uuid,
        permission_key: &str,
    ) -> Result<Option<PermissionMatrixEntry>> {
        self.repository
            .get_matrix_entry(user_profile_id, permission_key)
            .await
    }

    /// Recompute every matrix row for one user from the authoritative
    /// store. Existing rows for keys that no longer resolve are removed by
    /// the preceding delete.
    pub async fn recompute_user(&self, user_profile_id: Uuid) -> Result<usize> {
        self.repository
            .delete_matrix_rows_for_user(user_profile_id)
            .await?;

        let effective = self
            .repository
            .get_effective_permissions_detailed(user_profile_id)
            .await?;

        // Fold duplicate keys, keeping every source and the max priority
        let mut rows: HashMap<String, MatrixRow> = HashMap::new();
        let expires_at = Utc::now() + Duration::hours(self.config.expiry_hours);

        for (permission, source, priority) in effective {
            let key = permission.permission_key();
            let entry = rows.entry(key.clone()).or_insert_with(|| MatrixRow {
                user_profile_id,
                permission_key: key,
                is_allowed: true,
                granted_by: Vec::new(),
                priority: 0,
                expires_at,
            });
            if !entry.granted_by.contains(&source) {
                entry.granted_by.push(source);
            }
            entry.priority = entry.priority.max(priority);
        }

        let count = rows.len();
        for row in rows.values() {
            self.repository.upsert_matrix_entry(row).await?;
        }

        debug!(user_id = %user_profile_id, rows = count, "Matrix recomputed");
        Ok(count)
    }

    /// Drop a user's rows after a mutation. High-priority users get a
    /// synchronous recompute so their fast path never goes cold.
    pub async fn invalidate_user(&self, user_profile_id: Uuid) -> Result<()> {
        self.repository
            .delete_matrix_rows_for_user(user_profile_id)
            .await?;

        let tracking = self.repository.get_user_tracking(user_profile_id).await?;
        if tracking.map(|t| t.is_high_priority).unwrap_or(false) {
            self.recompute_user(user_profile_id).await?;
        }

        Ok(())
    }

    /// Hourly refresh: recompute up to a batch of high-priority users plus
    /// a batch of regular active users.
    pub async fn refresh_batch(&self) -> Result<usize> {
        let high_priority = self
            .repository
            .get_high_priority_users(self.config.batch_size)
            .await?;
        let regular = self
            .repository
            .get_regular_active_users(self.config.batch_size)
            .await?;

        let mut refreshed = 0usize;
        for user_id in high_priority.into_iter().chain(regular) {
            self.recompute_user(user_id).await?;
            refreshed += 1;
        }

        if refreshed > 0 {
            info!(users = refreshed, "Matrix refresh batch completed");
        }
        Ok(refreshed)
    }

    /// Daily cleanup: drop expired rows and reset stale trackers.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let deleted = self.repository.delete_expired_matrix_rows(Utc::now()).await?;
        let reset = self
            .repository
            .reset_inactive_trackers(Duration::hours(48))
            .await?;

        if deleted > 0 || reset > 0 {
            info!(deleted = deleted, trackers_reset = reset, "Matrix cleanup completed");
        }
        Ok(deleted)
    }

    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }
}
