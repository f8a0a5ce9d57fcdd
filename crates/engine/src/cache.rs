//! Permission cache service.
//!
//! Wraps the key-value adapter with permission-shaped keys, TTL classes,
//! warm-up tracking and batch pipelines. The cache is not authoritative: a
//! stale entry can only be wrong in the direction of "formerly allowed",
//! which is why every mutation invalidates eagerly before its response
//! returns (see the invalidation fabric).
//!
//! Key shapes:
//! - check result: `perm:<userId>:<resource>:<action>:<scope|none>:<resourceId|all>`
//! - user summary: `user:<userId>:summary`
//! - role permissions: `role:<roleId>:permissions`
//! - warm-up counter: `warmup:activity:<userId>`

use authz_core::config::{CacheConfig, WarmupConfig};
use authz_core::{CheckMetrics, PipelineSet, RedisCacheAdapter, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// TTL class chosen per check by resource and action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// READ-action checks (default 600 s)
    Read,
    /// user/role/permission UPDATE or DELETE (default 60 s)
    Critical,
    /// Everything else (default 300 s)
    Default,
}

/// Resources whose mutations are cached under the critical TTL.
const CRITICAL_RESOURCES: &[&str] = &["user", "role", "permission"];

impl TtlClass {
    /// Classify a check by its resource and action.
    pub fn for_check(resource: &str, action: &str) -> Self {
        if action == "READ" {
            return TtlClass::Read;
        }
        if CRITICAL_RESOURCES.contains(&resource) && (action == "UPDATE" || action == "DELETE") {
            return TtlClass::Critical;
        }
        TtlClass::Default
    }

    pub fn ttl_secs(&self, config: &CacheConfig) -> u64 {
        match self {
            TtlClass::Read => config.read_ttl_secs,
            TtlClass::Critical => config.critical_ttl_secs,
            TtlClass::Default => config.default_ttl_secs,
        }
    }
}

/// Stored payload of one cached check result. Only `is_allowed` is returned
/// on fetch; the rest supports debugging and eviction audits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCheck {
    pub is_allowed: bool,
    pub cached_at: DateTime<Utc>,
    pub ttl: u64,
    pub resource: String,
    pub action: String,
    pub scope: Option<String>,
    pub resource_id: Option<String>,
}

/// Permission-shaped cache operations over the key-value adapter.
#[derive(Clone)]
pub struct PermissionCacheService {
    adapter: RedisCacheAdapter,
    metrics: CheckMetrics,
    cache_config: CacheConfig,
    warmup_config: WarmupConfig,
}

impl PermissionCacheService {
    pub fn new(
        adapter: RedisCacheAdapter,
        metrics: CheckMetrics,
        cache_config: CacheConfig,
        warmup_config: WarmupConfig,
    ) -> Self {
        Self {
            adapter,
            metrics,
            cache_config,
            warmup_config,
        }
    }

    // Key construction

    pub fn check_key(
        user_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<&str>,
        resource_id: Option<&str>,
    ) -> String {
        format!(
            "perm:{}:{}:{}:{}:{}",
            user_id,
            resource,
            action,
            scope.unwrap_or("none"),
            resource_id.unwrap_or("all")
        )
    }

    pub fn user_summary_key(user_id: Uuid) -> String {
        format!("user:{}:summary", user_id)
    }

    pub fn role_key(role_id: Uuid) -> String {
        format!("role:{}:permissions", role_id)
    }

    pub fn warmup_key(user_id: Uuid) -> String {
        format!("warmup:activity:{}", user_id)
    }

    // Check results

    /// Fetch a cached decision. Misses and adapter errors both count as
    /// cache misses; errors additionally degrade to `None` so the caller
    /// falls through to the database.
    pub async fn get_check(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<Option<bool>> {
        let key = Self::check_key(user_id, resource, action, scope, resource_id);

        let raw = match self.adapter.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.record_cache_miss("redis");
                return Err(e);
            }
        };

        match raw {
            Some(payload) => match serde_json::from_str::<CachedCheck>(&payload) {
                Ok(cached) => {
                    self.metrics.record_cache_hit("redis");
                    Ok(Some(cached.is_allowed))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Corrupt cache entry, treating as miss");
                    self.metrics.record_cache_miss("redis");
                    Ok(None)
                }
            },
            None => {
                self.metrics.record_cache_miss("redis");
                Ok(None)
            }
        }
    }

    /// Store a decision under the TTL class of its coordinates.
    pub async fn set_check(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<&str>,
        resource_id: Option<&str>,
        is_allowed: bool,
    ) -> Result<()> {
        let ttl = TtlClass::for_check(resource, action).ttl_secs(&self.cache_config);
        let key = Self::check_key(user_id, resource, action, scope, resource_id);

        let payload = CachedCheck {
            is_allowed,
            cached_at: Utc::now(),
            ttl,
            resource: resource.to_string(),
            action: action.to_string(),
            scope: scope.map(|s| s.to_string()),
            resource_id: resource_id.map(|s| s.to_string()),
        };

        self.adapter
            .set(&key, &serde_json::to_string(&payload)?, ttl)
            .await
    }

    /// Pipelined multi-get for a batch check. Returns per-key decisions
    /// positionally; `None` marks a miss to be resolved downstream.
    pub async fn get_checks_batch(&self, keys: &[String]) -> Result<Vec<Option<bool>>> {
        let raw = self.adapter.mget(keys).await?;

        let decisions = raw
            .into_iter()
            .map(|entry| {
                entry.and_then(|payload| {
                    serde_json::from_str::<CachedCheck>(&payload)
                        .ok()
                        .map(|cached| cached.is_allowed)
                })
            })
            .collect();

        Ok(decisions)
    }

    // Warm-up

    /// Record one check against the user's warm-up counter. The increment
    /// and the window expiry are applied by one atomic server-side script.
    /// Returns true when the counter has just crossed the threshold.
    pub async fn record_activity(&self, user_id: Uuid) -> Result<bool> {
        let key = Self::warmup_key(user_id);
        let count = self
            .adapter
            .incr_with_window(&key, self.warmup_config.window_secs)
            .await?;

        Ok(count == self.warmup_config.threshold as i64)
    }

    /// Pre-populate a warmed-up user's permissions with one pipelined SET,
    /// bounded by the warm-up batch size.
    pub async fn warm_user_permissions(
        &self,
        user_id: Uuid,
        permissions: &[(String, String, Option<String>)],
    ) -> Result<usize> {
        let batch: Vec<PipelineSet> = permissions
            .iter()
            .take(self.warmup_config.batch_size.min(self.cache_config.max_items))
            .map(|(resource, action, scope)| {
                let ttl = TtlClass::for_check(resource, action).ttl_secs(&self.cache_config);
                let payload = CachedCheck {
                    is_allowed: true,
                    cached_at: Utc::now(),
                    ttl,
                    resource: resource.clone(),
                    action: action.clone(),
                    scope: scope.clone(),
                    resource_id: None,
                };
                PipelineSet {
                    key: Self::check_key(user_id, resource, action, scope.as_deref(), None),
                    value: serde_json::to_string(&payload).unwrap_or_default(),
                    ttl_secs: ttl,
                }
            })
            .collect();

        let written = batch.len();
        self.adapter.pipeline_set(&batch).await?;

        debug!(user_id = %user_id, written = written, "Warm-up batch written");
        Ok(written)
    }

    // Invalidation

    /// Drop everything cached for a user: the summary key, then every
    /// `perm:<userId>:*` entry via a batched scan-delete.
    pub async fn invalidate_user_cache(&self, user_id: Uuid) -> Result<u64> {
        self.adapter
            .del(&[Self::user_summary_key(user_id)])
            .await?;

        let deleted = self
            .adapter
            .delete_pattern(&format!("perm:{}:*", user_id))
            .await?;

        self.metrics.invalidations_total.with_label_values(&["user"]).inc();
        Ok(deleted)
    }

    /// Drop a role's cached permission set. Holder caches are invalidated
    /// by the invalidation fabric, which enumerates holders from the store.
    pub async fn invalidate_role_cache(&self, role_id: Uuid) -> Result<()> {
        self.adapter.del(&[Self::role_key(role_id)]).await?;
        self.metrics.invalidations_total.with_label_values(&["role"]).inc();
        Ok(())
    }

    /// Remaining TTL of a cached check, for diagnostics.
    pub async fn check_ttl(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<Option<i64>> {
        let key = Self::check_key(user_id, resource, action, scope, resource_id);
        self.adapter.ttl(&key).await
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.cache_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_class_selection() {
        // READ anywhere takes the long class
        assert_eq!(TtlClass::for_check("document", "READ"), TtlClass::Read);
        assert_eq!(TtlClass::for_check("user", "READ"), TtlClass::Read);

        // Mutations of the authorization entities are critical
        assert_eq!(TtlClass::for_check("user", "UPDATE"), TtlClass::Critical);
        assert_eq!(TtlClass::for_check("role", "DELETE"), TtlClass::Critical);
        assert_eq!(
            TtlClass::for_check("permission", "UPDATE"),
            TtlClass::Critical
        );

        // Everything else is default
        assert_eq!(TtlClass::for_check("document", "UPDATE"), TtlClass::Default);
        assert_eq!(TtlClass::for_check("user", "CREATE"), TtlClass::Default);
        assert_eq!(TtlClass::for_check("invoice", "APPROVE"), TtlClass::Default);
    }

    #[test]
    fn ttl_class_durations_follow_config() {
        let config = CacheConfig::default();
        assert_eq!(TtlClass::Read.ttl_secs(&config), 600);
        assert_eq!(TtlClass::Critical.ttl_secs(&config), 60);
        assert_eq!(TtlClass::Default.ttl_secs(&config), 300);
    }

    #[test]
    fn key_shapes() {
        let user_id = Uuid::nil();

        assert_eq!(
            PermissionCacheService::check_key(user_id, "document", "READ", Some("OWN"), Some("d1")),
            format!("perm:{}:document:READ:OWN:d1", user_id)
        );
        assert_eq!(
            PermissionCacheService::check_key(user_id, "document", "READ", None, None),
            format!("perm:{}:document:READ:none:all", user_id)
        );
        assert_eq!(
            PermissionCacheService::user_summary_key(user_id),
            format!("user:{}:summary", user_id)
        );
        assert_eq!(
            PermissionCacheService::role_key(user_id),
            format!("role:{}:permissions", user_id)
        );
        assert_eq!(
            PermissionCacheService::warmup_key(user_id),
            format!("warmup:activity:{}", user_id)
        );
    }

    #[test]
    fn cached_payload_round_trips() {
        let payload = CachedCheck {
            is_allowed: true,
            cached_at: Utc::now(),
            ttl: 600,
            resource: "document".to_string(),
            action: "READ".to_string(),
            scope: Some("OWN".to_string()),
            resource_id: Some("d1".to_string()),
        };

        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: CachedCheck = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.is_allowed);
        assert_eq!(decoded.ttl, 600);
        assert_eq!(decoded.resource, "document");
    }
}
