//! Permission check engine.
//!
//! The hot path. Resolution short-circuits on the first authoritative
//! answer: superadmin bypass, then the pre-computed matrix, then the Redis
//! cache, then full database resolution composed of the resource, direct,
//! role, delegation and policy layers. Every downstream dependency sits
//! behind its circuit breaker; cache outages degrade to the database and a
//! database outage under an open breaker resolves to a deny with an outage
//! reason rather than an error.
//!
//! Ordering rules the resolution upholds:
//! - explicit user-level deny beats any grant;
//! - within direct grants the highest priority wins, ties broken by newer
//!   `created_at`;
//! - resource-level grants are additive (allow-only);
//! - policy deny beats policy allow; lower policy `priority` value wins.

use crate::cache::PermissionCacheService;
use crate::dto::{BatchCheckRequest, BatchCheckResponse, CheckRequest, CheckResult, CheckTriple};
use crate::matrix::PermissionMatrixService;
use crate::models::{Permission, PermissionCheckLog, UserPermission};
use crate::policy::{EvaluationContext, PolicyEvaluatorRegistry};
use crate::repository::AuthzRepository;
use authz_core::config::{CheckConfig, WarmupConfig};
use authz_core::{BreakerRegistry, CheckMetrics, Error, ErrorCode, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};
use uuid::Uuid;

const REASON_NO_PERMISSION: &str = "no matching permission";
const REASON_EXPLICIT_DENY: &str = "Explicitly denied by user permission";
const REASON_STORE_UNAVAILABLE: &str = "authorization store unavailable";

#[derive(Clone)]
pub struct CheckEngine {
    repository: AuthzRepository,
    cache: PermissionCacheService,
    matrix: PermissionMatrixService,
    policies: Arc<PolicyEvaluatorRegistry>,
    breakers: Arc<BreakerRegistry>,
    metrics: CheckMetrics,
    config: CheckConfig,
    warmup: WarmupConfig,
}

/// Outcome of one resolution, tagged with the layer that answered.
struct Resolution {
    is_allowed: bool,
    granted_by: Vec<String>,
    reason: Option<String>,
    source: &'static str,
}

impl CheckEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: AuthzRepository,
        cache: PermissionCacheService,
        matrix: PermissionMatrixService,
        policies: Arc<PolicyEvaluatorRegistry>,
        breakers: Arc<BreakerRegistry>,
        metrics: CheckMetrics,
        config: CheckConfig,
        warmup: WarmupConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            matrix,
            policies,
            breakers,
            metrics,
            config,
            warmup,
        }
    }

    /// Resolve one permission check under the configured deadline.
    pub async fn check(&self, request: CheckRequest) -> Result<CheckResult> {
        let started = Instant::now();
        self.metrics.active_checks.inc();

        let outcome = timeout(
            Duration::from_millis(self.config.timeout_ms),
            self.resolve(&request),
        )
        .await;

        self.metrics.active_checks.dec();
        let duration_ms = started.elapsed().as_millis() as u64;

        let resolution = match outcome {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                self.metrics.timeouts_total.inc();
                return Err(Error::new(
                    ErrorCode::PermissionCheckTimeout,
                    format!(
                        "Permission check exceeded {} ms deadline",
                        self.config.timeout_ms
                    ),
                ));
            }
        };

        self.metrics
            .record_check(resolution.source, resolution.is_allowed, duration_ms as f64);

        self.write_check_log(&request, &resolution, duration_ms).await;

        Ok(CheckResult {
            is_allowed: resolution.is_allowed,
            granted_by: resolution.granted_by,
            reason: resolution.reason,
            check_duration_ms: duration_ms,
        })
    }

    /// Batch check: one pipelined cache multi-get, misses resolved
    /// sequentially against the database.
    pub async fn batch_check(&self, request: BatchCheckRequest) -> Result<BatchCheckResponse> {
        if request.checks.len() > self.config.batch_max_size {
            return Err(Error::new(
                ErrorCode::PermissionBatchSizeExceeded,
                format!(
                    "Batch of {} exceeds the maximum of {}",
                    request.checks.len(),
                    self.config.batch_max_size
                ),
            ));
        }

        let started = Instant::now();
        let mut results = std::collections::HashMap::new();
        let mut cache_hits = 0usize;

        // Superadmin answers every triple without touching the cache
        let profile = self.repository.get_user_profile(request.user_id).await?;
        if profile.as_ref().map(|p| p.is_superadmin).unwrap_or(false) {
            for triple in &request.checks {
                results.insert(triple.key(), true);
            }
            let total = results.len();
            return Ok(BatchCheckResponse {
                total_checked: total,
                total_allowed: total,
                cache_hits: 0,
                results,
            });
        }

        let keys: Vec<String> = request
            .checks
            .iter()
            .map(|t| {
                PermissionCacheService::check_key(
                    request.user_id,
                    &t.resource,
                    &t.action,
                    t.scope.as_deref(),
                    None,
                )
            })
            .collect();

        let cached = self
            .breakers
            .cache()
            .execute(
                || async { self.cache.get_checks_batch(&keys).await },
                Some(vec![None; keys.len()]),
            )
            .await
            .unwrap_or_else(|_| vec![None; keys.len()]);

        for (triple, cached_decision) in request.checks.iter().zip(cached) {
            let decision = match cached_decision {
                Some(is_allowed) => {
                    cache_hits += 1;
                    self.metrics.record_cache_hit("redis");
                    is_allowed
                }
                None => {
                    self.metrics.record_cache_miss("redis");
                    let resolution = self
                        .resolve_database(request.user_id, triple, None, &None)
                        .await?;
                    self.write_cache(request.user_id, triple, resolution.is_allowed)
                        .await;
                    resolution.is_allowed
                }
            };
            results.insert(triple.key(), decision);
        }

        let total_checked = results.len();
        let total_allowed = results.values().filter(|allowed| **allowed).count();

        self.metrics.record_batch(
            "batch_check",
            total_checked,
            cache_hits,
            started.elapsed().as_secs_f64(),
        );

        Ok(BatchCheckResponse {
            results,
            total_checked,
            total_allowed,
            cache_hits,
        })
    }

    // Resolution pipeline

    async fn resolve(&self, request: &CheckRequest) -> Result<Resolution> {
        // 1. Superadmin bypass
        let profile = self.repository.get_user_profile(request.user_id).await?;
        if profile.as_ref().map(|p| p.is_superadmin).unwrap_or(false) {
            return Ok(Resolution {
                is_allowed: true,
                granted_by: vec!["superadmin".to_string()],
                reason: None,
                source: "superadmin",
            });
        }

        // 2. Activity tracking, fire-and-forget
        self.track_activity(request.user_id);

        let triple = CheckTriple {
            resource: request.resource.clone(),
            action: request.action.clone(),
            scope: request.scope.clone(),
        };

        // 3. Matrix lookup
        let permission_key = triple.key();
        let matrix_hit = self
            .breakers
            .matrix()
            .execute(
                || async {
                    self.matrix
                        .lookup(request.user_id, &permission_key)
                        .await
                },
                Some(None),
            )
            .await
            .unwrap_or(None);

        if let Some(entry) = matrix_hit {
            self.metrics.record_cache_hit("matrix");
            return Ok(Resolution {
                is_allowed: entry.is_allowed,
                granted_by: entry.granted_by_sources(),
                reason: None,
                source: "matrix",
            });
        }
        self.metrics.record_cache_miss("matrix");

        // 4. Cache lookup
        let cached = self
            .breakers
            .cache()
            .execute(
                || async {
                    self.cache
                        .get_check(
                            request.user_id,
                            &request.resource,
                            &request.action,
                            request.scope.as_deref(),
                            request.resource_id.as_deref(),
                        )
                        .await
                },
                Some(None),
            )
            .await
            .unwrap_or(None);

        if let Some(is_allowed) = cached {
            return Ok(Resolution {
                is_allowed,
                granted_by: vec!["cache".to_string()],
                reason: None,
                source: "redis",
            });
        }

        // 5. Database resolution under the database breaker
        let resolution = match self.breakers.database().try_acquire().await {
            true => {
                let result = self
                    .resolve_database(
                        request.user_id,
                        &triple,
                        request.resource_id.as_deref(),
                        &request.context,
                    )
                    .await;
                match result {
                    Ok(resolution) => {
                        self.breakers.database().record_success().await;
                        resolution
                    }
                    Err(e) => {
                        self.breakers.database().record_failure().await;
                        self.metrics
                            .breaker_failures_total
                            .with_label_values(&["database"])
                            .inc();
                        return Err(e);
                    }
                }
            }
            false => Resolution {
                is_allowed: false,
                granted_by: Vec::new(),
                reason: Some(REASON_STORE_UNAVAILABLE.to_string()),
                source: "fallback",
            },
        };

        // 6. Cache write, best-effort
        if resolution.source == "database" {
            self.write_cache_full(request, resolution.is_allowed).await;
        }

        Ok(resolution)
    }

    /// Full database resolution: permission lookup, then the resource,
    /// direct, role, delegation and policy layers.
    async fn resolve_database(
        &self,
        user_id: Uuid,
        triple: &CheckTriple,
        resource_id: Option<&str>,
        context: &Option<Value>,
    ) -> Result<Resolution> {
        let query_started = Instant::now();

        let permission = match self
            .repository
            .find_permission_by_triple(
                &triple.resource,
                &triple.action,
                triple.scope.as_deref(),
            )
            .await?
        {
            Some(permission) => permission,
            None => {
                return Ok(Resolution {
                    is_allowed: false,
                    granted_by: Vec::new(),
                    reason: Some(REASON_NO_PERMISSION.to_string()),
                    source: "database",
                })
            }
        };

        let mut granted_by: Vec<String> = Vec::new();

        // Resource layer: allow-only contribution for a specific instance
        if let Some(instance_id) = resource_id {
            let resource_grant = self
                .repository
                .get_active_resource_permission(
                    user_id,
                    permission.id,
                    &triple.resource,
                    instance_id,
                )
                .await?;
            if resource_grant.is_some() {
                granted_by.push("resource-specific".to_string());
            }
        }

        // Direct layer
        let direct = self
            .repository
            .get_effective_user_permissions(user_id, permission.id)
            .await?;

        if let Some(winner) = direct.first() {
            if !winner.is_granted {
                self.record_db_duration(query_started);
                return Ok(Resolution {
                    is_allowed: false,
                    granted_by: Vec::new(),
                    reason: Some(REASON_EXPLICIT_DENY.to_string()),
                    source: "database",
                });
            }
            if self.grant_conditions_hold(winner, user_id, context) {
                granted_by.push("direct-user-permission".to_string());
            }
        }

        // Role layer, including transitively inherited parents
        let user_roles = self.repository.get_active_user_roles(user_id).await?;
        let role_ids: Vec<Uuid> = user_roles.iter().map(|ur| ur.role_id).collect();
        let expanded = self.repository.expand_inherited_roles(&role_ids).await?;
        let role_grants = self
            .repository
            .get_role_grants_for_permission(&expanded, permission.id)
            .await?;

        for (edge, role_name) in &role_grants {
            if edge.is_granted && !granted_by.contains(role_name) {
                granted_by.push(role_name.clone());
            }
        }

        // Delegation layer: delegated codes contribute like grants
        let delegations = self.repository.get_active_delegations_to(user_id).await?;
        for delegation in &delegations {
            if delegation.permission_codes().contains(&permission.code) {
                granted_by.push("delegation".to_string());
                break;
            }
        }

        // Policy layer
        if let Some(resolution) = self
            .resolve_policies(user_id, &permission, context, &mut granted_by)
            .await?
        {
            self.record_db_duration(query_started);
            return Ok(resolution);
        }

        self.record_db_duration(query_started);

        let is_allowed = !granted_by.is_empty();
        Ok(Resolution {
            is_allowed,
            reason: if is_allowed {
                None
            } else {
                Some("No grant found for this permission".to_string())
            },
            granted_by,
            source: "database",
        })
    }

    /// Dispatch applicable policies sorted by priority. A matching deny
    /// wins immediately; grants contribute to `granted_by`.
    async fn resolve_policies(
        &self,
        user_id: Uuid,
        permission: &Permission,
        context: &Option<Value>,
        granted_by: &mut Vec<String>,
    ) -> Result<Option<Resolution>> {
        let profile = self.repository.get_user_profile(user_id).await?;
        let user_roles = self.repository.get_active_user_roles(user_id).await?;
        let role_ids: Vec<Uuid> = user_roles.iter().map(|ur| ur.role_id).collect();

        let policies = self
            .repository
            .get_applicable_policies(
                user_id,
                &role_ids,
                profile.as_ref().and_then(|p| p.department_id),
                profile.as_ref().and_then(|p| p.position_id),
            )
            .await?;

        if policies.is_empty() {
            return Ok(None);
        }

        let evaluation_context = match context {
            Some(value) => EvaluationContext::from_request(user_id, value),
            None => EvaluationContext::new(user_id),
        };

        for policy in &policies {
            let policy_type = match policy.policy_type() {
                Some(policy_type) => policy_type,
                None => {
                    warn!(policy_id = %policy.id, "Policy has unknown type, skipping");
                    continue;
                }
            };

            let evaluation =
                match self
                    .policies
                    .evaluate(policy_type, &policy.rules, &evaluation_context)
                {
                    Ok(evaluation) => evaluation,
                    Err(e) => {
                        warn!(policy_id = %policy.id, error = %e, "Policy evaluation failed, skipping");
                        continue;
                    }
                };

            if !evaluation.is_applicable {
                continue;
            }

            if policy.deny_codes().contains(&permission.code) {
                return Ok(Some(Resolution {
                    is_allowed: false,
                    granted_by: Vec::new(),
                    reason: Some(format!("Denied by policy '{}'", policy.name)),
                    source: "database",
                }));
            }

            if policy.grant_codes().contains(&permission.code) {
                let label = format!("policy:{}", policy.code);
                if !granted_by.contains(&label) {
                    granted_by.push(label);
                }
            }
        }

        Ok(None)
    }

    /// Evaluate a direct grant's `conditions` blob against the check
    /// context. A blob carrying an `attributes` key reuses the
    /// attribute-rule syntax; any other shape is advisory and holds.
    fn grant_conditions_hold(
        &self,
        grant: &UserPermission,
        user_id: Uuid,
        context: &Option<Value>,
    ) -> bool {
        let conditions = match &grant.conditions {
            Some(conditions) => conditions,
            None => return true,
        };

        let attribute_rules = match conditions.get("attributes") {
            Some(rules) => rules,
            None => return true,
        };

        let evaluation_context = match context {
            Some(value) => EvaluationContext::from_request(user_id, value),
            None => EvaluationContext::new(user_id),
        };

        match self.policies.evaluate(
            crate::models::PolicyType::AttributeBased,
            attribute_rules,
            &evaluation_context,
        ) {
            Ok(evaluation) => evaluation.is_applicable,
            Err(e) => {
                warn!(grant_id = %grant.id, error = %e, "Grant condition evaluation failed, treating as not holding");
                false
            }
        }
    }

    // Side channels

    fn track_activity(&self, user_id: Uuid) {
        let cache = self.cache.clone();
        let repository = self.repository.clone();
        let window = chrono::Duration::seconds(self.warmup.window_secs as i64);
        let threshold = self.warmup.threshold as i64;

        tokio::spawn(async move {
            match cache.record_activity(user_id).await {
                Ok(crossed_threshold) if crossed_threshold => {
                    // Warm the user's permissions once per window
                    match repository.get_effective_permissions_detailed(user_id).await {
                        Ok(effective) => {
                            let triples: Vec<(String, String, Option<String>)> = effective
                                .into_iter()
                                .map(|(p, _, _)| (p.resource, p.action, p.scope))
                                .collect();
                            if let Err(e) = cache.warm_user_permissions(user_id, &triples).await {
                                debug!(user_id = %user_id, error = %e, "Warm-up population failed");
                            }
                        }
                        Err(e) => {
                            debug!(user_id = %user_id, error = %e, "Warm-up permission load failed")
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(user_id = %user_id, error = %e, "Warm-up counter failed"),
            }

            if let Err(e) = repository
                .record_user_activity(user_id, window, threshold)
                .await
            {
                debug!(user_id = %user_id, error = %e, "Activity tracking failed");
            }
        });
    }

    async fn write_cache_full(&self, request: &CheckRequest, is_allowed: bool) {
        let result = self
            .breakers
            .cache()
            .execute(
                || async {
                    self.cache
                        .set_check(
                            request.user_id,
                            &request.resource,
                            &request.action,
                            request.scope.as_deref(),
                            request.resource_id.as_deref(),
                            is_allowed,
                        )
                        .await
                },
                Some(()),
            )
            .await;

        if let Err(e) = result {
            debug!(error = %e, "Cache write failed, decision served uncached");
        }
    }

    async fn write_cache(&self, user_id: Uuid, triple: &CheckTriple, is_allowed: bool) {
        let result = self
            .breakers
            .cache()
            .execute(
                || async {
                    self.cache
                        .set_check(
                            user_id,
                            &triple.resource,
                            &triple.action,
                            triple.scope.as_deref(),
                            None,
                            is_allowed,
                        )
                        .await
                },
                Some(()),
            )
            .await;

        if let Err(e) = result {
            debug!(error = %e, "Batch cache write failed");
        }
    }

    async fn write_check_log(
        &self,
        request: &CheckRequest,
        resolution: &Resolution,
        duration_ms: u64,
    ) {
        let log = PermissionCheckLog {
            id: Uuid::new_v4(),
            user_profile_id: request.user_id,
            resource: request.resource.clone(),
            action: request.action.clone(),
            scope: request.scope.clone(),
            resource_id: request.resource_id.clone(),
            is_allowed: resolution.is_allowed,
            denied_reason: resolution.reason.clone(),
            duration_ms: duration_ms as i64,
            metadata: Some(serde_json::json!({ "grantedBy": resolution.granted_by })),
            created_at: Utc::now(),
        };

        if let Err(e) = self.repository.insert_check_log(&log).await {
            debug!(error = %e, "Check log write failed");
        }
    }

    fn record_db_duration(&self, started: Instant) {
        self.metrics
            .db_query_duration_seconds
            .with_label_values(&["check_resolution"])
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }
}
