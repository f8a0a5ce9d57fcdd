use crate::conditions::{validate_conditions, ConditionSchema};
use crate::dto::{AssignPolicyRequest, CreatePolicyRequest, UpdatePolicyRequest};
use crate::invalidation::InvalidationFabric;
use crate::models::{PermissionPolicy, PolicyAssignment, PolicyType, PrincipalType};
use crate::policy::{EvaluationContext, PolicyEvaluation, PolicyEvaluatorRegistry};
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct PolicyService {
    repository: AuthzRepository,
    evaluators: Arc<PolicyEvaluatorRegistry>,
    fabric: InvalidationFabric,
    audit: AuditLogger,
}

impl PolicyService {
    pub fn new(
        repository: AuthzRepository,
        evaluators: Arc<PolicyEvaluatorRegistry>,
        fabric: InvalidationFabric,
        audit: AuditLogger,
    ) -> Self {
        Self {
            repository,
            evaluators,
            fabric,
            audit,
        }
    }

    pub async fn get_policy(&self, policy_id: Uuid) -> Result<PermissionPolicy> {
        self.repository
            .get_policy_by_id(policy_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PolicyNotFound, "Policy not found"))
    }

    pub async fn list_policies(&self, limit: i64, offset: i64) -> Result<Vec<PermissionPolicy>> {
        self.repository
            .list_policies(limit.clamp(1, 500), offset.max(0))
            .await
    }

    /// Create a policy; rules are validated by the matching evaluator
    /// before anything is written.
    pub async fn create_policy(
        &self,
        actor: &RequestContext,
        request: CreatePolicyRequest,
    ) -> Result<PermissionPolicy> {
        let policy_type = PolicyType::from_str(&request.policy_type).ok_or_else(|| {
            Error::new(
                ErrorCode::PolicyInvalidRules,
                format!("Unknown policy type '{}'", request.policy_type),
            )
        })?;

        self.evaluators.validate_rules(policy_type, &request.rules)?;

        let mut tx = self.repository.db().begin().await?;
        let policy = self.repository.create_policy(&mut tx, &request).await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_policy",
                policy.id,
                "create",
                None,
                Some(&serde_json::to_value(&policy)?),
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        tx.commit().await?;

        self.audit
            .log_entity_change(
                EventType::PolicyCreated,
                &actor.profile_id.to_string(),
                "permission_policy",
                &policy.id.to_string(),
                None,
                Some(serde_json::to_value(&policy)?),
            )
            .await;

        info!(policy_id = %policy.id, policy_type = %request.policy_type, "Policy created");
        Ok(policy)
    }

    pub async fn update_policy(
        &self,
        actor: &RequestContext,
        policy_id: Uuid,
        request: UpdatePolicyRequest,
    ) -> Result<PermissionPolicy> {
        let existing = self.get_policy(policy_id).await?;

        if let Some(rules) = &request.rules {
            let policy_type = existing.policy_type().ok_or_else(|| {
                Error::new(ErrorCode::PolicyInvalidRules, "Policy has unknown type")
            })?;
            self.evaluators.validate_rules(policy_type, rules)?;
        }

        let previous = serde_json::to_value(&existing)?;

        let mut tx = self.repository.db().begin().await?;
        let updated = self
            .repository
            .update_policy(&mut tx, policy_id, &request)
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_policy",
                policy_id,
                "update",
                Some(&previous),
                Some(&serde_json::to_value(&updated)?),
                Some(actor.profile_id),
                None,
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_policy_mutation(policy_id).await?;

        self.audit
            .log_entity_change(
                EventType::PolicyUpdated,
                &actor.profile_id.to_string(),
                "permission_policy",
                &policy_id.to_string(),
                Some(previous),
                Some(serde_json::to_value(&updated)?),
            )
            .await;

        Ok(updated)
    }

    pub async fn delete_policy(&self, actor: &RequestContext, policy_id: Uuid) -> Result<()> {
        let existing = self.get_policy(policy_id).await?;
        let previous = serde_json::to_value(&existing)?;

        // Affected users must be discovered before the assignments cascade
        let affected = self
            .repository
            .get_users_affected_by_policy(policy_id)
            .await?;

        let mut tx = self.repository.db().begin().await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_policy",
                policy_id,
                "delete",
                Some(&previous),
                None,
                Some(actor.profile_id),
                None,
                false,
            )
            .await?;
        self.repository.delete_policy(&mut tx, policy_id).await?;
        tx.commit().await?;

        self.fabric.invalidate_users(&affected).await;

        self.audit
            .log_entity_change(
                EventType::PolicyDeleted,
                &actor.profile_id.to_string(),
                "permission_policy",
                &policy_id.to_string(),
                Some(previous),
                None,
            )
            .await;

        Ok(())
    }

    pub async fn assign_policy(
        &self,
        actor: &RequestContext,
        policy_id: Uuid,
        request: AssignPolicyRequest,
    ) -> Result<PolicyAssignment> {
        self.get_policy(policy_id).await?;

        if PrincipalType::from_str(&request.principal_type).is_none() {
            return Err(Error::new(
                ErrorCode::ValidationFailed,
                format!("Unknown principal type '{}'", request.principal_type),
            ));
        }

        let conditions = match &request.conditions {
            Some(conditions) => Some(validate_conditions(
                conditions,
                ConditionSchema::PolicyAssignment,
            )?),
            None => None,
        };

        let mut tx = self.repository.db().begin().await?;
        let assignment = self
            .repository
            .insert_policy_assignment(
                &mut tx,
                policy_id,
                &request.principal_type,
                request.principal_id,
                conditions.as_ref(),
                request.valid_from,
                request.valid_until,
                Some(actor.profile_id),
            )
            .await?;
        self.repository
            .append_history(
                &mut tx,
                "permission_policy",
                policy_id,
                "update",
                None,
                Some(&serde_json::to_value(&assignment)?),
                Some(actor.profile_id),
                Some(&serde_json::json!({ "operation": "assign" })),
                false,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_policy_mutation(policy_id).await?;

        self.audit
            .log_entity_change(
                EventType::PolicyAssigned,
                &actor.profile_id.to_string(),
                "permission_policy",
                &policy_id.to_string(),
                None,
                Some(serde_json::to_value(&assignment)?),
            )
            .await;

        Ok(assignment)
    }

    pub async fn unassign_policy(
        &self,
        actor: &RequestContext,
        policy_id: Uuid,
        principal_type: &str,
        principal_id: Uuid,
    ) -> Result<()> {
        let mut tx = self.repository.db().begin().await?;
        self.repository
            .delete_policy_assignment(&mut tx, policy_id, principal_type, principal_id)
            .await?;
        tx.commit().await?;

        self.fabric.on_policy_mutation(policy_id).await?;

        self.audit
            .log_entity_change(
                EventType::PolicyUnassigned,
                &actor.profile_id.to_string(),
                "permission_policy",
                &policy_id.to_string(),
                None,
                Some(serde_json::json!({
                    "principal_type": principal_type,
                    "principal_id": principal_id
                })),
            )
            .await;

        Ok(())
    }

    /// Evaluate one policy against a user and context.
    pub async fn evaluate_policy(
        &self,
        policy_id: Uuid,
        user_id: Uuid,
        context: &Value,
    ) -> Result<PolicyEvaluation> {
        let policy = self.get_policy(policy_id).await?;
        let policy_type = policy
            .policy_type()
            .ok_or_else(|| Error::new(ErrorCode::PolicyInvalidRules, "Policy has unknown type"))?;

        let evaluation_context = EvaluationContext::from_request(user_id, context);
        let mut evaluation =
            self.evaluators
                .evaluate(policy_type, &policy.rules, &evaluation_context)?;

        if evaluation.is_applicable {
            evaluation.granted_permissions = policy.grant_codes();
            evaluation.denied_permissions = policy.deny_codes();
        }

        Ok(evaluation)
    }

    /// Evaluate every policy applicable to a user, sorted by priority.
    pub async fn evaluate_all(
        &self,
        user_id: Uuid,
        context: &Value,
    ) -> Result<Vec<(Uuid, PolicyEvaluation)>> {
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

        let evaluation_context = EvaluationContext::from_request(user_id, context);
        let mut results = Vec::with_capacity(policies.len());

        for policy in policies {
            let policy_type = match policy.policy_type() {
                Some(policy_type) => policy_type,
                None => continue,
            };

            let mut evaluation =
                self.evaluators
                    .evaluate(policy_type, &policy.rules, &evaluation_context)?;
            if evaluation.is_applicable {
                evaluation.granted_permissions = policy.grant_codes();
                evaluation.denied_permissions = policy.deny_codes();
            }
            results.push((policy.id, evaluation));
        }

        Ok(results)
    }
}
