//! Pluggable policy evaluators.
//!
//! Each policy type (time, location, attribute) ships one evaluator behind
//! the shared [`PolicyEvaluator`] contract. A [`PolicyEvaluatorRegistry`]
//! keyed by policy type dispatches evaluation; the surface is intentionally
//! small and evaluators hold no shared mutable state.

pub mod attribute;
pub mod location;
pub mod time;

pub use attribute::AttributeEvaluator;
pub use location::LocationEvaluator;
pub use time::TimeEvaluator;

use crate::models::PolicyType;
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Context a policy is evaluated against.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub user_id: Uuid,
    /// Evaluation instant; converted to the policy's timezone where needed
    pub now: DateTime<Utc>,
    /// Attributes of the principal (department, position, custom fields)
    pub user_attributes: Value,
    /// Attributes of the resource under check
    pub resource_attributes: Value,
    /// Request environment: country, city, ipAddress, latitude, longitude
    pub environment: Value,
}

impl EvaluationContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            now: Utc::now(),
            user_attributes: Value::Null,
            resource_attributes: Value::Null,
            environment: Value::Null,
        }
    }

    /// Build from the free-form `context` object of a check request.
    /// Recognized top-level keys: `user`, `resource`, `environment`;
    /// any other keys are folded into the environment.
    pub fn from_request(user_id: Uuid, context: &Value) -> Self {
        let mut ctx = Self::new(user_id);

        if let Some(object) = context.as_object() {
            let mut environment = serde_json::Map::new();
            for (key, value) in object {
                match key.as_str() {
                    "user" => ctx.user_attributes = value.clone(),
                    "resource" => ctx.resource_attributes = value.clone(),
                    "environment" => {
                        if let Some(env) = value.as_object() {
                            for (k, v) in env {
                                environment.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    _ => {
                        environment.insert(key.clone(), value.clone());
                    }
                }
            }
            if !environment.is_empty() {
                ctx.environment = Value::Object(environment);
            }
        }

        ctx
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Outcome of evaluating one policy's rules against a context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PolicyEvaluation {
    /// Whether the policy applies under this context
    pub is_applicable: bool,
    /// Permission codes granted when applicable
    pub granted_permissions: Vec<String>,
    /// Permission codes denied when applicable
    pub denied_permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub metadata: Value,
}

impl PolicyEvaluation {
    pub fn applicable() -> Self {
        Self {
            is_applicable: true,
            granted_permissions: Vec::new(),
            denied_permissions: Vec::new(),
            reason: None,
            metadata: Value::Null,
        }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            is_applicable: false,
            granted_permissions: Vec::new(),
            denied_permissions: Vec::new(),
            reason: Some(reason.into()),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Uniform contract every policy evaluator implements.
pub trait PolicyEvaluator: Send + Sync {
    /// The policy type this evaluator handles.
    fn policy_type(&self) -> PolicyType;

    /// Structural validation of a rules blob. Used at policy write time;
    /// a policy whose rules fail validation is rejected.
    fn validate(&self, rules: &Value) -> bool;

    /// Evaluate rules against a context.
    fn evaluate(&self, rules: &Value, context: &EvaluationContext) -> Result<PolicyEvaluation>;
}

/// Registry dispatching evaluators by policy type.
pub struct PolicyEvaluatorRegistry {
    evaluators: HashMap<PolicyType, Arc<dyn PolicyEvaluator>>,
}

impl PolicyEvaluatorRegistry {
    /// Registry with the three built-in evaluators.
    pub fn with_builtin() -> Self {
        let mut registry = Self {
            evaluators: HashMap::new(),
        };
        registry.register(Arc::new(TimeEvaluator::new()));
        registry.register(Arc::new(LocationEvaluator::new()));
        registry.register(Arc::new(AttributeEvaluator::new()));
        registry
    }

    pub fn register(&mut self, evaluator: Arc<dyn PolicyEvaluator>) {
        self.evaluators.insert(evaluator.policy_type(), evaluator);
    }

    pub fn get(&self, policy_type: PolicyType) -> Result<Arc<dyn PolicyEvaluator>> {
        self.evaluators
            .get(&policy_type)
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    ErrorCode::PolicyInvalidRules,
                    format!("No evaluator registered for {}", policy_type.as_str()),
                )
            })
    }

    /// Validate a rules blob against the evaluator of the given type.
    pub fn validate_rules(&self, policy_type: PolicyType, rules: &Value) -> Result<()> {
        let evaluator = self.get(policy_type)?;
        if evaluator.validate(rules) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorCode::PolicyInvalidRules,
                format!("Rules failed validation for {}", policy_type.as_str()),
            ))
        }
    }

    pub fn evaluate(
        &self,
        policy_type: PolicyType,
        rules: &Value,
        context: &EvaluationContext,
    ) -> Result<PolicyEvaluation> {
        self.get(policy_type)?.evaluate(rules, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_covers_all_types() {
        let registry = PolicyEvaluatorRegistry::with_builtin();
        assert!(registry.get(PolicyType::TimeBased).is_ok());
        assert!(registry.get(PolicyType::LocationBased).is_ok());
        assert!(registry.get(PolicyType::AttributeBased).is_ok());
    }

    #[test]
    fn context_from_request_splits_sections() {
        let context = EvaluationContext::from_request(
            Uuid::new_v4(),
            &json!({
                "user": { "department": "IT" },
                "resource": { "owner": "u1" },
                "country": "ID",
                "ipAddress": "10.0.0.5"
            }),
        );

        assert_eq!(context.user_attributes["department"], "IT");
        assert_eq!(context.resource_attributes["owner"], "u1");
        assert_eq!(context.environment["country"], "ID");
        assert_eq!(context.environment["ipAddress"], "10.0.0.5");
    }

    #[test]
    fn validate_rules_rejects_malformed_blob() {
        let registry = PolicyEvaluatorRegistry::with_builtin();
        let err = registry
            .validate_rules(PolicyType::TimeBased, &json!("not an object"))
            .unwrap_err();
        assert_eq!(err.code, authz_core::ErrorCode::PolicyInvalidRules);
    }
}
