//! Attribute-based policy evaluation.
//!
//! Rules are grouped by subject: `userAttributes`, `resourceAttributes`,
//! `environmentAttributes`. Groups are ANDed; within a group the default
//! combiner is AND, and a rule carrying `condition: "OR"` flips the
//! combiner for its own contribution. Field paths are dot-separated; a
//! missing path resolves to undefined, which equals nothing and is
//! contained by nothing.

use super::{EvaluationContext, PolicyEvaluation, PolicyEvaluator};
use crate::models::PolicyType;
use authz_core::{Error, ErrorCode, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AttributeRules {
    #[serde(default)]
    user_attributes: Vec<AttributeRule>,
    #[serde(default)]
    resource_attributes: Vec<AttributeRule>,
    #[serde(default)]
    environment_attributes: Vec<AttributeRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AttributeRule {
    /// Dot-separated path into the attribute object
    field: String,
    operator: String,
    value: Value,
    /// AND (default) or OR; flips the combiner for this rule
    condition: Option<String>,
}

const OPERATORS: &[&str] = &[
    "equals",
    "not_equals",
    "contains",
    "in",
    "not_in",
    "greater_than",
    "less_than",
    "between",
];

pub struct AttributeEvaluator;

impl AttributeEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn parse_rules(rules: &Value) -> Result<AttributeRules> {
        serde_json::from_value(rules.clone()).map_err(|e| {
            Error::new(
                ErrorCode::PolicyInvalidRules,
                format!("Invalid attribute-based rules: {}", e),
            )
        })
    }

    fn rule_is_well_formed(rule: &AttributeRule) -> bool {
        if rule.field.is_empty() || !OPERATORS.contains(&rule.operator.as_str()) {
            return false;
        }

        if let Some(condition) = &rule.condition {
            if condition != "AND" && condition != "OR" {
                return false;
            }
        }

        // Operator-specific type constraints
        match rule.operator.as_str() {
            "in" | "not_in" => rule.value.is_array(),
            "between" => rule
                .value
                .as_array()
                .map(|a| a.len() == 2)
                .unwrap_or(false),
            "greater_than" | "less_than" => rule.value.is_number(),
            _ => true,
        }
    }

    /// Evaluate one rule group with per-rule combiner flipping.
    fn evaluate_group(rules: &[AttributeRule], attributes: &Value) -> bool {
        if rules.is_empty() {
            return true;
        }

        let mut acc = evaluate_rule(&rules[0], attributes);
        for rule in &rules[1..] {
            let outcome = evaluate_rule(rule, attributes);
            if rule.condition.as_deref() == Some("OR") {
                acc = acc || outcome;
            } else {
                acc = acc && outcome;
            }
        }
        acc
    }
}

impl Default for AttributeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a dot-separated path; missing segments yield `None` (undefined).
fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn evaluate_rule(rule: &AttributeRule, attributes: &Value) -> bool {
    let actual = resolve_path(attributes, &rule.field);

    match rule.operator.as_str() {
        "equals" => actual.map(|v| v == &rule.value).unwrap_or(false),
        "not_equals" => actual.map(|v| v != &rule.value).unwrap_or(true),
        "contains" => match actual {
            Some(Value::String(s)) => rule
                .value
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false),
            Some(Value::Array(items)) => items.contains(&rule.value),
            _ => false,
        },
        "in" => match (actual, rule.value.as_array()) {
            (Some(v), Some(candidates)) => candidates.contains(v),
            _ => false,
        },
        "not_in" => match (actual, rule.value.as_array()) {
            (Some(v), Some(candidates)) => !candidates.contains(v),
            (None, Some(_)) => true,
            _ => false,
        },
        "greater_than" => compare_numbers(actual, &rule.value)
            .map(|ordering| ordering == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        "less_than" => compare_numbers(actual, &rule.value)
            .map(|ordering| ordering == std::cmp::Ordering::Less)
            .unwrap_or(false),
        "between" => {
            let bounds = match rule.value.as_array() {
                Some(bounds) if bounds.len() == 2 => bounds,
                _ => return false,
            };
            let low = compare_numbers(actual, &bounds[0]);
            let high = compare_numbers(actual, &bounds[1]);
            matches!(
                (low, high),
                (
                    Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal),
                    Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                )
            )
        }
        _ => false,
    }
}

fn compare_numbers(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = actual?.as_f64()?;
    let b = expected.as_f64()?;
    a.partial_cmp(&b)
}

impl PolicyEvaluator for AttributeEvaluator {
    fn policy_type(&self) -> PolicyType {
        PolicyType::AttributeBased
    }

    fn validate(&self, rules: &Value) -> bool {
        let parsed = match Self::parse_rules(rules) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        let all_rules = parsed
            .user_attributes
            .iter()
            .chain(parsed.resource_attributes.iter())
            .chain(parsed.environment_attributes.iter());

        let mut any = false;
        for rule in all_rules {
            if !Self::rule_is_well_formed(rule) {
                return false;
            }
            any = true;
        }
        any
    }

    fn evaluate(&self, rules: &Value, context: &EvaluationContext) -> Result<PolicyEvaluation> {
        let parsed = Self::parse_rules(rules)?;

        let user_ok = Self::evaluate_group(&parsed.user_attributes, &context.user_attributes);
        if !user_ok {
            return Ok(PolicyEvaluation::not_applicable(
                "User attributes do not satisfy the policy rules",
            ));
        }

        let resource_ok =
            Self::evaluate_group(&parsed.resource_attributes, &context.resource_attributes);
        if !resource_ok {
            return Ok(PolicyEvaluation::not_applicable(
                "Resource attributes do not satisfy the policy rules",
            ));
        }

        let environment_ok =
            Self::evaluate_group(&parsed.environment_attributes, &context.environment);
        if !environment_ok {
            return Ok(PolicyEvaluation::not_applicable(
                "Environment attributes do not satisfy the policy rules",
            ));
        }

        Ok(PolicyEvaluation::applicable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn context_with_user(user: Value) -> EvaluationContext {
        let mut context = EvaluationContext::new(Uuid::new_v4());
        context.user_attributes = user;
        context
    }

    #[test]
    fn equals_on_nested_path() {
        let evaluator = AttributeEvaluator::new();
        let rules = json!({
            "userAttributes": [
                { "field": "department.name", "operator": "equals", "value": "IT" }
            ]
        });

        let matching = context_with_user(json!({ "department": { "name": "IT" } }));
        assert!(evaluator.evaluate(&rules, &matching).unwrap().is_applicable);

        let other = context_with_user(json!({ "department": { "name": "HR" } }));
        assert!(!evaluator.evaluate(&rules, &other).unwrap().is_applicable);
    }

    #[test]
    fn undefined_equals_nothing_and_is_contained_by_nothing() {
        let evaluator = AttributeEvaluator::new();
        let context = context_with_user(json!({}));

        let equals = json!({
            "userAttributes": [
                { "field": "missing.path", "operator": "equals", "value": "x" }
            ]
        });
        assert!(!evaluator.evaluate(&equals, &context).unwrap().is_applicable);

        let contained = json!({
            "userAttributes": [
                { "field": "missing.path", "operator": "in", "value": ["x", "y"] }
            ]
        });
        assert!(!evaluator
            .evaluate(&contained, &context)
            .unwrap()
            .is_applicable);

        // not_equals against undefined holds
        let not_equals = json!({
            "userAttributes": [
                { "field": "missing.path", "operator": "not_equals", "value": "x" }
            ]
        });
        assert!(evaluator
            .evaluate(&not_equals, &context)
            .unwrap()
            .is_applicable);
    }

    #[test]
    fn numeric_operators() {
        let evaluator = AttributeEvaluator::new();
        let context = context_with_user(json!({ "age": 30 }));

        let greater = json!({
            "userAttributes": [
                { "field": "age", "operator": "greater_than", "value": 18 }
            ]
        });
        assert!(evaluator.evaluate(&greater, &context).unwrap().is_applicable);

        let less = json!({
            "userAttributes": [
                { "field": "age", "operator": "less_than", "value": 18 }
            ]
        });
        assert!(!evaluator.evaluate(&less, &context).unwrap().is_applicable);

        let between = json!({
            "userAttributes": [
                { "field": "age", "operator": "between", "value": [18, 65] }
            ]
        });
        assert!(evaluator.evaluate(&between, &context).unwrap().is_applicable);

        let between_excl = json!({
            "userAttributes": [
                { "field": "age", "operator": "between", "value": [40, 65] }
            ]
        });
        assert!(!evaluator
            .evaluate(&between_excl, &context)
            .unwrap()
            .is_applicable);
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        let evaluator = AttributeEvaluator::new();
        let context = context_with_user(json!({
            "email": "staff@example.org",
            "tags": ["finance", "approver"]
        }));

        let string_contains = json!({
            "userAttributes": [
                { "field": "email", "operator": "contains", "value": "@example" }
            ]
        });
        assert!(evaluator
            .evaluate(&string_contains, &context)
            .unwrap()
            .is_applicable);

        let array_contains = json!({
            "userAttributes": [
                { "field": "tags", "operator": "contains", "value": "approver" }
            ]
        });
        assert!(evaluator
            .evaluate(&array_contains, &context)
            .unwrap()
            .is_applicable);
    }

    #[test]
    fn or_condition_flips_the_combiner() {
        let evaluator = AttributeEvaluator::new();
        // department equals HR AND'd with (OR department equals IT)
        let rules = json!({
            "userAttributes": [
                { "field": "department", "operator": "equals", "value": "HR" },
                { "field": "department", "operator": "equals", "value": "IT", "condition": "OR" }
            ]
        });

        let it_user = context_with_user(json!({ "department": "IT" }));
        assert!(evaluator.evaluate(&rules, &it_user).unwrap().is_applicable);

        let sales_user = context_with_user(json!({ "department": "Sales" }));
        assert!(!evaluator.evaluate(&rules, &sales_user).unwrap().is_applicable);
    }

    #[test]
    fn groups_are_anded() {
        let evaluator = AttributeEvaluator::new();
        let rules = json!({
            "userAttributes": [
                { "field": "department", "operator": "equals", "value": "IT" }
            ],
            "environmentAttributes": [
                { "field": "channel", "operator": "equals", "value": "web" }
            ]
        });

        let mut context = context_with_user(json!({ "department": "IT" }));
        context.environment = json!({ "channel": "mobile" });
        let result = evaluator.evaluate(&rules, &context).unwrap();
        assert!(!result.is_applicable);
        assert!(result.reason.unwrap().contains("Environment"));
    }

    #[test]
    fn validate_enforces_operator_type_constraints() {
        let evaluator = AttributeEvaluator::new();

        assert!(evaluator.validate(&json!({
            "userAttributes": [
                { "field": "age", "operator": "between", "value": [1, 2] }
            ]
        })));

        // between needs a 2-element tuple
        assert!(!evaluator.validate(&json!({
            "userAttributes": [
                { "field": "age", "operator": "between", "value": [1] }
            ]
        })));

        // in needs a list
        assert!(!evaluator.validate(&json!({
            "userAttributes": [
                { "field": "dept", "operator": "in", "value": "IT" }
            ]
        })));

        // Unknown operator
        assert!(!evaluator.validate(&json!({
            "userAttributes": [
                { "field": "dept", "operator": "matches", "value": "IT" }
            ]
        })));

        // No rules at all
        assert!(!evaluator.validate(&json!({})));

        // Bad condition value
        assert!(!evaluator.validate(&json!({
            "userAttributes": [
                { "field": "dept", "operator": "equals", "value": "IT", "condition": "XOR" }
            ]
        })));
    }
}
