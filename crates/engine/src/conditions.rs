//! Condition blob validation and input sanitization.
//!
//! Grants and policy assignments carry free-form JSON `conditions` that
//! eventually flow into SQL WHERE fragments and evaluator inputs. Everything
//! passes through this single choke-point before being persisted: keys are
//! checked against the schema's allow-list, nesting and size are bounded,
//! and string values are stripped of SQL control characters.

use authz_core::{Error, ErrorCode, Result};
use serde_json::Value;

/// Characters stripped from free-form search input and condition strings.
const SQL_CONTROL_CHARS: &[char] = &['%', '_', '\\', '\'', '"', ';'];

/// Maximum length for sanitized search input.
const MAX_SEARCH_LEN: usize = 100;

/// Maximum nesting depth a condition blob may have.
const MAX_DEPTH: usize = 4;

/// Maximum number of keys per condition object.
const MAX_KEYS: usize = 32;

/// Named schemas for condition blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionSchema {
    /// Conditions attached to user/role/resource grants
    Grant,
    /// Conditions attached to policy assignments
    PolicyAssignment,
}

impl ConditionSchema {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "grant" => Some(Self::Grant),
            "policy_assignment" => Some(Self::PolicyAssignment),
            _ => None,
        }
    }

    /// Top-level keys admitted by this schema.
    fn allowed_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Grant => &[
                "attributes",
                "ip_range",
                "time_window",
                "department_ids",
                "school_ids",
                "max_amount",
                "note",
            ],
            Self::PolicyAssignment => &[
                "attributes",
                "department_ids",
                "school_ids",
                "position_ids",
                "note",
            ],
        }
    }
}

/// Validate and sanitize a condition blob against a named schema.
///
/// Returns the sanitized copy on success, or a validation error naming the
/// offending path.
pub fn validate_conditions(conditions: &Value, schema: ConditionSchema) -> Result<Value> {
    let object = conditions.as_object().ok_or_else(|| {
        Error::new(
            ErrorCode::PermissionInvalidConditions,
            "Conditions must be a JSON object",
        )
    })?;

    if object.len() > MAX_KEYS {
        return Err(Error::new(
            ErrorCode::PermissionInvalidConditions,
            format!("Conditions carry more than {} keys", MAX_KEYS),
        ));
    }

    let allowed = schema.allowed_keys();
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(Error::new(
                ErrorCode::PermissionInvalidConditions,
                format!("Unknown condition key '{}'", key),
            ));
        }
    }

    let mut sanitized = conditions.clone();
    sanitize_value(&mut sanitized, "$", 0)?;
    Ok(sanitized)
}

fn sanitize_value(value: &mut Value, path: &str, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::new(
            ErrorCode::PermissionInvalidConditions,
            format!("Conditions nested too deeply at {}", path),
        ));
    }

    match value {
        Value::String(s) => {
            if s.chars().any(|c| c.is_control()) {
                return Err(Error::new(
                    ErrorCode::PermissionInvalidConditions,
                    format!("Control character in condition string at {}", path),
                ));
            }
            *s = strip_sql_chars(s);
        }
        Value::Array(items) => {
            if items.len() > MAX_KEYS {
                return Err(Error::new(
                    ErrorCode::PermissionInvalidConditions,
                    format!("Condition array too large at {}", path),
                ));
            }
            for (i, item) in items.iter_mut().enumerate() {
                sanitize_value(item, &format!("{}[{}]", path, i), depth + 1)?;
            }
        }
        Value::Object(map) => {
            if map.len() > MAX_KEYS {
                return Err(Error::new(
                    ErrorCode::PermissionInvalidConditions,
                    format!("Condition object too large at {}", path),
                ));
            }
            for (key, item) in map.iter_mut() {
                sanitize_value(item, &format!("{}.{}", path, key), depth + 1)?;
            }
        }
        Value::Number(_) | Value::Bool(_) | Value::Null => {}
    }

    Ok(())
}

fn strip_sql_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !SQL_CONTROL_CHARS.contains(c))
        .collect()
}

/// Sanitize free-form search input before it reaches a LIKE fragment:
/// SQL wildcards and quote characters are removed, the result is truncated
/// to 100 characters and trimmed.
pub fn sanitize_search_input(input: &str) -> String {
    let stripped = strip_sql_chars(input);
    let truncated: String = stripped.chars().take(MAX_SEARCH_LEN).collect();
    truncated.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_known_keys_and_sanitizes_strings() {
        let conditions = json!({
            "note": "quarterly'; DROP TABLE--",
            "department_ids": ["d1", "d2"]
        });

        let sanitized = validate_conditions(&conditions, ConditionSchema::Grant).unwrap();
        assert_eq!(sanitized["note"], "quarterly DROP TABLE--");
        assert_eq!(sanitized["department_ids"][0], "d1");
    }

    #[test]
    fn rejects_unknown_keys() {
        let conditions = json!({ "shell": "rm -rf" });
        let err = validate_conditions(&conditions, ConditionSchema::Grant).unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionInvalidConditions);
        assert!(err.message.contains("shell"));
    }

    #[test]
    fn rejects_non_object_blobs() {
        assert!(validate_conditions(&json!([1, 2, 3]), ConditionSchema::Grant).is_err());
        assert!(validate_conditions(&json!("text"), ConditionSchema::Grant).is_err());
    }

    #[test]
    fn rejects_control_characters() {
        let conditions = json!({ "note": "bad\u{0007}value" });
        let err = validate_conditions(&conditions, ConditionSchema::Grant).unwrap_err();
        assert!(err.message.contains("$.note"));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let conditions = json!({
            "attributes": { "a": { "b": { "c": { "d": { "e": 1 } } } } }
        });
        assert!(validate_conditions(&conditions, ConditionSchema::Grant).is_err());
    }

    #[test]
    fn search_input_strips_wildcards_and_truncates() {
        assert_eq!(sanitize_search_input("math%_dept"), "mathdept");
        assert_eq!(sanitize_search_input("o'brien; --"), "obrien --");

        let long = "x".repeat(250);
        assert_eq!(sanitize_search_input(&long).len(), 100);
    }

    #[test]
    fn schema_names_resolve() {
        assert_eq!(
            ConditionSchema::from_name("grant"),
            Some(ConditionSchema::Grant)
        );
        assert_eq!(
            ConditionSchema::from_name("policy_assignment"),
            Some(ConditionSchema::PolicyAssignment)
        );
        assert!(ConditionSchema::from_name("bogus").is_none());
    }
}
