//! Location-based policy evaluation.
//!
//! `deniedLocations` take precedence: if any denied rule matches the
//! context, the policy is not applicable. Otherwise, when
//! `allowedLocations` are defined, at least one must match. A location rule
//! is one of: exact country code, case-insensitive city, IP (exact, CIDR,
//! or shell-style wildcard), or a coordinate center with a radius in
//! kilometers (Haversine distance).

use super::{EvaluationContext, PolicyEvaluation, PolicyEvaluator};
use crate::models::PolicyType;
use authz_core::{Error, ErrorCode, Result};
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde_json::Value;
use std::net::IpAddr;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LocationRules {
    #[serde(default)]
    allowed_locations: Vec<LocationRule>,
    #[serde(default)]
    denied_locations: Vec<LocationRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LocationRule {
    country: Option<String>,
    city: Option<String>,
    /// Exact IP, CIDR block, or shell-style wildcard (e.g. 10.0.*)
    ip: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    radius_km: Option<f64>,
}

impl LocationRule {
    fn is_well_formed(&self) -> bool {
        let has_coordinate = self.latitude.is_some() || self.longitude.is_some();
        if has_coordinate {
            // Coordinate rules need a full center and radius
            return self.latitude.is_some() && self.longitude.is_some() && self.radius_km.is_some();
        }
        self.country.is_some() || self.city.is_some() || self.ip.is_some()
    }
}

/// Context fields the location rules match against.
#[derive(Debug, Default)]
struct LocationContext {
    country: Option<String>,
    city: Option<String>,
    ip_address: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl LocationContext {
    fn from_environment(environment: &Value) -> Self {
        let get_str = |key: &str| {
            environment
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let get_f64 = |key: &str| environment.get(key).and_then(|v| v.as_f64());

        Self {
            country: get_str("country"),
            city: get_str("city"),
            ip_address: get_str("ipAddress").or_else(|| get_str("ip_address")),
            latitude: get_f64("latitude"),
            longitude: get_f64("longitude"),
        }
    }
}

pub struct LocationEvaluator;

impl LocationEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn parse_rules(rules: &Value) -> Result<LocationRules> {
        serde_json::from_value(rules.clone()).map_err(|e| {
            Error::new(
                ErrorCode::PolicyInvalidRules,
                format!("Invalid location-based rules: {}", e),
            )
        })
    }

    fn rule_matches(rule: &LocationRule, context: &LocationContext) -> bool {
        if let Some(country) = &rule.country {
            match &context.country {
                Some(actual) if actual == country => {}
                _ => return false,
            }
        }

        if let Some(city) = &rule.city {
            match &context.city {
                Some(actual) if actual.eq_ignore_ascii_case(city) => {}
                _ => return false,
            }
        }

        if let Some(ip_pattern) = &rule.ip {
            match &context.ip_address {
                Some(actual) if ip_matches(ip_pattern, actual) => {}
                _ => return false,
            }
        }

        if let (Some(lat), Some(lon), Some(radius)) =
            (rule.latitude, rule.longitude, rule.radius_km)
        {
            match (context.latitude, context.longitude) {
                (Some(actual_lat), Some(actual_lon)) => {
                    if haversine_km(lat, lon, actual_lat, actual_lon) > radius {
                        return false;
                    }
                }
                _ => return false,
            }
        }

        true
    }
}

impl Default for LocationEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Match an IP against an exact address, a CIDR block, or a shell-style
/// wildcard pattern.
fn ip_matches(pattern: &str, actual: &str) -> bool {
    if pattern == actual {
        return true;
    }

    if pattern.contains('/') {
        if let (Ok(network), Ok(address)) =
            (pattern.parse::<IpNetwork>(), actual.parse::<IpAddr>())
        {
            return network.contains(address);
        }
        return false;
    }

    if pattern.contains('*') {
        return wildcard_matches(pattern, actual);
    }

    false
}

/// Shell-style wildcard match where `*` spans any run of characters.
fn wildcard_matches(pattern: &str, input: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    let mut remainder = input;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !remainder.starts_with(part) {
                return false;
            }
            remainder = &remainder[part.len()..];
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }

    true
}

/// Great-circle distance between two coordinates, in kilometers.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

impl PolicyEvaluator for LocationEvaluator {
    fn policy_type(&self) -> PolicyType {
        PolicyType::LocationBased
    }

    fn validate(&self, rules: &Value) -> bool {
        let parsed = match Self::parse_rules(rules) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        if parsed.allowed_locations.is_empty() && parsed.denied_locations.is_empty() {
            return false;
        }

        parsed
            .allowed_locations
            .iter()
            .chain(parsed.denied_locations.iter())
            .all(LocationRule::is_well_formed)
    }

    fn evaluate(&self, rules: &Value, context: &EvaluationContext) -> Result<PolicyEvaluation> {
        let parsed = Self::parse_rules(rules)?;
        let location = LocationContext::from_environment(&context.environment);

        // Denied locations win over any allow
        for rule in &parsed.denied_locations {
            if Self::rule_matches(rule, &location) {
                return Ok(PolicyEvaluation::not_applicable(
                    "Request originates from a denied location",
                ));
            }
        }

        if !parsed.allowed_locations.is_empty() {
            let any_allowed = parsed
                .allowed_locations
                .iter()
                .any(|rule| Self::rule_matches(rule, &location));
            if !any_allowed {
                return Ok(PolicyEvaluation::not_applicable(
                    "Request location matches no allowed location",
                ));
            }
        }

        Ok(PolicyEvaluation::applicable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn context_with(environment: Value) -> EvaluationContext {
        let mut context = EvaluationContext::new(Uuid::new_v4());
        context.environment = environment;
        context
    }

    #[test]
    fn denied_ip_beats_allowed_country() {
        let evaluator = LocationEvaluator::new();
        let rules = json!({
            "allowedLocations": [{ "country": "ID" }],
            "deniedLocations": [{ "ip": "10.0.0.5" }]
        });
        let context = context_with(json!({ "country": "ID", "ipAddress": "10.0.0.5" }));

        let result = evaluator.evaluate(&rules, &context).unwrap();
        assert!(!result.is_applicable);
        assert!(result.reason.unwrap().contains("denied location"));
    }

    #[test]
    fn allowed_country_matches() {
        let evaluator = LocationEvaluator::new();
        let rules = json!({ "allowedLocations": [{ "country": "ID" }] });

        let inside = context_with(json!({ "country": "ID" }));
        assert!(evaluator.evaluate(&rules, &inside).unwrap().is_applicable);

        let outside = context_with(json!({ "country": "SG" }));
        assert!(!evaluator.evaluate(&rules, &outside).unwrap().is_applicable);
    }

    #[test]
    fn city_match_is_case_insensitive() {
        let evaluator = LocationEvaluator::new();
        let rules = json!({ "allowedLocations": [{ "city": "Jakarta" }] });

        let context = context_with(json!({ "city": "JAKARTA" }));
        assert!(evaluator.evaluate(&rules, &context).unwrap().is_applicable);
    }

    #[test]
    fn cidr_and_wildcard_ip_rules() {
        let evaluator = LocationEvaluator::new();

        let cidr = json!({ "allowedLocations": [{ "ip": "10.0.0.0/8" }] });
        let inside = context_with(json!({ "ipAddress": "10.20.30.40" }));
        assert!(evaluator.evaluate(&cidr, &inside).unwrap().is_applicable);
        let outside = context_with(json!({ "ipAddress": "192.168.1.1" }));
        assert!(!evaluator.evaluate(&cidr, &outside).unwrap().is_applicable);

        let wildcard = json!({ "allowedLocations": [{ "ip": "192.168.*" }] });
        let matching = context_with(json!({ "ipAddress": "192.168.1.1" }));
        assert!(evaluator.evaluate(&wildcard, &matching).unwrap().is_applicable);
        let not_matching = context_with(json!({ "ipAddress": "10.0.0.1" }));
        assert!(!evaluator
            .evaluate(&wildcard, &not_matching)
            .unwrap()
            .is_applicable);
    }

    #[test]
    fn coordinate_radius_uses_haversine() {
        let evaluator = LocationEvaluator::new();
        // Center on Jakarta with a 50 km radius
        let rules = json!({
            "allowedLocations": [{
                "latitude": -6.2088,
                "longitude": 106.8456,
                "radiusKm": 50.0
            }]
        });

        // Bogor, ~43 km from Jakarta
        let near = context_with(json!({ "latitude": -6.5950, "longitude": 106.8167 }));
        assert!(evaluator.evaluate(&rules, &near).unwrap().is_applicable);

        // Bandung, ~120 km away
        let far = context_with(json!({ "latitude": -6.9175, "longitude": 107.6191 }));
        assert!(!evaluator.evaluate(&rules, &far).unwrap().is_applicable);
    }

    #[test]
    fn missing_context_fields_fail_allow_rules() {
        let evaluator = LocationEvaluator::new();
        let rules = json!({ "allowedLocations": [{ "country": "ID" }] });

        let empty = context_with(json!({}));
        assert!(!evaluator.evaluate(&rules, &empty).unwrap().is_applicable);
    }

    #[test]
    fn validate_rejects_incomplete_coordinate_rules() {
        let evaluator = LocationEvaluator::new();

        assert!(evaluator.validate(&json!({
            "allowedLocations": [{ "latitude": 1.0, "longitude": 2.0, "radiusKm": 5.0 }]
        })));

        // Latitude without radius
        assert!(!evaluator.validate(&json!({
            "allowedLocations": [{ "latitude": 1.0, "longitude": 2.0 }]
        })));

        // Empty rule object
        assert!(!evaluator.validate(&json!({ "allowedLocations": [{}] })));

        // No rules at all
        assert!(!evaluator.validate(&json!({})));
    }

    #[test]
    fn haversine_distance_sanity() {
        // Jakarta to Surabaya is roughly 660-700 km
        let distance = haversine_km(-6.2088, 106.8456, -7.2575, 112.7521);
        assert!(distance > 600.0 && distance < 800.0);

        // Identical points
        assert!(haversine_km(1.0, 1.0, 1.0, 1.0) < 1e-9);
    }

    #[test]
    fn wildcard_edge_cases() {
        assert!(wildcard_matches("10.0.*", "10.0.0.1"));
        assert!(wildcard_matches("*.0.1", "10.0.0.1"));
        assert!(wildcard_matches("10.*.1", "10.0.0.1"));
        assert!(!wildcard_matches("10.1.*", "10.0.0.1"));
        assert!(wildcard_matches("*", "anything"));
    }
}
