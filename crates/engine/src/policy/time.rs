//! Time-based policy evaluation.
//!
//! Rules combine three optional sub-rules, ANDed together:
//!
//! - `schedule`: days of week (0 = Sunday), an HH:MM window, and an IANA
//!   timezone the evaluation instant is converted to first;
//! - `dateRange`: inclusive start/end instants;
//! - `recurringPeriods`: calendar value checks (daily hour, weekly weekday,
//!   monthly day, yearly month) — the list matches when any entry matches.

use super::{EvaluationContext, PolicyEvaluation, PolicyEvaluator};
use crate::models::PolicyType;
use authz_core::{Error, ErrorCode, Result};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TimeRules {
    schedule: Option<ScheduleRule>,
    date_range: Option<DateRangeRule>,
    recurring_periods: Option<Vec<RecurringPeriod>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScheduleRule {
    /// Subset of 0..=6, 0 = Sunday
    days_of_week: Vec<u8>,
    /// HH:MM
    start_time: String,
    /// HH:MM
    end_time: String,
    /// IANA timezone name, e.g. Asia/Jakarta
    timezone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DateRangeRule {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RecurringPeriod {
    /// daily | weekly | monthly | yearly
    frequency: String,
    /// Values checked against the calendar field the frequency selects:
    /// daily = hour 0..=23, weekly = weekday 0..=6 (0 = Sunday),
    /// monthly = day of month 1..=31, yearly = month 1..=12
    values: Vec<u32>,
}

pub struct TimeEvaluator;

impl TimeEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn parse_rules(rules: &Value) -> Result<TimeRules> {
        serde_json::from_value(rules.clone()).map_err(|e| {
            Error::new(
                ErrorCode::PolicyInvalidRules,
                format!("Invalid time-based rules: {}", e),
            )
        })
    }

    fn weekday_name(day: u8) -> &'static str {
        match day {
            0 => "Sunday",
            1 => "Monday",
            2 => "Tuesday",
            3 => "Wednesday",
            4 => "Thursday",
            5 => "Friday",
            6 => "Saturday",
            _ => "unknown",
        }
    }

    fn check_schedule(
        schedule: &ScheduleRule,
        now: DateTime<Utc>,
    ) -> Result<(bool, Option<String>)> {
        let tz: Tz = schedule.timezone.parse().map_err(|_| {
            Error::new(
                ErrorCode::PolicyInvalidRules,
                format!("Unknown timezone '{}'", schedule.timezone),
            )
        })?;

        let local = tz.from_utc_datetime(&now.naive_utc());
        let weekday = local.weekday().num_days_from_sunday() as u8;

        if !schedule.days_of_week.contains(&weekday) {
            return Ok((
                false,
                Some(format!(
                    "Access not allowed on {}",
                    Self::weekday_name(weekday)
                )),
            ));
        }

        let start = parse_hhmm(&schedule.start_time)?;
        let end = parse_hhmm(&schedule.end_time)?;
        let time_of_day = local.time();

        if time_of_day < start || time_of_day > end {
            return Ok((
                false,
                Some(format!(
                    "Access allowed only between {} and {} ({})",
                    schedule.start_time, schedule.end_time, schedule.timezone
                )),
            ));
        }

        Ok((true, None))
    }

    fn check_date_range(range: &DateRangeRule, now: DateTime<Utc>) -> (bool, Option<String>) {
        if now < range.start || now > range.end {
            (
                false,
                Some(format!(
                    "Outside date range {} to {}",
                    range.start.to_rfc3339(),
                    range.end.to_rfc3339()
                )),
            )
        } else {
            (true, None)
        }
    }

    fn check_recurring(periods: &[RecurringPeriod], now: DateTime<Utc>) -> (bool, Option<String>) {
        if periods.is_empty() {
            return (true, None);
        }

        for period in periods {
            let current = match period.frequency.as_str() {
                "daily" => now.hour(),
                "weekly" => now.weekday().num_days_from_sunday(),
                "monthly" => now.day(),
                "yearly" => now.month(),
                _ => continue,
            };
            if period.values.contains(&current) {
                return (true, None);
            }
        }

        (
            false,
            Some("No recurring period matches the current time".to_string()),
        )
    }
}

impl Default for TimeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_hhmm(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M").map_err(|_| {
        Error::new(
            ErrorCode::PolicyInvalidRules,
            format!("Invalid time '{}', expected HH:MM", input),
        )
    })
}

impl PolicyEvaluator for TimeEvaluator {
    fn policy_type(&self) -> PolicyType {
        PolicyType::TimeBased
    }

    fn validate(&self, rules: &Value) -> bool {
        let parsed = match Self::parse_rules(rules) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };

        if let Some(schedule) = &parsed.schedule {
            if schedule.days_of_week.is_empty()
                || schedule.days_of_week.iter().any(|d| *d > 6)
                || parse_hhmm(&schedule.start_time).is_err()
                || parse_hhmm(&schedule.end_time).is_err()
                || schedule.timezone.parse::<Tz>().is_err()
            {
                return false;
            }
        }

        if let Some(range) = &parsed.date_range {
            if range.start >= range.end {
                return false;
            }
        }

        if let Some(periods) = &parsed.recurring_periods {
            for period in periods {
                let valid = matches!(
                    period.frequency.as_str(),
                    "daily" | "weekly" | "monthly" | "yearly"
                ) && !period.values.is_empty();
                if !valid {
                    return false;
                }
            }
        }

        // At least one sub-rule must be present
        parsed.schedule.is_some()
            || parsed.date_range.is_some()
            || parsed.recurring_periods.is_some()
    }

    fn evaluate(&self, rules: &Value, context: &EvaluationContext) -> Result<PolicyEvaluation> {
        let parsed = Self::parse_rules(rules)?;
        let now = context.now;

        if let Some(schedule) = &parsed.schedule {
            let (ok, reason) = Self::check_schedule(schedule, now)?;
            if !ok {
                return Ok(PolicyEvaluation::not_applicable(
                    reason.unwrap_or_else(|| "Schedule does not match".to_string()),
                ));
            }
        }

        if let Some(range) = &parsed.date_range {
            let (ok, reason) = Self::check_date_range(range, now);
            if !ok {
                return Ok(PolicyEvaluation::not_applicable(
                    reason.unwrap_or_else(|| "Date range does not match".to_string()),
                ));
            }
        }

        if let Some(periods) = &parsed.recurring_periods {
            let (ok, reason) = Self::check_recurring(periods, now);
            if !ok {
                return Ok(PolicyEvaluation::not_applicable(
                    reason.unwrap_or_else(|| "Recurring periods do not match".to_string()),
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

    fn office_hours_jakarta() -> Value {
        json!({
            "schedule": {
                "daysOfWeek": [1, 2, 3, 4, 5],
                "startTime": "08:00",
                "endTime": "17:00",
                "timezone": "Asia/Jakarta"
            }
        })
    }

    fn context_at(utc: &str) -> EvaluationContext {
        let now = DateTime::parse_from_rfc3339(utc).unwrap().with_timezone(&Utc);
        EvaluationContext::new(Uuid::new_v4()).at(now)
    }

    #[test]
    fn saturday_in_jakarta_is_rejected() {
        let evaluator = TimeEvaluator::new();
        // 2024-06-15 is a Saturday; 03:00 UTC = 10:00 WIB
        let context = context_at("2024-06-15T03:00:00Z");

        let result = evaluator
            .evaluate(&office_hours_jakarta(), &context)
            .unwrap();
        assert!(!result.is_applicable);
        assert!(result.reason.unwrap().contains("Saturday"));
    }

    #[test]
    fn monday_morning_in_jakarta_is_accepted() {
        let evaluator = TimeEvaluator::new();
        // 2024-06-17 is a Monday; 03:00 UTC = 10:00 WIB
        let context = context_at("2024-06-17T03:00:00Z");

        let result = evaluator
            .evaluate(&office_hours_jakarta(), &context)
            .unwrap();
        assert!(result.is_applicable);
    }

    #[test]
    fn out_of_hours_is_rejected_with_window_reason() {
        let evaluator = TimeEvaluator::new();
        // Monday 23:00 WIB = 16:00 UTC... use 2024-06-17T15:00Z = 22:00 WIB
        let context = context_at("2024-06-17T15:00:00Z");

        let result = evaluator
            .evaluate(&office_hours_jakarta(), &context)
            .unwrap();
        assert!(!result.is_applicable);
        assert!(result.reason.unwrap().contains("between 08:00 and 17:00"));
    }

    #[test]
    fn timezone_conversion_changes_the_day() {
        let evaluator = TimeEvaluator::new();
        // Friday 2024-06-14 23:00 UTC is already Saturday 06:00 in Jakarta
        let context = context_at("2024-06-14T23:00:00Z");

        let result = evaluator
            .evaluate(&office_hours_jakarta(), &context)
            .unwrap();
        assert!(!result.is_applicable);
        assert!(result.reason.unwrap().contains("Saturday"));
    }

    #[test]
    fn date_range_bounds_are_inclusive() {
        let evaluator = TimeEvaluator::new();
        let rules = json!({
            "dateRange": {
                "start": "2024-01-01T00:00:00Z",
                "end": "2024-12-31T23:59:59Z"
            }
        });

        let inside = context_at("2024-06-01T00:00:00Z");
        assert!(evaluator.evaluate(&rules, &inside).unwrap().is_applicable);

        let boundary = context_at("2024-01-01T00:00:00Z");
        assert!(evaluator.evaluate(&rules, &boundary).unwrap().is_applicable);

        let outside = context_at("2025-01-01T00:00:00Z");
        assert!(!evaluator.evaluate(&rules, &outside).unwrap().is_applicable);
    }

    #[test]
    fn recurring_weekly_matches_weekday() {
        let evaluator = TimeEvaluator::new();
        let rules = json!({
            "recurringPeriods": [
                { "frequency": "weekly", "values": [1] }
            ]
        });

        // Monday
        let monday = context_at("2024-06-17T03:00:00Z");
        assert!(evaluator.evaluate(&rules, &monday).unwrap().is_applicable);

        // Tuesday
        let tuesday = context_at("2024-06-18T03:00:00Z");
        assert!(!evaluator.evaluate(&rules, &tuesday).unwrap().is_applicable);
    }

    #[test]
    fn sub_rules_are_anded() {
        let evaluator = TimeEvaluator::new();
        let rules = json!({
            "schedule": {
                "daysOfWeek": [1, 2, 3, 4, 5],
                "startTime": "08:00",
                "endTime": "17:00",
                "timezone": "UTC"
            },
            "dateRange": {
                "start": "2030-01-01T00:00:00Z",
                "end": "2030-12-31T00:00:00Z"
            }
        });

        // Monday 10:00 UTC but outside the date range
        let context = context_at("2024-06-17T10:00:00Z");
        let result = evaluator.evaluate(&rules, &context).unwrap();
        assert!(!result.is_applicable);
        assert!(result.reason.unwrap().contains("date range"));
    }

    #[test]
    fn validate_catches_malformed_rules() {
        let evaluator = TimeEvaluator::new();

        assert!(evaluator.validate(&office_hours_jakarta()));

        // Empty rules: no sub-rule present
        assert!(!evaluator.validate(&json!({})));

        // Day out of range
        assert!(!evaluator.validate(&json!({
            "schedule": {
                "daysOfWeek": [7],
                "startTime": "08:00",
                "endTime": "17:00",
                "timezone": "UTC"
            }
        })));

        // Bad timezone
        assert!(!evaluator.validate(&json!({
            "schedule": {
                "daysOfWeek": [1],
                "startTime": "08:00",
                "endTime": "17:00",
                "timezone": "Mars/Olympus"
            }
        })));

        // Inverted date range
        assert!(!evaluator.validate(&json!({
            "dateRange": {
                "start": "2024-12-31T00:00:00Z",
                "end": "2024-01-01T00:00:00Z"
            }
        })));

        // Bad time format
        assert!(!evaluator.validate(&json!({
            "schedule": {
                "daysOfWeek": [1],
                "startTime": "8am",
                "endTime": "17:00",
                "timezone": "UTC"
            }
        })));
    }
}
