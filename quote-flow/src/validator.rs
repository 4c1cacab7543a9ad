use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use crate::pricing::age_years;
use crate::schema::{FieldKind, FieldSchema, StepSchema};
use crate::session::StepData;

/// Field-keyed validation errors, one message per offending field.
pub type FieldErrors = BTreeMap<String, String>;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));
static PHONE_SEPARATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-\(\)]").expect("phone separator regex"));

const MAX_EMAIL_LEN: usize = 100;

/// Normalize common Ugandan phone formats to digits-only international form.
///
/// Accepts `07XXXXXXXX`, `+2567XXXXXXXX` and `2567XXXXXXXX`; anything else is
/// returned stripped of separators for the caller to reject.
pub fn normalize_phone_ug(raw: &str) -> String {
    let mut s = PHONE_SEPARATORS_RE.replace_all(raw.trim(), "").into_owned();
    if let Some(stripped) = s.strip_prefix('+') {
        s = stripped.to_string();
    }
    if s.starts_with('0') && s.len() == 10 {
        return format!("256{}", &s[1..]);
    }
    s
}

fn value_as_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Some(true),
            "false" | "0" | "no" | "n" | "off" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Which conditional fields the submitted values reveal, per the step's
/// branch rules. A field targeted by any rule and revealed by none is hidden.
fn revealed_fields(step: &StepSchema, submitted: &StepData) -> (HashSet<String>, HashSet<String>) {
    let mut conditional: HashSet<String> = HashSet::new();
    let mut revealed: HashSet<String> = HashSet::new();
    for rule in &step.branch_rules {
        conditional.insert(rule.reveals.clone());
        let triggered = match submitted.get(&rule.field) {
            Some(Value::Array(items)) => items.iter().any(|v| v == &rule.equals),
            Some(Value::String(s)) => match &rule.equals {
                Value::String(expected) => {
                    // Comma-separated multi-select strings count as containment.
                    s.trim() == expected
                        || s.split(',').any(|part| part.trim() == expected.as_str())
                }
                other => Value::String(s.trim().to_string()) == *other,
            },
            Some(v) => v == &rule.equals,
            None => false,
        };
        if triggered {
            revealed.insert(rule.reveals.clone());
        }
    }
    (conditional, revealed)
}

fn validate_field(
    field: &FieldSchema,
    raw: &Value,
    today: NaiveDate,
) -> std::result::Result<Value, String> {
    match &field.kind {
        FieldKind::Text { min_len, max_len } => {
            let s = value_as_str(raw).ok_or_else(|| format!("{} must be text", field.label))?;
            if let Some(min) = min_len {
                if s.chars().count() < *min {
                    return Err(format!("{} must be at least {min} characters", field.label));
                }
            }
            if let Some(max) = max_len {
                if s.chars().count() > *max {
                    return Err(format!("{} must be at most {max} characters", field.label));
                }
            }
            Ok(Value::String(s))
        }
        FieldKind::Number { min, max } => {
            let s = value_as_str(raw)
                .ok_or_else(|| format!("{} must be a number", field.label))?;
            let n = Decimal::from_str(&s)
                .map_err(|_| format!("{} must be a number", field.label))?;
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("{} must be at least {min}", field.label));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("{} must be at most {max}", field.label));
                }
            }
            if n.fract().is_zero() {
                if let Some(i) = n.to_i64() {
                    return Ok(Value::Number(i.into()));
                }
            }
            Ok(Value::String(n.normalize().to_string()))
        }
        FieldKind::Date {
            not_future,
            min_days_ahead,
            age_min,
            age_max,
        } => {
            let s = value_as_str(raw).ok_or_else(|| format!("{} must be a date", field.label))?;
            let date = NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|_| format!("{} must be a valid date (YYYY-MM-DD)", field.label))?;
            if *not_future && date > today {
                return Err(format!("{} cannot be in the future", field.label));
            }
            if let Some(days) = min_days_ahead {
                let earliest = today + Days::new(*days as u64);
                if date < earliest {
                    return Err(format!(
                        "{} must be on or after {earliest}",
                        field.label
                    ));
                }
            }
            if age_min.is_some() || age_max.is_some() {
                let age = age_years(date, today);
                let min = age_min.map_or(0, |v| v as i32);
                let max = age_max.map_or(i32::MAX, |v| v as i32);
                if age < min || age > max {
                    return Err(match (age_min, age_max) {
                        (Some(lo), Some(hi)) => {
                            format!("Age must be between {lo} and {hi}")
                        }
                        _ => format!("{} is outside the accepted age range", field.label),
                    });
                }
            }
            Ok(Value::String(date.format("%Y-%m-%d").to_string()))
        }
        FieldKind::Choice { options } => {
            let s = value_as_str(raw)
                .ok_or_else(|| format!("{} has an invalid value", field.label))?;
            if options.iter().any(|o| o.id == s) {
                Ok(Value::String(s))
            } else {
                Err(format!("{} has an invalid value", field.label))
            }
        }
        FieldKind::MultiSelect { options } => {
            let items: Vec<String> = match raw {
                Value::Array(values) => values
                    .iter()
                    .map(|v| {
                        value_as_str(v)
                            .ok_or_else(|| format!("{} must be a list of options", field.label))
                    })
                    .collect::<std::result::Result<_, _>>()?,
                Value::String(s) => s
                    .split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
                _ => return Err(format!("{} must be a list of options", field.label)),
            };
            let allowed: HashSet<&str> = options.iter().map(|o| o.id.as_str()).collect();
            if items.iter().any(|i| !allowed.contains(i.as_str())) {
                return Err(format!("{} contains invalid selection(s)", field.label));
            }
            Ok(Value::Array(items.into_iter().map(Value::String).collect()))
        }
        FieldKind::FileRef { accept } => {
            let token =
                value_as_str(raw).ok_or_else(|| format!("{} is required", field.label))?;
            let extension = token
                .rsplit('.')
                .next()
                .filter(|ext| *ext != token)
                .map(str::to_lowercase);
            match extension {
                Some(ext) if accept.iter().any(|a| *a == ext) => Ok(Value::String(token)),
                _ => Err(format!(
                    "{} must be one of: {}",
                    field.label,
                    accept.join(", ")
                )),
            }
        }
        FieldKind::Tel => {
            let raw_str =
                value_as_str(raw).ok_or_else(|| format!("{} is required", field.label))?;
            let norm = normalize_phone_ug(&raw_str);
            if !norm.chars().all(|c| c.is_ascii_digit()) {
                return Err("Phone number must contain digits only".to_string());
            }
            if norm.len() != 12 || !norm.starts_with("2567") {
                return Err("Phone number format is not valid".to_string());
            }
            Ok(Value::String(norm))
        }
        FieldKind::Email => {
            let s = value_as_str(raw).ok_or_else(|| "Email is required".to_string())?;
            if s.len() > MAX_EMAIL_LEN {
                return Err(format!("Email must be at most {MAX_EMAIL_LEN} characters"));
            }
            if !EMAIL_RE.is_match(&s) {
                return Err("Email is not valid".to_string());
            }
            Ok(Value::String(s))
        }
        FieldKind::Flag => {
            let b = as_bool(raw)
                .ok_or_else(|| format!("{} must be true/false", field.label))?;
            if field.required && !b {
                return Err(format!("{} must be accepted", field.label));
            }
            Ok(Value::Bool(b))
        }
    }
}

/// Validate and normalize a step submission.
///
/// Pure: never touches session state. Errors are collected per field across
/// the whole step so a client can render them inline. Unknown submitted keys
/// are ignored; conditional fields hidden by branch rules are ignored even
/// when present.
pub fn validate_step(
    step: &StepSchema,
    submitted: &StepData,
    today: NaiveDate,
) -> std::result::Result<StepData, FieldErrors> {
    let (conditional, revealed) = revealed_fields(step, submitted);
    let mut normalized = StepData::new();
    let mut errors = FieldErrors::new();

    for field in &step.fields {
        if conditional.contains(&field.name) && !revealed.contains(&field.name) {
            continue;
        }

        let raw = submitted.get(&field.name);
        if is_empty(raw) {
            if field.required {
                errors.insert(field.name.clone(), format!("{} is required", field.label));
            } else if matches!(field.kind, FieldKind::Flag) {
                // Optional acknowledgements default to declined.
                normalized.insert(field.name.clone(), Value::Bool(false));
            }
            continue;
        }

        match validate_field(field, raw.expect("checked non-empty"), today) {
            Ok(value) => {
                normalized.insert(field.name.clone(), value);
            }
            Err(message) => {
                errors.insert(field.name.clone(), message);
            }
        }
    }

    if errors.is_empty() {
        Ok(normalized)
    } else {
        Err(errors)
    }
}
