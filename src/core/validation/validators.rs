//! Per-type field validators
//!
//! Each validator checks one present, non-null value against a [`FieldDef`]
//! and returns the error message to attach to the field.

use crate::core::field::{FieldDef, FieldType};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Strict `local@domain.tld` check
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
    regex.is_match(email)
}

/// Whether a string parses as a date or date-time
pub fn is_valid_datetime(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 {
        format!("{}", bound as i64)
    } else {
        bound.to_string()
    }
}

fn check_length(def: &FieldDef, s: &str) -> Result<(), String> {
    let len = s.chars().count() as f64;
    match (def.min, def.max) {
        (Some(min), _) if len < min => {
            Err(format!("Must be at least {} characters", format_bound(min)))
        }
        (_, Some(max)) if len > max => {
            Err(format!("Must be at most {} characters", format_bound(max)))
        }
        _ => Ok(()),
    }
}

fn check_range(def: &FieldDef, n: f64) -> Result<(), String> {
    match (def.min, def.max) {
        (Some(min), _) if n < min => Err(format!("Must be at least {}", format_bound(min))),
        (_, Some(max)) if n > max => Err(format!("Must be at most {}", format_bound(max))),
        _ => Ok(()),
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => true,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.fract() == 0.0 && f.is_finite()),
        _ => false,
    }
}

/// Validate a scalar value against its declared type and constraints
pub fn check_scalar(def: &FieldDef, value: &Value) -> Result<(), String> {
    match def.field_type {
        FieldType::String | FieldType::Text => {
            let Some(s) = value.as_str() else {
                return Err("Must be a string".to_string());
            };
            if def.is_email && !is_valid_email(s) {
                return Err("Invalid email format".to_string());
            }
            check_length(def, s)
        }
        FieldType::Int => {
            if !is_integer(value) {
                return Err("Must be an integer".to_string());
            }
            check_range(def, value.as_f64().unwrap_or_default())
        }
        FieldType::Float => match value.as_f64() {
            Some(n) => check_range(def, n),
            None => Err("Must be a number".to_string()),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            _ => Err("Must be a boolean".to_string()),
        },
        FieldType::Datetime => match value {
            Value::String(s) if is_valid_datetime(s) => Ok(()),
            // epoch milliseconds are the native date representation
            Value::Number(_) if is_integer(value) => Ok(()),
            _ => Err("Must be a valid date".to_string()),
        },
        FieldType::Json => Ok(()),
    }
}

/// Validate a belongsTo foreign-key value
pub fn check_foreign_key(value: &Value) -> Result<(), String> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(()),
        Value::Number(_) if is_integer(value) => Ok(()),
        _ => Err("Must be a valid identifier".to_string()),
    }
}
