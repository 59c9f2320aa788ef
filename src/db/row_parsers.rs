//! Conversions for columns stored as TEXT in SQLite.

use uuid::Uuid;

use crate::errors::AppError;

pub fn parse_uuid(value: &str, column: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value.trim()).map_err(|e| AppError::internal(format!("invalid uuid in {column}: {e}")))
}

pub fn parse_opt_uuid(value: Option<&str>, column: &str) -> Result<Option<Uuid>, AppError> {
    match value.map(str::trim) {
        Some(s) if !s.is_empty() => Ok(Some(parse_uuid(s, column)?)),
        _ => Ok(None),
    }
}

/// Splits the legacy comma separated `profiles.role` column into role names.
pub fn split_role_names(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parses a JSON array of strings; anything else yields an empty list.
pub fn parse_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}
