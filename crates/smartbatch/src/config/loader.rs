use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::{BatchSettings, RuleSettings};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/batch-settings-v1.json");

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<BatchSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<BatchSettings, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let settings: BatchSettings = serde_json::from_value(json_value)?;

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_settings(settings: &BatchSettings) -> Result<(), ConfigError> {
    if settings.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported settings version: {}", settings.version),
        });
    }

    if settings.concurrency == 0 {
        return Err(ConfigError::Validation {
            message: "concurrency must be at least 1".to_string(),
        });
    }

    match (&settings.template.body, &settings.template.path) {
        (Some(_), None) | (None, Some(_)) => {}
        _ => {
            return Err(ConfigError::Validation {
                message: format!(
                    "Template '{}' must set exactly one of 'body' and 'path'",
                    settings.template.name
                ),
            })
        }
    }

    let mut column_names = HashSet::new();
    for column in &settings.columns {
        if !column_names.insert(column.name.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate column '{}'", column.name),
            });
        }
    }

    let mut aggregate_names = HashSet::new();
    for aggregate in &settings.aggregates {
        if !aggregate_names.insert(aggregate.name.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Duplicate aggregate '{}'", aggregate.name),
            });
        }
    }

    for (index, rule) in settings.rules.iter().enumerate() {
        validate_rule(index, rule, &aggregate_names, settings)?;
    }

    Ok(())
}

fn validate_rule(
    index: usize,
    rule: &RuleSettings,
    aggregate_names: &HashSet<&str>,
    settings: &BatchSettings,
) -> Result<(), ConfigError> {
    match rule {
        RuleSettings::Terminology => {
            if settings.terminology.is_empty() {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: "terminology rule requires a 'terminology' section".to_string(),
                });
            }
        }
        RuleSettings::AggregateMatch {
            aggregate,
            label,
            tolerance,
        } => {
            if !aggregate_names.contains(aggregate.as_str()) {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: format!("unknown aggregate '{}'", aggregate),
                });
            }
            if label.trim().is_empty() {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: "label must not be empty".to_string(),
                });
            }
            if !tolerance.is_finite() || *tolerance < 0.0 {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: format!("tolerance must be a non-negative number, got {}", tolerance),
                });
            }
        }
        RuleSettings::RequiredPhrase { phrase } => {
            if phrase.trim().is_empty() {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: "phrase must not be empty".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InteractionMode;

    const VALID: &str = r#"{
        "version": "1.0",
        "concurrency": 4,
        "retry": {"max_retries": 1, "retry_delay_ms": 10},
        "mode": "stepwise",
        "columns": [
            {"name": "region", "type": "text"},
            {"name": "revenue", "type": "number"}
        ],
        "template": {"name": "regional", "body": "Revenue for $region: $revenue", "format": "markdown"},
        "terminology": {"customer": {"canonical": "client", "variants": ["customer", "buyer"]}},
        "aggregates": [{"name": "total", "column": "revenue", "function": "sum"}],
        "facts": [{"key": "first_region", "value": "$region"}],
        "rules": [
            {"kind": "terminology"},
            {"kind": "aggregate_match", "aggregate": "total", "label": "Total revenue", "tolerance": 0.5}
        ],
        "job_timeout_secs": 60
    }"#;

    #[test]
    fn test_load_valid_settings() {
        let settings = load_settings_from_str(VALID).unwrap();
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.mode, InteractionMode::Stepwise);
        assert_eq!(settings.columns.len(), 2);
        assert_eq!(settings.rules.len(), 2);
        assert_eq!(settings.job_timeout_secs, Some(60));
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, VALID).unwrap();

        assert!(load_settings(&path).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = load_settings("/nonexistent/settings.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let err = load_settings_from_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_schema_rejects_zero_concurrency() {
        let err = load_settings_from_str(
            r#"{"version": "1.0", "concurrency": 0, "template": {"name": "t", "body": "x"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_schema_rejects_unknown_field() {
        let err = load_settings_from_str(
            r#"{"version": "1.0", "workers": 2, "template": {"name": "t", "body": "x"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let err = load_settings_from_str(r#"{"version": "2.0", "template": {"name": "t", "body": "x"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_template_needs_exactly_one_source() {
        let err = load_settings_from_str(r#"{"version": "1.0", "template": {"name": "t"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));

        let err = load_settings_from_str(
            r#"{"version": "1.0", "template": {"name": "t", "body": "x", "path": "t.txt"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_rule_with_unknown_aggregate() {
        let err = load_settings_from_str(
            r#"{
                "version": "1.0",
                "template": {"name": "t", "body": "x"},
                "rules": [{"kind": "aggregate_match", "aggregate": "nope", "label": "Total"}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { index: 0, .. }));
    }

    #[test]
    fn test_duplicate_aggregate() {
        let err = load_settings_from_str(
            r#"{
                "version": "1.0",
                "template": {"name": "t", "body": "x"},
                "aggregates": [
                    {"name": "total", "column": "a", "function": "sum"},
                    {"name": "total", "column": "b", "function": "max"}
                ]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_terminology_rule_needs_terms() {
        let err = load_settings_from_str(
            r#"{"version": "1.0", "template": {"name": "t", "body": "x"}, "rules": [{"kind": "terminology"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { index: 0, .. }));
    }
}
