use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
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

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.pool.max_connections == 0 {
        return Err(ConfigError::InvalidValue {
            field: "pool.max_connections".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    if config.pool.min_connections > config.pool.max_connections {
        return Err(ConfigError::InvalidValue {
            field: "pool.min_connections".to_string(),
            reason: format!(
                "{} exceeds max_connections ({})",
                config.pool.min_connections, config.pool.max_connections
            ),
        });
    }

    if config.queue.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "queue.concurrency".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    if !(0.0..=1.0).contains(&config.pipeline.min_confidence) {
        return Err(ConfigError::InvalidValue {
            field: "pipeline.min_confidence".to_string(),
            reason: format!("{} is outside [0, 1]", config.pipeline.min_confidence),
        });
    }

    // The batch wait must end before the whole run times out.
    if config.pipeline.generation_timeout_ms >= config.pipeline.timeout_ms {
        return Err(ConfigError::InvalidValue {
            field: "pipeline.generation_timeout_ms".to_string(),
            reason: format!(
                "{} must be lower than pipeline.timeout_ms ({})",
                config.pipeline.generation_timeout_ms, config.pipeline.timeout_ms
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.queue.concurrency, 3);
        assert_eq!(config.pool.max_connections, 10);
        assert!(config.pipeline.generate_images);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version":"1.0","pool":{{"min_connections":1,"max_connections":2}}}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.pool.min_connections, 1);
        assert_eq!(config.pool.max_connections, 2);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config("/nonexistent/menugen.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
        assert!(err.to_string().contains("/nonexistent/menugen.json"));
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let err = load_config_from_str(r#"{"version":"1.0","workers":4}"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_wrong_type_rejected_by_schema() {
        let err =
            load_config_from_str(r#"{"version":"1.0","queue":{"concurrency":"many"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_unsupported_version() {
        let err = load_config_from_str(r#"{"version":"2.0"}"#).unwrap_err();
        assert!(err.to_string().contains("Unsupported config version"));
    }

    #[test]
    fn test_min_above_max_rejected() {
        let err = load_config_from_str(
            r#"{"version":"1.0","pool":{"min_connections":5,"max_connections":2}}"#,
        )
        .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "pool.min_connections"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_generation_wait_must_fit_inside_pipeline_timeout() {
        let err = load_config_from_str(
            r#"{"version":"1.0","pipeline":{"timeout_ms":1000,"generation_timeout_ms":1000}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let err = load_config_from_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }
}
