use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MenugenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Service error: {0}")]
    Service(#[from] crate::services::ServiceError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, MenugenError>;
