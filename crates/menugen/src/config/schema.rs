use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            pool: PoolConfig::default(),
            queue: QueueConfig::default(),
            pipeline: PipelineSettings::default(),
            database_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    #[serde(default)]
    pub min_connections: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_eviction_interval_ms() -> u64 {
    60_000
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            eviction_interval_ms: default_eviction_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause a worker takes after each dispatch.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,
}

fn default_concurrency() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_dispatch_delay_ms() -> u64 {
    100
}

impl QueueConfig {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_generation_poll_interval_ms")]
    pub generation_poll_interval_ms: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_true")]
    pub generate_images: bool,
    #[serde(default = "default_progress_channel_capacity")]
    pub progress_channel_capacity: usize,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_generation_timeout_ms() -> u64 {
    30_000
}

fn default_generation_poll_interval_ms() -> u64 {
    500
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_progress_channel_capacity() -> usize {
    256
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
            generation_poll_interval_ms: default_generation_poll_interval_ms(),
            min_confidence: default_min_confidence(),
            generate_images: true,
            progress_channel_capacity: default_progress_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_timeouts() {
        let config = Config::default();
        assert_eq!(config.pool.acquire_timeout(), Duration::from_secs(30));
        assert_eq!(config.pool.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.pipeline.timeout_ms, 60_000);
        assert_eq!(config.pipeline.generation_timeout_ms, 30_000);
        assert!((config.pipeline.min_confidence - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"version":"1.0","queue":{"concurrency":5}}"#).unwrap();
        assert_eq!(config.queue.concurrency, 5);
        assert_eq!(config.queue.max_retries, 2);
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_json_log_format() {
        let config: Config =
            serde_json::from_str(r#"{"version":"1.0","logging":{"format":"json"}}"#).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }
}
