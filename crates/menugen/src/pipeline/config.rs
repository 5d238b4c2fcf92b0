use std::time::Duration;

use crate::config::{Config, QueueConfig};

pub struct PipelineConfig {
    /// Wall-clock budget for one processing run.
    pub timeout: Duration,
    /// How long the generation stage waits for its batch.
    pub generation_timeout: Duration,
    pub generation_poll_interval: Duration,
    pub min_confidence: f64,
    pub generate_images: bool,
    pub progress_channel_capacity: usize,
    pub queue: QueueConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            timeout: Duration::from_millis(pipeline.timeout_ms),
            generation_timeout: Duration::from_millis(pipeline.generation_timeout_ms),
            generation_poll_interval: Duration::from_millis(pipeline.generation_poll_interval_ms),
            min_confidence: pipeline.min_confidence,
            generate_images: pipeline.generate_images,
            progress_channel_capacity: pipeline.progress_channel_capacity,
            queue: config.queue.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.generation_timeout, Duration::from_secs(30));
        assert_eq!(config.generation_poll_interval, Duration::from_millis(500));
        assert_eq!(config.queue.concurrency, 3);
        assert!(config.generate_images);
    }
}
