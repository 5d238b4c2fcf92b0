use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Timed out after {0:?} waiting for a pooled resource")]
    AcquireTimeout(Duration),

    #[error("Resource pool is closed")]
    Closed,

    #[error("Failed to create pooled resource: {0}")]
    Create(#[source] Box<dyn std::error::Error + Send + Sync>),
}
