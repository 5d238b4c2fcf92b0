use thiserror::Error;

use crate::pool::PoolError;

/// Errors raised by the external collaborators (extractor, upload handler, stores).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{service} is unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("Invalid image '{0}'")]
    InvalidImage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failed: {0}")]
    Storage(String),
}

/// Per-item failure reported by a dish image generator.
///
/// The generator decides whether a failure is worth retrying; the queue only
/// counts attempts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Rate limited by image service: {0}")]
    RateLimited(String),

    #[error("Image service error: {0}")]
    Transient(String),

    #[error("Generation rejected: {0}")]
    Rejected(String),
}

/// A generator backed by a [`ResourcePool`](crate::pool::ResourcePool) that
/// could not get a client treats it as a transient failure.
impl From<PoolError> for GenerationError {
    fn from(err: PoolError) -> Self {
        GenerationError::Transient(err.to_string())
    }
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_) | GenerationError::Transient(_)
        )
    }
}
