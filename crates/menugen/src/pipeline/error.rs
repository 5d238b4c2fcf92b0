use std::time::Duration;

use thiserror::Error;

use crate::services::ServiceError;

/// Reasons a processing run ends in `failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Extraction confidence {confidence:.2} is below the {threshold:.2} threshold")]
    LowConfidence { confidence: f64, threshold: f64 },

    #[error("No text detected in the menu image")]
    NoTextDetected,

    #[error("Upstream service failed: {0}")]
    Upstream(#[source] ServiceError),

    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[source] ServiceError),

    #[error("Failed to persist results: {0}")]
    Repository(#[source] ServiceError),

    #[error("Processing timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Processing cancelled by user")]
    Cancelled,
}

impl PipelineError {
    /// Fixed message shown to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::LowConfidence { .. } => {
                "The menu text could not be read clearly. Please retake the photo with better lighting and focus."
            }
            PipelineError::NoTextDetected => {
                "No text was found in the image. Please make sure the photo shows a menu."
            }
            PipelineError::Upstream(_) => {
                "A processing service is temporarily unavailable. Please try again later."
            }
            PipelineError::Preprocess(_) => {
                "The uploaded image could not be processed. Please try a different image."
            }
            PipelineError::Repository(_) => "Your menu could not be saved. Please try again.",
            PipelineError::TimedOut(_) => "Processing timed out. Please try again.",
            PipelineError::Cancelled => "Processing cancelled by user",
        }
    }
}
