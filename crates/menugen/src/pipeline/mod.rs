//! Stage sequencing for one menu processing session.

pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::PipelineError;
pub use orchestrator::{regeneration_key, Collaborators, ProcessingOrchestrator};
