//! Progress broadcasting for real-time session streaming.

pub mod progress;

pub use progress::{PipelineStage, ProgressBroadcaster, ProgressEvent, SessionProgress};
