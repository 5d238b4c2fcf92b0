use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Workers are spawned on the ambient Tokio runtime.
    #[error("No Tokio runtime available to run generation workers")]
    RuntimeUnavailable,

    #[error("Generation queue has been shut down")]
    ShutDown,
}
