//! Bounded-concurrency, retrying, priority-aware generation queue.

pub mod batch;
pub mod error;
pub mod generation_queue;
pub mod item;

pub use batch::{BatchJob, BatchProgress, BatchStatus};
pub use error::QueueError;
pub use generation_queue::{BatchGenerationQueue, QueueStats};
pub use item::QueueItem;
