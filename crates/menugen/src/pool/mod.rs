//! Bounded pool of interchangeable handles to a scarce external resource.

pub mod error;
pub mod handle;
pub mod resource_pool;

pub use error::PoolError;
pub use handle::PooledHandle;
pub use resource_pool::{PoolStats, ResourceManager, ResourcePool};
