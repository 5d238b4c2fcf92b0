pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod services;

pub use broadcast::{PipelineStage, ProgressBroadcaster, ProgressEvent};
pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, MenugenError, Result};
pub use logging::{init_logging, LoggingError};
pub use models::{
    GenerationResult, GenerationStatus, ItemGenerationStatus, MenuItem, ProcessingResult,
    ProcessingStatus, Session,
};
pub use pipeline::{Collaborators, PipelineConfig, PipelineError, ProcessingOrchestrator};
pub use pool::{PoolError, ResourceManager, ResourcePool};
pub use queue::{BatchGenerationQueue, BatchProgress, BatchStatus, QueueError};
pub use services::{
    DishImageGenerator, GenerationError, ItemRepository, ServiceError, SessionRepository,
    TextExtractor, UploadHandler,
};
