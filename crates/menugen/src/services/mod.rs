//! Contracts for the collaborators the pipeline drives.
//!
//! Text extraction, image generation, upload handling and persistence live
//! outside this crate (apart from the SQLite stores in [`crate::db`]); the
//! orchestrator and the generation queue only see these traits.

pub mod error;

use async_trait::async_trait;

use crate::models::{
    ExtractionResult, GenerationResult, ItemGenerationStatus, MenuItem, PreprocessedImage,
    ProcessingStatus, Session,
};

pub use error::{GenerationError, ServiceError};

/// Menu text recognition and dish parsing.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image_url: &str) -> Result<ExtractionResult, ServiceError>;

    async fn parse_items(&self, text: &str) -> Result<Vec<MenuItem>, ServiceError>;
}

/// Resolves an uploaded image into a normalized reference plus metadata.
#[async_trait]
pub trait UploadHandler: Send + Sync {
    async fn preprocess_image(&self, image_url: &str) -> Result<PreprocessedImage, ServiceError>;
}

/// Produces one dish image per call. Calls may be slow and rate limited.
#[async_trait]
pub trait DishImageGenerator: Send + Sync {
    async fn generate_dish_image(&self, item: &MenuItem)
        -> Result<GenerationResult, GenerationError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), ServiceError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, ServiceError>;

    async fn update_status(&self, id: &str, status: ProcessingStatus)
        -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn create_many(
        &self,
        session_id: &str,
        items: &[MenuItem],
    ) -> Result<Vec<MenuItem>, ServiceError>;

    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<MenuItem>, ServiceError>;

    async fn update_generation_status(
        &self,
        session_id: &str,
        item_id: &str,
        status: ItemGenerationStatus,
        image_url: Option<&str>,
    ) -> Result<(), ServiceError>;
}
