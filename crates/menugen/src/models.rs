//! Domain records shared by the pipeline, the generation queue and the stores.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a processing session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Uploading => "uploading",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(ProcessingStatus::Uploading),
            "processing" => Some(ProcessingStatus::Processing),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }

    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end menu-to-images request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub image_url: String,
    pub status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str, image_url: &str, status: ProcessingStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            image_url: image_url.to_string(),
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Generates a fresh session identifier.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generation state attached to an extracted item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemGenerationStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Failed,
}

impl ItemGenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemGenerationStatus::Pending => "pending",
            ItemGenerationStatus::Generating => "generating",
            ItemGenerationStatus::Completed => "completed",
            ItemGenerationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemGenerationStatus::Pending),
            "generating" => Some(ItemGenerationStatus::Generating),
            "completed" => Some(ItemGenerationStatus::Completed),
            "failed" => Some(ItemGenerationStatus::Failed),
            _ => None,
        }
    }
}

/// A dish entry parsed from the menu text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    /// Unique within the owning session.
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Set when a user corrected the parsed entry by hand.
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub generation_status: ItemGenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl MenuItem {
    /// Creates an item with a random id and no optional fields.
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: None,
            price: None,
            category: None,
            is_edited: false,
            generation_status: ItemGenerationStatus::Pending,
            image_url: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_price(mut self, price: &str) -> Self {
        self.price = Some(price.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

/// Outcome of a single generation attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Success,
    Failed,
}

/// Final per-item generation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Generated artifact reference, empty on failure.
    pub image_url: String,
    pub item_id: String,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GenerationResult {
    pub fn success(item_id: &str, image_url: &str) -> Self {
        Self {
            image_url: image_url.to_string(),
            item_id: item_id.to_string(),
            status: GenerationStatus::Success,
            error_message: None,
        }
    }

    pub fn failed(item_id: &str, error_message: &str) -> Self {
        Self {
            image_url: String::new(),
            item_id: item_id.to_string(),
            status: GenerationStatus::Failed,
            error_message: Some(error_message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GenerationStatus::Success
    }

    /// Item-level status to persist for this outcome.
    pub fn item_status(&self) -> ItemGenerationStatus {
        match self.status {
            GenerationStatus::Success => ItemGenerationStatus::Completed,
            GenerationStatus::Failed => ItemGenerationStatus::Failed,
        }
    }
}

/// Raw output of the text extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f64,
    pub processing_time_ms: u64,
}

/// Output of the upload handler's preprocessing step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessedImage {
    pub url: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Aggregate outcome of one `process_menu_image` run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub session_id: String,
    pub original_image: String,
    pub extracted_items: Vec<MenuItem>,
    pub generated_images: Vec<GenerationResult>,
    pub processing_status: ProcessingStatus,
    /// User-facing error message when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
}
