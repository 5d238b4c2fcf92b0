//! Shared test utilities for menugen integration tests.
//!
//! This module provides:
//! - In-memory stand-ins for every collaborator the orchestrator drives
//! - `HarnessBuilder` for wiring an orchestrator with fast timings

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use menugen::config::QueueConfig;
use menugen::models::{ExtractionResult, PreprocessedImage};
use menugen::services::{
    DishImageGenerator, GenerationError, ItemRepository, ServiceError, SessionRepository,
    TextExtractor, UploadHandler,
};
use menugen::{
    Collaborators, GenerationResult, ItemGenerationStatus, MenuItem, PipelineConfig,
    ProcessingOrchestrator, ProcessingStatus, ProgressEvent, Session,
};

pub const MENU_TEXT: &str = "Margherita 12\nCarbonara 14\nTiramisu 7";

pub fn sample_items() -> Vec<MenuItem> {
    vec![
        MenuItem::new("Margherita").with_id("item-1").with_price("12"),
        MenuItem::new("Carbonara").with_id("item-2").with_price("14"),
        MenuItem::new("Tiramisu")
            .with_id("item-3")
            .with_price("7")
            .with_category("Dessert"),
    ]
}

/// Appends a marker to the uploaded image reference.
pub struct StubUploadHandler {
    pub fail: bool,
}

#[async_trait]
impl UploadHandler for StubUploadHandler {
    async fn preprocess_image(&self, image_url: &str) -> Result<PreprocessedImage, ServiceError> {
        if self.fail {
            return Err(ServiceError::InvalidImage(image_url.to_string()));
        }
        Ok(PreprocessedImage {
            url: format!("{image_url}#normalized"),
            metadata: HashMap::new(),
        })
    }
}

/// Returns canned extraction output after an optional delay.
pub struct StubExtractor {
    pub text: String,
    pub confidence: f64,
    pub items: Vec<MenuItem>,
    pub delay: Duration,
    pub fail_extraction: Option<ServiceError>,
    pub seen_images: Mutex<Vec<String>>,
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract_text(&self, image_url: &str) -> Result<ExtractionResult, ServiceError> {
        self.seen_images.lock().unwrap().push(image_url.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.fail_extraction {
            return Err(err.clone());
        }
        Ok(ExtractionResult {
            text: self.text.clone(),
            confidence: self.confidence,
            processing_time_ms: 5,
        })
    }

    async fn parse_items(&self, _text: &str) -> Result<Vec<MenuItem>, ServiceError> {
        Ok(self.items.clone())
    }
}

#[derive(Default)]
pub struct InMemorySessions {
    pub sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessions {
    pub fn status_of(&self, id: &str) -> Option<ProcessingStatus> {
        self.sessions.lock().unwrap().get(id).map(|s| s.status)
    }
}

#[async_trait]
impl SessionRepository for InMemorySessions {
    async fn create(&self, session: &Session) -> Result<(), ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Session>, ServiceError> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: ProcessingStatus) -> Result<(), ServiceError> {
        match self.sessions.lock().unwrap().get_mut(id) {
            Some(session) => {
                session.status = status;
                Ok(())
            }
            None => Err(ServiceError::NotFound(id.to_string())),
        }
    }
}

#[derive(Default)]
pub struct InMemoryItems {
    pub items: Mutex<HashMap<String, Vec<MenuItem>>>,
    pub fail_writes: bool,
}

impl InMemoryItems {
    pub fn item(&self, item_id: &str) -> Option<MenuItem> {
        self.items
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|item| item.id == item_id)
            .cloned()
    }
}

#[async_trait]
impl ItemRepository for InMemoryItems {
    async fn create_many(
        &self,
        session_id: &str,
        items: &[MenuItem],
    ) -> Result<Vec<MenuItem>, ServiceError> {
        if self.fail_writes {
            return Err(ServiceError::Storage("disk full".to_string()));
        }
        self.items
            .lock()
            .unwrap()
            .insert(session_id.to_string(), items.to_vec());
        Ok(items.to_vec())
    }

    async fn find_by_session_id(&self, session_id: &str) -> Result<Vec<MenuItem>, ServiceError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_generation_status(
        &self,
        session_id: &str,
        item_id: &str,
        status: ItemGenerationStatus,
        image_url: Option<&str>,
    ) -> Result<(), ServiceError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(session_id)
            .and_then(|stored| stored.iter_mut().find(|item| item.id == item_id))
            .ok_or_else(|| ServiceError::NotFound(item_id.to_string()))?;
        item.generation_status = status;
        if let Some(url) = image_url {
            item.image_url = Some(url.to_string());
        }
        Ok(())
    }
}

/// Produces `https://img.test/<id>.png` for every item except the rejected
/// ones, after an optional delay.
#[derive(Default)]
pub struct StubGenerator {
    pub delay: Duration,
    pub rejected: HashSet<String>,
    pub calls: AtomicUsize,
}

impl StubGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DishImageGenerator for StubGenerator {
    async fn generate_dish_image(
        &self,
        item: &MenuItem,
    ) -> Result<GenerationResult, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected.contains(&item.id) {
            return Err(GenerationError::Rejected("content policy".to_string()));
        }
        Ok(GenerationResult::success(
            &item.id,
            &format!("https://img.test/{}.png", item.id),
        ))
    }
}

/// An orchestrator plus handles on its collaborators.
pub struct TestHarness {
    pub orchestrator: Arc<ProcessingOrchestrator>,
    pub extractor: Arc<StubExtractor>,
    pub sessions: Arc<InMemorySessions>,
    pub items: Arc<InMemoryItems>,
    pub generator: Option<Arc<StubGenerator>>,
}

impl TestHarness {
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.orchestrator.subscribe()
    }
}

/// Builder for `TestHarness` with millisecond-scale timings.
pub struct HarnessBuilder {
    text: String,
    confidence: f64,
    items: Vec<MenuItem>,
    extraction_delay: Duration,
    fail_extraction: Option<ServiceError>,
    fail_upload: bool,
    fail_item_writes: bool,
    generator: Option<StubGenerator>,
    timeout: Duration,
    generation_timeout: Duration,
    queue_shut_down: bool,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            text: MENU_TEXT.to_string(),
            confidence: 0.92,
            items: sample_items(),
            extraction_delay: Duration::ZERO,
            fail_extraction: None,
            fail_upload: false,
            fail_item_writes: false,
            generator: None,
            timeout: Duration::from_secs(60),
            generation_timeout: Duration::from_secs(30),
            queue_shut_down: false,
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn items(mut self, items: Vec<MenuItem>) -> Self {
        self.items = items;
        self
    }

    pub fn extraction_delay(mut self, delay: Duration) -> Self {
        self.extraction_delay = delay;
        self
    }

    pub fn fail_extraction(mut self, err: ServiceError) -> Self {
        self.fail_extraction = Some(err);
        self
    }

    pub fn fail_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn fail_item_writes(mut self) -> Self {
        self.fail_item_writes = true;
        self
    }

    pub fn generator(mut self, generator: StubGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Shuts the generation queue down before the first run.
    pub fn shut_down_queue(mut self) -> Self {
        self.queue_shut_down = true;
        self
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            timeout: self.timeout,
            generation_timeout: self.generation_timeout,
            generation_poll_interval: Duration::from_millis(10),
            min_confidence: 0.3,
            generate_images: true,
            progress_channel_capacity: 256,
            queue: QueueConfig {
                concurrency: 2,
                max_retries: 2,
                dispatch_delay_ms: 0,
            },
        }
    }

    pub fn build(self) -> TestHarness {
        let config = self.pipeline_config();
        let extractor = Arc::new(StubExtractor {
            text: self.text,
            confidence: self.confidence,
            items: self.items,
            delay: self.extraction_delay,
            fail_extraction: self.fail_extraction,
            seen_images: Mutex::new(Vec::new()),
        });
        let sessions = Arc::new(InMemorySessions::default());
        let items = Arc::new(InMemoryItems {
            fail_writes: self.fail_item_writes,
            ..Default::default()
        });
        let generator = self.generator.map(Arc::new);

        let collaborators = Collaborators {
            upload_handler: Arc::new(StubUploadHandler {
                fail: self.fail_upload,
            }),
            text_extractor: extractor.clone(),
            sessions: sessions.clone(),
            items: items.clone(),
            generator: generator
                .clone()
                .map(|g| g as Arc<dyn DishImageGenerator>),
        };

        let orchestrator = ProcessingOrchestrator::new(config, collaborators);
        if self.queue_shut_down {
            if let Some(queue) = orchestrator.queue() {
                queue.shutdown();
            }
        }

        TestHarness {
            orchestrator: Arc::new(orchestrator),
            extractor,
            sessions,
            items,
            generator,
        }
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains every event currently buffered on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
