use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::broadcast::{PipelineStage, ProgressBroadcaster, ProgressEvent, SessionProgress};
use crate::models::{ItemGenerationStatus, MenuItem, ProcessingResult, ProcessingStatus, Session};
use crate::queue::{BatchGenerationQueue, BatchProgress};
use crate::services::{
    DishImageGenerator, ItemRepository, SessionRepository, TextExtractor, UploadHandler,
};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;

const REGENERATION_SUFFIX: &str = "-regen";

/// Batch key used when a session's images are generated again.
pub fn regeneration_key(session_id: &str) -> String {
    format!("{session_id}{REGENERATION_SUFFIX}")
}

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub upload_handler: Arc<dyn UploadHandler>,
    pub text_extractor: Arc<dyn TextExtractor>,
    pub sessions: Arc<dyn SessionRepository>,
    pub items: Arc<dyn ItemRepository>,
    /// Without a generator the run ends after persisting.
    pub generator: Option<Arc<dyn DishImageGenerator>>,
}

/// Stop signal and watchdog of one in-progress run.
struct RunControl {
    progress: Arc<SessionProgress>,
    stop_reason: Mutex<Option<PipelineError>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl RunControl {
    fn new(progress: Arc<SessionProgress>) -> Self {
        Self {
            progress,
            stop_reason: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    /// Ends the run early and publishes its failure event. Returns `false`
    /// when the run had already finished.
    fn stop(&self, reason: PipelineError) -> bool {
        let mut slot = self
            .stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || !self.progress.failed(reason.user_message()) {
            return false;
        }
        *slot = Some(reason);
        true
    }

    fn stop_reason(&self) -> Option<PipelineError> {
        self.stop_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stage boundary: bail out if the run was stopped.
    fn checkpoint(&self) -> Result<(), PipelineError> {
        match self.stop_reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn disarm(&self) {
        if let Some(watchdog) = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watchdog.abort();
        }
    }
}

/// Drives menu images through preprocessing, extraction, parsing,
/// persistence and dish image generation, publishing progress as it goes.
pub struct ProcessingOrchestrator {
    config: PipelineConfig,
    upload_handler: Arc<dyn UploadHandler>,
    text_extractor: Arc<dyn TextExtractor>,
    sessions: Arc<dyn SessionRepository>,
    items: Arc<dyn ItemRepository>,
    queue: Option<Arc<BatchGenerationQueue>>,
    broadcaster: ProgressBroadcaster,
    active: Mutex<HashMap<String, Arc<RunControl>>>,
    results: Mutex<HashMap<String, ProcessingResult>>,
}

impl ProcessingOrchestrator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let queue = collaborators
            .generator
            .filter(|_| config.generate_images)
            .map(|generator| Arc::new(BatchGenerationQueue::new(generator, config.queue.clone())));
        Self::with_queue(
            config,
            collaborators.upload_handler,
            collaborators.text_extractor,
            collaborators.sessions,
            collaborators.items,
            queue,
        )
    }

    /// Builds an orchestrator around an existing generation queue, which may
    /// be shared with other components.
    pub fn with_queue(
        config: PipelineConfig,
        upload_handler: Arc<dyn UploadHandler>,
        text_extractor: Arc<dyn TextExtractor>,
        sessions: Arc<dyn SessionRepository>,
        items: Arc<dyn ItemRepository>,
        queue: Option<Arc<BatchGenerationQueue>>,
    ) -> Self {
        let broadcaster = ProgressBroadcaster::new(config.progress_channel_capacity);
        Self {
            config,
            upload_handler,
            text_extractor,
            sessions,
            items,
            queue,
            broadcaster,
            active: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the full pipeline for one menu image.
    ///
    /// Never fails: any stage error, timeout or cancellation yields a
    /// `failed` result carrying a user-facing message, and exactly one
    /// terminal progress event is published for the run.
    pub async fn process_menu_image(&self, session_id: &str, image_url: &str) -> ProcessingResult {
        let started = Instant::now();
        let control = self.start_run(session_id);

        let mut ctx = PipelineContext::new(session_id, image_url);
        let span = info_span!("menu_pipeline", session_id = %session_id);
        let outcome = self.run_stages(&mut ctx, &control).instrument(span).await;

        control.disarm();
        self.finish_run(session_id, &control);

        let (status, error) = match outcome {
            Ok(()) => {
                let message = format!("Processed {} menu items", ctx.items.len());
                if control.progress.completed(&message) {
                    info!(session_id, items = ctx.items.len(), "Menu processing completed");
                    (ProcessingStatus::Completed, None)
                } else {
                    // Stopped after the last stage boundary.
                    let message = control
                        .stop_reason()
                        .map(|reason| reason.user_message())
                        .unwrap_or(PipelineError::Cancelled.user_message());
                    (ProcessingStatus::Failed, Some(message.to_string()))
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "Menu processing failed");
                let message = if control.progress.failed(e.user_message()) {
                    e.user_message()
                } else {
                    control
                        .stop_reason()
                        .map(|reason| reason.user_message())
                        .unwrap_or(e.user_message())
                };
                (ProcessingStatus::Failed, Some(message.to_string()))
            }
        };

        if ctx.session_persisted {
            if let Err(e) = self.sessions.update_status(session_id, status).await {
                warn!(session_id, error = %e, "Failed to update session status");
            }
        }

        let completed = status == ProcessingStatus::Completed;
        let result = ProcessingResult {
            session_id: session_id.to_string(),
            original_image: ctx.image_url,
            extracted_items: if completed { ctx.items } else { Vec::new() },
            generated_images: if completed { ctx.generated } else { Vec::new() },
            processing_status: status,
            error,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };

        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), result.clone());

        result
    }

    async fn run_stages(
        &self,
        ctx: &mut PipelineContext,
        control: &RunControl,
    ) -> Result<(), PipelineError> {
        let progress = &control.progress;

        // Stage 1: Preprocess
        control.checkpoint()?;
        progress.stage(PipelineStage::Preprocessing, "Preparing image...");
        let preprocessed = self
            .upload_handler
            .preprocess_image(&ctx.image_url)
            .instrument(info_span!("preprocess"))
            .await
            .map_err(PipelineError::Preprocess)?;
        ctx.preprocessed = Some(preprocessed);

        // Stage 2: Extract text
        control.checkpoint()?;
        progress.stage(PipelineStage::Extracting, "Reading menu text...");
        let extraction = self
            .text_extractor
            .extract_text(ctx.source_image())
            .instrument(info_span!("extract_text"))
            .await
            .map_err(PipelineError::Upstream)?;
        debug!(
            confidence = extraction.confidence,
            chars = extraction.text.len(),
            "Text extracted"
        );
        if extraction.confidence < self.config.min_confidence {
            return Err(PipelineError::LowConfidence {
                confidence: extraction.confidence,
                threshold: self.config.min_confidence,
            });
        }
        if extraction.text.trim().is_empty() {
            return Err(PipelineError::NoTextDetected);
        }
        let text = extraction.text.clone();
        ctx.extraction = Some(extraction);

        // Stage 3: Parse items
        control.checkpoint()?;
        progress.stage(PipelineStage::Parsing, "Identifying dishes...");
        ctx.items = self
            .text_extractor
            .parse_items(&text)
            .instrument(info_span!("parse_items"))
            .await
            .map_err(PipelineError::Upstream)?;

        // Stage 4: Persist
        control.checkpoint()?;
        progress.stage(PipelineStage::Persisting, "Saving menu...");
        let parsed = ctx.items.len();
        self.persist(ctx)
            .instrument(info_span!("persist", items = parsed))
            .await?;

        // Stage 5: Generate
        if let Some(queue) = &self.queue {
            if !ctx.items.is_empty() {
                control.checkpoint()?;
                progress.stage(PipelineStage::Generating, "Generating dish images...");
                self.generate(ctx, control, queue)
                    .instrument(info_span!("generate_images"))
                    .await?;
            }
        }

        control.checkpoint()
    }

    async fn persist(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let session = Session::new(&ctx.session_id, &ctx.image_url, ProcessingStatus::Processing);
        self.sessions
            .create(&session)
            .await
            .map_err(PipelineError::Repository)?;
        ctx.session_persisted = true;

        ctx.items = self
            .items
            .create_many(&ctx.session_id, &ctx.items)
            .await
            .map_err(PipelineError::Repository)?;
        Ok(())
    }

    async fn generate(
        &self,
        ctx: &mut PipelineContext,
        control: &RunControl,
        queue: &BatchGenerationQueue,
    ) -> Result<(), PipelineError> {
        let session_id = ctx.session_id.clone();

        if let Err(e) = queue.add_batch(&session_id, ctx.items.clone()) {
            warn!(error = %e, "Could not submit images for generation");
            return Ok(());
        }

        for item in &ctx.items {
            self.write_item_status(&session_id, &item.id, ItemGenerationStatus::Generating, None)
                .await;
        }

        let deadline = Instant::now() + self.config.generation_timeout;
        loop {
            control.checkpoint()?;

            let Some(job) = queue.get_batch(&session_id) else {
                break;
            };
            if job.status.is_terminal() {
                break;
            }

            let finished = job.progress.completed + job.progress.failed;
            control.progress.stage_with_eta(
                PipelineStage::Generating,
                &format!("Generated {} of {} images", finished, job.progress.total),
                job.progress.eta_seconds,
            );

            if Instant::now() >= deadline {
                warn!(
                    finished,
                    total = job.progress.total,
                    "Stopped waiting for image generation"
                );
                break;
            }
            tokio::time::sleep(self.config.generation_poll_interval).await;
        }

        let results = queue.get_batch_results(&session_id).unwrap_or_default();
        for result in &results {
            let url = Some(result.image_url.as_str()).filter(|url| !url.is_empty());
            self.write_item_status(&session_id, &result.item_id, result.item_status(), url)
                .await;
        }
        ctx.apply_generation_results(results);
        Ok(())
    }

    async fn write_item_status(
        &self,
        session_id: &str,
        item_id: &str,
        status: ItemGenerationStatus,
        image_url: Option<&str>,
    ) {
        if let Err(e) = self
            .items
            .update_generation_status(session_id, item_id, status, image_url)
            .await
        {
            warn!(session_id, item_id, error = %e, "Failed to update item generation status");
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, Arc<RunControl>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_run(&self, session_id: &str) -> Arc<RunControl> {
        let control = Arc::new(RunControl::new(self.broadcaster.start_session(session_id)));

        let timeout = self.config.timeout;
        let watched = Arc::clone(&control);
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if watched.stop(PipelineError::TimedOut(timeout)) {
                warn!(
                    session_id = watched.progress.session_id(),
                    "Menu processing timed out after {:?}", timeout
                );
            }
        });
        *control
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(watchdog);

        if self
            .lock_active()
            .insert(session_id.to_string(), Arc::clone(&control))
            .is_some()
        {
            debug!(session_id, "Session restarted while a previous run was active");
        }
        control
    }

    fn finish_run(&self, session_id: &str, control: &Arc<RunControl>) {
        let mut active = self.lock_active();
        if active
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, control))
        {
            active.remove(session_id);
        }
    }

    /// Last progress event published for the session.
    pub fn get_processing_progress(&self, session_id: &str) -> Option<ProgressEvent> {
        self.broadcaster.latest(session_id)
    }

    /// Progress of the session's generation batch (or of a derived batch
    /// key such as [`regeneration_key`]).
    pub fn get_image_generation_status(&self, session_id: &str) -> Option<BatchProgress> {
        self.queue.as_ref()?.get_batch_progress(session_id)
    }

    /// Aggregate result of the session's last finished run.
    pub fn get_processing_results(&self, session_id: &str) -> Option<ProcessingResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Queues the selected stored items of a session for generation under
    /// [`regeneration_key`]. Returns `false` when there is no generator or no
    /// stored item matches.
    pub async fn regenerate_images(&self, session_id: &str, item_ids: &[String]) -> bool {
        let Some(queue) = &self.queue else {
            return false;
        };

        let stored = match self.items.find_by_session_id(session_id).await {
            Ok(items) => items,
            Err(e) => {
                warn!(session_id, error = %e, "Failed to load items for regeneration");
                return false;
            }
        };

        let selected: Vec<MenuItem> = stored
            .into_iter()
            .filter(|item| item_ids.contains(&item.id))
            .collect();
        if selected.is_empty() {
            return false;
        }

        let key = regeneration_key(session_id);
        let count = selected.len();
        match queue.add_batch(&key, selected) {
            Ok(()) => {
                info!(session_id, count, "Queued images for regeneration");
                true
            }
            Err(e) => {
                warn!(session_id, error = %e, "Could not submit images for regeneration");
                false
            }
        }
    }

    /// Stops an active run: its watchdog is cleared, a cancellation event is
    /// published and its generation batch is cancelled. Returns `false` for
    /// sessions with no active run.
    pub fn cancel_processing(&self, session_id: &str) -> bool {
        let Some(control) = self.lock_active().remove(session_id) else {
            return false;
        };

        control.disarm();
        if control.stop(PipelineError::Cancelled) {
            info!(session_id, "Menu processing cancelled");
        }
        if let Some(queue) = &self.queue {
            queue.cancel_batch(session_id);
        }
        true
    }

    /// Clears every pending timeout and closes all progress subscriptions.
    /// Runs still in progress continue without a timeout.
    pub fn destroy(&self) {
        let controls: Vec<_> = self.lock_active().drain().map(|(_, c)| c).collect();
        for control in &controls {
            control.disarm();
        }
        self.broadcaster.detach_subscribers();
        debug!(runs = controls.len(), "Orchestrator destroyed");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.broadcaster.subscribe()
    }

    pub fn queue(&self) -> Option<&Arc<BatchGenerationQueue>> {
        self.queue.as_ref()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock_active().contains_key(session_id)
    }
}
