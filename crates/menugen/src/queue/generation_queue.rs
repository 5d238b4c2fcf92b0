use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::models::{GenerationResult, MenuItem};
use crate::services::{DishImageGenerator, GenerationError};

use super::batch::{BatchJob, BatchProgress, BatchStatus};
use super::error::QueueError;
use super::item::QueueItem;

const MAX_RETRIES_MESSAGE: &str = "Max retries exceeded";

/// Queue-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
    pub jobs: usize,
}

type ItemKey = (String, String);

struct QueueState {
    queue: VecDeque<QueueItem>,
    /// Dispatched requests, keyed by identity, mapped to the batch epoch
    /// they were dispatched under.
    in_flight: HashMap<ItemKey, u64>,
    jobs: HashMap<String, BatchJob>,
    next_epoch: u64,
}

impl QueueState {
    fn sort_by_priority(&mut self) {
        // `sort_by` is stable, so equal priorities keep their arrival order.
        self.queue
            .make_contiguous()
            .sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    fn drop_job_work(&mut self, job_id: &str) -> usize {
        let before = self.queue.len();
        self.queue.retain(|item| item.job_id != job_id);
        self.in_flight.retain(|(job, _), _| job != job_id);
        before - self.queue.len()
    }
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Notify,
    generator: Arc<dyn DishImageGenerator>,
    config: QueueConfig,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops the highest-priority item and marks it in flight.
    fn take_next(&self) -> Option<QueueItem> {
        let mut state = self.lock_state();
        let item = state.queue.pop_front()?;
        state.in_flight.insert(item.key(), item.epoch);
        if let Some(job) = state.jobs.get_mut(&item.job_id) {
            job.mark_dispatched();
        }
        Some(item)
    }

    fn apply_outcome(&self, mut item: QueueItem, outcome: Result<GenerationResult, GenerationError>) {
        let mut state = self.lock_state();

        let key = item.key();
        if state.in_flight.get(&key).copied() != Some(item.epoch) {
            debug!(
                "Discarding outcome for {}/{} (batch cancelled or replaced)",
                item.job_id, item.item.id
            );
            return;
        }
        state.in_flight.remove(&key);

        let max_retries = self.config.max_retries;
        let Some(job) = state.jobs.get_mut(&item.job_id) else {
            return;
        };
        if job.epoch != item.epoch || job.status.is_terminal() {
            return;
        }

        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_retryable() && item.retry_count < max_retries => {
                debug!(
                    "Retrying {}/{} after error (attempt {}): {}",
                    item.job_id,
                    item.item.id,
                    item.retry_count + 1,
                    e
                );
                job.record_retry();
                item.bump_for_retry();
                state.queue.push_back(item);
                state.sort_by_priority();
                drop(state);
                self.work_available.notify_one();
                return;
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    "Giving up on {}/{} after {} retries: {}",
                    item.job_id, item.item.id, item.retry_count, e
                );
                GenerationResult::failed(&item.item.id, MAX_RETRIES_MESSAGE)
            }
            Err(e) => {
                warn!(
                    "Generation failed for {}/{}: {}",
                    item.job_id, item.item.id, e
                );
                GenerationResult::failed(&item.item.id, &e.to_string())
            }
        };

        job.record(result, Utc::now());
        if job.status == BatchStatus::Completed {
            info!(
                "Batch {} completed: {} succeeded, {} failed",
                job.job_id, job.progress.completed, job.progress.failed
            );
        }
    }
}

struct Outcome {
    item: QueueItem,
    result: Result<GenerationResult, GenerationError>,
}

struct Workers {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Runs dish image generation for submitted batches on a fixed set of
/// worker tasks.
///
/// Workers are started on the current Tokio runtime by the first
/// [`add_batch`](Self::add_batch) call and stopped by
/// [`shutdown`](Self::shutdown) or when the queue is dropped.
pub struct BatchGenerationQueue {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
    shut_down: AtomicBool,
}

impl BatchGenerationQueue {
    /// # Panics
    /// Panics if `config.concurrency` is 0.
    pub fn new(generator: Arc<dyn DishImageGenerator>, config: QueueConfig) -> Self {
        assert!(config.concurrency > 0, "concurrency must be > 0");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    in_flight: HashMap::new(),
                    jobs: HashMap::new(),
                    next_epoch: 1,
                }),
                work_available: Notify::new(),
                generator,
                config,
            }),
            workers: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Submits `items` under `job_id`, replacing any earlier batch with the
    /// same id. Returns as soon as the items are queued.
    pub fn add_batch(&self, job_id: &str, items: Vec<MenuItem>) -> Result<(), QueueError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(QueueError::ShutDown);
        }
        self.ensure_workers()?;

        let count = items.len();
        {
            let mut state = self.shared.lock_state();
            let epoch = state.next_epoch;
            state.next_epoch += 1;

            let dropped = state.drop_job_work(job_id);
            if state.jobs.contains_key(job_id) {
                debug!(
                    "Replacing batch {} ({} queued items dropped)",
                    job_id, dropped
                );
            }

            state
                .jobs
                .insert(job_id.to_string(), BatchJob::new(job_id, count, epoch));
            state
                .queue
                .extend(items.into_iter().map(|item| QueueItem::new(job_id, item, epoch)));
            state.sort_by_priority();
        }

        for _ in 0..count {
            self.shared.work_available.notify_one();
        }

        info!("Queued batch {} with {} items", job_id, count);
        Ok(())
    }

    pub fn get_batch_progress(&self, job_id: &str) -> Option<BatchProgress> {
        self.shared
            .lock_state()
            .jobs
            .get(job_id)
            .map(|job| job.progress.clone())
    }

    pub fn get_batch_results(&self, job_id: &str) -> Option<Vec<GenerationResult>> {
        self.shared
            .lock_state()
            .jobs
            .get(job_id)
            .map(|job| job.results.clone())
    }

    pub fn get_batch_status(&self, job_id: &str) -> Option<BatchStatus> {
        self.shared.lock_state().jobs.get(job_id).map(|job| job.status)
    }

    pub fn get_batch(&self, job_id: &str) -> Option<BatchJob> {
        self.shared.lock_state().jobs.get(job_id).cloned()
    }

    /// Drops the job's queued work and marks it failed. Generator calls that
    /// are already running finish, but their outcomes are ignored.
    ///
    /// Returns `false` for unknown or already finished jobs.
    pub fn cancel_batch(&self, job_id: &str) -> bool {
        let mut state = self.shared.lock_state();
        match state.jobs.get(job_id) {
            Some(job) if !job.status.is_terminal() => {}
            _ => return false,
        }

        let dropped = state.drop_job_work(job_id);
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.cancel(Utc::now());
        }
        info!("Cancelled batch {} ({} queued items dropped)", job_id, dropped);
        true
    }

    /// Sets the priority of every still-queued item of the job and returns
    /// how many were updated.
    pub fn set_priority(&self, job_id: &str, priority: i32) -> usize {
        let mut state = self.shared.lock_state();
        let mut updated = 0;
        for item in state.queue.iter_mut().filter(|item| item.job_id == job_id) {
            item.priority = priority;
            updated += 1;
        }
        if updated > 0 {
            state.sort_by_priority();
        }
        updated
    }

    /// Removes finished jobs that ended more than `max_age_hours` ago.
    pub fn cleanup(&self, max_age_hours: u64) -> usize {
        let hours = i64::try_from(max_age_hours).unwrap_or(i64::MAX);
        let age = chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX);
        self.cleanup_older_than(age)
    }

    pub fn cleanup_older_than(&self, age: chrono::Duration) -> usize {
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut state = self.shared.lock_state();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !job.ended_before(cutoff));
        let removed = before - state.jobs.len();

        if removed > 0 {
            info!("Cleaned up {} finished batches", removed);
        }
        removed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock_state();
        QueueStats {
            queued: state.queue.len(),
            in_flight: state.in_flight.len(),
            jobs: state.jobs.len(),
        }
    }

    /// Stops the workers. Calls already running are not interrupted.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down generation queue...");
        self.stop_workers();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn stop_workers(&self) {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(workers) = workers {
            let _ = workers.shutdown_tx.send(true);
            debug!("Signalled {} generation workers to stop", workers.handles.len());
        }
    }

    fn ensure_workers(&self) -> Result<(), QueueError> {
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if workers.is_some() {
            return Ok(());
        }

        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| QueueError::RuntimeUnavailable)?;

        let concurrency = self.shared.config.concurrency;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (result_tx, result_rx) = mpsc::channel::<Outcome>(concurrency * 2);

        let mut handles = Vec::with_capacity(concurrency + 1);
        for worker_id in 0..concurrency {
            handles.push(runtime.spawn(run_worker(
                worker_id,
                Arc::clone(&self.shared),
                result_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        handles.push(runtime.spawn(collect_outcomes(Arc::clone(&self.shared), result_rx)));

        info!("Started {} generation workers", concurrency);

        *workers = Some(Workers {
            shutdown_tx,
            handles,
        });
        Ok(())
    }
}

impl Drop for BatchGenerationQueue {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

async fn run_worker(
    worker_id: usize,
    shared: Arc<Shared>,
    results: mpsc::Sender<Outcome>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Generation worker {} started", worker_id);
    let dispatch_delay = shared.config.dispatch_delay();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(item) = shared.take_next() else {
            tokio::select! {
                _ = shared.work_available.notified() => {}
                _ = shutdown.changed() => break,
            }
            continue;
        };

        debug!(
            "Worker {} generating {}/{} (attempt {})",
            worker_id,
            item.job_id,
            item.item.id,
            item.retry_count + 1
        );
        let result = shared.generator.generate_dish_image(&item.item).await;

        if results.send(Outcome { item, result }).await.is_err() {
            debug!("Worker {} result channel closed", worker_id);
            break;
        }

        if !dispatch_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(dispatch_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    debug!("Generation worker {} stopped", worker_id);
}

async fn collect_outcomes(shared: Arc<Shared>, mut results: mpsc::Receiver<Outcome>) {
    while let Some(Outcome { item, result }) = results.recv().await {
        shared.apply_outcome(item, result);
    }
    debug!("Generation outcome collector stopped");
}
