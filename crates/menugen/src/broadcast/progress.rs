//! Progress broadcaster for real-time session status streaming.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::ProcessingStatus;

/// Stage of menu processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Preprocessing,
    Extracting,
    Parsing,
    Persisting,
    Generating,
    Completed,
    Failed,
}

impl PipelineStage {
    /// Nominal progress reported when the stage starts.
    ///
    /// `Failed` has none of its own: failure events carry the progress of the
    /// last stage reached.
    pub fn progress(&self) -> u8 {
        match self {
            PipelineStage::Preprocessing => 10,
            PipelineStage::Extracting => 30,
            PipelineStage::Parsing => 70,
            PipelineStage::Persisting => 90,
            PipelineStage::Generating => 95,
            PipelineStage::Completed => 100,
            PipelineStage::Failed => 0,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        match self {
            PipelineStage::Completed => ProcessingStatus::Completed,
            PipelineStage::Failed => ProcessingStatus::Failed,
            _ => ProcessingStatus::Processing,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Preprocessing => write!(f, "Preprocessing"),
            PipelineStage::Extracting => write!(f, "Extracting text"),
            PipelineStage::Parsing => write!(f, "Parsing menu items"),
            PipelineStage::Persisting => write!(f, "Saving"),
            PipelineStage::Generating => write!(f, "Generating images"),
            PipelineStage::Completed => write!(f, "Completed"),
            PipelineStage::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    pub status: ProcessingStatus,
    /// 0 to 100.
    pub progress: u8,
    pub stage: PipelineStage,
    /// Human-readable message describing current activity.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    /// User-facing error (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(session_id: &str, stage: PipelineStage, message: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: stage.status(),
            progress: stage.progress(),
            stage,
            message: message.to_string(),
            eta_seconds: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(session_id: &str, progress: u8, error: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: ProcessingStatus::Failed,
            progress,
            stage: PipelineStage::Failed,
            message: "Processing failed".to_string(),
            eta_seconds: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_eta(mut self, eta_seconds: Option<u64>) -> Self {
        self.eta_seconds = eta_seconds;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

struct BroadcasterInner {
    capacity: usize,
    sender: RwLock<broadcast::Sender<ProgressEvent>>,
    latest: Mutex<HashMap<String, ProgressEvent>>,
}

/// Broadcasts progress events for all sessions and remembers the latest
/// event of each.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BroadcasterInner {
                capacity,
                sender: RwLock::new(sender),
                latest: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: ProgressEvent) {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.session_id.clone(), event.clone());

        // No active receivers is fine.
        let _ = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe()
    }

    pub fn latest(&self, session_id: &str) -> Option<ProgressEvent> {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Closes the channel for every current subscriber. Later subscribers
    /// attach to a fresh channel.
    pub fn detach_subscribers(&self) {
        let (sender, _) = broadcast::channel(self.inner.capacity);
        let old = std::mem::replace(
            &mut *self
                .inner
                .sender
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            sender,
        );
        drop(old);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .receiver_count()
    }

    /// Starts tracking one processing run.
    pub fn start_session(&self, session_id: &str) -> Arc<SessionProgress> {
        Arc::new(SessionProgress::new(session_id, self.clone()))
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Publishes the events of a single run and guarantees it ends with exactly
/// one terminal event.
pub struct SessionProgress {
    session_id: String,
    broadcaster: ProgressBroadcaster,
    last_progress: AtomicU8,
    /// Held while publishing so no stage event can follow the terminal one.
    finished: Mutex<bool>,
}

impl SessionProgress {
    fn new(session_id: &str, broadcaster: ProgressBroadcaster) -> Self {
        Self {
            session_id: session_id.to_string(),
            broadcaster,
            last_progress: AtomicU8::new(0),
            finished: Mutex::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Progress of the last stage reached.
    pub fn last_progress(&self) -> u8 {
        self.last_progress.load(Ordering::Acquire)
    }

    /// Whether a terminal event has been published.
    pub fn is_finished(&self) -> bool {
        *self.lock_finished()
    }

    /// Publishes a non-terminal stage event. Ignored once the run finished.
    pub fn stage(&self, stage: PipelineStage, message: &str) {
        self.stage_with_eta(stage, message, None);
    }

    pub fn stage_with_eta(&self, stage: PipelineStage, message: &str, eta_seconds: Option<u64>) {
        let finished = self.lock_finished();
        if *finished {
            return;
        }
        self.last_progress.fetch_max(stage.progress(), Ordering::AcqRel);
        self.broadcaster
            .send(ProgressEvent::new(&self.session_id, stage, message).with_eta(eta_seconds));
    }

    /// Publishes the completion event. Returns `false` if the run already
    /// finished.
    pub fn completed(&self, message: &str) -> bool {
        let mut finished = self.lock_finished();
        if *finished {
            return false;
        }
        *finished = true;
        self.last_progress.store(100, Ordering::Release);
        self.broadcaster.send(ProgressEvent::new(
            &self.session_id,
            PipelineStage::Completed,
            message,
        ));
        true
    }

    /// Publishes the failure event. Returns `false` if the run already
    /// finished.
    pub fn failed(&self, error: &str) -> bool {
        let mut finished = self.lock_finished();
        if *finished {
            return false;
        }
        *finished = true;
        self.broadcaster.send(ProgressEvent::failed(
            &self.session_id,
            self.last_progress(),
            error,
        ));
        true
    }

    fn lock_finished(&self) -> MutexGuard<'_, bool> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = ProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(ProgressEvent::new(
            "session-1",
            PipelineStage::Extracting,
            "Reading menu",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.session_id, "session-1");
        assert_eq!(received.stage, PipelineStage::Extracting);
        assert_eq!(received.progress, 30);
        assert_eq!(received.status, ProcessingStatus::Processing);
    }

    #[test]
    fn test_latest_event_per_session() {
        let broadcaster = ProgressBroadcaster::default();
        broadcaster.send(ProgressEvent::new("a", PipelineStage::Preprocessing, "x"));
        broadcaster.send(ProgressEvent::new("b", PipelineStage::Preprocessing, "x"));
        broadcaster.send(ProgressEvent::new("a", PipelineStage::Parsing, "y"));

        assert_eq!(broadcaster.latest("a").unwrap().stage, PipelineStage::Parsing);
        assert_eq!(
            broadcaster.latest("b").unwrap().stage,
            PipelineStage::Preprocessing
        );
        assert!(broadcaster.latest("c").is_none());
    }

    #[test]
    fn test_session_emits_one_terminal_event() {
        let broadcaster = ProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let session = broadcaster.start_session("s");

        session.stage(PipelineStage::Parsing, "Parsing");
        assert!(session.failed("Processing timed out"));
        assert!(!session.completed("done"));
        assert!(!session.failed("again"));
        session.stage(PipelineStage::Persisting, "late");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.stage, PipelineStage::Parsing);
        let terminal = rx.try_recv().unwrap();
        assert_eq!(terminal.status, ProcessingStatus::Failed);
        assert_eq!(terminal.progress, 70);
        assert_eq!(terminal.error.as_deref(), Some("Processing timed out"));
        assert!(rx.try_recv().is_err());
        assert!(session.is_finished());
    }

    #[test]
    fn test_terminal_event_is_last_under_concurrent_stages() {
        for _ in 0..50 {
            let broadcaster = ProgressBroadcaster::new(4096);
            let mut rx = broadcaster.subscribe();
            let session = broadcaster.start_session("s");

            let spammer = {
                let session = session.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        session.stage(PipelineStage::Parsing, "Parsing");
                    }
                })
            };
            std::thread::yield_now();
            assert!(session.failed("Processing timed out"));
            spammer.join().unwrap();

            assert!(broadcaster.latest("s").unwrap().is_terminal());
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
            assert!(events.last().unwrap().is_terminal());
        }
    }

    #[test]
    fn test_completed_event() {
        let broadcaster = ProgressBroadcaster::new(10);
        let session = broadcaster.start_session("s");
        assert!(session.completed("Done"));

        let latest = broadcaster.latest("s").unwrap();
        assert_eq!(latest.progress, 100);
        assert_eq!(latest.status, ProcessingStatus::Completed);
        assert!(latest.is_terminal());
    }

    #[tokio::test]
    async fn test_detach_closes_existing_subscribers() {
        let broadcaster = ProgressBroadcaster::new(10);
        let mut old = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.detach_subscribers();

        assert!(matches!(
            old.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(broadcaster.subscriber_count(), 0);

        let mut fresh = broadcaster.subscribe();
        broadcaster.send(ProgressEvent::new("s", PipelineStage::Parsing, "x"));
        assert_eq!(fresh.recv().await.unwrap().session_id, "s");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = ProgressEvent::new("s", PipelineStage::Generating, "x").with_eta(Some(4));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sessionId"], "s");
        assert_eq!(json["etaSeconds"], 4);
        assert_eq!(json["stage"], "generating");
        assert!(json.get("error").is_none());
    }
}
