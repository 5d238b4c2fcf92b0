use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::MenuItem;

/// Priority given to freshly submitted items.
pub const DEFAULT_PRIORITY: i32 = 1;

/// One pending or in-flight generation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub job_id: String,
    pub item: MenuItem,
    /// Higher is dispatched first.
    pub priority: i32,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) epoch: u64,
}

impl QueueItem {
    pub(crate) fn new(job_id: &str, item: MenuItem, epoch: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            item,
            priority: DEFAULT_PRIORITY,
            retry_count: 0,
            enqueued_at: Utc::now(),
            epoch,
        }
    }

    /// Identity of the request within the queue.
    pub fn key(&self) -> (String, String) {
        (self.job_id.clone(), self.item.id.clone())
    }

    /// Prepares the item for another attempt.
    pub(crate) fn bump_for_retry(&mut self) {
        self.retry_count += 1;
        self.priority = self.priority.saturating_add(1);
        self.enqueued_at = Utc::now();
    }
}
