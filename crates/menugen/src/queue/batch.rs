use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::GenerationResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    /// Only reached through cancellation.
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Completion counters for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            percentage: if total == 0 { 100 } else { 0 },
            ..Default::default()
        }
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.finished())
    }
}

/// Aggregate state of one submitted batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub job_id: String,
    pub results: Vec<GenerationResult>,
    pub progress: BatchProgress,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) epoch: u64,
}

impl BatchJob {
    pub(crate) fn new(job_id: &str, total: usize, epoch: u64) -> Self {
        let now = Utc::now();
        let mut job = Self {
            job_id: job_id.to_string(),
            results: Vec::with_capacity(total),
            progress: BatchProgress::new(total),
            status: BatchStatus::Pending,
            started_at: now,
            ended_at: None,
            epoch,
        };
        if total == 0 {
            job.status = BatchStatus::Completed;
            job.ended_at = Some(now);
        }
        job
    }

    pub(crate) fn mark_dispatched(&mut self) {
        if self.status == BatchStatus::Pending {
            self.status = BatchStatus::Processing;
        }
        self.progress.in_flight += 1;
    }

    /// Records the terminal outcome of one item and refreshes the counters.
    pub(crate) fn record(&mut self, result: GenerationResult, now: DateTime<Utc>) {
        self.progress.in_flight = self.progress.in_flight.saturating_sub(1);
        if result.is_success() {
            self.progress.completed += 1;
        } else {
            self.progress.failed += 1;
        }
        self.results.push(result);
        self.recompute(now);
    }

    /// An attempt failed but the item went back to the queue.
    pub(crate) fn record_retry(&mut self) {
        self.progress.in_flight = self.progress.in_flight.saturating_sub(1);
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = BatchStatus::Failed;
        self.ended_at = Some(now);
        self.progress.in_flight = 0;
        self.progress.eta_seconds = None;
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        let progress = &mut self.progress;
        let finished = progress.finished();

        progress.percentage = if progress.total == 0 {
            100
        } else {
            ((finished as f64 / progress.total as f64) * 100.0).round() as u8
        };

        progress.eta_seconds = None;
        if self.status == BatchStatus::Processing && progress.completed > 0 {
            let elapsed_ms = (now - self.started_at).num_milliseconds().max(0) as f64;
            let per_item_ms = elapsed_ms / progress.completed as f64;
            let eta = (per_item_ms * progress.remaining() as f64 / 1000.0).round();
            progress.eta_seconds = Some(eta as u64);
        }

        if finished >= progress.total {
            self.status = BatchStatus::Completed;
            self.ended_at = Some(now);
        }
    }

    /// Whether the job ended at or before `cutoff`.
    pub(crate) fn ended_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_terminal() && self.ended_at.is_some_and(|ended| ended <= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_batch_is_complete_immediately() {
        let job = BatchJob::new("s", 0, 1);
        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.progress.percentage, 100);
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_percentage_rounds() {
        let mut job = BatchJob::new("s", 3, 1);
        job.mark_dispatched();
        job.record(GenerationResult::success("a", "u"), Utc::now());
        assert_eq!(job.progress.percentage, 33);
        job.mark_dispatched();
        job.record(GenerationResult::failed("b", "x"), Utc::now());
        assert_eq!(job.progress.percentage, 67);
        assert_eq!(job.status, BatchStatus::Processing);
    }

    #[test]
    fn test_eta_from_elapsed_per_completed_item() {
        let mut job = BatchJob::new("s", 4, 1);
        job.mark_dispatched();
        let now = job.started_at + Duration::seconds(2);
        job.record(GenerationResult::success("a", "u"), now);
        // 2000 ms per item, 3 remaining.
        assert_eq!(job.progress.eta_seconds, Some(6));
    }

    #[test]
    fn test_no_eta_before_first_success() {
        let mut job = BatchJob::new("s", 2, 1);
        job.mark_dispatched();
        job.record(GenerationResult::failed("a", "x"), Utc::now());
        assert_eq!(job.progress.eta_seconds, None);
    }

    #[test]
    fn test_completes_when_all_items_finished() {
        let mut job = BatchJob::new("s", 2, 1);
        job.mark_dispatched();
        job.mark_dispatched();
        job.record(GenerationResult::success("a", "u"), Utc::now());
        job.record(GenerationResult::failed("b", "x"), Utc::now());

        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.progress.finished(), job.progress.total);
        assert_eq!(job.progress.in_flight, 0);
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_ended_before_only_for_terminal_jobs() {
        let pending = BatchJob::new("a", 1, 1);
        let later = Utc::now() + Duration::hours(1);
        assert!(!pending.ended_before(later));

        let mut cancelled = BatchJob::new("b", 1, 1);
        cancelled.cancel(Utc::now());
        assert!(cancelled.ended_before(later));
        assert!(!cancelled.ended_before(Utc::now() - Duration::hours(1)));
    }
}
