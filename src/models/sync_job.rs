//! Sync job record: the ephemeral execution and checkpoint state of one run.
//!
//! A job must never remain `Running` once execution has exited the process.
//! The orchestrator's finalize path guarantees a terminal transition on every
//! exit; the scheduler's stale sweep covers a prior process crash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sync_config::SyncOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Per-run work counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Resumable cursor: the last fully-processed source issue.
///
/// Ordering matches issue processing order (update time, ties broken by iid),
/// so a persisted checkpoint only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checkpoint {
    pub updated_at: DateTime<Utc>,
    pub iid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub config_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub counters: RunCounters,
    pub checkpoint: Option<Checkpoint>,
    /// Deduplicates retried triggers: one active job per key.
    pub idempotency_key: String,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(config_id: Uuid, job_type: JobType, idempotency_key: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_id,
            job_type,
            status: JobStatus::Pending,
            counters: RunCounters::default(),
            checkpoint: None,
            idempotency_key,
            error: None,
            started_at: None,
            finished_at: None,
            created_at: now,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
    }

    /// Terminal transition; maps the run outcome onto the job status.
    pub fn mark_finished(&mut self, outcome: SyncOutcome, error: Option<String>, now: DateTime<Utc>) {
        self.status = match outcome {
            SyncOutcome::Success | SyncOutcome::Partial => JobStatus::Completed,
            SyncOutcome::Failed => JobStatus::Failed,
        };
        self.error = error;
        self.finished_at = Some(now);
    }

    /// Advance the cursor; a checkpoint never moves backwards.
    pub fn advance_checkpoint(&mut self, next: Checkpoint) {
        match self.checkpoint {
            Some(current) if next <= current => {}
            _ => self.checkpoint = Some(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn checkpoint_orders_by_time_then_iid() {
        let now = Utc::now();
        let a = Checkpoint {
            updated_at: now,
            iid: 4,
        };
        let b = Checkpoint {
            updated_at: now,
            iid: 9,
        };
        let c = Checkpoint {
            updated_at: now + Duration::seconds(1),
            iid: 1,
        };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn checkpoint_never_regresses() {
        let now = Utc::now();
        let mut job = SyncJob::new(Uuid::new_v4(), JobType::Scheduled, "k".to_string(), now);
        job.advance_checkpoint(Checkpoint {
            updated_at: now,
            iid: 7,
        });
        job.advance_checkpoint(Checkpoint {
            updated_at: now - Duration::minutes(5),
            iid: 2,
        });
        assert_eq!(
            job.checkpoint,
            Some(Checkpoint {
                updated_at: now,
                iid: 7
            })
        );
    }

    #[test]
    fn finished_job_is_terminal() {
        let now = Utc::now();
        let mut job = SyncJob::new(Uuid::new_v4(), JobType::Manual, "k".to_string(), now);
        job.mark_running(now);
        assert!(job.status.is_active());
        job.mark_finished(SyncOutcome::Partial, None, now);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.status.is_terminal());
    }
}
