//! Scheduler and job-registry behavior: exclusivity, idempotent triggering,
//! and stale-job recovery.

mod test_utils;

use std::sync::Arc;

use chrono::{Duration, Utc};

use issue_sync::models::{JobStatus, JobType, SyncJob, SyncOutcome};
use issue_sync::scheduler::SyncScheduler;
use issue_sync::store::RecordStore;
use issue_sync::store::memory::MemoryStore;
use test_utils::{Harness, SOURCE_PROJECT, TARGET_PROJECT};

fn scheduler(h: &Harness) -> SyncScheduler {
    SyncScheduler::new(h.app.clone(), h.store.clone(), h.remote.clone())
}

async fn wait_for_terminal_jobs(store: &MemoryStore) {
    for _ in 0..500 {
        let jobs = store.jobs().await;
        if !jobs.is_empty() && jobs.iter().all(|job| job.status.is_terminal()) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("jobs did not reach a terminal state in time");
}

#[tokio::test]
async fn tick_launches_due_config_and_finalizes() {
    let h = Harness::new(|config| {
        config.sync_existing_issues = true;
    })
    .await;
    h.remote.seed_issue(
        &h.mirror.source,
        SOURCE_PROJECT,
        h.source_issue(1, "due issue", Utc::now() - Duration::hours(1)),
    );

    let scheduler = scheduler(&h);
    scheduler.tick().await.unwrap();
    wait_for_terminal_jobs(&h.store).await;

    let jobs = h.store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].job_type, JobType::Scheduled);

    assert_eq!(h.remote.issues(&h.mirror.target, TARGET_PROJECT).len(), 1);

    let config = h.store.get_config(h.config.id).await.unwrap();
    assert_eq!(config.last_sync_status, Some(SyncOutcome::Success));
    assert!(config.next_sync_at.unwrap() > Utc::now());
}

#[tokio::test]
async fn consecutive_ticks_never_double_run_a_config() {
    let h = Harness::new(|config| {
        config.sync_existing_issues = true;
    })
    .await;

    let scheduler = scheduler(&h);
    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();
    wait_for_terminal_jobs(&h.store).await;
    scheduler.tick().await.unwrap();

    // One job total: the second tick saw the active job, the third found the
    // config no longer due.
    let jobs = h.store.jobs().await;
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn trigger_now_is_idempotent_per_in_flight_run() {
    let h = Harness::new(|config| {
        // Not due for an hour; only the manual trigger starts anything.
        config.next_sync_at = Some(Utc::now() + Duration::hours(1));
    })
    .await;

    // Simulate a run already in flight.
    let active = SyncJob::new(
        h.config.id,
        JobType::Manual,
        "existing".to_string(),
        Utc::now(),
    );
    h.store.insert_job(active.clone()).await.unwrap();

    let scheduler = scheduler(&h);
    let job_id = scheduler.trigger_now(h.config.id).await.unwrap();
    assert_eq!(job_id, active.id, "no second run is started");
    assert_eq!(h.store.jobs().await.len(), 1);
}

#[tokio::test]
async fn trigger_now_runs_to_completion() {
    let h = Harness::new(|config| {
        config.next_sync_at = Some(Utc::now() + Duration::hours(1));
        config.sync_existing_issues = false;
    })
    .await;

    let scheduler = scheduler(&h);
    let job_id = scheduler.trigger_now(h.config.id).await.unwrap();
    wait_for_terminal_jobs(&h.store).await;

    let job = h.store.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.job_type, JobType::Manual);
    // Baseline run: a checkpoint was recorded.
    assert!(job.checkpoint.is_some());
}

#[tokio::test]
async fn trigger_now_rejects_disabled_configs() {
    let h = Harness::new(|config| {
        config.enabled = false;
    })
    .await;

    let scheduler = scheduler(&h);
    let result = scheduler.trigger_now(h.config.id).await;
    assert!(result.is_err());
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn stale_running_job_is_swept_to_failed() {
    let h = Harness::new(|config| {
        config.next_sync_at = Some(Utc::now() + Duration::hours(1));
    })
    .await;

    // A running job from a crashed process: no in-process claim, started
    // long before the stale window.
    let mut stuck = SyncJob::new(
        h.config.id,
        JobType::Scheduled,
        "stuck".to_string(),
        Utc::now() - Duration::hours(3),
    );
    stuck.mark_running(Utc::now() - Duration::hours(3));
    h.store.insert_job(stuck.clone()).await.unwrap();

    let scheduler = scheduler(&h);
    scheduler.tick().await.unwrap();

    let job = h.store.get_job(stuck.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("stale"));
}

#[tokio::test]
async fn queued_job_for_deleted_mirror_fails_cleanly() {
    let h = Harness::new(|config| {
        config.next_sync_at = Some(Utc::now() + Duration::hours(1));
    })
    .await;

    // Orphan the config, then queue a job for it.
    let mut orphaned = h.store.get_config(h.config.id).await.unwrap();
    orphaned.mirror_id = uuid::Uuid::new_v4();
    h.store.update_config(orphaned).await.unwrap();

    let job = SyncJob::new(h.config.id, JobType::Manual, "q".to_string(), Utc::now());
    h.store.insert_job(job.clone()).await.unwrap();

    let scheduler = scheduler(&h);
    scheduler.tick().await.unwrap();

    let job = h.store.get_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("mirror"));
}

#[tokio::test]
async fn store_coerces_to_trait_object() {
    // SyncScheduler and Orchestrator take the store as a trait object; make
    // sure the memory store satisfies the full contract in one place.
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    assert!(store.list_pending_jobs().await.unwrap().is_empty());
    assert!(store.list_running_jobs().await.unwrap().is_empty());
}
