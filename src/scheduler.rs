//! # Sync Scheduler
//!
//! Background driver for the sync engine. Each tick sweeps stale claims,
//! launches queued jobs, and enqueues runs for configurations whose
//! `next_sync_at` has elapsed. Exclusive execution per configuration is
//! guaranteed by the in-process [`JobRegistry`]; total concurrency is capped
//! by a bounded worker pool. The scheduler owns the resilience components
//! (rate limiter, circuit breaker registry) and injects them into every run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::models::{IssueSyncConfig, JobStatus, JobType, SyncJob, SyncOutcome};
use crate::orchestrator::Orchestrator;
use crate::registry::{ClaimOutcome, JobRegistry, pair_key};
use crate::remote::RemoteApi;
use crate::resilience::{CircuitBreakerRegistry, SlidingWindowLimiter};
use crate::store::{RecordStore, StoreError};

/// Background scheduler service.
pub struct SyncScheduler {
    config: Arc<AppConfig>,
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<Orchestrator>,
    registry: Arc<JobRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    worker_pool: Arc<Semaphore>,
    runs_cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct TickStats {
    launched: u64,
    deferred: u64,
    stale_released: u64,
}

impl SyncScheduler {
    /// Construct the scheduler and the engine components it owns.
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn RecordStore>,
        api: Arc<dyn RemoteApi>,
    ) -> Self {
        let limiter = Arc::new(SlidingWindowLimiter::new(&config.rate_limit));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
        let registry = Arc::new(JobRegistry::new());
        let orchestrator = Arc::new(
            Orchestrator::new(
                config.clone(),
                store.clone(),
                api,
                limiter,
                breakers.clone(),
            )
            .with_registry(registry.clone()),
        );
        let worker_pool = Arc::new(Semaphore::new(config.scheduler.max_concurrent_runs));

        Self {
            config,
            store,
            orchestrator,
            registry,
            breakers,
            worker_pool,
            runs_cancel: CancellationToken::new(),
        }
    }

    /// Breaker registry, for operator-initiated resets and status queries.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting sync scheduler");
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Scheduler tick failed");
                    }
                    histogram!("sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        // In-flight runs are cancelled cooperatively; each finalizes FAILED
        // at its next suspension point rather than being left running.
        self.runs_cancel.cancel();
        info!("Sync scheduler stopped");
    }

    /// One scheduling pass.
    pub async fn tick(&self) -> Result<(), SyncError> {
        let now = Utc::now();
        let mut stats = TickStats::default();

        self.sweep_stale(now, &mut stats).await;

        // Queued jobs first (manual triggers and earlier deferrals).
        for job in self.store.list_pending_jobs().await? {
            match self.store.get_config(job.config_id).await {
                Ok(config) if config.enabled => {
                    self.launch(&config, job, &mut stats).await?;
                }
                Ok(_) | Err(StoreError::NotFound { .. }) => {
                    self.fail_job(job, "configuration disabled or deleted while queued", now)
                        .await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Then configurations that have come due.
        for config in self.store.list_due_configs(now).await? {
            if self.store.find_active_job(config.id).await?.is_some() {
                continue;
            }
            let key = idempotency_key("scheduled", &config);
            let job = SyncJob::new(config.id, JobType::Scheduled, key, now);
            match self.store.insert_job(job.clone()).await {
                Ok(()) => {
                    self.launch(&config, job, &mut stats).await?;
                }
                // Lost the race against a concurrent trigger; fine.
                Err(StoreError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        gauge!("sync_scheduler_available_workers")
            .set(self.worker_pool.available_permits() as f64);
        debug!(
            launched = stats.launched,
            deferred = stats.deferred,
            stale_released = stats.stale_released,
            "Scheduler tick completed"
        );
        Ok(())
    }

    /// Manual "sync now". Idempotent per in-flight run: when a job is already
    /// pending or running for the configuration, its id is returned instead
    /// of starting a second run.
    pub async fn trigger_now(&self, config_id: Uuid) -> Result<Uuid, SyncError> {
        let config = self.store.get_config(config_id).await?;
        if !config.enabled {
            return Err(SyncError::fatal("configuration is disabled"));
        }
        if let Some(active) = self.store.find_active_job(config_id).await? {
            debug!(job_id = %active.id, "Sync already in flight; returning existing job");
            return Ok(active.id);
        }

        let now = Utc::now();
        let job = SyncJob::new(
            config_id,
            JobType::Manual,
            idempotency_key("manual", &config),
            now,
        );
        let job_id = job.id;
        self.store.insert_job(job.clone()).await?;

        // Launch immediately when capacity allows; otherwise the job stays
        // queued and the next tick picks it up.
        let mut stats = TickStats::default();
        self.launch(&config, job, &mut stats).await?;
        Ok(job_id)
    }

    /// Claim, reserve a worker slot, and spawn a run. Returns without
    /// launching (job left pending) when the claim or the pool is busy.
    async fn launch(
        &self,
        config: &IssueSyncConfig,
        job: SyncJob,
        stats: &mut TickStats,
    ) -> Result<(), SyncError> {
        let now = Utc::now();
        let mirror = match self.store.get_mirror(config.mirror_id).await {
            Ok(mirror) => mirror,
            Err(StoreError::NotFound { .. }) => {
                self.fail_job(job, "owning mirror deleted", now).await;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let pair = pair_key(mirror.source.id, mirror.target.id);
        match self.registry.try_claim(config.id, job.id, pair, now) {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyClaimed => {
                stats.deferred += 1;
                return Ok(());
            }
            ClaimOutcome::PairBusy => {
                // Advisory only: avoids two opposite-direction mirrors
                // hammering the same instance pair at once.
                debug!(config_id = %config.id, "Instance pair busy; deferring run");
                stats.deferred += 1;
                counter!("sync_scheduler_pair_deferrals_total").increment(1);
                return Ok(());
            }
        }

        // The pending snapshot may be stale; re-check under the claim.
        match self.store.get_job(job.id).await {
            Ok(current) if current.status == JobStatus::Pending => {}
            Ok(_) => {
                self.registry.release(config.id, job.id);
                return Ok(());
            }
            Err(err) => {
                self.registry.release(config.id, job.id);
                return Err(err.into());
            }
        }

        let permit = match self.worker_pool.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.registry.release(config.id, job.id);
                stats.deferred += 1;
                debug!(config_id = %config.id, "Worker pool full; deferring run");
                return Ok(());
            }
        };

        let orchestrator = self.orchestrator.clone();
        let registry = self.registry.clone();
        let cancel = self.runs_cancel.child_token();
        let config_id = config.id;
        let job_id = job.id;

        tokio::spawn(async move {
            let _permit = permit;
            // The claim outlives every exit path of the run, including a
            // panic inside the orchestrator.
            let _release = scopeguard::guard((), move |_| {
                registry.release(config_id, job_id);
            });
            let outcome = orchestrator.run(config_id, job, cancel).await;
            debug!(
                config_id = %config_id,
                job_id = %outcome.job_id,
                status = %outcome.status,
                "Sync run finished"
            );
        });

        stats.launched += 1;
        counter!("sync_scheduler_runs_launched_total").increment(1);
        Ok(())
    }

    /// Force-release claims with no recent heartbeat and mark their jobs
    /// FAILED; also recover store-side `Running` rows orphaned by a crash.
    async fn sweep_stale(&self, now: DateTime<Utc>, stats: &mut TickStats) {
        let max_age = Duration::seconds(self.config.scheduler.stale_claim_seconds as i64);

        for (config_id, claim) in self.registry.stale_claims(now, max_age) {
            warn!(
                config_id = %config_id,
                job_id = %claim.job_id,
                heartbeat_at = %claim.heartbeat_at,
                "Stale claim; force-releasing"
            );
            self.registry.release(config_id, claim.job_id);
            stats.stale_released += 1;
            counter!("sync_scheduler_stale_claims_total").increment(1);

            match self.store.get_job(claim.job_id).await {
                Ok(job) if job.status.is_active() => {
                    self.fail_job(job, "sync run stalled; claim force-released", now)
                        .await;
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "Could not load job for stale claim"),
            }
        }

        // Running rows without a claim are leftovers of a crashed process.
        if let Ok(running) = self.store.list_running_jobs().await {
            for job in running {
                let started_long_ago = job
                    .started_at
                    .is_some_and(|started| now - started > max_age);
                if started_long_ago && !self.registry.is_claimed(job.config_id) {
                    warn!(job_id = %job.id, "Recovering stuck job from a previous process");
                    self.fail_job(job, "stale job recovered after process restart", now)
                        .await;
                    stats.stale_released += 1;
                }
            }
        }
    }

    async fn fail_job(&self, mut job: SyncJob, reason: &str, now: DateTime<Utc>) {
        job.mark_finished(SyncOutcome::Failed, Some(reason.to_string()), now);
        if let Err(err) = self.store.update_job(job).await {
            error!(error = %err, "Could not persist failed job state");
        }
    }
}

fn idempotency_key(kind: &str, config: &IssueSyncConfig) -> String {
    let due = config
        .next_sync_at
        .map(|at| at.timestamp().to_string())
        .unwrap_or_else(|| "immediate".to_string());
    format!("{kind}:{}:{due}", config.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_stable_per_due_time() {
        let now = Utc::now();
        let config = IssueSyncConfig::new(Uuid::new_v4(), 30, now);
        assert_eq!(
            idempotency_key("scheduled", &config),
            idempotency_key("scheduled", &config)
        );

        let mut later = config.clone();
        later.next_sync_at = Some(now + Duration::minutes(30));
        assert_ne!(
            idempotency_key("scheduled", &config),
            idempotency_key("scheduled", &later)
        );
    }
}
