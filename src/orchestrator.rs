//! Issue sync orchestrator.
//!
//! Runs one sync for one configuration through the phases
//! INIT -> DISCOVER -> PER_ISSUE_LOOP -> COMMENTS -> ATTACHMENTS_TIME_TRACKING
//! -> FINALIZE. Comment and time-tracking work happens per issue, after that
//! issue's create-or-update step and before its checkpoint write, so a crash
//! mid-run resumes from the last fully-processed issue with all of its
//! dependent work done.
//!
//! Item-level failures (one issue, one comment, one attachment) are recorded
//! and counted without stopping the batch. Run-level failures abort the batch
//! and finalize as FAILED. FINALIZE executes exactly once on every exit path,
//! including cancellation and budget exhaustion.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rand::{Rng, thread_rng};
use tokio::time::Duration as TokioDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::attachments::AttachmentPipeline;
use crate::client::ResilientClient;
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::hash;
use crate::mapper::{self, LabelMapper};
use crate::models::{
    AttachmentParent, Checkpoint, CommentMapping, IssueMapping, IssueSyncConfig, Mirror,
    RunCounters, SyncJob, SyncOutcome,
};
use crate::registry::JobRegistry;
use crate::remote::{
    IssueState, IssueStateFilter, IssueUpdate, NewIssue, RemoteApi, RemoteIssue, RemoteNote,
    StateEvent,
};
use crate::resilience::{CircuitBreakerRegistry, CircuitState, RetryPolicy, SlidingWindowLimiter};
use crate::store::RecordStore;

/// Entries held in the per-run label lookup cache.
const LABEL_CACHE_CAPACITY: usize = 512;

/// Result of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub job_id: Uuid,
    pub status: SyncOutcome,
    pub counters: RunCounters,
    pub error: Option<String>,
}

/// What happened to a single candidate issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped,
}

/// Mapped content for a target issue write.
struct MappedContent {
    description: String,
    labels: Vec<String>,
}

/// Per-mirror sync pipeline.
pub struct Orchestrator {
    app: Arc<AppConfig>,
    store: Arc<dyn RecordStore>,
    api: Arc<dyn RemoteApi>,
    limiter: Arc<SlidingWindowLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    registry: Option<Arc<JobRegistry>>,
}

impl Orchestrator {
    pub fn new(
        app: Arc<AppConfig>,
        store: Arc<dyn RecordStore>,
        api: Arc<dyn RemoteApi>,
        limiter: Arc<SlidingWindowLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            app,
            store,
            api,
            limiter,
            breakers,
            registry: None,
        }
    }

    /// Attach the job registry used for claim heartbeats.
    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Execute one sync run to completion. Never panics the caller with an
    /// error: every outcome, including run-level failure, is absorbed into
    /// the finalized [`RunOutcome`].
    #[instrument(skip_all, fields(config_id = %config_id, job_id = %job.id))]
    pub async fn run(
        &self,
        config_id: Uuid,
        mut job: SyncJob,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let run_started = std::time::Instant::now();
        job.mark_running(Utc::now());
        if let Err(err) = self.store.update_job(job.clone()).await {
            error!(error = %err, "Could not persist running state; continuing to finalize");
        }
        gauge!("sync_runs_in_flight").increment(1.0);

        let budget = TokioDuration::from_secs(self.app.scheduler.max_run_seconds);
        let result = tokio::select! {
            result = self.run_phases(config_id, &mut job) => result,
            _ = cancel.cancelled() => Err(SyncError::fatal("run cancelled")),
            _ = tokio::time::sleep(budget) => {
                Err(SyncError::fatal("run exceeded wall-clock budget"))
            }
        };

        let (status, error) = match result {
            Ok(()) if job.counters.failed == 0 => (SyncOutcome::Success, None),
            Ok(()) => (
                SyncOutcome::Partial,
                Some(format!("{} item(s) failed to sync", job.counters.failed)),
            ),
            Err(err) => (SyncOutcome::Failed, Some(err.to_string())),
        };

        let outcome = self.finalize(config_id, &mut job, status, error).await;

        gauge!("sync_runs_in_flight").decrement(1.0);
        histogram!("sync_run_duration_ms").record(run_started.elapsed().as_secs_f64() * 1_000.0);
        counter!("sync_runs_total", "outcome" => status.to_string()).increment(1);
        outcome
    }

    /// Single-writer terminal step: persists the job's terminal status and
    /// the configuration's `last_sync_*`/`next_sync_at` exactly once,
    /// regardless of which phase the run exited from.
    async fn finalize(
        &self,
        config_id: Uuid,
        job: &mut SyncJob,
        status: SyncOutcome,
        error: Option<String>,
    ) -> RunOutcome {
        let now = Utc::now();
        job.mark_finished(status, error.clone(), now);
        if let Err(err) = self.store.update_job(job.clone()).await {
            error!(error = %err, "Failed to persist terminal job state");
        }

        match self.store.get_config(config_id).await {
            Ok(mut config) => {
                let next_sync_at = now + jittered_interval(&config, &self.app);
                config.last_sync_at = Some(now);
                config.last_sync_status = Some(status);
                config.last_sync_error = error.clone();
                config.next_sync_at = Some(next_sync_at);
                config.updated_at = now;
                if let Err(err) = self.store.update_config(config).await {
                    error!(error = %err, "Failed to persist run outcome on configuration");
                }
            }
            Err(err) => {
                // Config deleted mid-run: nothing left to finalize onto.
                warn!(error = %err, "Configuration gone at finalize");
            }
        }

        info!(
            status = %status,
            processed = job.counters.processed,
            created = job.counters.created,
            updated = job.counters.updated,
            skipped = job.counters.skipped,
            failed = job.counters.failed,
            "Sync run finalized"
        );
        counter!("sync_items_failed_total").increment(job.counters.failed);

        RunOutcome {
            job_id: job.id,
            status,
            counters: job.counters,
            error,
        }
    }

    async fn run_phases(&self, config_id: Uuid, job: &mut SyncJob) -> Result<(), SyncError> {
        // INIT
        let config = self
            .store
            .get_config(config_id)
            .await
            .map_err(|err| SyncError::fatal(format!("configuration unavailable: {err}")))?;
        if !config.enabled {
            return Err(SyncError::fatal("configuration is disabled"));
        }
        let mirror = self
            .store
            .get_mirror(config.mirror_id)
            .await
            .map_err(|err| SyncError::fatal(format!("mirror unavailable: {err}")))?;

        let retry = RetryPolicy::from_config(&self.app.retry);
        let source = ResilientClient::new(
            self.api.clone(),
            mirror.source.clone(),
            self.limiter.clone(),
            self.breakers.clone(),
            retry.clone(),
            self.app.attachments.max_bytes,
        );
        let target = ResilientClient::new(
            self.api.clone(),
            mirror.target.clone(),
            self.limiter.clone(),
            self.breakers.clone(),
            retry,
            self.app.attachments.max_bytes,
        );

        // Fast-fail before doing any work if either side is known-unhealthy.
        for client in [&source, &target] {
            if client.breaker_state() == CircuitState::Open {
                return Err(SyncError::BreakerOpen {
                    destination: client.destination().to_string(),
                });
            }
        }

        // DISCOVER
        let cursor = match job.checkpoint {
            Some(checkpoint) => Some(checkpoint),
            None => self.store.latest_checkpoint(config.id).await?,
        };

        let candidates = if cursor.is_none() && !config.sync_existing_issues {
            // First run with backfill disabled: record the cutover point and
            // sync nothing. Issues updated after this baseline are picked up
            // by the next run.
            job.advance_checkpoint(Checkpoint {
                updated_at: Utc::now(),
                iid: 0,
            });
            self.store.update_job(job.clone()).await?;
            info!("First run; baseline recorded, no issues synced");
            Vec::new()
        } else {
            self.discover(&source, &mirror, &config, cursor).await?
        };
        debug!(candidates = candidates.len(), "Discovery complete");

        let labels = LabelMapper::new(LABEL_CACHE_CAPACITY);
        let pipeline = AttachmentPipeline::new(
            &source,
            &target,
            self.store.as_ref(),
            mirror.target_project_id,
        );

        // PER_ISSUE_LOOP
        for issue in candidates {
            job.counters.processed += 1;
            let mut counters = job.counters;
            let item = self
                .sync_issue(
                    &config,
                    &mirror,
                    &source,
                    &target,
                    &labels,
                    &pipeline,
                    &mut counters,
                    &issue,
                )
                .await;
            job.counters = counters;

            match item {
                Ok(ItemOutcome::Created) => {
                    job.counters.created += 1;
                    counter!("sync_issues_created_total").increment(1);
                }
                Ok(ItemOutcome::Updated) => {
                    job.counters.updated += 1;
                    counter!("sync_issues_updated_total").increment(1);
                }
                Ok(ItemOutcome::Unchanged | ItemOutcome::Skipped) => {
                    job.counters.skipped += 1;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    job.counters.failed += 1;
                    warn!(iid = issue.iid, error = %err, "Issue sync failed; continuing");
                }
            }

            // Checkpoint advances only after the issue and its dependent
            // work completed; a crash here resumes at the next issue.
            job.advance_checkpoint(Checkpoint {
                updated_at: issue.updated_at,
                iid: issue.iid,
            });
            self.store.update_job(job.clone()).await?;
            if let Some(registry) = &self.registry {
                registry.heartbeat(config.id, Utc::now());
            }
        }

        Ok(())
    }

    /// Fetch candidate issues, paginated, in deterministic order.
    async fn discover(
        &self,
        source: &ResilientClient,
        mirror: &Mirror,
        config: &IssueSyncConfig,
        cursor: Option<Checkpoint>,
    ) -> Result<Vec<RemoteIssue>, SyncError> {
        let state = if config.sync_closed_issues {
            IssueStateFilter::All
        } else {
            IssueStateFilter::Opened
        };
        let updated_after = cursor.map(|checkpoint| checkpoint.updated_at);
        let per_page = self.app.sync.page_size;

        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = source
                .list_issues(
                    mirror.source_project_id,
                    updated_after,
                    state,
                    page,
                    per_page,
                )
                .await?;
            let batch_len = batch.len();
            all.extend(batch);
            if batch_len < per_page as usize {
                break;
            }
            page += 1;
        }

        // Non-decreasing update time, ties broken by iid: a resumed run can
        // never skip an issue updated between two checkpoint writes.
        all.sort_by_key(|issue| (issue.updated_at, issue.iid));

        // The remote's `updated_after` filter may be inclusive; the cursor
        // comparison is what actually decides.
        if let Some(checkpoint) = cursor {
            all.retain(|issue| {
                Checkpoint {
                    updated_at: issue.updated_at,
                    iid: issue.iid,
                } > checkpoint
            });
        }
        Ok(all)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_issue(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        source: &ResilientClient,
        target: &ResilientClient,
        labels: &LabelMapper,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        issue: &RemoteIssue,
    ) -> Result<ItemOutcome, SyncError> {
        // Loop prevention: an issue that is itself a mirror copy from our
        // target instance must never be synced back.
        if mapper::carries_mirror_label(&issue.labels, mirror.target.id) {
            debug!(iid = issue.iid, "Skipping mirror copy (loop prevention)");
            return Ok(ItemOutcome::Skipped);
        }
        if issue.state == IssueState::Closed && !config.sync_closed_issues {
            return Ok(ItemOutcome::Skipped);
        }

        let fingerprint = hash::issue_fingerprint(issue);
        let existing = self.store.find_issue_mapping(config.id, issue.id).await?;

        let (mut mapping, outcome) = match existing {
            None => {
                let mapping = self
                    .create_target_issue(
                        config, mirror, target, labels, pipeline, counters, issue, &fingerprint,
                    )
                    .await?;
                (mapping, ItemOutcome::Created)
            }
            Some(mapping) if mapping.source_content_hash == fingerprint => {
                debug!(iid = issue.iid, "Content unchanged; skipping issue write");
                (mapping, ItemOutcome::Unchanged)
            }
            Some(mapping) if !config.update_existing => (mapping, ItemOutcome::Skipped),
            Some(mapping) => {
                let mapping = self
                    .update_target_issue(
                        config, mirror, target, labels, pipeline, counters, issue, mapping,
                        &fingerprint,
                    )
                    .await?;
                (mapping, ItemOutcome::Updated)
            }
        };

        // COMMENTS: diffed for every candidate issue, even when the issue
        // body itself was unchanged.
        if config.sync_comments {
            if let Err(err) = self
                .sync_comments(config, mirror, source, target, pipeline, counters, issue, &mapping)
                .await
            {
                if err.is_fatal() {
                    return Err(err);
                }
                counters.failed += 1;
                warn!(iid = issue.iid, error = %err, "Comment sync failed for issue");
            }
        }

        // ATTACHMENTS_TIME_TRACKING: time fields follow content changes only,
        // so an unchanged issue produces zero target writes.
        if matches!(outcome, ItemOutcome::Created | ItemOutcome::Updated) {
            if let Err(err) = self
                .sync_time_tracking(config, mirror, source, target, issue, &mapping)
                .await
            {
                if err.is_fatal() {
                    return Err(err);
                }
                counters.failed += 1;
                mapping.mark_errored(format!("time tracking: {err}"), Utc::now());
                self.store.update_issue_mapping(mapping.clone()).await?;
                warn!(iid = issue.iid, error = %err, "Time tracking sync failed");
            }
        }

        Ok(outcome)
    }

    /// Description, footer, and label set for a target write.
    #[allow(clippy::too_many_arguments)]
    async fn map_content(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        target: &ResilientClient,
        labels: &LabelMapper,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        parent: AttachmentParent,
        issue: &RemoteIssue,
    ) -> Result<MappedContent, SyncError> {
        let description = if config.sync_attachments {
            let outcome = pipeline
                .rewrite_body(parent, issue.description.as_deref().unwrap_or(""))
                .await?;
            counters.failed += u64::from(outcome.failed);
            outcome.body
        } else {
            issue.description.clone().unwrap_or_default()
        };

        let footer = mapper::render_footer(issue, &mirror.source, Utc::now());
        let description = mapper::compose_description(Some(&description), &footer);

        let mut wanted = Vec::new();
        if config.sync_labels {
            wanted.extend(issue.labels.iter().cloned());
        }
        wanted.extend(mapper::pm_field_labels(issue));
        wanted.push(mapper::mirror_label(mirror.source.id));
        let labels = labels
            .ensure_labels(target, mirror.target_project_id, config.id, &wanted)
            .await?;

        Ok(MappedContent {
            description,
            labels,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_target_issue(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        target: &ResilientClient,
        labels: &LabelMapper,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        issue: &RemoteIssue,
        fingerprint: &str,
    ) -> Result<IssueMapping, SyncError> {
        // The mapping id is fixed up front so attachment mappings can
        // reference it before the issue row exists.
        let mapping_id = Uuid::new_v4();
        let content = self
            .map_content(
                config,
                mirror,
                target,
                labels,
                pipeline,
                counters,
                AttachmentParent::Issue(mapping_id),
                issue,
            )
            .await?;

        let new_issue = NewIssue {
            title: issue.title.clone(),
            description: Some(content.description),
            labels: content.labels,
            weight: config.sync_weight.then_some(issue.weight).flatten(),
        };
        let created = target
            .create_issue(mirror.target_project_id, &new_issue)
            .await?;

        // Issues always open on creation; a closed source issue closes its
        // mirror right after.
        if issue.state == IssueState::Closed {
            target
                .update_issue(
                    mirror.target_project_id,
                    created.iid,
                    &IssueUpdate {
                        state_event: Some(StateEvent::Close),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let now = Utc::now();
        let mut mapping = IssueMapping::new(
            config.id,
            issue.id,
            issue.iid,
            created.id,
            created.iid,
            issue.updated_at,
            fingerprint.to_string(),
            now,
        );
        mapping.id = mapping_id;
        self.store.insert_issue_mapping(mapping.clone()).await?;
        info!(
            source_iid = issue.iid,
            target_iid = created.iid,
            "Created mirrored issue"
        );
        Ok(mapping)
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_target_issue(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        target: &ResilientClient,
        labels: &LabelMapper,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        issue: &RemoteIssue,
        mut mapping: IssueMapping,
        fingerprint: &str,
    ) -> Result<IssueMapping, SyncError> {
        let content = self
            .map_content(
                config,
                mirror,
                target,
                labels,
                pipeline,
                counters,
                AttachmentParent::Issue(mapping.id),
                issue,
            )
            .await?;

        let update = IssueUpdate {
            title: Some(issue.title.clone()),
            description: Some(content.description.clone()),
            labels: Some(content.labels.clone()),
            state_event: Some(match issue.state {
                IssueState::Closed => StateEvent::Close,
                IssueState::Opened => StateEvent::Reopen,
            }),
            weight: config.sync_weight.then_some(issue.weight).flatten(),
        };

        let now = Utc::now();
        match target
            .update_issue(mirror.target_project_id, mapping.target_issue_iid, &update)
            .await
        {
            Ok(_) => {
                mapping.mark_synced(fingerprint.to_string(), issue.updated_at, now);
                self.store.update_issue_mapping(mapping.clone()).await?;
                Ok(mapping)
            }
            Err(SyncError::Rejected { status: 404, .. }) => {
                // Orphan recovery: the target issue was deleted externally.
                // Re-create it and point the mapping at the new issue.
                warn!(
                    source_iid = issue.iid,
                    target_iid = mapping.target_issue_iid,
                    "Target issue missing; re-creating"
                );
                let new_issue = NewIssue {
                    title: issue.title.clone(),
                    description: Some(content.description),
                    labels: content.labels,
                    weight: config.sync_weight.then_some(issue.weight).flatten(),
                };
                let created = target
                    .create_issue(mirror.target_project_id, &new_issue)
                    .await?;
                if issue.state == IssueState::Closed {
                    target
                        .update_issue(
                            mirror.target_project_id,
                            created.iid,
                            &IssueUpdate {
                                state_event: Some(StateEvent::Close),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                mapping.target_issue_id = created.id;
                mapping.target_issue_iid = created.iid;
                mapping.mark_synced(fingerprint.to_string(), issue.updated_at, Utc::now());
                self.store.update_issue_mapping(mapping.clone()).await?;
                Ok(mapping)
            }
            Err(err) => {
                mapping.mark_errored(err.to_string(), now);
                self.store.update_issue_mapping(mapping).await?;
                Err(err)
            }
        }
    }

    /// Diff source comments against persisted comment mappings.
    #[allow(clippy::too_many_arguments)]
    async fn sync_comments(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        source: &ResilientClient,
        target: &ResilientClient,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        issue: &RemoteIssue,
        mapping: &IssueMapping,
    ) -> Result<(), SyncError> {
        let per_page = self.app.sync.page_size;
        let mut notes = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = source
                .list_notes(mirror.source_project_id, issue.iid, page, per_page)
                .await?;
            let batch_len = batch.len();
            notes.extend(batch);
            if batch_len < per_page as usize {
                break;
            }
            page += 1;
        }

        for note in notes.iter().filter(|note| !note.system) {
            match self
                .sync_one_comment(config, mirror, target, pipeline, counters, mapping, note)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    counters.failed += 1;
                    warn!(
                        iid = issue.iid,
                        note_id = note.id,
                        error = %err,
                        "Comment sync failed; continuing"
                    );
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_one_comment(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        target: &ResilientClient,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        mapping: &IssueMapping,
        note: &RemoteNote,
    ) -> Result<(), SyncError> {
        let fingerprint = hash::note_fingerprint(&note.body);
        let existing = self.store.find_comment_mapping(mapping.id, note.id).await?;
        let now = Utc::now();

        match existing {
            Some(comment) if comment.content_hash == fingerprint => Ok(()),
            Some(mut comment) => {
                let body = self
                    .comment_body(
                        config,
                        pipeline,
                        counters,
                        AttachmentParent::Comment(comment.id),
                        note,
                    )
                    .await?;
                target
                    .update_note(
                        mirror.target_project_id,
                        mapping.target_issue_iid,
                        comment.target_note_id,
                        &body,
                    )
                    .await?;
                comment.mark_synced(fingerprint, now);
                self.store.update_comment_mapping(comment).await?;
                Ok(())
            }
            None => {
                let comment_id = Uuid::new_v4();
                let body = self
                    .comment_body(
                        config,
                        pipeline,
                        counters,
                        AttachmentParent::Comment(comment_id),
                        note,
                    )
                    .await?;
                let created = target
                    .create_note(mirror.target_project_id, mapping.target_issue_iid, &body)
                    .await?;
                let mut comment =
                    CommentMapping::new(mapping.id, note.id, created.id, fingerprint, now);
                comment.id = comment_id;
                self.store.insert_comment_mapping(comment).await?;
                Ok(())
            }
        }
    }

    async fn comment_body(
        &self,
        config: &IssueSyncConfig,
        pipeline: &AttachmentPipeline<'_>,
        counters: &mut RunCounters,
        parent: AttachmentParent,
        note: &RemoteNote,
    ) -> Result<String, SyncError> {
        let body = if config.sync_attachments {
            let outcome = pipeline.rewrite_body(parent, &note.body).await?;
            counters.failed += u64::from(outcome.failed);
            outcome.body
        } else {
            note.body.clone()
        };
        Ok(render_comment(note, &body))
    }

    /// Weight is carried on the issue payload itself; this phase copies the
    /// time-tracking figures.
    async fn sync_time_tracking(
        &self,
        config: &IssueSyncConfig,
        mirror: &Mirror,
        source: &ResilientClient,
        target: &ResilientClient,
        issue: &RemoteIssue,
        mapping: &IssueMapping,
    ) -> Result<(), SyncError> {
        if !config.sync_time_estimate && !config.sync_time_spent {
            return Ok(());
        }
        let stats = source
            .time_stats(mirror.source_project_id, issue.iid)
            .await?;

        if config.sync_time_estimate && stats.time_estimate_secs > 0 {
            target
                .set_time_estimate(
                    mirror.target_project_id,
                    mapping.target_issue_iid,
                    stats.time_estimate_secs,
                )
                .await?;
        }

        if config.sync_time_spent {
            // The remote API only exposes additive time entries, so the
            // target total is rebuilt from zero. Last writer wins, including
            // over manual edits on the target; accepted behavior.
            target
                .reset_time_spent(mirror.target_project_id, mapping.target_issue_iid)
                .await?;
            if stats.total_time_spent_secs > 0 {
                target
                    .add_time_spent(
                        mirror.target_project_id,
                        mapping.target_issue_iid,
                        stats.total_time_spent_secs,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Mirrored comments carry an attribution line for the original author.
fn render_comment(note: &RemoteNote, body: &str) -> String {
    match &note.author_username {
        Some(author) => format!(
            "**@{author}** commented on {}:\n\n{body}",
            note.created_at.format("%Y-%m-%d")
        ),
        None => body.to_string(),
    }
}

/// Next-run delay: the configured interval plus bounded proportional jitter.
fn jittered_interval(config: &IssueSyncConfig, app: &AppConfig) -> chrono::Duration {
    let interval = config.interval();
    let min = app.scheduler.jitter_pct_min.max(0.0);
    let max = app.scheduler.jitter_pct_max.max(min);
    if max == 0.0 {
        return interval;
    }
    let pct = if (max - min).abs() < f64::EPSILON {
        min
    } else {
        thread_rng().gen_range(min..=max)
    };
    let jitter_seconds = (interval.num_seconds() as f64 * pct).round() as i64;
    interval + chrono::Duration::seconds(jitter_seconds)
}
