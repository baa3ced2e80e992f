//! Resilient remote client facade.
//!
//! The only way the engine talks to a remote instance. Every operation runs
//! through the same composition: rate-limiter acquisition, circuit-breaker
//! admission, the raw call, then retry with exponential backoff for transient
//! failures within a fixed attempt budget. Breaker outcomes are recorded once
//! per attempted call; a breaker rejection is a fast-fail that never consumes
//! retry budget.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{RemoteError, SyncError};
use crate::models::Instance;
use crate::remote::{
    IssueStateFilter, IssueUpdate, NewIssue, RemoteApi, RemoteIssue, RemoteLabel, RemoteNote,
    TimeStats, UploadedFile,
};
use crate::resilience::{CircuitBreakerRegistry, CircuitState, RetryPolicy, SlidingWindowLimiter};

/// Facade over one instance's raw API.
pub struct ResilientClient {
    api: Arc<dyn RemoteApi>,
    instance: Instance,
    destination: String,
    limiter: Arc<SlidingWindowLimiter>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    max_download_bytes: u64,
}

impl ResilientClient {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        instance: Instance,
        limiter: Arc<SlidingWindowLimiter>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
        max_download_bytes: u64,
    ) -> Self {
        let destination = instance.destination();
        Self {
            api,
            instance,
            destination,
            limiter,
            breakers,
            retry,
            max_download_bytes,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Breaker state for this destination, without side effects.
    pub fn breaker_state(&self) -> CircuitState {
        self.breakers.state(&self.destination)
    }

    async fn execute<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut failures: u32 = 0;
        loop {
            if !self.breakers.check_and_transition(&self.destination) {
                counter!("remote_calls_rejected_total", "operation" => operation).increment(1);
                return Err(SyncError::BreakerOpen {
                    destination: self.destination.clone(),
                });
            }
            self.limiter.acquire(&self.destination).await;

            match call().await {
                Ok(value) => {
                    self.breakers.on_success(&self.destination);
                    counter!("remote_calls_total", "operation" => operation, "outcome" => "ok")
                        .increment(1);
                    return Ok(value);
                }
                Err(remote_err) => {
                    let classified = SyncError::from(remote_err);
                    match &classified {
                        // The guard rejected the call before the remote was
                        // contacted; nothing to record.
                        SyncError::SsrfRejected { .. } => {}
                        SyncError::Transient { .. } | SyncError::RateLimited { .. } => {
                            self.breakers.on_failure(&self.destination);
                        }
                        // The instance answered; the response just wasn't
                        // what we wanted. Healthy from the breaker's view.
                        _ => self.breakers.on_success(&self.destination),
                    }

                    if !classified.is_retryable() {
                        counter!("remote_calls_total", "operation" => operation, "outcome" => "error")
                            .increment(1);
                        return Err(classified);
                    }

                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        warn!(
                            operation,
                            destination = %self.destination,
                            attempts = failures,
                            error = %classified,
                            "Retry budget exhausted"
                        );
                        counter!("remote_calls_total", "operation" => operation, "outcome" => "exhausted")
                            .increment(1);
                        return Err(classified);
                    }

                    let hint = match &classified {
                        SyncError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Some(Duration::from_secs(*secs)),
                        _ => None,
                    };
                    let delay = self.retry.delay_for(failures - 1, hint);
                    debug!(
                        operation,
                        destination = %self.destination,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Transient remote failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn list_issues(
        &self,
        project_id: u64,
        updated_after: Option<DateTime<Utc>>,
        state: IssueStateFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteIssue>, SyncError> {
        self.execute("list_issues", || {
            self.api
                .list_issues(&self.instance, project_id, updated_after, state, page, per_page)
        })
        .await
    }

    pub async fn get_issue(&self, project_id: u64, iid: u64) -> Result<RemoteIssue, SyncError> {
        self.execute("get_issue", || {
            self.api.get_issue(&self.instance, project_id, iid)
        })
        .await
    }

    pub async fn create_issue(
        &self,
        project_id: u64,
        issue: &NewIssue,
    ) -> Result<RemoteIssue, SyncError> {
        self.execute("create_issue", || {
            self.api.create_issue(&self.instance, project_id, issue)
        })
        .await
    }

    pub async fn update_issue(
        &self,
        project_id: u64,
        iid: u64,
        update: &IssueUpdate,
    ) -> Result<RemoteIssue, SyncError> {
        self.execute("update_issue", || {
            self.api.update_issue(&self.instance, project_id, iid, update)
        })
        .await
    }

    pub async fn list_notes(
        &self,
        project_id: u64,
        iid: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteNote>, SyncError> {
        self.execute("list_notes", || {
            self.api
                .list_notes(&self.instance, project_id, iid, page, per_page)
        })
        .await
    }

    pub async fn create_note(
        &self,
        project_id: u64,
        iid: u64,
        body: &str,
    ) -> Result<RemoteNote, SyncError> {
        self.execute("create_note", || {
            self.api.create_note(&self.instance, project_id, iid, body)
        })
        .await
    }

    pub async fn update_note(
        &self,
        project_id: u64,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<RemoteNote, SyncError> {
        self.execute("update_note", || {
            self.api
                .update_note(&self.instance, project_id, iid, note_id, body)
        })
        .await
    }

    pub async fn list_labels(
        &self,
        project_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteLabel>, SyncError> {
        self.execute("list_labels", || {
            self.api
                .list_labels(&self.instance, project_id, page, per_page)
        })
        .await
    }

    pub async fn create_label(
        &self,
        project_id: u64,
        name: &str,
        color: &str,
    ) -> Result<RemoteLabel, SyncError> {
        self.execute("create_label", || {
            self.api.create_label(&self.instance, project_id, name, color)
        })
        .await
    }

    pub async fn upload_file(
        &self,
        project_id: u64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<UploadedFile, SyncError> {
        self.execute("upload_file", || {
            self.api
                .upload_file(&self.instance, project_id, filename, bytes.to_vec())
        })
        .await
    }

    pub async fn download_file(&self, url: &Url) -> Result<Vec<u8>, SyncError> {
        self.execute("download_file", || {
            self.api
                .download_file(&self.instance, url, self.max_download_bytes)
        })
        .await
    }

    pub async fn time_stats(&self, project_id: u64, iid: u64) -> Result<TimeStats, SyncError> {
        self.execute("time_stats", || {
            self.api.time_stats(&self.instance, project_id, iid)
        })
        .await
    }

    pub async fn set_time_estimate(
        &self,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), SyncError> {
        self.execute("set_time_estimate", || {
            self.api
                .set_time_estimate(&self.instance, project_id, iid, seconds)
        })
        .await
    }

    pub async fn reset_time_spent(&self, project_id: u64, iid: u64) -> Result<(), SyncError> {
        self.execute("reset_time_spent", || {
            self.api.reset_time_spent(&self.instance, project_id, iid)
        })
        .await
    }

    pub async fn add_time_spent(
        &self,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), SyncError> {
        self.execute("add_time_spent", || {
            self.api
                .add_time_spent(&self.instance, project_id, iid, seconds)
        })
        .await
    }
}
