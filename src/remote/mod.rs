//! Remote platform interface.
//!
//! [`RemoteApi`] is the raw operation surface of one platform instance. The
//! rest of the engine never calls it directly; every call goes through the
//! resilient facade in [`crate::client`], which layers rate limiting, circuit
//! breaking, and retry on top.

pub mod http;
pub mod ssrf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RemoteError;
use crate::models::Instance;

/// Issue state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Opened,
    Closed,
}

/// State filter for issue listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStateFilter {
    All,
    Opened,
    Closed,
}

/// State transition accepted by the update endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateEvent {
    Close,
    Reopen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMilestone {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIteration {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEpic {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub username: String,
}

/// An issue as validated at the remote boundary. Required identifiers are
/// checked before this type is constructed; everything else stays optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: u64,
    pub iid: u64,
    pub project_id: u64,
    pub title: String,
    pub description: Option<String>,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub milestone: Option<RemoteMilestone>,
    pub iteration: Option<RemoteIteration>,
    pub epic: Option<RemoteEpic>,
    pub assignees: Vec<RemoteUser>,
    pub weight: Option<i64>,
    pub web_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for issue creation on the target.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub description: Option<String>,
    pub labels: Vec<String>,
    pub weight: Option<i64>,
}

/// Partial update for an existing target issue. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub state_event: Option<StateEvent>,
    pub weight: Option<i64>,
}

/// A note (comment) on an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNote {
    pub id: u64,
    pub body: String,
    /// System notes are platform-generated and never mirrored.
    pub system: bool,
    pub author_username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLabel {
    pub id: u64,
    pub name: String,
    pub color: Option<String>,
}

/// Time-tracking figures for one issue, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStats {
    pub time_estimate_secs: i64,
    pub total_time_spent_secs: i64,
}

/// Result of uploading a file to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Project-relative URL of the uploaded file.
    pub url: String,
    pub markdown: Option<String>,
}

/// Raw operations against one platform instance.
///
/// Implementations validate responses defensively: any response missing a
/// required identifier fails with [`RemoteError::Contract`] rather than being
/// coerced.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_issues(
        &self,
        instance: &Instance,
        project_id: u64,
        updated_after: Option<DateTime<Utc>>,
        state: IssueStateFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteIssue>, RemoteError>;

    async fn get_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<RemoteIssue, RemoteError>;

    async fn create_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        issue: &NewIssue,
    ) -> Result<RemoteIssue, RemoteError>;

    async fn update_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        update: &IssueUpdate,
    ) -> Result<RemoteIssue, RemoteError>;

    async fn list_notes(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteNote>, RemoteError>;

    async fn create_note(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        body: &str,
    ) -> Result<RemoteNote, RemoteError>;

    async fn update_note(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<RemoteNote, RemoteError>;

    async fn list_labels(
        &self,
        instance: &Instance,
        project_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteLabel>, RemoteError>;

    async fn create_label(
        &self,
        instance: &Instance,
        project_id: u64,
        name: &str,
        color: &str,
    ) -> Result<RemoteLabel, RemoteError>;

    async fn upload_file(
        &self,
        instance: &Instance,
        project_id: u64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, RemoteError>;

    /// SSRF-guarded, size-capped download. The URL and every redirect hop are
    /// validated before any connection is opened to them.
    async fn download_file(
        &self,
        instance: &Instance,
        url: &Url,
        max_bytes: u64,
    ) -> Result<Vec<u8>, RemoteError>;

    async fn time_stats(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<TimeStats, RemoteError>;

    async fn set_time_estimate(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), RemoteError>;

    async fn reset_time_spent(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<(), RemoteError>;

    async fn add_time_spent(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), RemoteError>;
}
