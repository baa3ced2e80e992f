//! Persistence boundary.
//!
//! [`RecordStore`] is the typed store the surrounding product implements over
//! its database. The engine treats it as the source of truth for idempotency:
//! mapping rows are what make re-running a sync safe. [`memory::MemoryStore`]
//! is a complete implementation used by tests and embedders.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AttachmentMapping, AttachmentParent, Checkpoint, CommentMapping, IssueMapping, IssueSyncConfig,
    Mirror, SyncJob,
};

/// Errors surfaced by a record store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness invariant was violated (duplicate mapping, duplicate id).
    #[error("conflict: {details}")]
    Conflict { details: String },

    #[error("store backend failure: {details}")]
    Backend { details: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(details: impl Into<String>) -> Self {
        StoreError::Conflict {
            details: details.into(),
        }
    }
}

/// Typed CRUD over the records the engine owns, plus read access to mirrors.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Mirrors (read-only: owned by the excluded configuration layer).
    async fn get_mirror(&self, id: Uuid) -> Result<Mirror, StoreError>;

    // Sync configurations.
    async fn get_config(&self, id: Uuid) -> Result<IssueSyncConfig, StoreError>;
    async fn insert_config(&self, config: IssueSyncConfig) -> Result<(), StoreError>;
    async fn update_config(&self, config: IssueSyncConfig) -> Result<(), StoreError>;
    async fn delete_config(&self, id: Uuid) -> Result<(), StoreError>;
    /// Enabled configurations whose `next_sync_at` has elapsed.
    async fn list_due_configs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<IssueSyncConfig>, StoreError>;

    // Issue mappings. Insert enforces bidirectional uniqueness per config:
    // at most one mapping per source issue and at most one per target issue.
    async fn find_issue_mapping(
        &self,
        config_id: Uuid,
        source_issue_id: u64,
    ) -> Result<Option<IssueMapping>, StoreError>;
    async fn insert_issue_mapping(&self, mapping: IssueMapping) -> Result<(), StoreError>;
    async fn update_issue_mapping(&self, mapping: IssueMapping) -> Result<(), StoreError>;
    async fn list_issue_mappings(&self, config_id: Uuid) -> Result<Vec<IssueMapping>, StoreError>;

    // Comment mappings.
    async fn find_comment_mapping(
        &self,
        issue_mapping_id: Uuid,
        source_note_id: u64,
    ) -> Result<Option<CommentMapping>, StoreError>;
    async fn insert_comment_mapping(&self, mapping: CommentMapping) -> Result<(), StoreError>;
    async fn update_comment_mapping(&self, mapping: CommentMapping) -> Result<(), StoreError>;

    // Attachment mappings.
    async fn find_attachment_mapping(
        &self,
        parent: AttachmentParent,
        source_url: &str,
    ) -> Result<Option<AttachmentMapping>, StoreError>;
    async fn insert_attachment_mapping(&self, mapping: AttachmentMapping)
    -> Result<(), StoreError>;

    // Sync jobs.
    /// Furthest checkpoint any job for this configuration has persisted.
    /// This is the discovery cursor for the next run, including runs that
    /// resume after a crash.
    async fn latest_checkpoint(&self, config_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;
    async fn get_job(&self, id: Uuid) -> Result<SyncJob, StoreError>;
    async fn insert_job(&self, job: SyncJob) -> Result<(), StoreError>;
    async fn update_job(&self, job: SyncJob) -> Result<(), StoreError>;
    /// The pending or running job for a configuration, if any.
    async fn find_active_job(&self, config_id: Uuid) -> Result<Option<SyncJob>, StoreError>;
    async fn list_pending_jobs(&self) -> Result<Vec<SyncJob>, StoreError>;
    async fn list_running_jobs(&self) -> Result<Vec<SyncJob>, StoreError>;
}
