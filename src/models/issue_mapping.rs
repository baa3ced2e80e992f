//! Issue mapping record.
//!
//! The persisted correspondence between a source issue and the target issue
//! created for it. At most one mapping exists per source issue per config and
//! per target issue per config; the store enforces both directions. Mappings
//! are never deleted automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sync state of a single mapped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Synced,
    Pending,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueMapping {
    pub id: Uuid,
    pub config_id: Uuid,

    /// Global numeric id of the source issue.
    pub source_issue_id: u64,
    /// Project-scoped sequence number of the source issue.
    pub source_issue_iid: u64,
    pub target_issue_id: u64,
    pub target_issue_iid: u64,

    pub source_updated_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub sync_status: MappingStatus,
    pub sync_error: Option<String>,
    /// Fingerprint of the source content at last successful sync.
    pub source_content_hash: String,
}

impl IssueMapping {
    pub fn new(
        config_id: Uuid,
        source_issue_id: u64,
        source_issue_iid: u64,
        target_issue_id: u64,
        target_issue_iid: u64,
        source_updated_at: DateTime<Utc>,
        content_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            config_id,
            source_issue_id,
            source_issue_iid,
            target_issue_id,
            target_issue_iid,
            source_updated_at,
            last_synced_at: now,
            sync_status: MappingStatus::Synced,
            sync_error: None,
            source_content_hash: content_hash,
        }
    }

    /// Record a successful re-sync of this issue.
    pub fn mark_synced(&mut self, content_hash: String, source_updated_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.source_content_hash = content_hash;
        self.source_updated_at = source_updated_at;
        self.last_synced_at = now;
        self.sync_status = MappingStatus::Synced;
        self.sync_error = None;
    }

    /// Record an item-level failure without losing the mapping.
    pub fn mark_errored(&mut self, error: String, now: DateTime<Utc>) {
        self.sync_status = MappingStatus::Error;
        self.sync_error = Some(error);
        self.last_synced_at = now;
    }
}
