//! Comment mapping record: [`super::IssueMapping`] at note granularity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::issue_mapping::MappingStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentMapping {
    pub id: Uuid,
    pub issue_mapping_id: Uuid,
    pub source_note_id: u64,
    pub target_note_id: u64,
    /// Fingerprint of the note body at last successful sync.
    pub content_hash: String,
    pub last_synced_at: DateTime<Utc>,
    pub sync_status: MappingStatus,
    pub sync_error: Option<String>,
}

impl CommentMapping {
    pub fn new(
        issue_mapping_id: Uuid,
        source_note_id: u64,
        target_note_id: u64,
        content_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_mapping_id,
            source_note_id,
            target_note_id,
            content_hash,
            last_synced_at: now,
            sync_status: MappingStatus::Synced,
            sync_error: None,
        }
    }

    pub fn mark_synced(&mut self, content_hash: String, now: DateTime<Utc>) {
        self.content_hash = content_hash;
        self.last_synced_at = now;
        self.sync_status = MappingStatus::Synced;
        self.sync_error = None;
    }
}
