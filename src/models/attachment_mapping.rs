//! Attachment mapping record.
//!
//! One per (parent item, source file URL). The parent is either an issue body
//! or a comment, never both; the enum makes the exactly-one invariant
//! unrepresentable rather than checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Owner of a re-hosted attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentParent {
    Issue(Uuid),
    Comment(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMapping {
    pub id: Uuid,
    pub parent: AttachmentParent,
    /// Absolute URL of the file on the source instance.
    pub source_url: String,
    /// URL of the re-hosted copy on the target instance.
    pub target_url: String,
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl AttachmentMapping {
    pub fn new(
        parent: AttachmentParent,
        source_url: String,
        target_url: String,
        filename: String,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent,
            source_url,
            target_url,
            filename,
            size_bytes,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_roundtrips_through_serde() {
        let parent = AttachmentParent::Comment(Uuid::new_v4());
        let json = serde_json::to_string(&parent).unwrap();
        let back: AttachmentParent = serde_json::from_str(&json).unwrap();
        assert_eq!(parent, back);
    }
}
