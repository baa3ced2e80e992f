//! Typed records shared between the engine and the persistence boundary.
//!
//! These are plain data types; durability is the concern of the
//! [`crate::store::RecordStore`] implementation that owns them.

pub mod attachment_mapping;
pub mod comment_mapping;
pub mod issue_mapping;
pub mod mirror;
pub mod sync_config;
pub mod sync_job;

pub use attachment_mapping::{AttachmentMapping, AttachmentParent};
pub use comment_mapping::CommentMapping;
pub use issue_mapping::{IssueMapping, MappingStatus};
pub use mirror::{Instance, Mirror};
pub use sync_config::{IssueSyncConfig, SyncOutcome};
pub use sync_job::{Checkpoint, JobStatus, JobType, RunCounters, SyncJob};
