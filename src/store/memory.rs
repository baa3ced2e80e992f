//! In-memory record store.
//!
//! HashMap-backed implementation of [`RecordStore`] behind a single
//! `tokio::sync::RwLock`. Enforces the same uniqueness invariants a database
//! schema would: unique ids, one active job per configuration, and
//! bidirectional issue-mapping uniqueness per configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AttachmentMapping, AttachmentParent, Checkpoint, CommentMapping, IssueMapping, IssueSyncConfig,
    JobStatus, Mirror, SyncJob,
};

use super::{RecordStore, StoreError};

#[derive(Default)]
struct Inner {
    mirrors: HashMap<Uuid, Mirror>,
    configs: HashMap<Uuid, IssueSyncConfig>,
    issue_mappings: HashMap<Uuid, IssueMapping>,
    comment_mappings: HashMap<Uuid, CommentMapping>,
    attachment_mappings: HashMap<Uuid, AttachmentMapping>,
    jobs: HashMap<Uuid, SyncJob>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a mirror record (mirrors are otherwise read-only to the engine).
    pub async fn put_mirror(&self, mirror: Mirror) {
        self.inner.write().await.mirrors.insert(mirror.id, mirror);
    }

    /// Count of issue mappings, across all configurations.
    pub async fn issue_mapping_count(&self) -> usize {
        self.inner.read().await.issue_mappings.len()
    }

    /// Snapshot of all jobs, most recent first (test introspection).
    pub async fn jobs(&self) -> Vec<SyncJob> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<SyncJob> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| std::cmp::Reverse(job.created_at));
        jobs
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_mirror(&self, id: Uuid) -> Result<Mirror, StoreError> {
        self.inner
            .read()
            .await
            .mirrors
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("mirror", id))
    }

    async fn get_config(&self, id: Uuid) -> Result<IssueSyncConfig, StoreError> {
        self.inner
            .read()
            .await
            .configs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("sync config", id))
    }

    async fn insert_config(&self, config: IssueSyncConfig) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.configs.contains_key(&config.id) {
            return Err(StoreError::conflict(format!(
                "sync config {} already exists",
                config.id
            )));
        }
        inner.configs.insert(config.id, config);
        Ok(())
    }

    async fn update_config(&self, config: IssueSyncConfig) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.configs.contains_key(&config.id) {
            return Err(StoreError::not_found("sync config", config.id));
        }
        inner.configs.insert(config.id, config);
        Ok(())
    }

    async fn delete_config(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .configs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("sync config", id))
    }

    async fn list_due_configs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<IssueSyncConfig>, StoreError> {
        let inner = self.inner.read().await;
        let mut due: Vec<IssueSyncConfig> = inner
            .configs
            .values()
            .filter(|config| config.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|config| config.next_sync_at);
        Ok(due)
    }

    async fn find_issue_mapping(
        &self,
        config_id: Uuid,
        source_issue_id: u64,
    ) -> Result<Option<IssueMapping>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .issue_mappings
            .values()
            .find(|m| m.config_id == config_id && m.source_issue_id == source_issue_id)
            .cloned())
    }

    async fn insert_issue_mapping(&self, mapping: IssueMapping) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.issue_mappings.values().any(|existing| {
            existing.config_id == mapping.config_id
                && (existing.source_issue_id == mapping.source_issue_id
                    || existing.target_issue_id == mapping.target_issue_id)
        });
        if duplicate {
            return Err(StoreError::conflict(format!(
                "issue mapping for source {} / target {} already exists in config {}",
                mapping.source_issue_id, mapping.target_issue_id, mapping.config_id
            )));
        }
        inner.issue_mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn update_issue_mapping(&self, mapping: IssueMapping) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.issue_mappings.contains_key(&mapping.id) {
            return Err(StoreError::not_found("issue mapping", mapping.id));
        }
        inner.issue_mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn list_issue_mappings(&self, config_id: Uuid) -> Result<Vec<IssueMapping>, StoreError> {
        let inner = self.inner.read().await;
        let mut mappings: Vec<IssueMapping> = inner
            .issue_mappings
            .values()
            .filter(|m| m.config_id == config_id)
            .cloned()
            .collect();
        mappings.sort_by_key(|m| m.source_issue_iid);
        Ok(mappings)
    }

    async fn find_comment_mapping(
        &self,
        issue_mapping_id: Uuid,
        source_note_id: u64,
    ) -> Result<Option<CommentMapping>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .comment_mappings
            .values()
            .find(|m| m.issue_mapping_id == issue_mapping_id && m.source_note_id == source_note_id)
            .cloned())
    }

    async fn insert_comment_mapping(&self, mapping: CommentMapping) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.comment_mappings.values().any(|existing| {
            existing.issue_mapping_id == mapping.issue_mapping_id
                && existing.source_note_id == mapping.source_note_id
        });
        if duplicate {
            return Err(StoreError::conflict(format!(
                "comment mapping for note {} already exists",
                mapping.source_note_id
            )));
        }
        inner.comment_mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn update_comment_mapping(&self, mapping: CommentMapping) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.comment_mappings.contains_key(&mapping.id) {
            return Err(StoreError::not_found("comment mapping", mapping.id));
        }
        inner.comment_mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn find_attachment_mapping(
        &self,
        parent: AttachmentParent,
        source_url: &str,
    ) -> Result<Option<AttachmentMapping>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .attachment_mappings
            .values()
            .find(|m| m.parent == parent && m.source_url == source_url)
            .cloned())
    }

    async fn insert_attachment_mapping(
        &self,
        mapping: AttachmentMapping,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .attachment_mappings
            .values()
            .any(|existing| {
                existing.parent == mapping.parent && existing.source_url == mapping.source_url
            });
        if duplicate {
            return Err(StoreError::conflict(format!(
                "attachment mapping for {} already exists",
                mapping.source_url
            )));
        }
        inner.attachment_mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn latest_checkpoint(&self, config_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.config_id == config_id)
            .filter_map(|job| job.checkpoint)
            .max())
    }

    async fn get_job(&self, id: Uuid) -> Result<SyncJob, StoreError> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("sync job", id))
    }

    async fn insert_job(&self, job: SyncJob) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::conflict(format!("job {} already exists", job.id)));
        }
        let active_exists = inner
            .jobs
            .values()
            .any(|existing| existing.config_id == job.config_id && existing.status.is_active());
        if active_exists {
            return Err(StoreError::conflict(format!(
                "an active job already exists for config {}",
                job.config_id
            )));
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_job(&self, job: SyncJob) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(StoreError::not_found("sync job", job.id));
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_active_job(&self, config_id: Uuid) -> Result<Option<SyncJob>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .find(|job| job.config_id == config_id && job.status.is_active())
            .cloned())
    }

    async fn list_pending_jobs(&self) -> Result<Vec<SyncJob>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<SyncJob> = inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn list_running_jobs(&self) -> Result<Vec<SyncJob>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobType, MappingStatus};

    fn mapping(config_id: Uuid, source_id: u64, target_id: u64) -> IssueMapping {
        IssueMapping::new(
            config_id,
            source_id,
            source_id,
            target_id,
            target_id,
            Utc::now(),
            "hash".to_string(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn issue_mapping_uniqueness_is_bidirectional() {
        let store = MemoryStore::new();
        let config_id = Uuid::new_v4();

        store
            .insert_issue_mapping(mapping(config_id, 1, 100))
            .await
            .unwrap();

        // Same source issue, different target.
        let err = store
            .insert_issue_mapping(mapping(config_id, 1, 200))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Different source issue, same target.
        let err = store
            .insert_issue_mapping(mapping(config_id, 2, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Same pair in a different config is fine.
        store
            .insert_issue_mapping(mapping(Uuid::new_v4(), 1, 100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn one_active_job_per_config() {
        let store = MemoryStore::new();
        let config_id = Uuid::new_v4();
        let now = Utc::now();

        let first = SyncJob::new(config_id, JobType::Scheduled, "a".to_string(), now);
        store.insert_job(first.clone()).await.unwrap();

        let second = SyncJob::new(config_id, JobType::Manual, "b".to_string(), now);
        let err = store.insert_job(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let mut finished = first;
        finished.mark_finished(crate::models::SyncOutcome::Success, None, now);
        store.update_job(finished).await.unwrap();

        let third = SyncJob::new(config_id, JobType::Manual, "c".to_string(), now);
        store.insert_job(third).await.unwrap();
    }

    #[tokio::test]
    async fn mapping_status_survives_update() {
        let store = MemoryStore::new();
        let config_id = Uuid::new_v4();
        let mut m = mapping(config_id, 1, 100);
        store.insert_issue_mapping(m.clone()).await.unwrap();

        m.mark_errored("label create failed".to_string(), Utc::now());
        store.update_issue_mapping(m.clone()).await.unwrap();

        let fetched = store
            .find_issue_mapping(config_id, 1)
            .await
            .unwrap()
            .expect("mapping present");
        assert_eq!(fetched.sync_status, MappingStatus::Error);
        assert_eq!(
            fetched.sync_error.as_deref(),
            Some("label create failed")
        );
    }
}
