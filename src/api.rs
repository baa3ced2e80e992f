//! Surface exposed to the surrounding product's web/API layer.
//!
//! Thin pass-through: trigger-now, status queries, and configuration CRUD
//! with shape validation only. No sync-engine logic lives here.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::models::{IssueSyncConfig, SyncOutcome};
use crate::scheduler::SyncScheduler;
use crate::store::RecordStore;

/// Status summary for one configuration.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusView {
    pub last_sync_at: Option<chrono::DateTime<Utc>>,
    pub last_sync_status: Option<SyncOutcome>,
    pub last_sync_error: Option<String>,
    pub next_sync_at: Option<chrono::DateTime<Utc>>,
}

/// Engine operations consumed by the excluded web layer.
pub struct SyncService {
    app: Arc<AppConfig>,
    store: Arc<dyn RecordStore>,
    scheduler: Arc<SyncScheduler>,
}

impl SyncService {
    pub fn new(
        app: Arc<AppConfig>,
        store: Arc<dyn RecordStore>,
        scheduler: Arc<SyncScheduler>,
    ) -> Self {
        Self {
            app,
            store,
            scheduler,
        }
    }

    /// Start a sync for `config_id` now. Idempotent per in-flight run: when
    /// one is already pending or running, its job id is returned.
    pub async fn trigger_sync(&self, config_id: Uuid) -> Result<Uuid, SyncError> {
        self.scheduler.trigger_now(config_id).await
    }

    /// Most recent run outcome and the next scheduled time.
    pub async fn status(&self, config_id: Uuid) -> Result<SyncStatusView, SyncError> {
        let config = self.store.get_config(config_id).await?;
        Ok(SyncStatusView {
            last_sync_at: config.last_sync_at,
            last_sync_status: config.last_sync_status,
            last_sync_error: config.last_sync_error,
            next_sync_at: config.next_sync_at,
        })
    }

    /// Create a configuration. The interval is clamped into the configured
    /// bounds and run bookkeeping is reset; toggles pass through as given.
    pub async fn create_config(
        &self,
        mut config: IssueSyncConfig,
    ) -> Result<IssueSyncConfig, SyncError> {
        // The owning mirror must exist; everything else about it is the
        // configuration layer's concern.
        self.store.get_mirror(config.mirror_id).await?;

        let now = Utc::now();
        config.interval_minutes = self.app.clamp_interval_minutes(config.interval_minutes);
        config.last_sync_at = None;
        config.last_sync_status = None;
        config.last_sync_error = None;
        config.next_sync_at = Some(now);
        config.created_at = now;
        config.updated_at = now;

        self.store.insert_config(config.clone()).await?;
        Ok(config)
    }

    /// Update toggles and interval; run bookkeeping is preserved from the
    /// stored record.
    pub async fn update_config(
        &self,
        mut config: IssueSyncConfig,
    ) -> Result<IssueSyncConfig, SyncError> {
        let stored = self.store.get_config(config.id).await?;

        config.mirror_id = stored.mirror_id;
        config.interval_minutes = self.app.clamp_interval_minutes(config.interval_minutes);
        config.last_sync_at = stored.last_sync_at;
        config.last_sync_status = stored.last_sync_status;
        config.last_sync_error = stored.last_sync_error;
        config.next_sync_at = stored.next_sync_at;
        config.created_at = stored.created_at;
        config.updated_at = Utc::now();

        self.store.update_config(config.clone()).await?;
        Ok(config)
    }

    pub async fn delete_config(&self, config_id: Uuid) -> Result<(), SyncError> {
        self.store.delete_config(config_id).await?;
        Ok(())
    }
}
