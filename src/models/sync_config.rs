//! Issue sync configuration record.
//!
//! One per repository mirror. Mutated by every sync run (status and
//! timestamps) and by configuration edits; deleted with the owning mirror.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the most recent sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SyncOutcome::Success => "success",
            SyncOutcome::Partial => "partial",
            SyncOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Per-mirror issue synchronization settings and run bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSyncConfig {
    pub id: Uuid,
    pub mirror_id: Uuid,
    pub enabled: bool,

    pub sync_comments: bool,
    pub sync_labels: bool,
    pub sync_attachments: bool,
    pub sync_weight: bool,
    pub sync_time_estimate: bool,
    pub sync_time_spent: bool,
    pub sync_closed_issues: bool,
    /// Update target issues when the source changes; otherwise create-only.
    pub update_existing: bool,
    /// Backfill issues that predate the config; otherwise baseline at first run.
    pub sync_existing_issues: bool,

    /// Sync cadence in minutes, bounded by `SyncLimitsConfig`.
    pub interval_minutes: u32,

    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncOutcome>,
    pub last_sync_error: Option<String>,
    pub next_sync_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssueSyncConfig {
    /// New configuration with the default toggle set.
    pub fn new(mirror_id: Uuid, interval_minutes: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mirror_id,
            enabled: true,
            sync_comments: true,
            sync_labels: true,
            sync_attachments: true,
            sync_weight: true,
            sync_time_estimate: true,
            sync_time_spent: true,
            sync_closed_issues: false,
            update_existing: true,
            sync_existing_issues: false,
            interval_minutes,
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
            next_sync_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the scheduler should pick this configuration up.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_sync_at.is_none_or(|at| at <= now)
    }

    /// The interval as a chrono duration.
    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_is_immediately_due() {
        let now = Utc::now();
        let config = IssueSyncConfig::new(Uuid::new_v4(), 30, now);
        assert!(config.is_due(now));
        assert!(config.last_sync_status.is_none());
    }

    #[test]
    fn disabled_config_is_never_due() {
        let now = Utc::now();
        let mut config = IssueSyncConfig::new(Uuid::new_v4(), 30, now);
        config.enabled = false;
        assert!(!config.is_due(now + Duration::hours(5)));
    }

    #[test]
    fn future_next_sync_is_not_due() {
        let now = Utc::now();
        let mut config = IssueSyncConfig::new(Uuid::new_v4(), 30, now);
        config.next_sync_at = Some(now + Duration::minutes(30));
        assert!(!config.is_due(now));
        assert!(config.is_due(now + Duration::minutes(31)));
    }
}
