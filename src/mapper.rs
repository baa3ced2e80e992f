//! Reference mapping between instances.
//!
//! Cross-instance identity for users, milestones, iterations, and epics
//! cannot be trusted, so project-management fields are never written as
//! native target fields. Each present field becomes an informational label
//! plus a line in a structured description footer. Ordinary labels map 1:1
//! by exact name, auto-created on the target when absent.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::ResilientClient;
use crate::error::SyncError;
use crate::models::Instance;
use crate::remote::RemoteIssue;

/// Label stamped on every issue the engine creates; the presence of the
/// opposite instance's marker is what keeps bidirectional mirrors stable.
pub const MIRROR_LABEL_PREFIX: &str = "Mirrored-From::instance-";

const MILESTONE_LABEL_PREFIX: &str = "Milestone::";
const ITERATION_LABEL_PREFIX: &str = "Iteration::";
const EPIC_LABEL_PREFIX: &str = "Epic::";
const ASSIGNEE_LABEL_PREFIX: &str = "Assigned::";

/// Epic titles are abbreviated on the label to keep it scannable.
const EPIC_TITLE_LIMIT: usize = 40;

/// Color used when the engine creates a label on the target.
const DEFAULT_LABEL_COLOR: &str = "#428BCA";

/// Loop-prevention marker for issues mirrored from `instance_id`.
pub fn mirror_label(instance_id: Uuid) -> String {
    format!("{MIRROR_LABEL_PREFIX}{instance_id}")
}

/// Whether `labels` mark the issue as a mirror copy from `instance_id`.
pub fn carries_mirror_label(labels: &[String], instance_id: Uuid) -> bool {
    let marker = mirror_label(instance_id);
    labels.iter().any(|label| label == &marker)
}

/// Informational labels derived from the PM fields present on the issue.
pub fn pm_field_labels(issue: &RemoteIssue) -> Vec<String> {
    let mut labels = Vec::new();
    if let Some(milestone) = &issue.milestone {
        labels.push(format!("{MILESTONE_LABEL_PREFIX}{}", milestone.title));
    }
    if let Some(iteration) = &issue.iteration {
        labels.push(format!("{ITERATION_LABEL_PREFIX}{}", iteration.title));
    }
    if let Some(epic) = &issue.epic {
        labels.push(format!("{EPIC_LABEL_PREFIX}{}", short_title(&epic.title)));
    }
    for assignee in &issue.assignees {
        labels.push(format!("{ASSIGNEE_LABEL_PREFIX}{}", assignee.username));
    }
    labels
}

fn short_title(title: &str) -> String {
    if title.chars().count() <= EPIC_TITLE_LIMIT {
        return title.to_string();
    }
    let mut short: String = title.chars().take(EPIC_TITLE_LIMIT - 1).collect();
    short.push('…');
    short
}

/// Structured footer appended to mirrored descriptions: source link, PM
/// fields, original assignees, and the rendered last-sync timestamp.
pub fn render_footer(
    issue: &RemoteIssue,
    source: &Instance,
    synced_at: DateTime<Utc>,
) -> String {
    let source_link = issue.web_url.clone().unwrap_or_else(|| {
        format!(
            "{}projects/{}/issues/{}",
            source.base_url, issue.project_id, issue.iid
        )
    });

    let mut footer = String::from("\n\n---\n\n");
    footer.push_str(&format!("**Mirrored from:** {source_link}\n"));
    if let Some(milestone) = &issue.milestone {
        footer.push_str(&format!("**Milestone:** {}\n", milestone.title));
    }
    if let Some(iteration) = &issue.iteration {
        footer.push_str(&format!("**Iteration:** {}\n", iteration.title));
    }
    if let Some(epic) = &issue.epic {
        footer.push_str(&format!("**Epic:** {}\n", epic.title));
    }
    if !issue.assignees.is_empty() {
        let names: Vec<String> = issue
            .assignees
            .iter()
            .map(|a| format!("@{}", a.username))
            .collect();
        footer.push_str(&format!("**Originally assigned to:** {}\n", names.join(", ")));
    }
    footer.push_str(&format!(
        "\n*Last synced: {}*",
        synced_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    footer
}

/// Description plus footer, tolerating an absent source description.
pub fn compose_description(original: Option<&str>, footer: &str) -> String {
    let mut body = original.unwrap_or("").to_string();
    body.push_str(footer);
    body
}

/// Exact-name label mapper with a bounded lookup cache.
///
/// Scoped per orchestrator run and keyed by (config id, label name), so
/// concurrent runs for different configurations never observe each other's
/// cache entries.
pub struct LabelMapper {
    cache: Mutex<LruCache<(Uuid, String), ()>>,
}

impl LabelMapper {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Ensure `wanted` labels exist on the target project, creating missing
    /// ones. Returns the labels that exist (or were created); a label that
    /// cannot be created is skipped, never failing the whole issue.
    pub async fn ensure_labels(
        &self,
        target: &ResilientClient,
        target_project_id: u64,
        config_id: Uuid,
        wanted: &[String],
    ) -> Result<Vec<String>, SyncError> {
        let mut resolved = Vec::with_capacity(wanted.len());
        let mut missing: Vec<String> = Vec::new();

        {
            let mut cache = self.lock();
            for label in wanted {
                if cache.get(&(config_id, label.clone())).is_some() {
                    resolved.push(label.clone());
                } else {
                    missing.push(label.clone());
                }
            }
        }

        if missing.is_empty() {
            return Ok(resolved);
        }

        // One listing pass refreshes the cache for everything still unknown.
        let existing = self.list_all_labels(target, target_project_id).await?;
        {
            let mut cache = self.lock();
            for name in &existing {
                cache.put((config_id, name.clone()), ());
            }
        }

        for label in missing {
            if existing.contains(&label) {
                resolved.push(label);
                continue;
            }
            match target
                .create_label(target_project_id, &label, DEFAULT_LABEL_COLOR)
                .await
            {
                Ok(created) => {
                    debug!(label = %created.name, "Created label on target");
                    let mut cache = self.lock();
                    cache.put((config_id, created.name.clone()), ());
                    resolved.push(created.name);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    // Conflict usually means a concurrent create; either way
                    // the issue proceeds without this one label.
                    warn!(label = %label, error = %err, "Skipping label that could not be created");
                }
            }
        }

        Ok(resolved)
    }

    async fn list_all_labels(
        &self,
        target: &ResilientClient,
        target_project_id: u64,
    ) -> Result<Vec<String>, SyncError> {
        let mut names = Vec::new();
        let per_page = 100u32;
        let mut page = 1u32;
        loop {
            let batch = target.list_labels(target_project_id, page, per_page).await?;
            let batch_len = batch.len();
            names.extend(batch.into_iter().map(|label| label.name));
            if batch_len < per_page as usize {
                break;
            }
            page += 1;
        }
        Ok(names)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<(Uuid, String), ()>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
