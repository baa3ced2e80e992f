//! Content fingerprinting for change detection.
//!
//! A fingerprint covers the synchronizable fields of an issue in a canonical,
//! order-independent encoding, so two runs (or two processes) always agree on
//! whether a re-sync is needed.

use sha2::{Digest, Sha256};

use crate::remote::{IssueState, RemoteIssue};

/// Stable fingerprint over {title, description, state, sorted labels,
/// milestone id, sorted assignee ids, updated-at}.
pub fn issue_fingerprint(issue: &RemoteIssue) -> String {
    let mut hasher = Sha256::new();

    field(&mut hasher, "title", &issue.title);
    field(
        &mut hasher,
        "description",
        issue.description.as_deref().unwrap_or(""),
    );
    let state = match issue.state {
        IssueState::Opened => "opened",
        IssueState::Closed => "closed",
    };
    field(&mut hasher, "state", state);

    let mut labels = issue.labels.clone();
    labels.sort_unstable();
    field(&mut hasher, "labels", &labels.join(","));

    let milestone = issue
        .milestone
        .as_ref()
        .map(|m| m.id.to_string())
        .unwrap_or_default();
    field(&mut hasher, "milestone", &milestone);

    let mut assignee_ids: Vec<u64> = issue.assignees.iter().map(|a| a.id).collect();
    assignee_ids.sort_unstable();
    let assignees = assignee_ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    field(&mut hasher, "assignees", &assignees);

    field(&mut hasher, "updated_at", &issue.updated_at.to_rfc3339());

    hex::encode(hasher.finalize())
}

/// Fingerprint of a note body.
pub fn note_fingerprint(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

fn field(hasher: &mut Sha256, name: &str, value: &str) {
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hasher.update(b"\n");
}
