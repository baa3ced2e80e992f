//! Attachment pipeline.
//!
//! Finds markdown upload links in issue descriptions and comment bodies,
//! transfers the referenced files from the source instance to the target
//! project, and rewrites every occurrence of the old URL. The download path
//! (in the remote client) validates each URL and every redirect hop against
//! the SSRF guard and enforces the size ceiling. A failed attachment never
//! aborts the parent item: the original link stays in place and the failure
//! is counted toward the run's partial-success indicator.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::client::ResilientClient;
use crate::error::SyncError;
use crate::models::{AttachmentMapping, AttachmentParent};
use crate::store::{RecordStore, StoreError};

/// Markdown links (and image links) whose target is a bare path or URL.
static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[[^\]]*\]\(([^()\s]+)\)").expect("link pattern compiles")
});

/// One attachment reference discovered in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLink {
    /// The URL exactly as written in the body (rewrite key).
    pub as_written: String,
    /// Absolute download URL on the source instance.
    pub absolute: Url,
    pub filename: String,
}

/// Result of rewriting one body.
#[derive(Debug, Clone)]
pub struct BodyOutcome {
    pub body: String,
    pub rehosted: u32,
    pub failed: u32,
}

impl BodyOutcome {
    fn unchanged(body: &str) -> Self {
        Self {
            body: body.to_string(),
            rehosted: 0,
            failed: 0,
        }
    }
}

/// Upload links in `body` that point at a source-hosted upload path.
/// Foreign-host links are not attachments and are left untouched.
pub fn find_upload_links(body: &str, source_base: &Url) -> Vec<UploadLink> {
    let mut links: Vec<UploadLink> = Vec::new();
    for captures in LINK_PATTERN.captures_iter(body) {
        let written = &captures[1];
        let absolute = if written.starts_with("/uploads/") {
            match source_base.join(written) {
                Ok(url) => url,
                Err(_) => continue,
            }
        } else {
            match Url::parse(written) {
                Ok(url)
                    if url.origin() == source_base.origin()
                        && url.path().contains("/uploads/") =>
                {
                    url
                }
                _ => continue,
            }
        };

        let filename = absolute
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .unwrap_or("attachment")
            .to_string();

        let link = UploadLink {
            as_written: written.to_string(),
            absolute,
            filename,
        };
        if !links.iter().any(|existing| existing.as_written == link.as_written) {
            links.push(link);
        }
    }
    links
}

/// Transfers attachments for one mirror direction.
pub struct AttachmentPipeline<'a> {
    source: &'a ResilientClient,
    target: &'a ResilientClient,
    store: &'a dyn RecordStore,
    target_project_id: u64,
}

impl<'a> AttachmentPipeline<'a> {
    pub fn new(
        source: &'a ResilientClient,
        target: &'a ResilientClient,
        store: &'a dyn RecordStore,
        target_project_id: u64,
    ) -> Self {
        Self {
            source,
            target,
            store,
            target_project_id,
        }
    }

    /// Re-host every source attachment referenced in `body` and rewrite the
    /// links. Only store failures propagate; transfer failures are counted
    /// and the original link is left in place.
    pub async fn rewrite_body(
        &self,
        parent: AttachmentParent,
        body: &str,
    ) -> Result<BodyOutcome, SyncError> {
        let links = find_upload_links(body, &self.source.instance().base_url);
        if links.is_empty() {
            return Ok(BodyOutcome::unchanged(body));
        }

        let mut outcome = BodyOutcome::unchanged(body);
        for link in links {
            match self.transfer(parent, &link).await {
                Ok(target_url) => {
                    outcome.body = outcome.body.replace(&link.as_written, &target_url);
                    outcome.rehosted += 1;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    outcome.failed += 1;
                    warn!(
                        url = %link.absolute,
                        error = %err,
                        "Attachment transfer failed; leaving original link in place"
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// Download from the source and upload to the target, reusing a persisted
    /// mapping when the file was transferred by an earlier run.
    async fn transfer(
        &self,
        parent: AttachmentParent,
        link: &UploadLink,
    ) -> Result<String, SyncError> {
        if let Some(existing) = self
            .store
            .find_attachment_mapping(parent, link.absolute.as_str())
            .await?
        {
            debug!(url = %link.absolute, "Attachment already re-hosted; reusing");
            return Ok(existing.target_url);
        }

        let bytes = self.source.download_file(&link.absolute).await?;
        let size_bytes = bytes.len() as u64;
        let uploaded = self
            .target
            .upload_file(self.target_project_id, &link.filename, &bytes)
            .await?;

        let mapping = AttachmentMapping::new(
            parent,
            link.absolute.to_string(),
            uploaded.url.clone(),
            link.filename.clone(),
            size_bytes,
            Utc::now(),
        );
        match self.store.insert_attachment_mapping(mapping).await {
            Ok(()) => {}
            // A concurrent duplicate insert does not undo the transfer.
            Err(StoreError::Conflict { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        Ok(uploaded.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://src.example/").unwrap()
    }

    #[test]
    fn finds_relative_upload_links() {
        let body = "See ![screen](/uploads/abc123/screen.png) and [log](/uploads/def456/out.log).";
        let links = find_upload_links(body, &base());
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].as_written, "/uploads/abc123/screen.png");
        assert_eq!(
            links[0].absolute.as_str(),
            "https://src.example/uploads/abc123/screen.png"
        );
        assert_eq!(links[0].filename, "screen.png");
        assert_eq!(links[1].filename, "out.log");
    }

    #[test]
    fn finds_absolute_same_origin_links() {
        let body = "[f](https://src.example/group/proj/uploads/xyz/file.pdf)";
        let links = find_upload_links(body, &base());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].filename, "file.pdf");
    }

    #[test]
    fn skips_foreign_and_non_upload_links() {
        let body = "\
            [ext](https://elsewhere.example/uploads/x/y.png) \
            [docs](https://src.example/help/api.md) \
            [rel](../other/page)";
        assert!(find_upload_links(body, &base()).is_empty());
    }

    #[test]
    fn deduplicates_repeated_references() {
        let body = "![a](/uploads/k/a.png) then again ![a](/uploads/k/a.png)";
        let links = find_upload_links(body, &base());
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn body_without_links_is_unchanged() {
        assert!(find_upload_links("no attachments here", &base()).is_empty());
    }
}
