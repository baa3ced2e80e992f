//! Shared test fixtures: a programmable in-memory remote platform and a
//! harness wiring it to the engine with an in-memory store.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use issue_sync::config::AppConfig;
use issue_sync::error::RemoteError;
use issue_sync::models::{Instance, IssueSyncConfig, JobType, Mirror, SyncJob};
use issue_sync::orchestrator::{Orchestrator, RunOutcome};
use issue_sync::registry::JobRegistry;
use issue_sync::remote::{
    IssueState, IssueStateFilter, IssueUpdate, NewIssue, RemoteApi, RemoteIssue, RemoteLabel,
    RemoteNote, StateEvent, TimeStats, UploadedFile,
};
use issue_sync::resilience::{CircuitBreakerRegistry, SlidingWindowLimiter};
use issue_sync::store::RecordStore;
use issue_sync::store::memory::MemoryStore;
use tokio_util::sync::CancellationToken;

pub const SOURCE_PROJECT: u64 = 11;
pub const TARGET_PROJECT: u64 = 22;

type ProjectKey = (Uuid, u64);
type IssueKey = (Uuid, u64, u64);

#[derive(Default)]
struct World {
    issues: HashMap<ProjectKey, Vec<RemoteIssue>>,
    notes: HashMap<IssueKey, Vec<RemoteNote>>,
    labels: HashMap<ProjectKey, Vec<RemoteLabel>>,
    time: HashMap<IssueKey, TimeStats>,
    files: HashMap<String, Vec<u8>>,
    next_id: u64,
    calls: HashMap<&'static str, u32>,
    failures: Vec<(&'static str, u16, String)>,
}

impl World {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id + 1000
    }
}

/// Programmable fake platform covering both instances of a mirror.
#[derive(Default)]
pub struct MockRemote {
    world: Mutex<World>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: &'static str) -> Result<(), RemoteError> {
        let mut world = self.lock();
        *world.calls.entry(op).or_default() += 1;
        if let Some(pos) = world.failures.iter().position(|(o, _, _)| *o == op) {
            let (_, status, body) = world.failures.remove(pos);
            return Err(RemoteError::Http { status, body });
        }
        Ok(())
    }

    /// Times `op` has been invoked.
    pub fn calls(&self, op: &'static str) -> u32 {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Total writes against either instance.
    pub fn write_calls(&self) -> u32 {
        const WRITE_OPS: &[&str] = &[
            "create_issue",
            "update_issue",
            "create_note",
            "update_note",
            "create_label",
            "upload_file",
            "set_time_estimate",
            "reset_time_spent",
            "add_time_spent",
        ];
        WRITE_OPS.iter().map(|op| self.calls(op)).sum()
    }

    /// Queue one failure for the next `op` invocation.
    pub fn fail_next(&self, op: &'static str, status: u16, body: &str) {
        self.lock().failures.push((op, status, body.to_string()));
    }

    /// Seed an issue on an instance's project.
    pub fn seed_issue(&self, instance: &Instance, project_id: u64, issue: RemoteIssue) {
        self.lock()
            .issues
            .entry((instance.id, project_id))
            .or_default()
            .push(issue);
    }

    /// Seed a note on a source issue.
    pub fn seed_note(&self, instance: &Instance, project_id: u64, iid: u64, note: RemoteNote) {
        self.lock()
            .notes
            .entry((instance.id, project_id, iid))
            .or_default()
            .push(note);
    }

    /// Seed a downloadable file at an absolute URL.
    pub fn seed_file(&self, url: &str, bytes: Vec<u8>) {
        self.lock().files.insert(url.to_string(), bytes);
    }

    /// Seed time-tracking stats for a source issue.
    pub fn seed_time(&self, instance: &Instance, project_id: u64, iid: u64, stats: TimeStats) {
        self.lock().time.insert((instance.id, project_id, iid), stats);
    }

    /// Mutate a seeded issue in place.
    pub fn edit_issue<F: FnOnce(&mut RemoteIssue)>(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        edit: F,
    ) {
        let mut world = self.lock();
        let issue = world
            .issues
            .get_mut(&(instance.id, project_id))
            .and_then(|issues| issues.iter_mut().find(|issue| issue.iid == iid))
            .expect("issue seeded");
        edit(issue);
    }

    /// Mutate a seeded note in place.
    pub fn edit_note<F: FnOnce(&mut RemoteNote)>(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        note_id: u64,
        edit: F,
    ) {
        let mut world = self.lock();
        let note = world
            .notes
            .get_mut(&(instance.id, project_id, iid))
            .and_then(|notes| notes.iter_mut().find(|note| note.id == note_id))
            .expect("note seeded");
        edit(note);
    }

    /// Delete an issue out from under the engine (external deletion).
    pub fn remove_issue(&self, instance: &Instance, project_id: u64, iid: u64) {
        let mut world = self.lock();
        if let Some(issues) = world.issues.get_mut(&(instance.id, project_id)) {
            issues.retain(|issue| issue.iid != iid);
        }
    }

    /// Snapshot of a project's issues.
    pub fn issues(&self, instance: &Instance, project_id: u64) -> Vec<RemoteIssue> {
        self.lock()
            .issues
            .get(&(instance.id, project_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of an issue's notes.
    pub fn notes(&self, instance: &Instance, project_id: u64, iid: u64) -> Vec<RemoteNote> {
        self.lock()
            .notes
            .get(&(instance.id, project_id, iid))
            .cloned()
            .unwrap_or_default()
    }

    /// Time stats recorded for an issue.
    pub fn time(&self, instance: &Instance, project_id: u64, iid: u64) -> TimeStats {
        self.lock()
            .time
            .get(&(instance.id, project_id, iid))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn list_issues(
        &self,
        instance: &Instance,
        project_id: u64,
        updated_after: Option<DateTime<Utc>>,
        state: IssueStateFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteIssue>, RemoteError> {
        self.record("list_issues")?;
        let world = self.lock();
        let mut issues: Vec<RemoteIssue> = world
            .issues
            .get(&(instance.id, project_id))
            .cloned()
            .unwrap_or_default();
        // Inclusive boundary on purpose: the orchestrator's cursor filter is
        // what must make re-listing safe.
        if let Some(after) = updated_after {
            issues.retain(|issue| issue.updated_at >= after);
        }
        issues.retain(|issue| match state {
            IssueStateFilter::All => true,
            IssueStateFilter::Opened => issue.state == IssueState::Opened,
            IssueStateFilter::Closed => issue.state == IssueState::Closed,
        });
        issues.sort_by_key(|issue| (issue.updated_at, issue.iid));
        let start = ((page.max(1) - 1) * per_page) as usize;
        Ok(issues
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect())
    }

    async fn get_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<RemoteIssue, RemoteError> {
        self.record("get_issue")?;
        let world = self.lock();
        world
            .issues
            .get(&(instance.id, project_id))
            .and_then(|issues| issues.iter().find(|issue| issue.iid == iid))
            .cloned()
            .ok_or(RemoteError::Http {
                status: 404,
                body: "issue not found".to_string(),
            })
    }

    async fn create_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        issue: &NewIssue,
    ) -> Result<RemoteIssue, RemoteError> {
        self.record("create_issue")?;
        let mut world = self.lock();
        let id = world.next_id();
        let iid = world
            .issues
            .get(&(instance.id, project_id))
            .map(|issues| issues.len() as u64 + 1)
            .unwrap_or(1);
        let now = Utc::now();
        let created = RemoteIssue {
            id,
            iid,
            project_id,
            title: issue.title.clone(),
            description: issue.description.clone(),
            state: IssueState::Opened,
            labels: issue.labels.clone(),
            milestone: None,
            iteration: None,
            epic: None,
            assignees: Vec::new(),
            weight: issue.weight,
            web_url: Some(format!(
                "{}projects/{project_id}/issues/{iid}",
                instance.base_url
            )),
            created_at: now,
            updated_at: now,
        };
        world
            .issues
            .entry((instance.id, project_id))
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_issue(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        update: &IssueUpdate,
    ) -> Result<RemoteIssue, RemoteError> {
        self.record("update_issue")?;
        let mut world = self.lock();
        let issue = world
            .issues
            .get_mut(&(instance.id, project_id))
            .and_then(|issues| issues.iter_mut().find(|issue| issue.iid == iid))
            .ok_or(RemoteError::Http {
                status: 404,
                body: "issue not found".to_string(),
            })?;
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(description) = &update.description {
            issue.description = Some(description.clone());
        }
        if let Some(labels) = &update.labels {
            issue.labels = labels.clone();
        }
        match update.state_event {
            Some(StateEvent::Close) => issue.state = IssueState::Closed,
            Some(StateEvent::Reopen) => issue.state = IssueState::Opened,
            None => {}
        }
        if update.weight.is_some() {
            issue.weight = update.weight;
        }
        issue.updated_at = Utc::now();
        Ok(issue.clone())
    }

    async fn list_notes(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteNote>, RemoteError> {
        self.record("list_notes")?;
        let world = self.lock();
        let notes = world
            .notes
            .get(&(instance.id, project_id, iid))
            .cloned()
            .unwrap_or_default();
        let start = ((page.max(1) - 1) * per_page) as usize;
        Ok(notes
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect())
    }

    async fn create_note(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        body: &str,
    ) -> Result<RemoteNote, RemoteError> {
        self.record("create_note")?;
        let mut world = self.lock();
        let id = world.next_id();
        let note = RemoteNote {
            id,
            body: body.to_string(),
            system: false,
            author_username: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        world
            .notes
            .entry((instance.id, project_id, iid))
            .or_default()
            .push(note.clone());
        Ok(note)
    }

    async fn update_note(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        note_id: u64,
        body: &str,
    ) -> Result<RemoteNote, RemoteError> {
        self.record("update_note")?;
        let mut world = self.lock();
        let note = world
            .notes
            .get_mut(&(instance.id, project_id, iid))
            .and_then(|notes| notes.iter_mut().find(|note| note.id == note_id))
            .ok_or(RemoteError::Http {
                status: 404,
                body: "note not found".to_string(),
            })?;
        note.body = body.to_string();
        note.updated_at = Some(Utc::now());
        Ok(note.clone())
    }

    async fn list_labels(
        &self,
        instance: &Instance,
        project_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RemoteLabel>, RemoteError> {
        self.record("list_labels")?;
        let world = self.lock();
        let labels = world
            .labels
            .get(&(instance.id, project_id))
            .cloned()
            .unwrap_or_default();
        let start = ((page.max(1) - 1) * per_page) as usize;
        Ok(labels
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect())
    }

    async fn create_label(
        &self,
        instance: &Instance,
        project_id: u64,
        name: &str,
        color: &str,
    ) -> Result<RemoteLabel, RemoteError> {
        self.record("create_label")?;
        let mut world = self.lock();
        let id = world.next_id();
        let label = RemoteLabel {
            id,
            name: name.to_string(),
            color: Some(color.to_string()),
        };
        world
            .labels
            .entry((instance.id, project_id))
            .or_default()
            .push(label.clone());
        Ok(label)
    }

    async fn upload_file(
        &self,
        _instance: &Instance,
        _project_id: u64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, RemoteError> {
        self.record("upload_file")?;
        let mut world = self.lock();
        let id = world.next_id();
        let url = format!("/uploads/mock-{id}/{filename}");
        world.files.insert(url.clone(), bytes);
        Ok(UploadedFile {
            url: url.clone(),
            markdown: None,
        })
    }

    async fn download_file(
        &self,
        _instance: &Instance,
        url: &Url,
        max_bytes: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        self.record("download_file")?;
        let world = self.lock();
        let bytes = world.files.get(url.as_str()).ok_or(RemoteError::Http {
            status: 404,
            body: "file not found".to_string(),
        })?;
        if bytes.len() as u64 > max_bytes {
            return Err(RemoteError::TooLarge {
                limit_bytes: max_bytes,
            });
        }
        Ok(bytes.clone())
    }

    async fn time_stats(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<TimeStats, RemoteError> {
        self.record("time_stats")?;
        Ok(self
            .lock()
            .time
            .get(&(instance.id, project_id, iid))
            .copied()
            .unwrap_or_default())
    }

    async fn set_time_estimate(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), RemoteError> {
        self.record("set_time_estimate")?;
        let mut world = self.lock();
        let stats = world
            .time
            .entry((instance.id, project_id, iid))
            .or_default();
        stats.time_estimate_secs = seconds;
        Ok(())
    }

    async fn reset_time_spent(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
    ) -> Result<(), RemoteError> {
        self.record("reset_time_spent")?;
        let mut world = self.lock();
        let stats = world
            .time
            .entry((instance.id, project_id, iid))
            .or_default();
        stats.total_time_spent_secs = 0;
        Ok(())
    }

    async fn add_time_spent(
        &self,
        instance: &Instance,
        project_id: u64,
        iid: u64,
        seconds: i64,
    ) -> Result<(), RemoteError> {
        self.record("add_time_spent")?;
        let mut world = self.lock();
        let stats = world
            .time
            .entry((instance.id, project_id, iid))
            .or_default();
        stats.total_time_spent_secs += seconds;
        Ok(())
    }
}

/// Engine wiring over the mock remote and an in-memory store.
pub struct Harness {
    pub app: Arc<AppConfig>,
    pub store: Arc<MemoryStore>,
    pub remote: Arc<MockRemote>,
    pub mirror: Mirror,
    pub config: IssueSyncConfig,
}

impl Harness {
    /// A mirror between two instances, with a sync config using the given
    /// toggles closure to adjust defaults.
    pub async fn new<F: FnOnce(&mut IssueSyncConfig)>(adjust: F) -> Self {
        let mut app = AppConfig::default();
        app.scheduler.jitter_pct_min = 0.0;
        app.scheduler.jitter_pct_max = 0.0;
        app.retry.base_delay_ms = 1;
        app.retry.max_delay_ms = 10;

        let source = Instance {
            id: Uuid::new_v4(),
            base_url: Url::parse("https://source.example/").unwrap(),
            token: "source-token".to_string(),
        };
        let target = Instance {
            id: Uuid::new_v4(),
            base_url: Url::parse("https://target.example/").unwrap(),
            token: "target-token".to_string(),
        };
        let mirror = Mirror {
            id: Uuid::new_v4(),
            source,
            target,
            source_project_id: SOURCE_PROJECT,
            target_project_id: TARGET_PROJECT,
        };

        let mut config = IssueSyncConfig::new(mirror.id, 30, Utc::now());
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        store.put_mirror(mirror.clone()).await;
        store.insert_config(config.clone()).await.unwrap();

        Self {
            app: Arc::new(app),
            store,
            remote: Arc::new(MockRemote::new()),
            mirror,
            config,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.app.clone(),
            self.store.clone(),
            self.remote.clone(),
            Arc::new(SlidingWindowLimiter::new(&self.app.rate_limit)),
            Arc::new(CircuitBreakerRegistry::new(self.app.breaker.clone())),
        )
        .with_registry(Arc::new(JobRegistry::new()))
    }

    /// Run one sync to completion with a fresh job.
    pub async fn run_once(&self) -> RunOutcome {
        let job = self.new_job();
        self.run_job(job).await
    }

    pub fn new_job(&self) -> SyncJob {
        SyncJob::new(
            self.config.id,
            JobType::Scheduled,
            Uuid::new_v4().to_string(),
            Utc::now(),
        )
    }

    pub async fn run_job(&self, job: SyncJob) -> RunOutcome {
        self.store.insert_job(job.clone()).await.unwrap();
        self.orchestrator()
            .run(self.config.id, job, CancellationToken::new())
            .await
    }

    /// A source issue with sensible defaults.
    pub fn source_issue(&self, iid: u64, title: &str, updated_at: DateTime<Utc>) -> RemoteIssue {
        RemoteIssue {
            id: 9_000 + iid,
            iid,
            project_id: SOURCE_PROJECT,
            title: title.to_string(),
            description: Some(format!("description of {title}")),
            state: IssueState::Opened,
            labels: vec!["bug".to_string()],
            milestone: None,
            iteration: None,
            epic: None,
            assignees: Vec::new(),
            weight: None,
            web_url: Some(format!(
                "https://source.example/projects/{SOURCE_PROJECT}/issues/{iid}"
            )),
            created_at: updated_at,
            updated_at,
        }
    }

    pub fn source_note(&self, id: u64, body: &str, created_at: DateTime<Utc>) -> RemoteNote {
        RemoteNote {
            id,
            body: body.to_string(),
            system: false,
            author_username: Some("author".to_string()),
            created_at,
            updated_at: None,
        }
    }
}
