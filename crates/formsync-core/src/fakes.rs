//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryTrackingStore`, `StaticChangeSource`, `RecordingHost`,
//! `ScriptedWorkspace` and `StaticLookup`, which satisfy the trait contracts
//! without any network or shell access and record what they were asked to do.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collaborators::{
    ArtifactLookup, ChangeSource, GitWorkspace, TrackingStore, VersionControlHost,
};
use crate::domain::{
    ArtifactSet, ChangeListing, ChangeRequest, ChangeSet, ChangeTarget, CommitDetails, JobStatus,
    Label, LogicalChangeId, MergeRefStatus, NewChangeRequest, PipelineSummary, TrackingRecord,
};
use crate::error::{FormSyncError, Result};

// ---------------------------------------------------------------------------
// MemoryTrackingStore
// ---------------------------------------------------------------------------

/// A write issued against [`MemoryTrackingStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Create(TrackingRecord),
    Update(TrackingRecord),
    UpdateProperties(TrackingRecord),
    ResetToCreated { form_id: String, reason: String },
}

/// Tracking store keyed by `(GitProjectID, GitMergeRequestID)`.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    records: Mutex<Vec<TrackingRecord>>,
    calls: Mutex<Vec<StoreCall>>,
    next_id: Mutex<u64>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(5000),
            ..Self::default()
        }
    }

    pub fn with_record(self, record: TrackingRecord) -> Self {
        self.records.lock().unwrap().push(record);
        self
    }

    pub fn records(&self) -> Vec<TrackingRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    fn replace(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        let mut records = self.records.lock().unwrap();
        let slot = records
            .iter_mut()
            .find(|r| r.form_id.is_some() && r.form_id == payload.form_id)
            .ok_or_else(|| {
                FormSyncError::external("update form", format!("form {} not found", payload.id()))
            })?;
        *slot = payload.clone();
        Ok(payload.clone())
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn find(&self, change: &LogicalChangeId) -> Result<Option<TrackingRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| {
                r.properties.project_id == change.project_id
                    && r.properties.merge_request_iid == change.merge_request_iid
            })
            .cloned())
    }

    async fn create(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Create(payload.clone()));
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let mut created = payload.clone();
        created.form_id = Some(next_id.to_string());
        self.records.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::Update(payload.clone()));
        self.replace(payload)
    }

    async fn update_properties(&self, payload: &TrackingRecord) -> Result<TrackingRecord> {
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::UpdateProperties(payload.clone()));
        self.replace(payload)
    }

    async fn reset_to_created(&self, record: &TrackingRecord, reason: &str) -> Result<()> {
        self.calls.lock().unwrap().push(StoreCall::ResetToCreated {
            form_id: record.id().to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticChangeSource
// ---------------------------------------------------------------------------

/// Change source answering from canned values.
///
/// Unset values and operations named in [`StaticChangeSource::failing`]
/// return `ExternalCall` errors.
#[derive(Debug, Default)]
pub struct StaticChangeSource {
    listing: Option<ChangeListing>,
    jobs: Vec<JobStatus>,
    labels: Vec<Label>,
    change_request: Option<ChangeRequest>,
    commit: Option<CommitDetails>,
    project_path: Option<String>,
    merged_ref: Option<MergeRefStatus>,
    failing: HashSet<String>,
}

impl StaticChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, listing: ChangeListing) -> Self {
        self.listing = Some(listing);
        self
    }

    pub fn with_changes<S: Into<String>>(self, paths: impl IntoIterator<Item = S>) -> Self {
        self.with_listing(ChangeListing::Changes(paths.into_iter().collect()))
    }

    pub fn with_jobs(mut self, jobs: Vec<JobStatus>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| Label::new(*l)).collect();
        self
    }

    pub fn with_change_request(mut self, request: ChangeRequest) -> Self {
        self.change_request = Some(request);
        self
    }

    pub fn with_commit(mut self, commit: CommitDetails) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn with_merged_ref(mut self, status: MergeRefStatus) -> Self {
        self.merged_ref = Some(status);
        self
    }

    /// Make `operation` (a trait method name) fail.
    pub fn failing(mut self, operation: &str) -> Self {
        self.failing.insert(operation.to_string());
        self
    }

    fn answer<T: Clone>(&self, operation: &str, value: &Option<T>) -> Result<T> {
        if self.failing.contains(operation) {
            return Err(FormSyncError::external(operation, "scripted failure"));
        }
        value
            .clone()
            .ok_or_else(|| FormSyncError::external(operation, "no canned response"))
    }
}

#[async_trait]
impl ChangeSource for StaticChangeSource {
    async fn changes(&self, _target: &ChangeTarget) -> Result<ChangeListing> {
        self.answer("changes", &self.listing)
    }

    async fn job_statuses(&self, _project_id: &str, _pipeline_id: &str) -> Result<Vec<JobStatus>> {
        self.answer("job_statuses", &Some(self.jobs.clone()))
    }

    async fn labels(&self, _change: &LogicalChangeId) -> Result<Vec<Label>> {
        self.answer("labels", &Some(self.labels.clone()))
    }

    async fn change_request(&self, _change: &LogicalChangeId) -> Result<ChangeRequest> {
        self.answer("change_request", &self.change_request)
    }

    async fn commit(&self, _project_id: &str, _sha: &str) -> Result<CommitDetails> {
        self.answer("commit", &self.commit)
    }

    async fn project_path(&self, _project_id: &str) -> Result<String> {
        self.answer("project_path", &self.project_path)
    }

    async fn merged_ref(&self, _change: &LogicalChangeId) -> Result<MergeRefStatus> {
        self.answer("merged_ref", &self.merged_ref)
    }
}

// ---------------------------------------------------------------------------
// RecordingHost
// ---------------------------------------------------------------------------

/// Version-control host that records every write.
#[derive(Debug, Default)]
pub struct RecordingHost {
    created: Mutex<Vec<NewChangeRequest>>,
    descriptions: Mutex<Vec<(u64, u64, String)>>,
    started: Mutex<Vec<(String, String)>>,
    latest: Option<PipelineSummary>,
    fail_descriptions: bool,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latest_pipeline(mut self, pipeline: PipelineSummary) -> Self {
        self.latest = Some(pipeline);
        self
    }

    /// Make every description update fail.
    pub fn failing_description_updates(mut self) -> Self {
        self.fail_descriptions = true;
        self
    }

    pub fn created(&self) -> Vec<NewChangeRequest> {
        self.created.lock().unwrap().clone()
    }

    /// `(project_id, iid, description)` per update.
    pub fn descriptions(&self) -> Vec<(u64, u64, String)> {
        self.descriptions.lock().unwrap().clone()
    }

    /// `(project_id, ref)` per started pipeline.
    pub fn started_pipelines(&self) -> Vec<(String, String)> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionControlHost for RecordingHost {
    async fn create_change_request(&self, request: &NewChangeRequest) -> Result<ChangeRequest> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(ChangeRequest {
            iid: 900 + created.len() as u64,
            project_id: request.target_project_id,
            source_project_id: request.source_project_id,
            target_project_id: request.target_project_id,
            title: request.title.clone(),
            description: request.description.clone(),
            source_branch: request.source_branch.clone(),
            target_branch: request.target_branch.clone(),
            author_id: request.author_id,
            author_username: String::new(),
            labels: request.labels.clone(),
        })
    }

    async fn update_change_request_description(
        &self,
        project_id: u64,
        iid: u64,
        description: &str,
    ) -> Result<()> {
        if self.fail_descriptions {
            return Err(FormSyncError::external(
                "update merge request description",
                "scripted failure",
            ));
        }
        self.descriptions
            .lock()
            .unwrap()
            .push((project_id, iid, description.to_string()));
        Ok(())
    }

    async fn latest_pipeline(
        &self,
        _project_id: &str,
        _git_ref: &str,
    ) -> Result<Option<PipelineSummary>> {
        Ok(self.latest.clone())
    }

    async fn start_pipeline(&self, project_id: &str, git_ref: &str) -> Result<PipelineSummary> {
        let mut started = self.started.lock().unwrap();
        started.push((project_id.to_string(), git_ref.to_string()));
        Ok(PipelineSummary {
            id: 7000 + started.len() as u64,
            status: "pending".to_string(),
            finished_at: None,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedWorkspace
// ---------------------------------------------------------------------------

/// Git workspace that logs each step as a short command line and fails the
/// ones it was told to.
///
/// Steps are logged as `clone <path>`, `identity <name> <email>`, `reset`,
/// `checkout <branch> <target>`, `install`, `cherry-pick <sha>` and `push`.
#[derive(Debug, Default)]
pub struct ScriptedWorkspace {
    log: Mutex<Vec<String>>,
    failures: HashMap<String, usize>,
    seen: Mutex<HashMap<String, usize>>,
}

impl ScriptedWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every invocation of `step` (matched against the logged line).
    pub fn fail_on(self, step: &str) -> Self {
        self.fail_on_nth(step, 0)
    }

    /// Fail only the `nth` (1-based) invocation of `step`; `0` fails all.
    pub fn fail_on_nth(mut self, step: &str, nth: usize) -> Self {
        self.failures.insert(step.to_string(), nth);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn step(&self, line: String) -> Result<()> {
        self.log.lock().unwrap().push(line.clone());
        let mut seen = self.seen.lock().unwrap();
        let count = seen.entry(line.clone()).or_insert(0);
        *count += 1;
        match self.failures.get(&line) {
            Some(0) => Err(FormSyncError::external(line, "scripted failure")),
            Some(nth) if nth == count => Err(FormSyncError::external(line, "scripted failure")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl GitWorkspace for ScriptedWorkspace {
    async fn clone_repository(&self, project_path: &str) -> Result<()> {
        self.step(format!("clone {project_path}"))
    }

    async fn configure_identity(&self, name: &str, email: &str) -> Result<()> {
        self.step(format!("identity {name} {email}"))
    }

    async fn reset_hard(&self) -> Result<()> {
        self.step("reset".to_string())
    }

    async fn checkout_new_branch(&self, branch: &str, target: &str) -> Result<()> {
        self.step(format!("checkout {branch} {target}"))
    }

    async fn install_dependencies(&self) -> Result<()> {
        self.step("install".to_string())
    }

    async fn cherry_pick(&self, commit_sha: &str) -> Result<()> {
        self.step(format!("cherry-pick {commit_sha}"))
    }

    async fn push(&self) -> Result<()> {
        self.step("push".to_string())
    }
}

// ---------------------------------------------------------------------------
// StaticLookup
// ---------------------------------------------------------------------------

/// Binary finder returning a fixed set and remembering what it was asked.
#[derive(Debug, Default)]
pub struct StaticLookup {
    artifacts: ArtifactSet,
    queries: Mutex<Vec<ChangeSet>>,
}

impl StaticLookup {
    pub fn new(artifacts: ArtifactSet) -> Self {
        Self {
            artifacts,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<ChangeSet> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactLookup for StaticLookup {
    async fn lookup(&self, changes: &ChangeSet) -> Result<ArtifactSet> {
        self.queries.lock().unwrap().push(changes.clone());
        Ok(self.artifacts.clone())
    }
}
