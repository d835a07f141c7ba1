//! Narrow interfaces to the systems the workflow talks to.
//!
//! Inject real implementations (see the `formsync-client` crate) or the
//! in-memory fakes from [`crate::fakes`] for tests. Every call is awaited
//! before the workflow proceeds.

use async_trait::async_trait;

use crate::domain::{
    ArtifactSet, ChangeListing, ChangeRequest, ChangeSet, ChangeTarget, CommitDetails, JobStatus,
    Label, LogicalChangeId, MergeRefStatus, NewChangeRequest, PipelineSummary, TrackingRecord,
};
use crate::error::Result;

/// Read access to the source-control host.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Changed files of a merge request or commit.
    async fn changes(&self, target: &ChangeTarget) -> Result<ChangeListing>;

    /// Jobs of a pipeline.
    async fn job_statuses(&self, project_id: &str, pipeline_id: &str) -> Result<Vec<JobStatus>>;

    /// Labels attached to a merge request.
    async fn labels(&self, change: &LogicalChangeId) -> Result<Vec<Label>>;

    async fn change_request(&self, change: &LogicalChangeId) -> Result<ChangeRequest>;

    async fn commit(&self, project_id: &str, sha: &str) -> Result<CommitDetails>;

    /// `path_with_namespace` of a project.
    async fn project_path(&self, project_id: &str) -> Result<String>;

    async fn merged_ref(&self, change: &LogicalChangeId) -> Result<MergeRefStatus>;
}

/// Write access to the source-control host.
#[async_trait]
pub trait VersionControlHost: Send + Sync {
    async fn create_change_request(&self, request: &NewChangeRequest) -> Result<ChangeRequest>;

    async fn update_change_request_description(
        &self,
        project_id: u64,
        iid: u64,
        description: &str,
    ) -> Result<()>;

    async fn latest_pipeline(
        &self,
        project_id: &str,
        git_ref: &str,
    ) -> Result<Option<PipelineSummary>>;

    async fn start_pipeline(&self, project_id: &str, git_ref: &str) -> Result<PipelineSummary>;
}

/// The update center's form store.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// The form for `change`, or `None` when none was created yet.
    async fn find(&self, change: &LogicalChangeId) -> Result<Option<TrackingRecord>>;

    async fn create(&self, payload: &TrackingRecord) -> Result<TrackingRecord>;

    /// Modify the form and queue a rebuild (friendly builds).
    async fn update(&self, payload: &TrackingRecord) -> Result<TrackingRecord>;

    /// Modify only the merge-request linkage block of the form.
    async fn update_properties(&self, payload: &TrackingRecord) -> Result<TrackingRecord>;

    /// Move the form back to its created state.
    async fn reset_to_created(&self, record: &TrackingRecord, reason: &str) -> Result<()>;
}

/// Shell-level git working tree used for forward-porting.
///
/// A failing command is reported as an `Err`; the caller decides whether it
/// aborts one branch or the whole plan.
#[async_trait]
pub trait GitWorkspace: Send + Sync {
    async fn clone_repository(&self, project_path: &str) -> Result<()>;

    async fn configure_identity(&self, name: &str, email: &str) -> Result<()>;

    async fn reset_hard(&self) -> Result<()>;

    /// Create `branch` from `upstream/<target>`.
    async fn checkout_new_branch(&self, branch: &str, target: &str) -> Result<()>;

    async fn install_dependencies(&self) -> Result<()>;

    /// Cherry-pick a merge commit keeping its origin (`-m 1 -x`).
    async fn cherry_pick(&self, commit_sha: &str) -> Result<()>;

    async fn push(&self) -> Result<()>;
}

/// Maps changed sources to the binaries that must be rebuilt.
#[async_trait]
pub trait ArtifactLookup: Send + Sync {
    async fn lookup(&self, changes: &ChangeSet) -> Result<ArtifactSet>;
}
