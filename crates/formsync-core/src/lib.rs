//! formsync core library
//!
//! Keeps an update-center release form in step with the GitLab pipelines of
//! one logical change. The decision logic is pure:
//!
//! - [`ArtifactClassifier`]: changed files and labels → binaries to build
//! - [`ReleaseFormReconciler`]: create or update the form, merging attempt history
//! - [`BuildOutcomeRouter`]: submit on success, remediate or spawn a corrective
//!   merge request on failure
//! - [`ForwardPortPlanner`]: release branches a hotfix must be cherry-picked to
//!
//! External systems are reached through the traits in [`collaborators`];
//! [`Workflow`] runs one pipeline command end to end.

pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod forward_port;
pub mod handoff;
pub mod reconciler;
pub mod router;
pub mod telemetry;
pub mod workflow;

pub use classifier::{ArtifactClassifier, Classification, ClassificationRegression};
pub use collaborators::{
    ArtifactLookup, ChangeSource, GitWorkspace, TrackingStore, VersionControlHost,
};
pub use config::WorkflowConfig;
pub use domain::{
    ArtifactFamily, ArtifactSet, AttemptHistory, BranchOutcome, BuildMode, ChangeListing,
    ChangeRequest, ChangeSet, ChangeTarget, CommitDetails, ForwardPortPlan, ForwardPortRecord,
    ForwardPortReport, ForwardPortStatus, JobStatus, Label, LogicalChangeId, MergeRefStatus,
    NewChangeRequest, PipelineSummary, TrackingRecord,
};
pub use error::{Explanation, FormSyncError, Precondition, Result};
pub use forward_port::{ForwardPortExecutor, ForwardPortPlanner, ForwardPortTable, GitIdentity};
pub use handoff::{HandoffDir, UserFriendlyError};
pub use reconciler::{AttemptContext, ReconcileAction, ReleaseFormReconciler};
pub use router::{BuildOutcomeRouter, BuildState, RouteOutcome};
pub use telemetry::init_tracing;
pub use workflow::{Collaborators, Collected, RefreshDecision, Workflow};
