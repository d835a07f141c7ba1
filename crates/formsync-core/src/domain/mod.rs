//! Domain model for formsync.
//!
//! Plain data types shared by the decision components and the collaborators:
//! - [`artifact`]: artifact families, artifact sets and merge-request labels
//! - [`change`]: changed files, logical changes, pipeline jobs
//! - [`record`]: the update-center form and its attempt history
//! - [`port`]: forward-port plans and reports

pub mod artifact;
pub mod change;
pub mod port;
pub mod record;

pub use artifact::{ArtifactFamily, ArtifactSet, Label, LabelClass};
pub use change::{
    BuildMode, ChangeListing, ChangeRequest, ChangeSet, ChangeTarget, CommitDetails, JobStatus,
    LogicalChangeId, MergeRefStatus, NewChangeRequest, PipelineSummary,
};
pub use port::{
    BranchOutcome, BranchResult, ForwardPortPlan, ForwardPortRecord, ForwardPortReport,
    ForwardPortStatus, PlannedBranch,
};
pub use record::{
    AttemptHistory, AuthoritativeAttempt, FormProperties, NonAuthoritativeAttempt, SourceInfo,
    TrackingRecord,
};
