//! Forward-port plan and outcome types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One downstream release branch that must receive the cherry-pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBranch {
    pub target_branch: String,
    pub working_branch: String,
}

/// Ordered list of branches to forward-port to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardPortPlan {
    pub commit_sha: String,
    pub branches: Vec<PlannedBranch>,
}

impl ForwardPortPlan {
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Terminal result of one planned branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchOutcome {
    Success,
    FailedCheckout,
    FailedDependencyInstall,
    FailedCherryPick,
    FailedPush,
    Exception,
}

impl BranchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BranchOutcome::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchResult {
    pub target_branch: String,
    pub working_branch: String,
    pub outcome: BranchOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardPortStatus {
    /// Every planned branch succeeded.
    Success,
    /// At least one planned branch succeeded.
    Partial,
    /// No planned branch succeeded.
    Failed,
}

impl ForwardPortStatus {
    pub fn from_counts(succeeded: usize, planned: usize) -> Self {
        if planned > 0 && succeeded == planned {
            ForwardPortStatus::Success
        } else if succeeded > 0 {
            ForwardPortStatus::Partial
        } else {
            ForwardPortStatus::Failed
        }
    }
}

/// Per-branch bookkeeping of a forward-port run, stored on the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPortReport {
    pub status: ForwardPortStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub branches: Vec<BranchResult>,
}

impl ForwardPortReport {
    pub fn succeeded(&self) -> usize {
        self.branches
            .iter()
            .filter(|b| b.outcome.is_success())
            .count()
    }
}

/// Forward-port status as stored on a form: either a report written by this
/// tool or whatever an older writer left there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForwardPortRecord {
    Report(ForwardPortReport),
    Raw(Value),
}
