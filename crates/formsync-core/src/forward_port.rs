//! Forward-porting a hotfix commit to later release branches.
//!
//! [`ForwardPortPlanner`] derives the branches from a fixed table keyed on
//! the branch the commit landed on. [`ForwardPortExecutor`] applies the plan
//! strictly in order in one shared working tree.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::collaborators::GitWorkspace;
use crate::domain::{
    BranchOutcome, BranchResult, ForwardPortPlan, ForwardPortReport, ForwardPortStatus,
    PlannedBranch,
};
use crate::error::FormSyncError;

pub const CLONE_FAILED: &str = "Error occurred while cloning";
pub const RESET_FAILED: &str = "Git reset failed";

/// A release branch to port to, and the suffix of its working branch name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTarget {
    pub target_branch: String,
    pub suffix: String,
}

impl PortTarget {
    pub fn new(target_branch: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            target_branch: target_branch.into(),
            suffix: suffix.into(),
        }
    }
}

/// Source branch → target branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardPortTable {
    /// Always planned, first.
    pub baseline: PortTarget,
    /// Planned after the baseline when the source branch matches exactly.
    pub extra: Vec<(String, PortTarget)>,
}

impl Default for ForwardPortTable {
    fn default() -> Self {
        Self {
            baseline: PortTarget::new("REL_11_0_0_BRANCH", "v11B80"),
            extra: vec![(
                "REL_11_0_0_B80_SP19_BRANCH".to_string(),
                PortTarget::new("REL_11_0_0_B80_SP20_BRANCH", "v11B80SP20"),
            )],
        }
    }
}

pub struct ForwardPortPlanner {
    table: ForwardPortTable,
}

impl ForwardPortPlanner {
    pub fn new(table: ForwardPortTable) -> Self {
        Self { table }
    }

    /// Plan the branches for `commit_sha`, which landed on `source_branch`.
    ///
    /// Working branches are named `auto-fp-<build>-<form>-<suffix>`.
    pub fn plan(
        &self,
        source_branch: &str,
        build_name: &str,
        form_id: &str,
        commit_sha: &str,
    ) -> ForwardPortPlan {
        let targets = std::iter::once(&self.table.baseline).chain(
            self.table
                .extra
                .iter()
                .filter(|(source, _)| source == source_branch)
                .map(|(_, target)| target),
        );

        let branches: Vec<PlannedBranch> = targets
            .map(|target| PlannedBranch {
                target_branch: target.target_branch.clone(),
                working_branch: format!("auto-fp-{build_name}-{form_id}-{}", target.suffix),
            })
            .collect();

        info!(
            source_branch,
            count = branches.len(),
            "Planned forward-port branches"
        );
        ForwardPortPlan {
            commit_sha: commit_sha.to_string(),
            branches,
        }
    }
}

impl Default for ForwardPortPlanner {
    fn default() -> Self {
        Self::new(ForwardPortTable::default())
    }
}

/// Git identity used for the cherry-picked commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

pub struct ForwardPortExecutor {
    workspace: Arc<dyn GitWorkspace>,
}

impl ForwardPortExecutor {
    pub fn new(workspace: Arc<dyn GitWorkspace>) -> Self {
        Self { workspace }
    }

    /// Run `plan` against a fresh clone of `project_path`.
    ///
    /// Per-branch failures are recorded and the next branch is attempted. A
    /// failed clone or a failed reset between branches stops the run.
    pub async fn execute(
        &self,
        plan: &ForwardPortPlan,
        project_path: &str,
        identity: &GitIdentity,
    ) -> ForwardPortReport {
        info!(project_path, "Start cloning");
        if let Err(e) = self.workspace.clone_repository(project_path).await {
            error!(error = %e, "Cloning failed; not forward-porting");
            return ForwardPortReport {
                status: ForwardPortStatus::Failed,
                failure_reason: Some(CLONE_FAILED.to_string()),
                branches: Vec::new(),
            };
        }

        if let Err(e) = self
            .workspace
            .configure_identity(&identity.name, &identity.email)
            .await
        {
            warn!(error = %e, "Could not configure git identity");
        }

        let mut branches = Vec::with_capacity(plan.len());
        let mut failure_reason = None;
        for (i, planned) in plan.branches.iter().enumerate() {
            if i > 0 {
                if let Err(e) = self.workspace.reset_hard().await {
                    error!(
                        error = %e,
                        remaining = plan.len() - i,
                        "Cleanup failed; not forward-porting the remaining branches"
                    );
                    failure_reason = Some(RESET_FAILED.to_string());
                    break;
                }
            }
            branches.push(self.port_branch(planned, &plan.commit_sha).await);
        }

        let succeeded = branches.iter().filter(|b| b.outcome.is_success()).count();
        let status = ForwardPortStatus::from_counts(succeeded, plan.len());
        match status {
            ForwardPortStatus::Success => info!("Completed forward port for all required branches"),
            ForwardPortStatus::Partial => {
                error!(succeeded, planned = plan.len(), "Partially completed forward port")
            }
            ForwardPortStatus::Failed => error!("Failed forward port for all branches"),
        }

        ForwardPortReport {
            status,
            failure_reason,
            branches,
        }
    }

    async fn port_branch(&self, planned: &PlannedBranch, commit_sha: &str) -> BranchResult {
        info!(target_branch = %planned.target_branch, "Processing forward port");
        let ws = &self.workspace;

        let steps = async {
            ws.checkout_new_branch(&planned.working_branch, &planned.target_branch)
                .await
                .map_err(|e| (BranchOutcome::FailedCheckout, e))?;
            ws.install_dependencies()
                .await
                .map_err(|e| (BranchOutcome::FailedDependencyInstall, e))?;
            ws.cherry_pick(commit_sha)
                .await
                .map_err(|e| (BranchOutcome::FailedCherryPick, e))?;
            ws.push().await.map_err(|e| (BranchOutcome::FailedPush, e))?;
            Ok::<(), (BranchOutcome, FormSyncError)>(())
        };

        let (outcome, detail) = match steps.await {
            Ok(()) => {
                info!(target_branch = %planned.target_branch, "Completed forward port for branch");
                (BranchOutcome::Success, None)
            }
            Err((step, e)) => {
                // Anything other than a failed command means the step never ran.
                let outcome = match e {
                    FormSyncError::ExternalCall { .. } => step,
                    _ => BranchOutcome::Exception,
                };
                error!(
                    target_branch = %planned.target_branch,
                    outcome = ?outcome,
                    error = %e,
                    "Forward port failed for branch"
                );
                (outcome, Some(e.to_string()))
            }
        };

        BranchResult {
            target_branch: planned.target_branch.clone(),
            working_branch: planned.working_branch.clone(),
            outcome,
            detail,
        }
    }
}
