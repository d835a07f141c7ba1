//! Create-or-update decision for the update-center form.
//!
//! The update center offers no transactions, so two pipelines of the same
//! merge request can race on the same form. The reconciler limits the damage
//! of a lost update: artifact sets only grow, and the attempt history is
//! updated by setting the current mode's fields only.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::artifact::ArtifactFamily;
use crate::domain::change::{BuildMode, LogicalChangeId};
use crate::domain::record::{AttemptHistory, TrackingRecord};
use crate::error::{Precondition, Result};

/// Identity of the pipeline attempt being recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptContext {
    pub pipeline_id: String,
    pub project_id: String,
    pub commit_sha: String,
    pub build_job_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub action: ReconcileAction,
    pub payload: TrackingRecord,
    /// Friendly builds only: no new commits since the previous friendly attempt.
    pub refreshable: Option<bool>,
}

pub struct ReleaseFormReconciler;

impl ReleaseFormReconciler {
    /// Decide how `draft` (this attempt's freshly computed form) lands on the
    /// update center, given the form found for `change`, if any.
    pub fn reconcile(
        change: &LogicalChangeId,
        mode: BuildMode,
        draft: &TrackingRecord,
        attempt: &AttemptContext,
        existing: Option<&TrackingRecord>,
    ) -> Result<Reconciliation> {
        let Some(existing) = existing else {
            if mode.is_authoritative() {
                return Err(Precondition::MissingRecordForOfficial {
                    change: change.to_string(),
                }
                .into());
            }

            let mut payload = draft.clone();
            payload.form_id = None;
            payload.properties.merge_request_iid = change.merge_request_iid.clone();
            payload.properties.project_id = change.project_id.clone();
            payload.properties.history = AttemptHistory::default();
            let refreshable = record_attempt(payload.history_mut(), mode, attempt);

            info!(change = %change, "No existing form, creating one");
            return Ok(Reconciliation {
                action: ReconcileAction::Create,
                payload,
                refreshable,
            });
        };

        // The corrective lock applies to friendly builds only.
        let corrective = existing
            .history()
            .corrective_for()
            .filter(|_| !mode.is_authoritative());
        if let Some(old_mr) = corrective {
            info!(
                change = %change,
                old_mr = %old_mr,
                "Official build failed earlier; checking binaries and files before updating the form"
            );
            validate_corrective(existing, draft)?;
        }

        let mut payload = existing.clone();
        if !draft.author.is_empty() {
            payload.author = draft.author.clone();
        }
        if !draft.summary.is_empty() {
            payload.summary = draft.summary.clone();
        }
        payload.source_info.files = draft.files().clone();
        payload.artifacts.merge(&draft.artifacts);
        let refreshable = record_attempt(payload.history_mut(), mode, attempt);

        debug!(
            form_id = %payload.id(),
            windows = payload.artifacts.len(ArtifactFamily::Windows),
            unix = payload.artifacts.len(ArtifactFamily::Unix),
            "Prepared form update"
        );

        Ok(Reconciliation {
            action: ReconcileAction::Update,
            payload,
            refreshable,
        })
    }
}

/// After a failed official build the form is locked to what was vetted:
/// binaries must match exactly, files may only grow.
fn validate_corrective(existing: &TrackingRecord, draft: &TrackingRecord) -> Result<()> {
    for family in ArtifactFamily::ALL {
        let expected = existing.artifacts.family(family);
        let actual = draft.artifacts.family(family);
        if expected != actual {
            return Err(Precondition::ArtifactsChanged {
                family: family.to_string(),
                expected: expected.iter().cloned().collect(),
                actual: actual.iter().cloned().collect(),
            }
            .into());
        }
    }
    info!("Same binaries present");

    let missing = draft.files().missing_from(existing.files());
    if !missing.is_empty() {
        return Err(Precondition::ChangeSetShrunk { missing }.into());
    }
    info!("Same or more files present");
    Ok(())
}

/// Set the current mode's attempt fields, leaving everything else untouched.
fn record_attempt(
    history: &mut AttemptHistory,
    mode: BuildMode,
    attempt: &AttemptContext,
) -> Option<bool> {
    match mode {
        BuildMode::Authoritative => {
            let official = history.authoritative_mut();
            official.project_id = Some(attempt.project_id.clone());
            official.completed_pipeline_id = Some(attempt.pipeline_id.clone());
            official.build_job_ids = attempt.build_job_ids.clone();
            None
        }
        BuildMode::NonAuthoritative => {
            let friendly = history.non_authoritative_mut();
            let refreshable = friendly.commit_id.as_deref() == Some(attempt.commit_sha.as_str());
            friendly.completed_pipeline_id = Some(attempt.pipeline_id.clone());
            friendly.project_id = Some(attempt.project_id.clone());
            friendly.build_job_ids = attempt.build_job_ids.clone();
            friendly.refreshable = Some(refreshable);
            friendly.commit_id = Some(attempt.commit_sha.clone());
            Some(refreshable)
        }
    }
}
