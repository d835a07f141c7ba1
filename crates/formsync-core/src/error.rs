//! Error taxonomy for formsync.
//!
//! Every fallible workflow step returns [`FormSyncError`]. Only the CLI entry
//! point turns an error into a process exit status (see [`FormSyncError::exit_code`]).

use serde::{Deserialize, Serialize};

/// A precondition that the workflow refused to proceed past.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("no tracking record exists for {change}; an official build needs one from an earlier friendly build")]
    MissingRecordForOfficial { change: String },

    #[error("no tracking record exists for {change}; a failed friendly build cannot reset a form that was never created")]
    MissingRecordForRemediation { change: String },

    #[error("{family} binaries differ from the form after a failed official build (form: {expected:?}, build: {actual:?})")]
    ArtifactsChanged {
        family: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("changed files are missing paths already recorded on the form after a failed official build: {missing:?}")]
    ChangeSetShrunk { missing: Vec<String> },

    #[error("no tracking record exists for {change}; there is no form to store the forward-port status on")]
    MissingRecordForForwardPort { change: String },

    #[error("merge request {change} cannot be merged into its target branch")]
    NotMergeable { change: String },
}

/// User-facing explanation attached to failures an author can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub symptom: String,
    pub cause: String,
    pub remedy: String,
}

impl Explanation {
    pub fn new(
        symptom: impl Into<String>,
        cause: impl Into<String>,
        remedy: impl Into<String>,
    ) -> Self {
        Self {
            symptom: symptom.into(),
            cause: cause.into(),
            remedy: remedy.into(),
        }
    }
}

/// formsync errors.
#[derive(Debug, thiserror::Error)]
pub enum FormSyncError {
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("{operation} failed: {detail}")]
    ExternalCall { operation: String, detail: String },

    #[error("precondition violated: {0}")]
    PreconditionViolation(#[from] Precondition),

    #[error("handoff file {path}: {detail}")]
    Handoff { path: String, detail: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormSyncError {
    /// Shorthand for a failed call to an external system.
    pub fn external(operation: impl Into<String>, detail: impl ToString) -> Self {
        FormSyncError::ExternalCall {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Explanation for failures the change author can fix themselves.
    ///
    /// Infrastructure failures return `None`; they are for operators and only
    /// get the log line.
    pub fn explanation(&self) -> Option<Explanation> {
        match self {
            FormSyncError::PreconditionViolation(Precondition::MissingRecordForOfficial { .. }) => {
                Some(Explanation::new(
                    "No update form found for this official build.",
                    "The merge request never produced an update form in a successful friendly build.",
                    "Run a friendly pipeline for the merge request first, or contact git-admins.",
                ))
            }
            FormSyncError::PreconditionViolation(
                Precondition::ArtifactsChanged { .. } | Precondition::ChangeSetShrunk { .. },
            ) => Some(Explanation::new(
                "Corrective merge request does not match the failed official build.",
                "After an official build failure the form is locked to the binaries and files already vetted.",
                "Keep the same binaries and at least the same files as the original merge request, then push again.",
            )),
            FormSyncError::PreconditionViolation(Precondition::NotMergeable { .. }) => {
                Some(Explanation::new(
                    "Merge request is not mergeable.",
                    "Destination branch has moved. Changes in this merge request are causing merge conflicts.",
                    "Pull latest from upstream, resolve the conflicts, and push a new commit. This starts a new pipeline.",
                ))
            }
            FormSyncError::ExternalCall { operation, .. } if operation == "list pipeline jobs" => {
                Some(Explanation::new(
                    "Pipeline job lookup failed.",
                    "The pipeline jobs API failed, probably due to a network issue.",
                    "For a friendly pipeline run a new pipeline, otherwise contact git-admins.",
                ))
            }
            _ => None,
        }
    }
}

/// Result type for formsync operations.
pub type Result<T> = std::result::Result<T, FormSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_display_names_change() {
        let err = FormSyncError::from(Precondition::MissingRecordForOfficial {
            change: "project 9 !42".to_string(),
        });
        let msg = err.to_string();
        assert!(msg.contains("precondition violated"));
        assert!(msg.contains("project 9 !42"));
    }

    #[test]
    fn test_every_error_exits_with_one() {
        let errors = vec![
            FormSyncError::ConfigurationMissing("token".to_string()),
            FormSyncError::external("create form", "503"),
            FormSyncError::from(Precondition::ChangeSetShrunk {
                missing: vec!["a.js".to_string()],
            }),
        ];
        for err in errors {
            assert_eq!(err.exit_code(), 1);
        }
    }

    #[test]
    fn test_user_actionable_errors_carry_explanation() {
        let err = FormSyncError::from(Precondition::NotMergeable {
            change: "!7".to_string(),
        });
        let explanation = err.explanation().expect("explanation");
        assert!(explanation.cause.contains("merge conflicts"));

        let infra = FormSyncError::external("create form", "connection reset");
        assert!(infra.explanation().is_none());
    }
}
