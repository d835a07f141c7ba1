//! Files passed between pipeline stages.
//!
//! Every stage of a pipeline runs `formsync` in the same checkout; state
//! flows through a fixed directory (`jobDetails/` by default):
//!
//! | file | written by | read by |
//! |---|---|---|
//! | `changes.txt` | collect | CI scripts |
//! | `changedFiles.txt` | CI (git diff) | collect |
//! | `binaries.json` | collect | build jobs |
//! | `formData.json` | collect, submit | submit |
//! | `gitDiffRequired` | check-diff | CI |
//! | `uc_formId.txt` | submit | forward-port |
//! | `gitSourceProject_path_with_namespace.txt` | collect (official) | forward-port |
//! | `dependenciesUpdateRequired` | CI | refresh-dependencies |
//! | `userFriendlyError.json` | CLI on failure | CI notifications |
//! | `debug.log` | tracing | humans |

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ArtifactSet, ChangeSet, TrackingRecord};
use crate::error::{Explanation, FormSyncError, Result};

pub const DEFAULT_DIR: &str = "jobDetails";

pub const CHANGES: &str = "changes.txt";
pub const GIT_DIFF_CHANGES: &str = "changedFiles.txt";
pub const BINARIES: &str = "binaries.json";
pub const FORM_DATA: &str = "formData.json";
pub const GIT_DIFF_REQUIRED: &str = "gitDiffRequired";
pub const FORM_ID: &str = "uc_formId.txt";
pub const SOURCE_PROJECT_PATH: &str = "gitSourceProject_path_with_namespace.txt";
pub const DEPENDENCIES_UPDATE_REQUIRED: &str = "dependenciesUpdateRequired";
pub const USER_FRIENDLY_ERROR: &str = "userFriendlyError.json";
pub const DEBUG_LOG: &str = "debug.log";

/// Wire shape of `userFriendlyError.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFriendlyError {
    pub err_msg: String,
    pub explanation: String,
    pub admin_response: String,
}

impl From<Explanation> for UserFriendlyError {
    fn from(e: Explanation) -> Self {
        Self {
            err_msg: e.symptom,
            explanation: e.cause,
            admin_response: e.remedy,
        }
    }
}

/// The handoff directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffDir {
    root: PathBuf,
}

impl HandoffDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    pub fn write_changes(&self, changes: &ChangeSet) -> Result<()> {
        self.write_text(CHANGES, &changes.to_lines())
    }

    /// Changes from the local git diff; an empty file is an error.
    pub fn read_git_diff_changes(&self) -> Result<ChangeSet> {
        let changes = ChangeSet::from_lines(&self.read_text(GIT_DIFF_CHANGES)?);
        if changes.is_empty() {
            return Err(self.invalid(GIT_DIFF_CHANGES, "no changes in git diff output"));
        }
        Ok(changes)
    }

    pub fn write_binaries(&self, artifacts: &ArtifactSet) -> Result<()> {
        self.write_json(BINARIES, artifacts)
    }

    pub fn read_binaries(&self) -> Result<ArtifactSet> {
        self.read_json(BINARIES)
    }

    pub fn write_form_data(&self, record: &TrackingRecord) -> Result<()> {
        self.write_json(FORM_DATA, record)
    }

    pub fn read_form_data(&self) -> Result<TrackingRecord> {
        self.read_json(FORM_DATA)
    }

    pub fn mark_git_diff_required(&self) -> Result<()> {
        self.write_text(GIT_DIFF_REQUIRED, "")
    }

    pub fn write_form_id(&self, form_id: &str) -> Result<()> {
        self.write_text(FORM_ID, form_id)
    }

    pub fn read_form_id(&self) -> Result<String> {
        let id = self.read_text(FORM_ID)?.trim().to_string();
        if id.is_empty() {
            return Err(self.invalid(FORM_ID, "empty form id"));
        }
        Ok(id)
    }

    pub fn write_source_project_path(&self, path: &str) -> Result<()> {
        self.write_text(SOURCE_PROJECT_PATH, path)
    }

    pub fn read_source_project_path(&self) -> Result<String> {
        let path = self.read_text(SOURCE_PROJECT_PATH)?.trim().to_string();
        if path.is_empty() {
            return Err(self.invalid(SOURCE_PROJECT_PATH, "empty project path"));
        }
        Ok(path)
    }

    pub fn write_user_friendly_error(&self, error: &UserFriendlyError) -> Result<()> {
        self.write_json(USER_FRIENDLY_ERROR, error)
    }

    fn write_text(&self, name: &str, contents: &str) -> Result<()> {
        self.ensure()?;
        let path = self.path(name);
        std::fs::write(&path, contents)?;
        debug!(path = %path.display(), "Wrote handoff file");
        Ok(())
    }

    fn read_text(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        std::fs::read_to_string(&path).map_err(|e| self.invalid(name, e))
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.write_text(name, &json)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let text = self.read_text(name)?;
        serde_json::from_str(&text).map_err(|e| self.invalid(name, e))
    }

    fn invalid(&self, name: &str, detail: impl ToString) -> FormSyncError {
        FormSyncError::Handoff {
            path: self.path(name).display().to_string(),
            detail: detail.to_string(),
        }
    }
}

impl Default for HandoffDir {
    fn default() -> Self {
        Self::new(DEFAULT_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn handoff() -> (TempDir, HandoffDir) {
        let tmp = TempDir::new().unwrap();
        let dir = HandoffDir::new(tmp.path().join("jobDetails"));
        (tmp, dir)
    }

    #[test]
    fn test_binaries_use_wire_names() {
        let (_tmp, dir) = handoff();
        dir.write_binaries(&ArtifactSet::from_lists(["a.see"], ["b.sh"]))
            .unwrap();

        let raw = std::fs::read_to_string(dir.path(BINARIES)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["WinBinaries"][0], "a.see");
        assert_eq!(value["UnixBinaries"][0], "b.sh");
        assert_eq!(dir.read_binaries().unwrap(), ArtifactSet::from_lists(["a.see"], ["b.sh"]));
    }

    #[test]
    fn test_empty_git_diff_is_handoff_error() {
        let (_tmp, dir) = handoff();
        dir.ensure().unwrap();
        std::fs::write(dir.path(GIT_DIFF_CHANGES), "\n").unwrap();
        assert!(matches!(
            dir.read_git_diff_changes(),
            Err(FormSyncError::Handoff { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_handoff_error() {
        let (_tmp, dir) = handoff();
        let err = dir.read_form_data().unwrap_err();
        match err {
            FormSyncError::Handoff { path, .. } => assert!(path.ends_with(FORM_DATA)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_form_id_trimmed() {
        let (_tmp, dir) = handoff();
        dir.ensure().unwrap();
        std::fs::write(dir.path(FORM_ID), "5501\n").unwrap();
        assert_eq!(dir.read_form_id().unwrap(), "5501");
    }

    #[test]
    fn test_user_friendly_error_keys() {
        let (_tmp, dir) = handoff();
        let explanation = Explanation::new("symptom", "cause", "remedy");
        dir.write_user_friendly_error(&explanation.into()).unwrap();

        let raw = std::fs::read_to_string(dir.path(USER_FRIENDLY_ERROR)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["errMsg"], "symptom");
        assert_eq!(value["explanation"], "cause");
        assert_eq!(value["adminResponse"], "remedy");
    }
}
