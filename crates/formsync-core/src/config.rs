//! Workflow configuration.
//!
//! Built once at startup (the CLI fills it from flags and CI environment
//! variables) and passed by reference; nothing else reads the process
//! environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::BuildMode;
use crate::error::{FormSyncError, Result};
use crate::handoff::DEFAULT_DIR;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// GitLab REST base, e.g. `https://gitlab.example.com/api/v4`.
    pub gitlab_api_url: String,
    /// Update-center web base; forms live under `<base>/Form.aspx`.
    pub update_center_url: String,
    /// Remote binary finder endpoint, used when the local finder fails.
    pub binary_finder_url: Option<String>,

    #[serde(skip_serializing)]
    pub gitlab_token: Option<String>,
    #[serde(skip_serializing)]
    pub update_center_token: Option<String>,
    pub update_center_user: Option<String>,
    #[serde(skip_serializing)]
    pub update_center_password: Option<String>,

    /// Project of the merge request (friendly builds).
    pub merge_project_id: Option<String>,
    /// Project the pipeline runs in (official builds).
    pub commit_project_id: Option<String>,
    pub merge_request_iid: Option<String>,
    pub commit_sha: Option<String>,
    pub pipeline_id: Option<String>,
    pub commit_ref_name: Option<String>,

    /// Release branch name the build belongs to.
    pub version: Option<String>,
    pub build_id: Option<String>,
    pub build_name: Option<String>,

    pub batch_build: bool,
    pub batch_binaries: Vec<String>,

    /// `path_with_namespace` of the canonical project, as it appears in
    /// merge commit messages.
    pub official_project: Option<String>,
    pub server_host: Option<String>,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,

    pub binary_finder_command: Option<String>,
    pub binary_finder_folder: Option<PathBuf>,
    pub dependency_install_command: String,
    /// Project whose dependency image pipeline `refresh-dependencies` restarts.
    pub dependency_project_id: Option<String>,

    pub handoff_dir: PathBuf,
    /// Troubleshooting link embedded in corrective merge requests.
    pub help_url: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            gitlab_api_url: String::new(),
            update_center_url: String::new(),
            binary_finder_url: None,
            gitlab_token: None,
            update_center_token: None,
            update_center_user: None,
            update_center_password: None,
            merge_project_id: None,
            commit_project_id: None,
            merge_request_iid: None,
            commit_sha: None,
            pipeline_id: None,
            commit_ref_name: None,
            version: None,
            build_id: None,
            build_name: None,
            batch_build: false,
            batch_binaries: Vec::new(),
            official_project: None,
            server_host: None,
            git_user_name: None,
            git_user_email: None,
            binary_finder_command: None,
            binary_finder_folder: None,
            dependency_install_command: "npm ci".to_string(),
            dependency_project_id: None,
            handoff_dir: PathBuf::from(DEFAULT_DIR),
            help_url: None,
        }
    }
}

impl WorkflowConfig {
    /// Fail fast on missing tokens or project ids.
    pub fn validate(&self) -> Result<()> {
        if is_blank(&self.gitlab_token) || is_blank(&self.update_center_token) {
            return Err(FormSyncError::ConfigurationMissing("Token".to_string()));
        }
        if is_blank(&self.merge_project_id) && is_blank(&self.commit_project_id) {
            return Err(FormSyncError::ConfigurationMissing(
                "merge project id, commit project id".to_string(),
            ));
        }
        Ok(())
    }

    /// Official iff no merge request is attached to the pipeline.
    pub fn mode(&self) -> BuildMode {
        if is_blank(&self.merge_request_iid) {
            BuildMode::Authoritative
        } else {
            BuildMode::NonAuthoritative
        }
    }

    /// Project the current logical change lives in.
    pub fn project_id(&self) -> Result<&str> {
        match self.mode() {
            BuildMode::Authoritative => required("commit project id", &self.commit_project_id),
            BuildMode::NonAuthoritative => required("merge project id", &self.merge_project_id),
        }
    }
}

/// The value of an optional setting, or `ConfigurationMissing`.
pub fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FormSyncError::ConfigurationMissing(name.to_string()))
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}
