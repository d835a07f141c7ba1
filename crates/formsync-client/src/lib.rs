//! formsync clients
//!
//! Concrete implementations of the `formsync-core` collaborator traits:
//!
//! - [`GitLabClient`]: GitLab REST v4 (`ChangeSource`, `VersionControlHost`)
//! - [`UpdateCenterClient`]: update-center web API (`TrackingStore`)
//! - [`ShellWorkspace`]: `git` command line (`GitWorkspace`)
//! - [`LocalBinaryFinder`], [`RemoteBinaryFinder`], [`FallbackLookup`]
//!   (`ArtifactLookup`)
//!
//! [`connect`] builds all of them from a [`WorkflowConfig`]; [`update_center_client`]
//! builds just the update-center client for steps that need nothing else.

pub mod binary_finder;
pub mod gitlab;
pub mod http;
pub mod update_center;
pub mod workspace;

use std::path::Path;
use std::sync::Arc;

use formsync_core::config::required;
use formsync_core::{ArtifactLookup, Collaborators, Result, WorkflowConfig};

pub use binary_finder::{FallbackLookup, LocalBinaryFinder, RemoteBinaryFinder};
pub use gitlab::GitLabClient;
pub use http::RetryPolicy;
pub use update_center::{UpdateCenterClient, SOURCE_ARCHIVE};
pub use workspace::{mask_credentials, ShellWorkspace};

/// Directory, under the working directory, that forward-porting clones into.
pub const FORWARD_PORT_DIR: &str = "forward-port";

/// Directory, under the working directory, that form sources download into.
pub const EXTERNAL_SOURCE_DIR: &str = "tempExternalSrcLocation";

/// Build the real collaborators for `config`, rooted at `work_dir`.
pub fn connect(config: &WorkflowConfig, work_dir: &Path) -> Result<Collaborators> {
    let gitlab_token = required("GitLab token", &config.gitlab_token)?;
    let gitlab = Arc::new(GitLabClient::new(&config.gitlab_api_url, gitlab_token)?);

    let update_center = update_center_client(config)?;

    let workspace = ShellWorkspace::new(
        work_dir.join(FORWARD_PORT_DIR),
        config.server_host.clone().unwrap_or_default(),
        gitlab_token,
        config.official_project.clone().unwrap_or_default(),
        config.dependency_install_command.clone(),
    );

    Ok(Collaborators {
        source: gitlab.clone(),
        store: Arc::new(update_center),
        host: gitlab,
        lookup: binary_lookup(config, work_dir)?,
        workspace: Arc::new(workspace),
    })
}

/// The update-center client for `config`, with basic credentials when a user is set.
pub fn update_center_client(config: &WorkflowConfig) -> Result<UpdateCenterClient> {
    let client = UpdateCenterClient::new(
        &config.update_center_url,
        required("update center token", &config.update_center_token)?,
    )?;
    Ok(match &config.update_center_user {
        Some(user) => client.with_credentials(user.clone(), config.update_center_password.clone()),
        None => client,
    })
}

fn binary_lookup(config: &WorkflowConfig, work_dir: &Path) -> Result<Arc<dyn ArtifactLookup>> {
    let mut local = LocalBinaryFinder::new(work_dir, work_dir.join(&config.handoff_dir));
    if let Some(command) = &config.binary_finder_command {
        local = local.with_command(command.clone());
    }
    if let Some(folder) = &config.binary_finder_folder {
        local = local.in_folder(folder.clone());
    }
    let env = [
        ("mergeId", &config.merge_request_iid),
        ("commitId", &config.commit_sha),
        ("version", &config.version),
        ("buildId", &config.build_id),
    ];
    for (key, value) in env {
        if let Some(value) = value {
            local = local.env(key, value.clone());
        }
    }
    local = local.env("isBatchBuild", config.batch_build.to_string());

    let remote = match (&config.binary_finder_url, &config.version) {
        (Some(url), Some(version)) => {
            Some(Arc::new(RemoteBinaryFinder::new(url.clone(), version.clone())?)
                as Arc<dyn ArtifactLookup>)
        }
        _ => None,
    };
    Ok(Arc::new(FallbackLookup::new(Arc::new(local), remote)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_tokens() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WorkflowConfig::default();
        assert!(connect(&config, tmp.path()).is_err());

        let config = WorkflowConfig {
            gitlab_api_url: "https://gitlab.example.com/api/v4".to_string(),
            update_center_url: "https://uc.example.com".to_string(),
            gitlab_token: Some("gl".to_string()),
            update_center_token: Some("uc".to_string()),
            update_center_user: Some("svc".to_string()),
            binary_finder_url: Some("https://finder.example.com/find.do".to_string()),
            version: Some("REL_11_0_0_BRANCH".to_string()),
            ..WorkflowConfig::default()
        };
        assert!(connect(&config, tmp.path()).is_ok());
    }

    #[test]
    fn test_update_center_client_requires_token() {
        assert!(update_center_client(&WorkflowConfig::default()).is_err());

        let config = WorkflowConfig {
            update_center_url: "https://uc.example.com".to_string(),
            update_center_token: Some("uc".to_string()),
            ..WorkflowConfig::default()
        };
        assert!(update_center_client(&config).is_ok());
    }
}
