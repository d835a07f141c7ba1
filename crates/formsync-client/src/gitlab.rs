//! GitLab REST v4 client.
//!
//! Implements [`ChangeSource`] and [`VersionControlHost`]. Requests carry the
//! `Private-Token` header; reads are retried per [`RetryPolicy`], writes are
//! sent once.

use async_trait::async_trait;
use formsync_core::{
    ChangeListing, ChangeRequest, ChangeSet, ChangeSource, ChangeTarget, CommitDetails,
    FormSyncError, JobStatus, Label, LogicalChangeId, MergeRefStatus, NewChangeRequest,
    PipelineSummary, Result, VersionControlHost,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::http::{build_client, ensure_success, read_json, RetryPolicy};

/// A commit diff page this long may be truncated.
pub const COMMIT_DIFF_LIMIT: usize = 99;

const PER_PAGE: &str = "100";

pub struct GitLabClient {
    http: Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct DiffEntry {
    new_path: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestChanges {
    /// A string such as `"12"`, or `"1000+"` when GitLab stopped counting.
    #[serde(default)]
    changes_count: Option<String>,
    #[serde(default)]
    changes: Vec<DiffEntry>,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    iid: u64,
    project_id: u64,
    source_project_id: u64,
    target_project_id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    source_branch: String,
    target_branch: String,
    author: Author,
    #[serde(default)]
    labels: Vec<String>,
}

impl From<MergeRequest> for ChangeRequest {
    fn from(mr: MergeRequest) -> Self {
        ChangeRequest {
            iid: mr.iid,
            project_id: mr.project_id,
            source_project_id: mr.source_project_id,
            target_project_id: mr.target_project_id,
            title: mr.title,
            description: mr.description.unwrap_or_default(),
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            author_id: mr.author.id,
            author_username: mr.author.username,
            labels: mr.labels,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateMergeRequest<'a> {
    source_branch: &'a str,
    target_branch: &'a str,
    title: &'a str,
    description: &'a str,
    target_project_id: u64,
    squash: bool,
    labels: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct MergeRef {
    commit_id: String,
}

impl GitLabClient {
    /// `base_url` is the API root, e.g. `https://gitlab.example.com/api/v4`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header("Private-Token", &self.token)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!(operation, path, "GitLab GET");
        let response = self
            .retry
            .send(operation, || self.request(Method::GET, path).query(query))
            .await?;
        read_json(operation, response).await
    }

    async fn merge_request(&self, change: &LogicalChangeId) -> Result<MergeRequest> {
        self.get(
            "get merge request",
            &format!(
                "projects/{}/merge_requests/{}",
                change.project_id, change.merge_request_iid
            ),
            &[],
        )
        .await
    }
}

#[async_trait]
impl ChangeSource for GitLabClient {
    async fn changes(&self, target: &ChangeTarget) -> Result<ChangeListing> {
        match target {
            ChangeTarget::MergeRequest(change) => {
                let listing: MergeRequestChanges = self
                    .get(
                        "get merge request changes",
                        &format!(
                            "projects/{}/merge_requests/{}/changes",
                            change.project_id, change.merge_request_iid
                        ),
                        &[],
                    )
                    .await?;
                let count = listing.changes_count.unwrap_or_default();
                if count.ends_with('+') {
                    info!(changes_count = %count, "Merge request diff is truncated");
                    return Ok(ChangeListing::TooLarge);
                }
                Ok(ChangeListing::Changes(
                    listing.changes.into_iter().map(|c| c.new_path).collect(),
                ))
            }
            ChangeTarget::Commit { project_id, sha } => {
                let diff: Vec<DiffEntry> = self
                    .get(
                        "get commit diff",
                        &format!("projects/{project_id}/repository/commits/{sha}/diff"),
                        &[("per_page", PER_PAGE)],
                    )
                    .await?;
                if diff.len() >= COMMIT_DIFF_LIMIT {
                    info!(entries = diff.len(), "Commit diff may be truncated");
                    return Ok(ChangeListing::TooLarge);
                }
                Ok(ChangeListing::Changes(
                    diff.into_iter().map(|c| c.new_path).collect::<ChangeSet>(),
                ))
            }
        }
    }

    async fn job_statuses(&self, project_id: &str, pipeline_id: &str) -> Result<Vec<JobStatus>> {
        self.get(
            "list pipeline jobs",
            &format!("projects/{project_id}/pipelines/{pipeline_id}/jobs"),
            &[("per_page", PER_PAGE)],
        )
        .await
    }

    async fn labels(&self, change: &LogicalChangeId) -> Result<Vec<Label>> {
        let mr = self.merge_request(change).await?;
        Ok(mr.labels.into_iter().map(Label::new).collect())
    }

    async fn change_request(&self, change: &LogicalChangeId) -> Result<ChangeRequest> {
        Ok(self.merge_request(change).await?.into())
    }

    async fn commit(&self, project_id: &str, sha: &str) -> Result<CommitDetails> {
        self.get(
            "get commit",
            &format!("projects/{project_id}/repository/commits/{sha}"),
            &[],
        )
        .await
    }

    async fn project_path(&self, project_id: &str) -> Result<String> {
        let project: Project = self
            .get("get project", &format!("projects/{project_id}"), &[])
            .await?;
        Ok(project.path_with_namespace)
    }

    async fn merged_ref(&self, change: &LogicalChangeId) -> Result<MergeRefStatus> {
        let operation = "get merge ref";
        let path = format!(
            "projects/{}/merge_requests/{}/merge_ref",
            change.project_id, change.merge_request_iid
        );
        let response = self
            .retry
            .send(operation, || self.request(Method::GET, &path))
            .await?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Ok(MergeRefStatus::Conflicted);
        }
        let merge_ref: MergeRef = read_json(operation, response).await?;
        Ok(MergeRefStatus::Mergeable {
            commit_id: merge_ref.commit_id,
        })
    }
}

#[async_trait]
impl VersionControlHost for GitLabClient {
    async fn create_change_request(&self, request: &NewChangeRequest) -> Result<ChangeRequest> {
        let operation = "create merge request";
        let body = CreateMergeRequest {
            source_branch: &request.source_branch,
            target_branch: &request.target_branch,
            title: &request.title,
            description: &request.description,
            target_project_id: request.target_project_id,
            squash: request.squash,
            labels: request.labels.join(","),
        };
        let path = format!("projects/{}/merge_requests", request.source_project_id);
        let sudo = request.author_id.to_string();
        let response = self
            .request(Method::POST, &path)
            .query(&[("sudo", sudo.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        let created: MergeRequest = read_json(operation, response).await?;
        Ok(created.into())
    }

    async fn update_change_request_description(
        &self,
        project_id: u64,
        iid: u64,
        description: &str,
    ) -> Result<()> {
        let operation = "update merge request description";
        let response = self
            .request(
                Method::PUT,
                &format!("projects/{project_id}/merge_requests/{iid}"),
            )
            .json(&serde_json::json!({ "description": description }))
            .send()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }

    async fn latest_pipeline(
        &self,
        project_id: &str,
        git_ref: &str,
    ) -> Result<Option<PipelineSummary>> {
        let pipelines: Vec<PipelineSummary> = self
            .get(
                "list pipelines",
                &format!("projects/{project_id}/pipelines"),
                &[("ref", git_ref), ("per_page", "1"), ("page", "1")],
            )
            .await?;
        let Some(latest) = pipelines.into_iter().next() else {
            return Ok(None);
        };
        // The list endpoint omits finished_at.
        let detail = self
            .get(
                "get pipeline",
                &format!("projects/{project_id}/pipelines/{}", latest.id),
                &[],
            )
            .await?;
        Ok(Some(detail))
    }

    async fn start_pipeline(&self, project_id: &str, git_ref: &str) -> Result<PipelineSummary> {
        let operation = "start pipeline";
        let response = self
            .request(Method::POST, &format!("projects/{project_id}/pipeline"))
            .query(&[("ref", git_ref)])
            .send()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        read_json(operation, response).await
    }
}
