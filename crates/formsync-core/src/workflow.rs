//! Pipeline commands.
//!
//! [`Workflow`] wires the configuration, the collaborators and the handoff
//! directory together. Each public method is one `formsync` subcommand and
//! runs to completion or returns the first unrecoverable error.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::classifier::{ArtifactClassifier, Classification};
use crate::collaborators::{
    ArtifactLookup, ChangeSource, GitWorkspace, TrackingStore, VersionControlHost,
};
use crate::config::{required, WorkflowConfig};
use crate::domain::{
    ArtifactSet, BuildMode, ChangeListing, ChangeSet, ChangeTarget, ForwardPortRecord,
    ForwardPortReport, LogicalChangeId, MergeRefStatus, PipelineSummary, TrackingRecord,
};
use crate::error::{FormSyncError, Precondition, Result};
use crate::forward_port::{ForwardPortExecutor, ForwardPortPlanner, GitIdentity};
use crate::handoff::{HandoffDir, DEPENDENCIES_UPDATE_REQUIRED};
use crate::reconciler::AttemptContext;
use crate::router::{build_job_ids, BuildOutcomeRouter, RouteOutcome, RouteRequest};

/// A dependency image older than this is rebuilt.
pub const DEPENDENCY_REFRESH_AFTER_MINUTES: i64 = 10;

/// The external systems a [`Workflow`] talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ChangeSource>,
    pub store: Arc<dyn TrackingStore>,
    pub host: Arc<dyn VersionControlHost>,
    pub lookup: Arc<dyn ArtifactLookup>,
    pub workspace: Arc<dyn GitWorkspace>,
}

/// Result of `collect`.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub change: LogicalChangeId,
    pub changes: ChangeSet,
    pub classification: Classification,
    /// The pending form, also written to `formData.json`.
    pub draft: TrackingRecord,
}

/// What `refresh-dependencies` decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum RefreshDecision {
    NotRequired,
    LastPipelineNotSuccessful,
    TooRecent { minutes: i64 },
    Started { pipeline_id: u64 },
    /// The check itself failed; the failure was logged and ignored.
    Skipped { reason: String },
}

pub struct Workflow {
    config: WorkflowConfig,
    deps: Collaborators,
    handoff: HandoffDir,
}

impl Workflow {
    /// Validate `config` and prepare the handoff directory.
    pub fn new(config: WorkflowConfig, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        let handoff = HandoffDir::new(config.handoff_dir.clone());
        handoff.ensure()?;
        info!(mode = %config.mode(), "Workflow configured");
        Ok(Self {
            config,
            deps,
            handoff,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn mode(&self) -> BuildMode {
        self.config.mode()
    }

    pub fn handoff(&self) -> &HandoffDir {
        &self.handoff
    }

    /// The logical change of this pipeline. Official builds read the merge
    /// request iid from the merge commit message unless `known_iid` is given.
    pub async fn change_id(&self, known_iid: Option<&str>) -> Result<LogicalChangeId> {
        let project_id = self.config.project_id()?;
        if let Some(iid) = known_iid.filter(|iid| !iid.trim().is_empty()) {
            return Ok(LogicalChangeId::new(project_id, iid));
        }
        match self.mode() {
            BuildMode::NonAuthoritative => Ok(LogicalChangeId::new(
                project_id,
                required("merge request iid", &self.config.merge_request_iid)?,
            )),
            BuildMode::Authoritative => {
                let sha = required("commit sha", &self.config.commit_sha)?;
                let official = required("official project", &self.config.official_project)?;
                let commit = self.deps.source.commit(project_id, sha).await?;
                let iid = commit.merge_request_iid(official).ok_or_else(|| {
                    FormSyncError::external(
                        "resolve merge request for commit",
                        format!("commit {sha} has no 'See merge request {official}!' line"),
                    )
                })?;
                info!(sha, iid = %iid, "Resolved merge request from commit message");
                Ok(LogicalChangeId::new(project_id, iid))
            }
        }
    }

    fn change_target(&self, change: &LogicalChangeId) -> Result<ChangeTarget> {
        Ok(match self.mode() {
            BuildMode::NonAuthoritative => ChangeTarget::MergeRequest(change.clone()),
            BuildMode::Authoritative => ChangeTarget::Commit {
                project_id: change.project_id.clone(),
                sha: required("commit sha", &self.config.commit_sha)?.to_string(),
            },
        })
    }

    /// Resolve the changed files and binaries and write the pending form.
    pub async fn collect(&self) -> Result<Collected> {
        let mode = self.mode();
        let change = self.change_id(None).await?;
        let target = self.change_target(&change)?;

        let (project_path, listing) = tokio::try_join!(
            self.deps.source.project_path(&change.project_id),
            self.deps.source.changes(&target),
        )?;
        info!(project = %project_path, change = %change, "Loaded project and changes");

        let changes = match listing {
            ChangeListing::Changes(changes) => changes,
            ChangeListing::TooLarge => {
                info!("Diff too large for the API; using git diff output");
                self.handoff.read_git_diff_changes()?
            }
        };
        self.handoff.write_changes(&changes)?;
        info!(count = changes.len(), "Changes logged");

        let request = self.deps.source.change_request(&change).await?;

        let classification = if self.config.batch_build {
            info!("Batch build; no binary finder lookup required");
            Classification {
                artifacts: ArtifactSet::from_lists(
                    self.config.batch_binaries.iter().cloned(),
                    Vec::<String>::new(),
                ),
                regressions: Vec::new(),
            }
        } else {
            let lookup = self.deps.lookup.lookup(&changes).await?;
            let labels = self.deps.source.labels(&change).await?;
            let prior = match mode {
                BuildMode::Authoritative => {
                    let existing = self.deps.store.find(&change).await?;
                    if existing.is_none() {
                        warn!(change = %change, "No form to take binaries from for this official build");
                    }
                    existing.map(|r| r.artifacts)
                }
                BuildMode::NonAuthoritative => None,
            };
            ArtifactClassifier::classify(&lookup, &changes, &labels, prior.as_ref())
        };
        self.handoff.write_binaries(&classification.artifacts)?;

        let author = match mode {
            BuildMode::NonAuthoritative => request.author_username.clone(),
            BuildMode::Authoritative => {
                let sha = required("commit sha", &self.config.commit_sha)?;
                self.deps
                    .source
                    .commit(&change.project_id, sha)
                    .await?
                    .author_email
            }
        };

        if mode.is_authoritative() {
            let source_path = self
                .deps
                .source
                .project_path(&request.source_project_id.to_string())
                .await?;
            self.handoff.write_source_project_path(&source_path)?;
        }

        let draft = TrackingRecord::draft(
            self.config.build_id.clone().unwrap_or_default(),
            author,
            request.title.clone(),
            changes.clone(),
            classification.artifacts.clone(),
            change.merge_request_iid.clone(),
            change.project_id.clone(),
        );
        self.handoff.write_form_data(&draft)?;

        Ok(Collected {
            change,
            changes,
            classification,
            draft,
        })
    }

    /// Write the `gitDiffRequired` sentinel when the API cannot list every
    /// change. Returns whether it did.
    pub async fn check_diff(&self) -> Result<bool> {
        let change = self.change_id(None).await?;
        let listing = self.deps.source.changes(&self.change_target(&change)?).await?;
        if listing == ChangeListing::TooLarge {
            info!("git diff is needed");
            self.handoff.mark_git_diff_required()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Route the finished build: submit the pending form or handle the failure.
    pub async fn submit(&self, now: DateTime<Utc>) -> Result<RouteOutcome> {
        let draft = self.handoff.read_form_data()?;
        let change = self
            .change_id(Some(&draft.properties.merge_request_iid))
            .await?;
        let pipeline_id = required("pipeline id", &self.config.pipeline_id)?;

        let jobs = self
            .deps
            .source
            .job_statuses(&change.project_id, pipeline_id)
            .await
            .map_err(|e| FormSyncError::external("list pipeline jobs", e))?;

        let attempt = AttemptContext {
            pipeline_id: pipeline_id.to_string(),
            project_id: change.project_id.clone(),
            commit_sha: self.config.commit_sha.clone().unwrap_or_default(),
            build_job_ids: build_job_ids(&jobs),
        };

        let mut router = BuildOutcomeRouter::new(
            self.deps.source.clone(),
            self.deps.store.clone(),
            self.deps.host.clone(),
            self.config.update_center_url.clone(),
        );
        if let Some(help) = &self.config.help_url {
            router = router.with_help_url(help.clone());
        }

        let outcome = router
            .route(RouteRequest {
                change: &change,
                mode: self.mode(),
                draft: &draft,
                attempt: &attempt,
                jobs: &jobs,
                now,
            })
            .await?;

        if let RouteOutcome::Submitted { record, .. } = &outcome {
            self.handoff.write_form_id(record.id())?;
            self.handoff.write_form_data(record)?;
        }
        Ok(outcome)
    }

    /// Record this pipeline as the latest friendly attempt on an existing form.
    pub async fn record_pipeline(&self) -> Result<Option<TrackingRecord>> {
        if self.mode().is_authoritative() {
            info!("Official build; no need to record pipeline info");
            return Ok(None);
        }
        let change = self.change_id(None).await?;
        let Some(mut record) = self.deps.store.find(&change).await? else {
            info!(change = %change, "Form not found; this is the first pipeline for the merge request");
            return Ok(None);
        };

        let pipeline_id = required("pipeline id", &self.config.pipeline_id)?;
        record.history_mut().non_authoritative_mut().attempted_pipeline_id =
            Some(pipeline_id.to_string());
        let updated = self.deps.store.update_properties(&record).await?;
        info!(form_id = %updated.id(), pipeline_id, "Recorded attempted pipeline");
        Ok(Some(updated))
    }

    /// Cherry-pick the commit to the planned release branches and store the
    /// report on the form.
    ///
    /// `form_id` and `project_path` default to the handoff files written by
    /// `submit` and `collect`.
    pub async fn forward_port(
        &self,
        form_id: Option<String>,
        project_path: Option<String>,
    ) -> Result<ForwardPortReport> {
        let form_id = match form_id {
            Some(id) => id,
            None => self.handoff.read_form_id()?,
        };
        let project_path = match project_path {
            Some(path) => path,
            None => self.handoff.read_source_project_path()?,
        };
        let commit_sha = required("commit sha", &self.config.commit_sha)?;
        let source_branch = required("commit ref name", &self.config.commit_ref_name)?;
        let build_name = required("build name", &self.config.build_name)?;
        let identity = GitIdentity {
            name: required("git user name", &self.config.git_user_name)?.to_string(),
            email: required("git user email", &self.config.git_user_email)?.to_string(),
        };

        let plan = ForwardPortPlanner::default().plan(source_branch, build_name, &form_id, commit_sha);
        let report = ForwardPortExecutor::new(self.deps.workspace.clone())
            .execute(&plan, &project_path, &identity)
            .await;

        self.store_forward_port(ForwardPortRecord::Report(report.clone()))
            .await?;
        Ok(report)
    }

    /// Store a forward-port result produced elsewhere. Anything that is not
    /// JSON is stored as a plain string.
    pub async fn record_forward_port(&self, raw: &str) -> Result<TrackingRecord> {
        let record = serde_json::from_str::<ForwardPortRecord>(raw)
            .unwrap_or_else(|_| ForwardPortRecord::Raw(Value::String(raw.to_string())));
        self.store_forward_port(record).await
    }

    async fn store_forward_port(&self, result: ForwardPortRecord) -> Result<TrackingRecord> {
        let change = self.change_id(None).await?;
        let mut record = self.deps.store.find(&change).await?.ok_or_else(|| {
            Precondition::MissingRecordForForwardPort {
                change: change.to_string(),
            }
        })?;
        record.history_mut().forward_port = Some(result);
        let updated = self.deps.store.update_properties(&record).await?;
        info!(form_id = %updated.id(), "Stored forward-port status");
        Ok(updated)
    }

    /// Commit id of the merge request's merge ref (friendly builds only).
    pub async fn merged_ref(&self) -> Result<Option<String>> {
        if self.mode().is_authoritative() {
            info!("No need to get the merged ref for an official build");
            return Ok(None);
        }
        let change = self.change_id(None).await?;
        match self.deps.source.merged_ref(&change).await? {
            MergeRefStatus::Mergeable { commit_id } => {
                info!(commit_id = %commit_id, "Updated merged ref");
                Ok(Some(commit_id))
            }
            MergeRefStatus::Conflicted => Err(Precondition::NotMergeable {
                change: change.to_string(),
            }
            .into()),
        }
    }

    /// Restart the dependency image pipeline when asked to and the last run
    /// is stale. Never fails; problems are logged and reported as `Skipped`.
    pub async fn refresh_dependencies(&self, now: DateTime<Utc>) -> RefreshDecision {
        if !self.handoff.exists(DEPENDENCIES_UPDATE_REQUIRED) {
            info!("Dependencies image update is not required");
            return RefreshDecision::NotRequired;
        }
        match self.try_refresh_dependencies(now).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, "Ignoring failure while updating dependencies");
                RefreshDecision::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_refresh_dependencies(&self, now: DateTime<Utc>) -> Result<RefreshDecision> {
        let project = required("dependency project id", &self.config.dependency_project_id)?;
        let version = required("version", &self.config.version)?;

        let latest = self.deps.host.latest_pipeline(project, version).await?;
        let Some(PipelineSummary {
            status,
            finished_at: Some(finished_at),
            ..
        }) = latest.filter(|p| p.status == "success")
        else {
            info!("Dependencies image update is not done; last status is not success");
            return Ok(RefreshDecision::LastPipelineNotSuccessful);
        };

        let elapsed = (now - finished_at).abs();
        let minutes = elapsed.num_minutes();
        if elapsed <= Duration::minutes(DEPENDENCY_REFRESH_AFTER_MINUTES) {
            info!(minutes, status = %status, "Dependencies image update is not done; last run is too recent");
            return Ok(RefreshDecision::TooRecent { minutes });
        }

        let started = self.deps.host.start_pipeline(project, version).await?;
        info!(pipeline_id = started.id, "Started dependencies pipeline");
        Ok(RefreshDecision::Started {
            pipeline_id: started.id,
        })
    }
}
