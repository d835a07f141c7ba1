//! Build outcome routing.
//!
//! One build attempt moves `Running → Succeeded | Failed`; a failed attempt
//! then becomes `Remediated` (friendly build: the form is reset) or
//! `CorrectiveSpawned` (official build: a corrective merge request is opened).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::collaborators::{ChangeSource, TrackingStore, VersionControlHost};
use crate::domain::{
    BuildMode, ChangeRequest, JobStatus, LogicalChangeId, NewChangeRequest, TrackingRecord,
};
use crate::error::{Precondition, Result};
use crate::reconciler::{AttemptContext, ReconcileAction, ReleaseFormReconciler};

/// Only jobs of this stage decide the outcome.
pub const BUILD_STAGE: &str = "build";

/// Reason sent with the form reset after a failed friendly build.
pub const RESET_REASON: &str = "Build failed";

/// Prefix of the form link added to merge request descriptions.
pub const FORM_LINK_PREFIX: &str = "UpdateCenter Form: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Running,
    Succeeded,
    Failed,
    Remediated,
    CorrectiveSpawned,
}

impl BuildState {
    /// `Succeeded` iff no build-stage job failed. Jobs in other states
    /// (skipped, manual, ...) never block success.
    pub fn from_jobs(jobs: &[JobStatus]) -> BuildState {
        let failed = jobs
            .iter()
            .any(|job| job.stage == BUILD_STAGE && job.is_failed());
        if failed {
            BuildState::Failed
        } else {
            BuildState::Succeeded
        }
    }

    /// Terminal state of a failed attempt.
    pub fn after_failure(mode: BuildMode) -> BuildState {
        match mode {
            BuildMode::Authoritative => BuildState::CorrectiveSpawned,
            BuildMode::NonAuthoritative => BuildState::Remediated,
        }
    }
}

/// Ids of the build-stage jobs, as recorded in the attempt history.
pub fn build_job_ids(jobs: &[JobStatus]) -> Vec<String> {
    jobs.iter()
        .filter(|job| job.stage == BUILD_STAGE)
        .map(|job| job.id.to_string())
        .collect()
}

/// Everything the router needs to know about the attempt being routed.
#[derive(Debug, Clone)]
pub struct RouteRequest<'a> {
    pub change: &'a LogicalChangeId,
    pub mode: BuildMode,
    /// Freshly computed form for this attempt.
    pub draft: &'a TrackingRecord,
    pub attempt: &'a AttemptContext,
    pub jobs: &'a [JobStatus],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Submitted {
        action: ReconcileAction,
        record: TrackingRecord,
        refreshable: Option<bool>,
    },
    Remediated {
        record: TrackingRecord,
    },
    CorrectiveSpawned {
        record: TrackingRecord,
        corrective: ChangeRequest,
    },
}

impl RouteOutcome {
    pub fn state(&self) -> BuildState {
        match self {
            RouteOutcome::Submitted { .. } => BuildState::Succeeded,
            RouteOutcome::Remediated { .. } => BuildState::Remediated,
            RouteOutcome::CorrectiveSpawned { .. } => BuildState::CorrectiveSpawned,
        }
    }

    pub fn record(&self) -> &TrackingRecord {
        match self {
            RouteOutcome::Submitted { record, .. }
            | RouteOutcome::Remediated { record }
            | RouteOutcome::CorrectiveSpawned { record, .. } => record,
        }
    }
}

/// Routes a finished build to form submission or failure handling.
pub struct BuildOutcomeRouter {
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn TrackingStore>,
    host: Arc<dyn VersionControlHost>,
    form_base_url: String,
    help_url: Option<String>,
}

impl BuildOutcomeRouter {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn TrackingStore>,
        host: Arc<dyn VersionControlHost>,
        form_base_url: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            host,
            form_base_url: form_base_url.into(),
            help_url: None,
        }
    }

    /// Link to troubleshooting docs, embedded in corrective merge requests.
    pub fn with_help_url(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }

    pub async fn route(&self, request: RouteRequest<'_>) -> Result<RouteOutcome> {
        let state = BuildState::from_jobs(request.jobs);
        info!(
            change = %request.change,
            mode = %request.mode,
            state = ?state,
            build_jobs = build_job_ids(request.jobs).len(),
            "Evaluated build stage"
        );

        match (state, request.mode) {
            (BuildState::Failed, BuildMode::NonAuthoritative) => self.remediate(request.change).await,
            (BuildState::Failed, BuildMode::Authoritative) => {
                self.spawn_corrective(request.change, request.now).await
            }
            _ => self.submit(&request).await,
        }
    }

    async fn submit(&self, request: &RouteRequest<'_>) -> Result<RouteOutcome> {
        let existing = self.store.find(request.change).await?;
        let reconciliation = ReleaseFormReconciler::reconcile(
            request.change,
            request.mode,
            request.draft,
            request.attempt,
            existing.as_ref(),
        )?;

        let record = match (reconciliation.action, request.mode) {
            (ReconcileAction::Create, _) => self.store.create(&reconciliation.payload).await?,
            (ReconcileAction::Update, BuildMode::Authoritative) => {
                self.store
                    .update_properties(&reconciliation.payload)
                    .await?
            }
            (ReconcileAction::Update, BuildMode::NonAuthoritative) => {
                self.store.update(&reconciliation.payload).await?
            }
        };
        info!(
            form_id = %record.id(),
            action = ?reconciliation.action,
            refreshable = ?reconciliation.refreshable,
            "Form submitted"
        );

        if !request.mode.is_authoritative() {
            self.annotate_with_form_link(request.change, &record).await?;
        }

        Ok(RouteOutcome::Submitted {
            action: reconciliation.action,
            record,
            refreshable: reconciliation.refreshable,
        })
    }

    /// Prefix the merge request description with a link to the form.
    async fn annotate_with_form_link(
        &self,
        change: &LogicalChangeId,
        record: &TrackingRecord,
    ) -> Result<()> {
        let url = record.web_url(&self.form_base_url);
        let mr = self.source.change_request(change).await?;
        if mr.description.contains(&url) {
            return Ok(());
        }

        let description = format!(
            "{FORM_LINK_PREFIX}[{}]({url}) \n\n{}",
            record.id(),
            mr.description
        );
        self.host
            .update_change_request_description(mr.project_id, mr.iid, &description)
            .await
            .inspect_err(|e| {
                error!(form_id = %record.id(), iid = mr.iid, error = %e, "Form created but merge request link not added")
            })
    }

    async fn remediate(&self, change: &LogicalChangeId) -> Result<RouteOutcome> {
        let record = self.store.find(change).await?.ok_or_else(|| {
            Precondition::MissingRecordForRemediation {
                change: change.to_string(),
            }
        })?;

        self.store.reset_to_created(&record, RESET_REASON).await?;
        info!(form_id = %record.id(), "Friendly build failed; form moved back to created state");
        Ok(RouteOutcome::Remediated { record })
    }

    async fn spawn_corrective(
        &self,
        change: &LogicalChangeId,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome> {
        let record = self.store.find(change).await?.ok_or_else(|| {
            Precondition::MissingRecordForOfficial {
                change: change.to_string(),
            }
        })?;
        let old = self.source.change_request(change).await?;

        let request = self.corrective_request(&record, &old, now);
        let corrective = self.host.create_change_request(&request).await?;
        warn!(
            form_id = %record.id(),
            old_iid = old.iid,
            corrective_iid = corrective.iid,
            "Official build failed; corrective merge request created"
        );

        let note = format!(
            "New corrective merge-request !{} is created for this change because official build failed.\n\n{}",
            corrective.iid, old.description
        );
        self.host
            .update_change_request_description(old.project_id, old.iid, &note)
            .await
            .inspect_err(|e| {
                error!(
                    old_iid = old.iid,
                    corrective_iid = corrective.iid,
                    error = %e,
                    "Corrective merge request exists but the original was not annotated"
                )
            })?;

        let mut payload = record.clone();
        payload.properties.merge_request_iid = corrective.iid.to_string();
        payload.history_mut().superseded_change = Some(old.iid.to_string());
        let record = self
            .store
            .update_properties(&payload)
            .await
            .inspect_err(|e| {
                error!(
                    form_id = %record.id(),
                    corrective_iid = corrective.iid,
                    error = %e,
                    "Corrective merge request exists but the form still points at the original"
                )
            })?;

        Ok(RouteOutcome::CorrectiveSpawned { record, corrective })
    }

    fn corrective_request(
        &self,
        record: &TrackingRecord,
        old: &ChangeRequest,
        now: DateTime<Utc>,
    ) -> NewChangeRequest {
        let mut description = String::from("Corrective GMR for official build failure.");
        if let Some(help) = &self.help_url {
            description.push_str(&format!("\n\nHow to fix: {help}"));
        }
        description.push_str(&format!(
            "\n\nUpdate Form id: {} \n\nPrevious MergeRequest: !{} \n\nOriginal description: {}",
            record.id(),
            old.iid,
            old.description
        ));

        NewChangeRequest {
            source_project_id: old.source_project_id,
            target_project_id: old.target_project_id,
            title: format!("Corrective GMR for: {}", old.title),
            description,
            // The branch does not exist yet, so no pipeline starts on creation.
            source_branch: format!(
                "{}-{}-{}",
                old.source_branch,
                record.id(),
                now.timestamp_millis()
            ),
            target_branch: old.target_branch.clone(),
            author_id: old.author_id,
            squash: true,
            labels: record.artifacts.union_names().into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArtifactSet, ChangeSet};
    use crate::error::FormSyncError;
    use crate::fakes::{MemoryTrackingStore, RecordingHost, StaticChangeSource, StoreCall};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn change() -> LogicalChangeId {
        LogicalChangeId::new("9", "42")
    }

    fn mr() -> ChangeRequest {
        ChangeRequest {
            iid: 42,
            project_id: 9,
            source_project_id: 31,
            target_project_id: 9,
            title: "Fix login".to_string(),
            description: "Fixes the login page".to_string(),
            source_branch: "fix-login".to_string(),
            target_branch: "REL_11_0_0_BRANCH".to_string(),
            author_id: 8,
            author_username: "dev".to_string(),
            labels: vec![],
        }
    }

    fn draft() -> TrackingRecord {
        TrackingRecord::draft(
            "1100080",
            "dev",
            "Fix login",
            ["a.see", "b.sh"].into_iter().collect(),
            ArtifactSet::from_lists(["a.see"], ["b.sh"]),
            "42",
            "9",
        )
    }

    fn stored() -> TrackingRecord {
        let mut record = draft();
        record.form_id = Some("5501".to_string());
        record
    }

    fn attempt() -> AttemptContext {
        AttemptContext {
            pipeline_id: "1001".to_string(),
            project_id: "9".to_string(),
            commit_sha: "c1".to_string(),
            build_job_ids: vec!["11".to_string()],
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    struct Harness {
        store: Arc<MemoryTrackingStore>,
        host: Arc<RecordingHost>,
        router: BuildOutcomeRouter,
    }

    fn harness(store: MemoryTrackingStore, host: RecordingHost) -> Harness {
        let store = Arc::new(store);
        let host = Arc::new(host);
        let source = Arc::new(StaticChangeSource::new().with_change_request(mr()));
        let router = BuildOutcomeRouter::new(
            source,
            store.clone(),
            host.clone(),
            "https://uc.example.com",
        );
        Harness {
            store,
            host,
            router,
        }
    }

    async fn route(h: &Harness, mode: BuildMode, jobs: &[JobStatus]) -> Result<RouteOutcome> {
        let change = change();
        let draft = draft();
        let attempt = attempt();
        h.router
            .route(RouteRequest {
                change: &change,
                mode,
                draft: &draft,
                attempt: &attempt,
                jobs,
                now: now(),
            })
            .await
    }

    #[test]
    fn test_only_failed_build_jobs_fail_the_attempt() {
        let ok = [
            JobStatus::new(1, "build", "success"),
            JobStatus::new(2, "build", "skipped"),
            JobStatus::new(3, "test", "failed"),
        ];
        assert_eq!(BuildState::from_jobs(&ok), BuildState::Succeeded);
        assert_eq!(BuildState::from_jobs(&[]), BuildState::Succeeded);

        let failed = [
            JobStatus::new(1, "build", "success"),
            JobStatus::new(2, "build", "failed"),
        ];
        assert_eq!(BuildState::from_jobs(&failed), BuildState::Failed);
        assert_eq!(build_job_ids(&failed), vec!["1", "2"]);
    }

    #[test]
    fn test_failure_routing_depends_on_mode() {
        assert_eq!(
            BuildState::after_failure(BuildMode::NonAuthoritative),
            BuildState::Remediated
        );
        assert_eq!(
            BuildState::after_failure(BuildMode::Authoritative),
            BuildState::CorrectiveSpawned
        );
    }

    #[tokio::test]
    async fn test_success_creates_form_and_links_it() {
        let h = harness(MemoryTrackingStore::new(), RecordingHost::new());
        let outcome = route(
            &h,
            BuildMode::NonAuthoritative,
            &[JobStatus::new(11, "build", "success")],
        )
        .await
        .unwrap();

        assert_eq!(outcome.state(), BuildState::Succeeded);
        assert_eq!(outcome.record().id(), "5001");
        assert!(matches!(h.store.calls()[0], StoreCall::Create(_)));

        let descriptions = h.host.descriptions();
        assert_eq!(descriptions.len(), 1);
        assert_eq!(
            descriptions[0].2,
            "UpdateCenter Form: [5001](https://uc.example.com/Form.aspx?BuildID=1100080&FormID=5001) \n\nFixes the login page"
        );
    }

    #[tokio::test]
    async fn test_official_success_uses_properties_update() {
        let h = harness(
            MemoryTrackingStore::new().with_record(stored()),
            RecordingHost::new(),
        );
        let outcome = route(&h, BuildMode::Authoritative, &[]).await.unwrap();
        assert_eq!(outcome.state(), BuildState::Succeeded);
        assert!(matches!(h.store.calls()[0], StoreCall::UpdateProperties(_)));
        assert!(h.host.descriptions().is_empty());
    }

    #[tokio::test]
    async fn test_friendly_failure_resets_form_without_touching_payload() {
        let h = harness(
            MemoryTrackingStore::new().with_record(stored()),
            RecordingHost::new(),
        );
        let outcome = route(
            &h,
            BuildMode::NonAuthoritative,
            &[JobStatus::new(11, "build", "failed")],
        )
        .await
        .unwrap();

        assert_eq!(outcome.state(), BuildState::Remediated);
        assert_eq!(
            h.store.calls(),
            vec![StoreCall::ResetToCreated {
                form_id: "5501".to_string(),
                reason: "Build failed".to_string(),
            }]
        );
        assert_eq!(h.store.records(), vec![stored()]);
    }

    #[tokio::test]
    async fn test_friendly_failure_without_form_is_fatal() {
        let h = harness(MemoryTrackingStore::new(), RecordingHost::new());
        let err = route(
            &h,
            BuildMode::NonAuthoritative,
            &[JobStatus::new(11, "build", "failed")],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            FormSyncError::PreconditionViolation(Precondition::MissingRecordForRemediation { .. })
        ));
    }

    #[tokio::test]
    async fn test_official_failure_spawns_corrective_change() {
        let h = harness(
            MemoryTrackingStore::new().with_record(stored()),
            RecordingHost::new(),
        );
        let outcome = route(
            &h,
            BuildMode::Authoritative,
            &[JobStatus::new(11, "build", "failed")],
        )
        .await
        .unwrap();
        assert_eq!(outcome.state(), BuildState::CorrectiveSpawned);

        let created = h.host.created();
        assert_eq!(created.len(), 1);
        let request = &created[0];
        assert_eq!(request.title, "Corrective GMR for: Fix login");
        assert_eq!(request.source_branch, "fix-login-5501-1700000000000");
        assert_eq!(request.target_branch, "REL_11_0_0_BRANCH");
        assert_eq!(request.source_project_id, 31);
        assert_eq!(request.author_id, 8);
        assert!(request.squash);
        assert_eq!(request.labels, vec!["a.see", "b.sh"]);
        assert!(request.description.contains("Update Form id: 5501"));
        assert!(request.description.contains("Previous MergeRequest: !42"));

        let descriptions = h.host.descriptions();
        assert_eq!(descriptions[0].0, 9);
        assert_eq!(descriptions[0].1, 42);
        assert!(descriptions[0]
            .2
            .starts_with("New corrective merge-request !901 is created"));

        let record = outcome.record();
        assert_eq!(record.properties.merge_request_iid, "901");
        assert_eq!(record.history().corrective_for(), Some("42"));
        assert_eq!(record.artifacts, stored().artifacts);
    }

    #[tokio::test]
    async fn test_official_failure_without_form_is_fatal() {
        let h = harness(MemoryTrackingStore::new(), RecordingHost::new());
        let err = route(
            &h,
            BuildMode::Authoritative,
            &[JobStatus::new(11, "build", "failed")],
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            FormSyncError::PreconditionViolation(Precondition::MissingRecordForOfficial { .. })
        ));
        assert!(h.host.created().is_empty());
    }

    #[tokio::test]
    async fn test_annotation_failure_after_corrective_creation_is_returned() {
        let h = harness(
            MemoryTrackingStore::new().with_record(stored()),
            RecordingHost::new().failing_description_updates(),
        );
        let err = route(
            &h,
            BuildMode::Authoritative,
            &[JobStatus::new(11, "build", "failed")],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FormSyncError::ExternalCall { .. }));
        assert_eq!(h.host.created().len(), 1);
        assert!(h.store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_link_not_added_twice() {
        let mut linked = mr();
        linked.description = format!(
            "UpdateCenter Form: [5501](https://uc.example.com/Form.aspx?BuildID=1100080&FormID=5501) \n\n{}",
            linked.description
        );
        let store = Arc::new(MemoryTrackingStore::new().with_record(stored()));
        let host = Arc::new(RecordingHost::new());
        let router = BuildOutcomeRouter::new(
            Arc::new(StaticChangeSource::new().with_change_request(linked)),
            store.clone(),
            host.clone(),
            "https://uc.example.com/",
        );

        let change = change();
        let mut d = draft();
        d.source_info.files = ChangeSet::from_lines("a.see\nb.sh\nc.js");
        router
            .route(RouteRequest {
                change: &change,
                mode: BuildMode::NonAuthoritative,
                draft: &d,
                attempt: &attempt(),
                jobs: &[],
                now: now(),
            })
            .await
            .unwrap();

        assert!(host.descriptions().is_empty());
        assert!(matches!(store.calls()[0], StoreCall::Update(_)));
    }
}
