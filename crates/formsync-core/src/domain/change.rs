//! Changed files, logical changes and pipeline jobs.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Set of changed file paths, unique by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeSet<String>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Paths of `other` that this set lacks.
    pub fn missing_from(&self, other: &ChangeSet) -> Vec<String> {
        other.0.difference(&self.0).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// Parse a newline separated listing (the git diff handoff format).
    pub fn from_lines(text: &str) -> Self {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Newline separated listing, one path per line.
    pub fn to_lines(&self) -> String {
        self.to_vec().join("\n")
    }
}

impl<S: Into<String>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Result of asking the source-control host for a change's diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeListing {
    Changes(ChangeSet),
    /// The diff exceeded the API page-size threshold; a local git diff is
    /// needed instead.
    TooLarge,
}

/// Whether a build runs against the canonical integration branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    /// Official build of a merged commit.
    Authoritative,
    /// Friendly pre-merge build of a merge request.
    NonAuthoritative,
}

impl BuildMode {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, BuildMode::Authoritative)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Authoritative => f.write_str("official"),
            BuildMode::NonAuthoritative => f.write_str("friendly"),
        }
    }
}

/// Identifier of one logical change: a merge request within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalChangeId {
    pub project_id: String,
    pub merge_request_iid: String,
}

impl LogicalChangeId {
    pub fn new(project_id: impl Into<String>, merge_request_iid: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            merge_request_iid: merge_request_iid.into(),
        }
    }
}

impl fmt::Display for LogicalChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project {} !{}", self.project_id, self.merge_request_iid)
    }
}

/// Status of one pipeline job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: u64,
    pub stage: String,
    pub status: String,
}

impl JobStatus {
    pub fn new(id: u64, stage: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id,
            stage: stage.into(),
            status: status.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }
}

/// The details of a merge request the workflow needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub iid: u64,
    pub project_id: u64,
    pub source_project_id: u64,
    pub target_project_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub author_id: u64,
    pub author_username: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Request to open a new merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChangeRequest {
    pub source_project_id: u64,
    pub target_project_id: u64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    /// Create on behalf of this user.
    pub author_id: u64,
    pub squash: bool,
    pub labels: Vec<String>,
}

/// A commit's diff source and author, for official builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetails {
    pub id: String,
    pub message: String,
    pub author_email: String,
}

impl CommitDetails {
    /// Merge request iid recorded in a merge commit message
    /// (`See merge request <project>!<iid>`).
    pub fn merge_request_iid(&self, official_project: &str) -> Option<String> {
        let marker = format!("See merge request {official_project}!");
        let start = self.message.find(&marker)? + marker.len();
        let iid: String = self.message[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if iid.is_empty() {
            None
        } else {
            Some(iid)
        }
    }
}

/// Where a change's diff comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeTarget {
    MergeRequest(LogicalChangeId),
    Commit { project_id: String, sha: String },
}

/// Outcome of asking for a merge request's merge ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRefStatus {
    Mergeable { commit_id: String },
    Conflicted,
}

/// Latest pipeline of a project ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: u64,
    pub status: String,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}
