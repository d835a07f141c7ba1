//! Binary finders ([`ArtifactLookup`]).
//!
//! The local finder runs a script next to the checkout; the remote finder is
//! a legacy HTTP service used when the script fails. Both answer with
//! `{"windowsBinaries": [...], "unixBinaries": [...]}`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use formsync_core::{ArtifactLookup, ArtifactSet, ChangeSet, FormSyncError, Result};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::http::{build_client, read_json, RetryPolicy};

pub const DEFAULT_COMMAND: &str = "./getBinaries.sh";
const INPUT_FILE: &str = "temp-changed-files.txt";
const OUTPUT_FILE: &str = "temp-get-binaries-output.txt";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinderOutput {
    #[serde(default)]
    windows_binaries: Vec<String>,
    #[serde(default)]
    unix_binaries: Vec<String>,
}

impl From<FinderOutput> for ArtifactSet {
    fn from(out: FinderOutput) -> Self {
        ArtifactSet::from_lists(out.windows_binaries, out.unix_binaries)
    }
}

/// Runs `<command> <changed files file> <project dir> <output file>`.
///
/// The command sees only the variables added with [`LocalBinaryFinder::env`]
/// plus `PATH`.
pub struct LocalBinaryFinder {
    command: String,
    folder: Option<PathBuf>,
    project_dir: PathBuf,
    scratch_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl LocalBinaryFinder {
    /// `scratch_dir` receives the input and output files.
    pub fn new(project_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            folder: None,
            project_dir: project_dir.into(),
            scratch_dir: scratch_dir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Run the command from this directory.
    pub fn in_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl ArtifactLookup for LocalBinaryFinder {
    async fn lookup(&self, changes: &ChangeSet) -> Result<ArtifactSet> {
        let operation = "local binary finder";
        let input = self.scratch_dir.join(INPUT_FILE);
        let output = self.scratch_dir.join(OUTPUT_FILE);
        tokio::fs::write(&input, changes.to_lines()).await?;
        if let Err(e) = tokio::fs::remove_file(&output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        let line = format!(
            "{} {} {} {}",
            self.command,
            input.display(),
            self.project_dir.display(),
            output.display()
        );
        info!(command = %line, folder = ?self.folder, "Running local binary finder");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&line)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        if let Some(folder) = &self.folder {
            command.current_dir(folder);
        }

        let result = command
            .output()
            .await
            .map_err(|e| FormSyncError::external(operation, e))?;
        if !result.status.success() {
            return Err(FormSyncError::external(
                operation,
                format!(
                    "{}: {}",
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            ));
        }

        let text = tokio::fs::read_to_string(&output)
            .await
            .map_err(|e| FormSyncError::external(operation, format!("no output file: {e}")))?;
        let found: FinderOutput = serde_json::from_str(&text)?;
        Ok(found.into())
    }
}

#[derive(Debug, Serialize)]
struct RemoteQuery<'a> {
    version: &'a str,
    sources: Vec<&'a str>,
}

/// The binary finder web service.
pub struct RemoteBinaryFinder {
    http: Client,
    url: String,
    version: String,
    retry: RetryPolicy,
}

impl RemoteBinaryFinder {
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_client()?,
            url: url.into(),
            version: version.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl ArtifactLookup for RemoteBinaryFinder {
    async fn lookup(&self, changes: &ChangeSet) -> Result<ArtifactSet> {
        let operation = "remote binary finder";
        let query = RemoteQuery {
            version: &self.version,
            sources: changes.paths().collect(),
        };
        info!(url = %self.url, sources = query.sources.len(), "Querying remote binary finder");
        let response = self
            .retry
            .send(operation, || {
                self.http.request(Method::POST, &self.url).json(&query)
            })
            .await?;
        let found: FinderOutput = read_json(operation, response).await?;
        Ok(found.into())
    }
}

/// Try `primary`, then `fallback` if it fails.
pub struct FallbackLookup {
    primary: Arc<dyn ArtifactLookup>,
    fallback: Option<Arc<dyn ArtifactLookup>>,
}

impl FallbackLookup {
    pub fn new(primary: Arc<dyn ArtifactLookup>, fallback: Option<Arc<dyn ArtifactLookup>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl ArtifactLookup for FallbackLookup {
    async fn lookup(&self, changes: &ChangeSet) -> Result<ArtifactSet> {
        match (self.primary.lookup(changes).await, &self.fallback) {
            (Ok(found), _) => Ok(found),
            (Err(e), Some(fallback)) => {
                warn!(error = %e, "Local binary finder failed; falling back to remote lookup");
                fallback.lookup(changes).await
            }
            (Err(e), None) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync_core::fakes::StaticLookup;

    struct Failing;

    #[async_trait]
    impl ArtifactLookup for Failing {
        async fn lookup(&self, _changes: &ChangeSet) -> Result<ArtifactSet> {
            Err(FormSyncError::external("local binary finder", "exit status: 1"))
        }
    }

    fn changes() -> ChangeSet {
        ["src/a.js"].into_iter().collect()
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let expected = ArtifactSet::from_lists(["a.see"], ["a.tar"]);
        let remote = Arc::new(StaticLookup::new(expected.clone()));
        let lookup = FallbackLookup::new(Arc::new(Failing), Some(remote.clone()));

        assert_eq!(lookup.lookup(&changes()).await.unwrap(), expected);
        assert_eq!(remote.queries(), vec![changes()]);
    }

    #[tokio::test]
    async fn test_primary_error_without_fallback() {
        let lookup = FallbackLookup::new(Arc::new(Failing), None);
        assert!(lookup.lookup(&changes()).await.is_err());
    }

    #[tokio::test]
    async fn test_local_finder_reads_output_file() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("find.sh");
        std::fs::write(
            &script,
            "test \"$version\" = REL_11 || exit 7\n\
             grep -q a.js \"$1\" || exit 8\n\
             echo '{\"windowsBinaries\":[\"a.see\"],\"unixBinaries\":[]}' > \"$3\"\n",
        )
        .unwrap();

        let finder = LocalBinaryFinder::new(tmp.path(), tmp.path())
            .with_command(format!("sh {}", script.display()))
            .env("version", "REL_11");
        let found = finder.lookup(&changes()).await.unwrap();
        assert_eq!(found, ArtifactSet::from_lists(["a.see"], Vec::<String>::new()));
    }

    #[tokio::test]
    async fn test_local_finder_failure_is_external_error() {
        let tmp = tempfile::tempdir().unwrap();
        let finder = LocalBinaryFinder::new(tmp.path(), tmp.path()).with_command("exit 3");
        let err = finder.lookup(&changes()).await.unwrap_err();
        assert!(matches!(err, FormSyncError::ExternalCall { .. }));
    }
}
