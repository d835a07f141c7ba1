//! formsync - release-form synchronisation for CI pipelines
//!
//! Each subcommand is one pipeline step. Configuration comes from flags or,
//! more usually, the CI environment.
//!
//! ## Commands
//!
//! - `collect`: changed files and binaries, pending form in `jobDetails/`
//! - `check-diff`: flag when a local git diff is needed
//! - `submit`: create/update the form, or handle a failed build
//! - `record-pipeline`: note this pipeline on an existing form
//! - `forward-port` / `record-forward-port`: cherry-pick to later releases
//! - `merged-ref`: check the merge request still merges cleanly
//! - `refresh-dependencies`: rebuild a stale dependency image
//! - `download-source`: fetch an update-center form's zipped source

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use formsync_core::handoff::DEBUG_LOG;
use formsync_core::{
    init_tracing, FormSyncError, HandoffDir, RouteOutcome, Workflow, WorkflowConfig,
};
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "formsync")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keep update-center forms in step with GitLab pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings, normally provided by the CI job environment.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// GitLab API root
    #[arg(long, env = "CI_API_V4_URL", default_value = "https://gitlab.com/api/v4")]
    gitlab_url: String,

    /// Update-center site root
    #[arg(long, env = "UPDATE_CENTER_URL", default_value = "")]
    update_center_url: String,

    /// Remote binary finder endpoint
    #[arg(long, env = "BINARY_FINDER_URL")]
    binary_finder_url: Option<String>,

    #[arg(long, env = "gitlabtokenformergerequest", hide_env_values = true)]
    gitlab_token: Option<String>,

    #[arg(long, env = "uctokenforcommitrequest", hide_env_values = true)]
    update_center_token: Option<String>,

    #[arg(long, env = "ucApiUser")]
    update_center_user: Option<String>,

    #[arg(long, env = "ucApiPass", hide_env_values = true)]
    update_center_password: Option<String>,

    #[arg(long, env = "CI_MERGE_REQUEST_PROJECT_ID")]
    merge_project_id: Option<String>,

    #[arg(long, env = "CI_PROJECT_ID")]
    commit_project_id: Option<String>,

    #[arg(long, env = "CI_MERGE_REQUEST_IID")]
    merge_request_iid: Option<String>,

    #[arg(long, env = "CI_COMMIT_SHA")]
    commit_sha: Option<String>,

    #[arg(long, env = "CI_PIPELINE_ID")]
    pipeline_id: Option<String>,

    #[arg(long, env = "CI_COMMIT_REF_NAME")]
    commit_ref_name: Option<String>,

    /// Release branch the build belongs to
    #[arg(long = "branch-name", id = "branch_name", env = "BRANCH_NAME")]
    branch_name: Option<String>,

    #[arg(long, env = "BRANCH_BUILD_ID")]
    build_id: Option<String>,

    #[arg(long, env = "BRANCH_BUILD_NAME")]
    build_name: Option<String>,

    /// Build the configured binaries instead of looking them up
    #[arg(long, env = "BATCH_BUILDER")]
    batch_build: bool,

    #[arg(long, env = "BINARIES_TO_BUILD", value_delimiter = ',')]
    batch_binaries: Vec<String>,

    /// Canonical project path, as written in merge commit messages
    #[arg(long, env = "CV_OFFICIAL_PROJECT")]
    official_project: Option<String>,

    #[arg(long, env = "CI_SERVER_HOST")]
    server_host: Option<String>,

    #[arg(long, env = "GITLAB_USER_NAME")]
    git_user_name: Option<String>,

    #[arg(long, env = "GITLAB_USER_EMAIL")]
    git_user_email: Option<String>,

    #[arg(long, env = "BINARY_FINDER_COMMAND")]
    binary_finder_command: Option<String>,

    #[arg(long, env = "BINARY_FINDER_FOLDER")]
    binary_finder_folder: Option<PathBuf>,

    #[arg(long, env = "DEPENDENCY_INSTALL_COMMAND", default_value = "npm ci")]
    dependency_install_command: String,

    /// Project whose pipeline builds the dependency image
    #[arg(long, env = "DEPENDENCIES_PROJECT_ID")]
    dependency_project_id: Option<String>,

    #[arg(long, env = "FORMSYNC_HANDOFF_DIR", default_value = "jobDetails")]
    handoff_dir: PathBuf,

    /// Troubleshooting page linked from corrective merge requests
    #[arg(long, env = "FORMSYNC_HELP_URL")]
    help_url: Option<String>,
}

impl From<ConfigArgs> for WorkflowConfig {
    fn from(args: ConfigArgs) -> Self {
        WorkflowConfig {
            gitlab_api_url: args.gitlab_url,
            update_center_url: args.update_center_url,
            binary_finder_url: args.binary_finder_url,
            gitlab_token: args.gitlab_token,
            update_center_token: args.update_center_token,
            update_center_user: args.update_center_user,
            update_center_password: args.update_center_password,
            merge_project_id: args.merge_project_id,
            commit_project_id: args.commit_project_id,
            merge_request_iid: args.merge_request_iid,
            commit_sha: args.commit_sha,
            pipeline_id: args.pipeline_id,
            commit_ref_name: args.commit_ref_name,
            version: args.branch_name,
            build_id: args.build_id,
            build_name: args.build_name,
            batch_build: args.batch_build,
            batch_binaries: args
                .batch_binaries
                .into_iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect(),
            official_project: args.official_project,
            server_host: args.server_host,
            git_user_name: args.git_user_name,
            git_user_email: args.git_user_email,
            binary_finder_command: args.binary_finder_command,
            binary_finder_folder: args.binary_finder_folder,
            dependency_install_command: args.dependency_install_command,
            dependency_project_id: args.dependency_project_id,
            handoff_dir: args.handoff_dir,
            help_url: args.help_url,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve changed files and binaries and write the pending form
    Collect,

    /// Write the gitDiffRequired sentinel when the API diff is truncated
    CheckDiff,

    /// Submit the form for a finished build, or handle the failure
    Submit,

    /// Record this pipeline on the merge request's existing form
    RecordPipeline,

    /// Cherry-pick the merged commit to later release branches
    ForwardPort {
        /// Form id (default: jobDetails/uc_formId.txt)
        #[arg(long)]
        form_id: Option<String>,

        /// Project to push working branches to (default: the merge request's source project)
        #[arg(long)]
        project_path: Option<String>,
    },

    /// Store a forward-port result produced by another job
    RecordForwardPort {
        /// Result JSON
        result: String,
    },

    /// Fail when the merge request no longer merges cleanly
    MergedRef,

    /// Restart the dependency image pipeline when it is stale
    RefreshDependencies,

    /// Save an update-center form's source to tempExternalSrcLocation/source.zip
    DownloadSource {
        /// Update-center build the form belongs to
        #[arg(long, env = "UC_EXTERNAL_BUILD_ID")]
        build_id: String,

        #[arg(long, env = "UC_EXTERNAL_FORM_ID")]
        form_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let config = WorkflowConfig::from(cli.config);
    let handoff = HandoffDir::new(config.handoff_dir.clone());
    init_tracing(cli.json, level, Some(&handoff.path(DEBUG_LOG)));

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(&handoff, &e),
    }
}

async fn run(command: Commands, config: WorkflowConfig) -> Result<()> {
    config.validate()?;
    let work_dir = std::env::current_dir().context("Failed to read working directory")?;
    let deps = formsync_client::connect(&config, &work_dir)?;
    let workflow = Workflow::new(config, deps)?;

    match command {
        Commands::Collect => cmd_collect(&workflow).await,
        Commands::CheckDiff => cmd_check_diff(&workflow).await,
        Commands::Submit => cmd_submit(&workflow).await,
        Commands::RecordPipeline => cmd_record_pipeline(&workflow).await,
        Commands::ForwardPort {
            form_id,
            project_path,
        } => cmd_forward_port(&workflow, form_id, project_path).await,
        Commands::RecordForwardPort { result } => cmd_record_forward_port(&workflow, &result).await,
        Commands::MergedRef => cmd_merged_ref(&workflow).await,
        Commands::RefreshDependencies => cmd_refresh_dependencies(&workflow).await,
        Commands::DownloadSource { build_id, form_id } => {
            cmd_download_source(workflow.config(), &work_dir, &build_id, &form_id).await
        }
    }
}

/// Log the failure, leave the explanation for the job page, pick the exit status.
fn report_failure(handoff: &HandoffDir, e: &anyhow::Error) -> ExitCode {
    error!(error = %format!("{e:#}"), "formsync failed");

    let Some(failure) = e.downcast_ref::<FormSyncError>() else {
        return ExitCode::FAILURE;
    };
    if let Some(explanation) = failure.explanation() {
        error!(
            symptom = %explanation.symptom,
            cause = %explanation.cause,
            remedy = %explanation.remedy,
            "What to do"
        );
        if let Err(write_err) = handoff.write_user_friendly_error(&explanation.into()) {
            warn!(error = %write_err, "Could not write user friendly error");
        }
    }
    ExitCode::from(failure.exit_code())
}

async fn cmd_collect(workflow: &Workflow) -> Result<()> {
    let collected = workflow.collect().await?;
    let artifacts = &collected.classification.artifacts;
    println!("Change:           {}", collected.change);
    println!("Changed files:    {}", collected.changes.len());
    println!(
        "Windows binaries: {}",
        artifacts.windows().iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!(
        "Unix binaries:    {}",
        artifacts.unix().iter().cloned().collect::<Vec<_>>().join(", ")
    );
    for regression in &collected.classification.regressions {
        println!(
            "Kept from form ({}): {}",
            regression.family,
            regression.missing.join(", ")
        );
    }
    Ok(())
}

async fn cmd_check_diff(workflow: &Workflow) -> Result<()> {
    if workflow.check_diff().await? {
        println!("git diff required");
    } else {
        println!("API diff is complete");
    }
    Ok(())
}

async fn cmd_submit(workflow: &Workflow) -> Result<()> {
    let outcome = workflow.submit(Utc::now()).await?;
    match &outcome {
        RouteOutcome::Submitted {
            action,
            record,
            refreshable,
        } => {
            println!("Form {} submitted ({action:?})", record.id());
            if let Some(refreshable) = refreshable {
                println!("Refreshable: {refreshable}");
            }
        }
        RouteOutcome::Remediated { record } => {
            println!("Build failed; form {} moved back to created", record.id());
        }
        RouteOutcome::CorrectiveSpawned { record, corrective } => {
            println!(
                "Official build failed; corrective merge request !{} opened for form {}",
                corrective.iid,
                record.id()
            );
        }
    }
    info!(state = ?outcome.state(), "Submit finished");
    Ok(())
}

async fn cmd_record_pipeline(workflow: &Workflow) -> Result<()> {
    match workflow.record_pipeline().await? {
        Some(record) => println!("Pipeline recorded on form {}", record.id()),
        None => println!("Nothing to record"),
    }
    Ok(())
}

async fn cmd_forward_port(
    workflow: &Workflow,
    form_id: Option<String>,
    project_path: Option<String>,
) -> Result<()> {
    let report = workflow.forward_port(form_id, project_path).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_record_forward_port(workflow: &Workflow, result: &str) -> Result<()> {
    let record = workflow.record_forward_port(result).await?;
    println!("Forward-port status stored on form {}", record.id());
    Ok(())
}

async fn cmd_merged_ref(workflow: &Workflow) -> Result<()> {
    match workflow.merged_ref().await? {
        Some(commit_id) => println!("Merged ref: {commit_id}"),
        None => println!("Not a merge request pipeline"),
    }
    Ok(())
}

async fn cmd_refresh_dependencies(workflow: &Workflow) -> Result<()> {
    let decision = workflow.refresh_dependencies(Utc::now()).await;
    println!("{}", serde_json::to_string(&decision)?);
    Ok(())
}

async fn cmd_download_source(
    config: &WorkflowConfig,
    work_dir: &Path,
    build_id: &str,
    form_id: &str,
) -> Result<()> {
    let client = formsync_client::update_center_client(config)?;
    let dest = work_dir.join(formsync_client::EXTERNAL_SOURCE_DIR);
    match client.download_source(build_id, form_id, &dest).await? {
        Some(archive) => println!("Form source saved to {}", archive.display()),
        None => println!("No source for form {form_id}; nothing to download"),
    }
    Ok(())
}
