//! Job submission, status polling, and log retrieval.
//!
//! The job API is a black box reached through the toolchain's job CLI. The
//! orchestrator never mutates a job; it submits once and only reads status
//! and logs afterwards.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::env::EnvironmentContext;
use crate::error::HarnessError;
use crate::exec::run_capture;
use crate::Result;

/// Observed job status, as reported by the job CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl JobStatus {
    /// Whether the job will make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Parse the status token printed by `<cli> job status`.
    ///
    /// Unrecognized tokens map to [`Unknown`](Self::Unknown) rather than an
    /// error, so a newer server adding states does not break older harnesses.
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" | "PENDING" => JobStatus::Submitted,
            "RUNNING" => JobStatus::Running,
            "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }
}

/// A unit of work submitted to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Globally unique identifier, generated fresh per iteration.
    pub job_id: String,

    /// Directory whose contents are uploaded to the server.
    pub working_dir: PathBuf,

    /// Command executed inside the job sandbox.
    pub entrypoint: Vec<String>,

    /// Pinned packages installed into the job's execution sandbox,
    /// independent of the server environment's own packages.
    pub runtime_deps: Vec<String>,
}

/// Reusable job shape; [`instantiate`](Self::instantiate) mints a fresh
/// identifier per iteration so no two iterations share one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub working_dir: PathBuf,
    pub entrypoint: Vec<String>,
    pub runtime_deps: Vec<String>,
}

impl JobTemplate {
    pub fn instantiate(&self) -> JobSpec {
        JobSpec {
            job_id: format!("jobcompat-{}", Uuid::new_v4()),
            working_dir: self.working_dir.clone(),
            entrypoint: self.entrypoint.clone(),
            runtime_deps: self.runtime_deps.clone(),
        }
    }
}

/// Trait for job-API backends.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submit `job` to the running server. Rejection or transport failure is
    /// fatal for the iteration.
    async fn submit(&self, ctx: &EnvironmentContext, job: &JobSpec) -> Result<()>;

    /// Query current status. A query failure is fatal; a job in the
    /// [`Failed`](JobStatus::Failed) state is not.
    async fn status(&self, ctx: &EnvironmentContext, job_id: &str) -> Result<JobStatus>;

    /// Retrieve the job's captured output.
    async fn logs(&self, ctx: &EnvironmentContext, job_id: &str) -> Result<String>;
}

/// Job client backed by the toolchain CLI (`<cli> job submit/status/logs`).
///
/// The server address is always passed explicitly via `--address`; child
/// processes never inherit it from ambient environment variables.
pub struct CliJobClient {
    config: HarnessConfig,
}

impl CliJobClient {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    fn job_cmd(&self, ctx: &EnvironmentContext, subcommand: &str) -> tokio::process::Command {
        let mut cmd = ctx.command(&self.config.conda_bin, &self.config.cli_bin);
        cmd.args(["job", subcommand, "--address", &self.config.server_address]);
        cmd
    }
}

#[async_trait]
impl JobClient for CliJobClient {
    async fn submit(&self, ctx: &EnvironmentContext, job: &JobSpec) -> Result<()> {
        info!(job_id = %job.job_id, working_dir = %job.working_dir.display(), "submitting job");

        let runtime_env = json!({ "pip": job.runtime_deps }).to_string();
        let mut cmd = self.job_cmd(ctx, "submit");
        cmd.args(["--submission-id", &job.job_id]);
        cmd.arg("--working-dir").arg(&job.working_dir);
        cmd.args(["--runtime-env-json", &runtime_env, "--no-wait", "--"]);
        cmd.args(&job.entrypoint);

        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::Submission(out.failure_summary()));
        }
        Ok(())
    }

    async fn status(&self, ctx: &EnvironmentContext, job_id: &str) -> Result<JobStatus> {
        let mut cmd = self.job_cmd(ctx, "status");
        cmd.arg(job_id);
        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::Status(out.failure_summary()));
        }

        let status = JobStatus::parse(&out.stdout);
        debug!(job_id = %job_id, status = ?status, "status query");
        Ok(status)
    }

    async fn logs(&self, ctx: &EnvironmentContext, job_id: &str) -> Result<String> {
        let mut cmd = self.job_cmd(ctx, "logs");
        cmd.arg(job_id);
        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::LogFetch(out.failure_summary()));
        }
        Ok(out.stdout)
    }
}
