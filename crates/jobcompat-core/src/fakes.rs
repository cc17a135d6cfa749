//! In-memory fakes for the component traits (testing only)
//!
//! Provides `FakeProvisioner`, `FakeServer`, and `FakeJobClient` that satisfy
//! the trait contracts without conda or a live job server. Each fake records
//! its calls and supports failure injection so tests can drive the runner
//! down every cleanup path.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::VersionSpec;
use crate::env::{ActivationState, EnvironmentContext, EnvironmentHandle, EnvironmentProvisioner};
use crate::error::HarnessError;
use crate::job::{JobClient, JobSpec, JobStatus};
use crate::server::ServerLifecycle;
use crate::Result;

// ---------------------------------------------------------------------------
// FakeProvisioner
// ---------------------------------------------------------------------------

/// Provisioner fake tracking live environments in a `HashSet`.
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    calls: Mutex<Vec<String>>,
    envs: Mutex<HashSet<String>>,
    fail_create: Option<String>,
    fail_destroy: Option<String>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail with the given message (builder pattern).
    pub fn with_fail_create(mut self, msg: impl Into<String>) -> Self {
        self.fail_create = Some(msg.into());
        self
    }

    /// Make `destroy` fail with the given message (builder pattern).
    pub fn with_fail_destroy(mut self, msg: impl Into<String>) -> Self {
        self.fail_destroy = Some(msg.into());
        self
    }

    /// Ordered list of calls made, e.g. `"create:env-name"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Names of environments that currently exist.
    pub fn live_envs(&self) -> Vec<String> {
        self.envs.lock().unwrap().iter().cloned().collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl EnvironmentProvisioner for FakeProvisioner {
    async fn remove_if_exists(&self, name: &str) -> Result<()> {
        self.record(format!("remove_if_exists:{}", name));
        self.envs.lock().unwrap().remove(name);
        Ok(())
    }

    async fn create(&self, name: &str, version: &VersionSpec) -> Result<EnvironmentHandle> {
        self.record(format!("create:{}:{}", name, version));
        if let Some(msg) = &self.fail_create {
            return Err(HarnessError::Provision(msg.clone()));
        }
        self.envs.lock().unwrap().insert(name.to_string());
        Ok(EnvironmentHandle {
            name: name.to_string(),
            toolchain_version: version.clone(),
            state: ActivationState::Inactive,
        })
    }

    async fn activate(&self, name: &str) -> Result<EnvironmentContext> {
        self.record(format!("activate:{}", name));
        if !self.envs.lock().unwrap().contains(name) {
            return Err(HarnessError::Provision(format!(
                "cannot activate '{}': environment not found",
                name
            )));
        }
        Ok(EnvironmentContext::Isolated {
            name: name.to_string(),
        })
    }

    async fn deactivate(&self) -> Result<EnvironmentContext> {
        self.record("deactivate".to_string());
        Ok(EnvironmentContext::Host)
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        self.record(format!("destroy:{}", name));
        if let Some(msg) = &self.fail_destroy {
            return Err(HarnessError::Provision(msg.clone()));
        }
        self.envs.lock().unwrap().remove(name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeServer
// ---------------------------------------------------------------------------

/// Server-lifecycle fake tracking running state and start contexts.
#[derive(Debug, Default)]
pub struct FakeServer {
    calls: Mutex<Vec<String>>,
    running: Mutex<bool>,
    start_contexts: Mutex<Vec<EnvironmentContext>>,
    fail_start: Option<String>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail with the given message (builder pattern).
    pub fn with_fail_start(mut self, msg: impl Into<String>) -> Self {
        self.fail_start = Some(msg.into());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether a server is currently bound to the address.
    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }

    /// Contexts each `start` call ran under.
    pub fn start_contexts(&self) -> Vec<EnvironmentContext> {
        self.start_contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerLifecycle for FakeServer {
    async fn stop_force(&self, _ctx: &EnvironmentContext) -> Result<()> {
        self.calls.lock().unwrap().push("stop_force".to_string());
        *self.running.lock().unwrap() = false;
        Ok(())
    }

    async fn start(&self, ctx: &EnvironmentContext) -> Result<()> {
        self.calls.lock().unwrap().push("start".to_string());
        if let Some(msg) = &self.fail_start {
            return Err(HarnessError::ServerStart(msg.clone()));
        }
        self.start_contexts.lock().unwrap().push(ctx.clone());
        *self.running.lock().unwrap() = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeJobClient
// ---------------------------------------------------------------------------

/// Job-client fake: submitted jobs land in a map keyed by job id, and logs
/// are only retrievable under the submitting id.
#[derive(Debug)]
pub struct FakeJobClient {
    submitted: Mutex<Vec<JobSpec>>,
    logs_by_id: Mutex<HashMap<String, String>>,
    contexts: Mutex<Vec<EnvironmentContext>>,
    job_logs: String,
    terminal_status: JobStatus,
    never_terminal: bool,
    fail_submit: Option<String>,
    fail_status: Option<String>,
    fail_logs: Option<String>,
}

impl Default for FakeJobClient {
    fn default() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            logs_by_id: Mutex::new(HashMap::new()),
            contexts: Mutex::new(Vec::new()),
            job_logs: "job completed".to_string(),
            terminal_status: JobStatus::Succeeded,
            never_terminal: false,
            fail_submit: None,
            fail_status: None,
            fail_logs: None,
        }
    }
}

impl FakeJobClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the logs attached to every submitted job (builder pattern).
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.job_logs = logs.into();
        self
    }

    /// Set the terminal status every job eventually reports.
    pub fn with_terminal_status(mut self, status: JobStatus) -> Self {
        self.terminal_status = status;
        self
    }

    /// Report `Running` forever, for poll-timeout tests.
    pub fn never_terminal(mut self) -> Self {
        self.never_terminal = true;
        self
    }

    /// Make `submit` fail with the given message.
    pub fn with_fail_submit(mut self, msg: impl Into<String>) -> Self {
        self.fail_submit = Some(msg.into());
        self
    }

    /// Make `status` fail with the given message.
    pub fn with_fail_status(mut self, msg: impl Into<String>) -> Self {
        self.fail_status = Some(msg.into());
        self
    }

    /// Make `logs` fail with the given message.
    pub fn with_fail_logs(mut self, msg: impl Into<String>) -> Self {
        self.fail_logs = Some(msg.into());
        self
    }

    /// Jobs submitted so far, in order.
    pub fn submitted(&self) -> Vec<JobSpec> {
        self.submitted.lock().unwrap().clone()
    }

    /// Contexts the client calls ran under.
    pub fn contexts(&self) -> Vec<EnvironmentContext> {
        self.contexts.lock().unwrap().clone()
    }

    fn record_ctx(&self, ctx: &EnvironmentContext) {
        self.contexts.lock().unwrap().push(ctx.clone());
    }
}

#[async_trait]
impl JobClient for FakeJobClient {
    async fn submit(&self, ctx: &EnvironmentContext, job: &JobSpec) -> Result<()> {
        self.record_ctx(ctx);
        if let Some(msg) = &self.fail_submit {
            return Err(HarnessError::Submission(msg.clone()));
        }
        self.submitted.lock().unwrap().push(job.clone());
        self.logs_by_id
            .lock()
            .unwrap()
            .insert(job.job_id.clone(), self.job_logs.clone());
        Ok(())
    }

    async fn status(&self, ctx: &EnvironmentContext, job_id: &str) -> Result<JobStatus> {
        self.record_ctx(ctx);
        if let Some(msg) = &self.fail_status {
            return Err(HarnessError::Status(msg.clone()));
        }
        if !self.logs_by_id.lock().unwrap().contains_key(job_id) {
            return Ok(JobStatus::Unknown);
        }
        if self.never_terminal {
            return Ok(JobStatus::Running);
        }
        Ok(self.terminal_status)
    }

    async fn logs(&self, ctx: &EnvironmentContext, job_id: &str) -> Result<String> {
        self.record_ctx(ctx);
        if let Some(msg) = &self.fail_logs {
            return Err(HarnessError::LogFetch(msg.clone()));
        }
        self.logs_by_id
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| HarnessError::LogFetch(format!("no logs for job '{}'", job_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_if_exists_is_idempotent_on_missing_env() {
        let provisioner = FakeProvisioner::new();
        provisioner.remove_if_exists("nope").await.expect("first");
        provisioner.remove_if_exists("nope").await.expect("second");

        // A later create is unaffected by the no-op removals.
        let handle = provisioner
            .create("nope", &VersionSpec::new("2.0.1"))
            .await
            .expect("create");
        assert_eq!(handle.name, "nope");
        assert_eq!(provisioner.live_envs(), vec!["nope".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_requires_existing_env() {
        let provisioner = FakeProvisioner::new();
        let err = provisioner.activate("ghost").await.unwrap_err();
        assert!(matches!(err, HarnessError::Provision(_)));
    }

    #[tokio::test]
    async fn test_logs_only_under_submitting_id() {
        let client = FakeJobClient::new();
        let job = JobSpec {
            job_id: "jobcompat-abc".to_string(),
            working_dir: std::path::PathBuf::from("."),
            entrypoint: vec!["python".to_string(), "driver.py".to_string()],
            runtime_deps: vec![],
        };
        client
            .submit(&EnvironmentContext::Host, &job)
            .await
            .expect("submit");

        let logs = client
            .logs(&EnvironmentContext::Host, "jobcompat-abc")
            .await
            .expect("logs");
        assert_eq!(logs, "job completed");

        let err = client
            .logs(&EnvironmentContext::Host, "jobcompat-other")
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::LogFetch(_)));
    }
}
