//! The compatibility state machine.
//!
//! One iteration per version under test:
//!
//! ```text
//! Idle -> Provisioning -> ServerStarting -> ClientSwitching -> Submitting
//!      -> Polling -> LogFetching -> Validating -> CleaningUp -> Passed/Failed
//! ```
//!
//! Any step failure jumps straight to `CleaningUp`. Cleanup always stops the
//! server and destroys the environment; its own failures are logged and never
//! propagated, since the iteration's verdict is already decided.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, VersionSpec};
use crate::env::{ActivationState, EnvironmentContext, EnvironmentProvisioner};
use crate::error::HarnessError;
use crate::job::{JobClient, JobStatus, JobTemplate};
use crate::server::ServerLifecycle;
use crate::Result;

/// Phases of a single compatibility iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Provisioning,
    ServerStarting,
    ClientSwitching,
    Submitting,
    Polling,
    LogFetching,
    Validating,
    CleaningUp,
}

/// Outcome of one matrix iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    Passed,
    Failed { phase: Phase, reason: String },
}

impl IterationOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, IterationOutcome::Passed)
    }
}

/// One row of the compatibility matrix: a version and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub version: VersionSpec,
    pub outcome: IterationOutcome,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate result of a matrix run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatReport {
    pub entries: Vec<MatrixEntry>,
}

impl CompatReport {
    /// Whether every executed iteration passed.
    pub fn all_passed(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.passed())
    }

    pub fn passed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries.len() - self.passed_count()
    }
}

/// Consumes fetched job logs and decides whether the job behaved as expected.
///
/// A failed job whose logs are retrievable is not a harness failure by
/// itself; the validator owns that verdict.
pub trait LogValidator: Send + Sync {
    fn validate(&self, logs: &str) -> Result<()>;
}

/// Passes when the logs contain a configured substring (typically the exact
/// error message the payload script is expected to raise).
pub struct ExpectedSubstring {
    pub needle: String,
}

impl ExpectedSubstring {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
        }
    }
}

impl LogValidator for ExpectedSubstring {
    fn validate(&self, logs: &str) -> Result<()> {
        if logs.contains(&self.needle) {
            Ok(())
        } else {
            Err(HarnessError::Validation(format!(
                "logs do not contain expected substring '{}'",
                self.needle
            )))
        }
    }
}

/// Accepts any retrievable logs; used when no expectation is configured.
pub struct AcceptAllLogs;

impl LogValidator for AcceptAllLogs {
    fn validate(&self, _logs: &str) -> Result<()> {
        Ok(())
    }
}

/// Top-level driver for the compatibility matrix.
pub struct CompatRunner {
    config: HarnessConfig,
    template: JobTemplate,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    server: Arc<dyn ServerLifecycle>,
    jobs: Arc<dyn JobClient>,
    validator: Arc<dyn LogValidator>,
}

impl CompatRunner {
    pub fn new(
        config: HarnessConfig,
        template: JobTemplate,
        provisioner: Arc<dyn EnvironmentProvisioner>,
        server: Arc<dyn ServerLifecycle>,
        jobs: Arc<dyn JobClient>,
        validator: Arc<dyn LogValidator>,
    ) -> Self {
        Self {
            config,
            template,
            provisioner,
            server,
            jobs,
            validator,
        }
    }

    /// Run every version in the matrix, one at a time.
    ///
    /// Iterations never overlap: they share the server address and the
    /// temp-environment name, so each one fully tears down before the next
    /// begins. With `fail_fast` set, the first failed iteration aborts the
    /// remaining entries.
    pub async fn run_matrix(&self, versions: &[VersionSpec]) -> CompatReport {
        let mut entries = Vec::new();

        for version in versions {
            let started = Instant::now();
            let outcome = self.run_iteration(version).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                IterationOutcome::Passed => {
                    info!(version = %version, duration_ms, "iteration PASSED");
                }
                IterationOutcome::Failed { phase, reason } => {
                    warn!(version = %version, phase = ?phase, reason = %reason, "iteration FAILED");
                }
            }

            let failed = !outcome.passed();
            entries.push(MatrixEntry {
                version: version.clone(),
                outcome,
                duration_ms,
                finished_at: Utc::now(),
            });

            if failed && self.config.fail_fast {
                warn!("fail-fast: skipping remaining matrix entries");
                break;
            }
        }

        CompatReport { entries }
    }

    /// Run a single iteration against one server version, including the
    /// unconditional cleanup transition.
    pub async fn run_iteration(&self, version: &VersionSpec) -> IterationOutcome {
        let env_name = self.config.tmp_env_name.clone();
        info!(version = %version, env = %env_name, "=== compatibility check: server {} vs host client ===", version);

        let mut phase = Phase::Idle;
        let result = self.run_steps(version, &env_name, &mut phase).await;

        // CleaningUp is reachable from every prior phase, success or failure.
        self.cleanup(&env_name).await;

        match result {
            Ok(()) => IterationOutcome::Passed,
            Err(e) => IterationOutcome::Failed {
                phase,
                reason: e.to_string(),
            },
        }
    }

    async fn run_steps(
        &self,
        version: &VersionSpec,
        env_name: &str,
        phase: &mut Phase,
    ) -> Result<()> {
        *phase = Phase::Provisioning;
        info!(env = %env_name, "provisioning server environment");
        self.provisioner.remove_if_exists(env_name).await?;
        let mut handle = self.provisioner.create(env_name, version).await?;
        let server_ctx = self.provisioner.activate(env_name).await?;
        handle.state = ActivationState::Active;

        *phase = Phase::ServerStarting;
        info!("starting server (version {})", version);
        self.server.stop_force(&server_ctx).await?;
        self.server.start(&server_ctx).await?;

        *phase = Phase::ClientSwitching;
        info!("switching client to host toolchain");
        let client_ctx = self.provisioner.deactivate().await?;
        handle.state = ActivationState::Inactive;
        debug!(env = %handle.name, state = ?handle.state, "server environment left running, client on host");

        *phase = Phase::Submitting;
        let job = self.template.instantiate();
        self.jobs.submit(&client_ctx, &job).await?;

        *phase = Phase::Polling;
        let status = self.poll_until_terminal(&client_ctx, &job.job_id).await?;
        info!(job_id = %job.job_id, status = ?status, "job reached terminal status");

        *phase = Phase::LogFetching;
        let logs = self.jobs.logs(&client_ctx, &job.job_id).await?;

        *phase = Phase::Validating;
        info!(job_id = %job.job_id, "validating job output");
        self.validator.validate(&logs)?;

        Ok(())
    }

    /// Poll the job until a terminal status, bounded by the configured budget.
    /// Budget expiry is treated exactly like a status-query failure.
    async fn poll_until_terminal(
        &self,
        ctx: &EnvironmentContext,
        job_id: &str,
    ) -> Result<JobStatus> {
        let budget = Duration::from_secs(self.config.poll_timeout_secs);
        let interval = Duration::from_secs(self.config.poll_interval_secs);

        let poll = async {
            loop {
                let status = self.jobs.status(ctx, job_id).await?;
                if status.is_terminal() {
                    return Ok(status);
                }
                debug!(job_id = %job_id, status = ?status, "job not terminal yet");
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(budget, poll).await {
            Ok(result) => result,
            Err(_elapsed) => Err(HarnessError::StatusTimeout {
                job_id: job_id.to_string(),
                budget_secs: self.config.poll_timeout_secs,
            }),
        }
    }

    /// Stop the server and destroy the environment, logging failures instead
    /// of propagating them.
    async fn cleanup(&self, env_name: &str) {
        info!(env = %env_name, "cleaning up");

        if let Err(e) = self.server.stop_force(&EnvironmentContext::Host).await {
            warn!(error = %e, "server stop during cleanup failed");
        }
        if let Err(e) = self.provisioner.destroy(env_name).await {
            warn!(env = %env_name, error = %e, "environment destroy during cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_substring_passes() {
        let v = ExpectedSubstring::new("ValueError: simulated");
        assert!(v
            .validate("Traceback...\nValueError: simulated failure\n")
            .is_ok());
    }

    #[test]
    fn test_expected_substring_fails() {
        let v = ExpectedSubstring::new("ValueError");
        let err = v.validate("job completed normally").unwrap_err();
        match err {
            HarnessError::Validation(reason) => assert!(reason.contains("ValueError")),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[test]
    fn test_accept_all_logs() {
        assert!(AcceptAllLogs.validate("").is_ok());
    }

    #[test]
    fn test_report_counts() {
        let report = CompatReport {
            entries: vec![
                MatrixEntry {
                    version: VersionSpec::new("2.0.1"),
                    outcome: IterationOutcome::Passed,
                    duration_ms: 10,
                    finished_at: Utc::now(),
                },
                MatrixEntry {
                    version: VersionSpec::new("2.1.0"),
                    outcome: IterationOutcome::Failed {
                        phase: Phase::Submitting,
                        reason: "rejected".to_string(),
                    },
                    duration_ms: 5,
                    finished_at: Utc::now(),
                },
            ],
        };
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.all_passed());
    }

    #[test]
    fn test_empty_report_all_passed() {
        let report = CompatReport { entries: vec![] };
        assert!(report.all_passed());
    }

    #[test]
    fn test_outcome_serde_roundtrip() {
        let outcome = IterationOutcome::Failed {
            phase: Phase::Polling,
            reason: "timed out".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("polling"));
        let back: IterationOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
    }
}
