//! Error types for the compatibility harness.

use thiserror::Error;

/// Errors that can fail a compatibility iteration.
///
/// Every variant is fatal for the current iteration; the runner reacts to all
/// of them the same way: jump to cleanup, record the failure, move on.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Environment creation, package install, or removal failed.
    #[error("environment provisioning failed: {0}")]
    Provision(String),

    /// Server process could not bind or initialize.
    #[error("server start failed: {0}")]
    ServerStart(String),

    /// Job submission was rejected or the submit call itself failed.
    #[error("job submission failed: {0}")]
    Submission(String),

    /// The status query errored (distinct from the job being in a failed state).
    #[error("job status query failed: {0}")]
    Status(String),

    /// The poll loop exhausted its budget without observing a terminal status.
    #[error("job {job_id} did not reach a terminal status within {budget_secs}s")]
    StatusTimeout { job_id: String, budget_secs: u64 },

    /// Log retrieval failed.
    #[error("log retrieval failed: {0}")]
    LogFetch(String),

    /// Retrieved logs did not match the expected content.
    #[error("log validation failed: {0}")]
    Validation(String),

    /// IO error (spawn failure, unreadable working directory, ...).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_job_and_budget() {
        let err = HarnessError::StatusTimeout {
            job_id: "job-42".to_string(),
            budget_secs: 120,
        };
        let msg = err.to_string();
        assert!(msg.contains("job-42"));
        assert!(msg.contains("120s"));
    }
}
