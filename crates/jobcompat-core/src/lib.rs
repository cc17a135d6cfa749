//! jobcompat-core — backwards-compatibility orchestration for a job-server toolchain.
//!
//! Drives one iteration per toolchain version under test:
//! - Provision an isolated environment pinned to the server version
//! - Start the job server from inside that environment
//! - Switch back to the host toolchain (the "newer client")
//! - Submit a job, poll it to a terminal status, fetch its logs
//! - Validate the logs, then tear everything down unconditionally
//!
//! The environment manager, the server, and the job API are reached through
//! traits so tests can run the whole state machine against in-memory fakes.

pub mod config;
pub mod env;
pub mod error;
pub mod fakes;
pub mod job;
pub mod runner;
pub mod server;

mod exec;

// Re-export key types
pub use config::{HarnessConfig, PackageSet, VersionSpec};
pub use env::{
    ActivationState, CondaProvisioner, EnvironmentContext, EnvironmentHandle,
    EnvironmentProvisioner,
};
pub use error::HarnessError;
pub use job::{CliJobClient, JobClient, JobSpec, JobStatus, JobTemplate};
pub use runner::{
    AcceptAllLogs, CompatReport, CompatRunner, ExpectedSubstring, IterationOutcome, LogValidator,
    MatrixEntry, Phase,
};
pub use server::{CliServerLifecycle, ServerLifecycle};

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
