//! jobcompat — backwards-compatibility harness for the job-server toolchain.
//!
//! For each version in the matrix: provision an isolated environment with the
//! server pinned to that version, start the server from it, switch the client
//! side back to the host toolchain, submit a job, poll it, fetch its logs,
//! validate them, and tear everything down. Exit code 0 iff every iteration
//! passed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use jobcompat_core::{
    AcceptAllLogs, CliJobClient, CliServerLifecycle, CompatRunner, CondaProvisioner,
    ExpectedSubstring, HarnessConfig, IterationOutcome, JobTemplate, LogValidator, PackageSet,
    VersionSpec,
};

#[derive(Parser)]
#[command(name = "jobcompat")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Job-server toolchain backwards-compatibility harness", long_about = None)]
struct Cli {
    /// Base name for the temporary server environment
    #[arg(long, env = "JOBCOMPAT_TMP_ENV")]
    tmp_env: String,

    /// Server toolchain versions to test, comma separated
    #[arg(long, env = "JOBCOMPAT_VERSIONS", value_delimiter = ',', default_value = "2.0.1")]
    versions: Vec<String>,

    /// Server address override
    #[arg(long, env = "JOBCOMPAT_SERVER_ADDRESS", default_value = "http://127.0.0.1:8265")]
    address: String,

    /// Directory uploaded as the job's working directory
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    /// Job entrypoint, whitespace separated
    #[arg(long, default_value = "python driver.py")]
    entrypoint: String,

    /// Pinned package installed into the job's runtime sandbox (repeatable)
    #[arg(long = "runtime-dep")]
    runtime_deps: Vec<String>,

    /// Substring the job logs must contain for the iteration to pass
    #[arg(long)]
    expect: Option<String>,

    /// Interpreter version the server environment is pinned to
    #[arg(long, default_value = "3.9")]
    interpreter: String,

    /// Toolchain distribution name on the package index
    #[arg(long, default_value = "jobd")]
    toolchain_package: String,

    /// Toolchain CLI binary
    #[arg(long, default_value = "jobd")]
    cli_bin: String,

    /// Environment-manager binary
    #[arg(long, default_value = "conda")]
    conda_bin: String,

    /// Budget for the status-poll loop, in seconds
    #[arg(long, default_value_t = 120)]
    poll_timeout_secs: u64,

    /// Delay between status queries, in seconds
    #[arg(long, default_value_t = 2)]
    poll_interval_secs: u64,

    /// Run the whole matrix instead of stopping at the first failure
    #[arg(long)]
    no_fail_fast: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The override was captured by clap above; clear the ambient variable so
    // child processes only ever see the address we pass explicitly.
    std::env::remove_var("JOBCOMPAT_SERVER_ADDRESS");

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = HarnessConfig {
        tmp_env_name: cli.tmp_env,
        interpreter_version: cli.interpreter,
        packages: PackageSet {
            toolchain: cli.toolchain_package,
            ..Default::default()
        },
        conda_bin: cli.conda_bin,
        cli_bin: cli.cli_bin,
        server_address: cli.address,
        poll_timeout_secs: cli.poll_timeout_secs,
        poll_interval_secs: cli.poll_interval_secs,
        fail_fast: !cli.no_fail_fast,
    };

    let template = JobTemplate {
        working_dir: cli.working_dir,
        entrypoint: cli
            .entrypoint
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        runtime_deps: cli.runtime_deps,
    };

    let validator: Arc<dyn LogValidator> = match &cli.expect {
        Some(needle) => Arc::new(ExpectedSubstring::new(needle.clone())),
        None => Arc::new(AcceptAllLogs),
    };

    let versions: Vec<VersionSpec> = cli.versions.iter().map(VersionSpec::new).collect();
    info!(
        address = %config.server_address,
        versions = ?cli.versions,
        "running compatibility matrix"
    );

    let runner = CompatRunner::new(
        config.clone(),
        template,
        Arc::new(CondaProvisioner::new(config.clone())),
        Arc::new(CliServerLifecycle::new(config.clone())),
        Arc::new(CliJobClient::new(config)),
        validator,
    );

    let report = runner.run_matrix(&versions).await;

    for entry in &report.entries {
        match &entry.outcome {
            IterationOutcome::Passed => {
                info!(version = %entry.version, duration_ms = entry.duration_ms, "PASS");
            }
            IterationOutcome::Failed { phase, reason } => {
                info!(
                    version = %entry.version,
                    phase = ?phase,
                    reason = %reason,
                    "FAIL"
                );
            }
        }
    }
    info!(
        passed = report.passed_count(),
        failed = report.failed_count(),
        "compatibility matrix finished"
    );

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_with_env_name_only() {
        let cli = Cli::try_parse_from(["jobcompat", "--tmp-env", "compat-ci"]).expect("parse");
        assert_eq!(cli.tmp_env, "compat-ci");
        assert_eq!(cli.versions, vec!["2.0.1".to_string()]);
        assert_eq!(cli.address, "http://127.0.0.1:8265");
        assert!(!cli.no_fail_fast);
    }

    #[test]
    fn test_cli_parses_version_list() {
        let cli = Cli::try_parse_from([
            "jobcompat",
            "--tmp-env",
            "compat-ci",
            "--versions",
            "2.0.1,2.1.0",
        ])
        .expect("parse");
        assert_eq!(cli.versions, vec!["2.0.1".to_string(), "2.1.0".to_string()]);
    }
}
