//! Environment provisioning via the conda CLI.
//!
//! An iteration runs the server from an isolated environment pinned to the
//! version under test, then switches the client side back to the host
//! toolchain. Which toolchain is "active" is carried as an explicit
//! [`EnvironmentContext`] value handed to whoever spawns processes; nothing
//! here mutates shell state or process-wide environment variables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{HarnessConfig, VersionSpec};
use crate::error::HarnessError;
use crate::exec::run_capture;
use crate::Result;

/// Which toolchain subsequent process invocations run under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvironmentContext {
    /// The host toolchain — the "current" client version.
    Host,
    /// A named isolated environment.
    Isolated { name: String },
}

impl EnvironmentContext {
    /// Build a command that runs `program` under this context.
    ///
    /// Under [`Isolated`](Self::Isolated) the program is wrapped in
    /// `conda run -n <name>`, so it resolves against the environment's
    /// toolchain instead of the host's.
    pub fn command(&self, conda_bin: &str, program: &str) -> Command {
        match self {
            EnvironmentContext::Host => Command::new(program),
            EnvironmentContext::Isolated { name } => {
                let mut cmd = Command::new(conda_bin);
                cmd.args(["run", "-n", name, program]);
                cmd
            }
        }
    }
}

/// Activation state of a provisioned environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Inactive,
    Active,
}

/// A provisioned, named isolated environment.
///
/// At most one live handle exists per name: creation removes any stale
/// environment of the same name left behind by an interrupted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Environment name, derived from the configured temp-env name.
    pub name: String,

    /// Toolchain version the environment is pinned to.
    pub toolchain_version: VersionSpec,

    /// Whether this environment is the active context.
    pub state: ActivationState,
}

/// Trait for environment-manager backends.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Best-effort removal of an existing environment. A missing environment
    /// is not an error; this guards against stale state from interrupted runs.
    async fn remove_if_exists(&self, name: &str) -> Result<()>;

    /// Create an environment pinned to the configured interpreter and install
    /// the package set: the toolchain at `version` plus the extra pins.
    async fn create(&self, name: &str, version: &VersionSpec) -> Result<EnvironmentHandle>;

    /// Make `name` the active context for subsequent invocations.
    async fn activate(&self, name: &str) -> Result<EnvironmentContext>;

    /// Return to the host toolchain, simulating a client on a different
    /// version than the running server.
    async fn deactivate(&self) -> Result<EnvironmentContext>;

    /// Force-remove the environment. Idempotent; called unconditionally
    /// during cleanup.
    async fn destroy(&self, name: &str) -> Result<()>;
}

/// Provisioner backed by the `conda` CLI.
pub struct CondaProvisioner {
    config: HarnessConfig,
}

impl CondaProvisioner {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    fn conda(&self) -> Command {
        Command::new(&self.config.conda_bin)
    }

    async fn remove_env(&self, name: &str) -> Result<crate::exec::CapturedOutput> {
        let mut cmd = self.conda();
        cmd.args(["env", "remove", "-y", "-n", name]);
        Ok(run_capture(cmd).await?)
    }
}

#[async_trait]
impl EnvironmentProvisioner for CondaProvisioner {
    async fn remove_if_exists(&self, name: &str) -> Result<()> {
        let out = self.remove_env(name).await?;
        if !out.success {
            // Usually "environment does not exist" — fine either way.
            debug!(env = %name, detail = %out.failure_summary(), "stale-env removal was a no-op");
        }
        Ok(())
    }

    async fn create(&self, name: &str, version: &VersionSpec) -> Result<EnvironmentHandle> {
        info!(env = %name, version = %version, "creating environment");

        let mut cmd = self.conda();
        cmd.args(["create", "-y", "-n", name]);
        cmd.arg(format!("python={}", self.config.interpreter_version));
        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::Provision(format!(
                "conda create '{}': {}",
                name,
                out.failure_summary()
            )));
        }

        let mut specs = vec![format!("{}=={}", self.config.packages.toolchain, version)];
        specs.extend(self.config.packages.extra_pins.iter().cloned());
        info!(env = %name, packages = ?specs, "installing pinned packages");

        let mut cmd = self.conda();
        cmd.args(["run", "-n", name, "pip", "install"]);
        cmd.args(&specs);
        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::Provision(format!(
                "pip install {:?} in '{}': {}",
                specs,
                name,
                out.failure_summary()
            )));
        }

        Ok(EnvironmentHandle {
            name: name.to_string(),
            toolchain_version: version.clone(),
            state: ActivationState::Inactive,
        })
    }

    async fn activate(&self, name: &str) -> Result<EnvironmentContext> {
        let mut cmd = self.conda();
        cmd.args(["env", "list", "--json"]);
        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::Provision(format!(
                "conda env list: {}",
                out.failure_summary()
            )));
        }

        let names = env_names_from_json(&out.stdout)
            .map_err(|e| HarnessError::Provision(format!("conda env list output: {}", e)))?;
        if !names.iter().any(|n| n == name) {
            return Err(HarnessError::Provision(format!(
                "cannot activate '{}': environment not found",
                name
            )));
        }

        debug!(env = %name, "environment activated");
        Ok(EnvironmentContext::Isolated {
            name: name.to_string(),
        })
    }

    async fn deactivate(&self) -> Result<EnvironmentContext> {
        debug!("returning to host toolchain");
        Ok(EnvironmentContext::Host)
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        info!(env = %name, "destroying environment");
        let out = self.remove_env(name).await?;
        if !out.success {
            // Already gone counts as destroyed.
            debug!(env = %name, detail = %out.failure_summary(), "destroy was a no-op");
        }
        Ok(())
    }
}

/// Parse environment names out of `conda env list --json` output.
fn env_names_from_json(json: &str) -> std::result::Result<Vec<String>, serde_json::Error> {
    #[derive(Deserialize)]
    struct EnvList {
        envs: Vec<String>,
    }

    let list: EnvList = serde_json::from_str(json)?;
    Ok(list
        .envs
        .iter()
        .filter_map(|path| {
            std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_context_runs_program_directly() {
        let cmd = EnvironmentContext::Host.command("conda", "jobd");
        assert_eq!(cmd.as_std().get_program(), "jobd");
        assert_eq!(cmd.as_std().get_args().count(), 0);
    }

    #[test]
    fn test_isolated_context_wraps_in_conda_run() {
        let ctx = EnvironmentContext::Isolated {
            name: "compat-env".to_string(),
        };
        let cmd = ctx.command("conda", "jobd");
        assert_eq!(cmd.as_std().get_program(), "conda");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["run", "-n", "compat-env", "jobd"]);
    }

    #[test]
    fn test_env_names_from_json() {
        let json = r#"{"envs": ["/opt/conda", "/opt/conda/envs/compat-env", "/opt/conda/envs/other"]}"#;
        let names = env_names_from_json(json).expect("parse");
        assert!(names.contains(&"compat-env".to_string()));
        assert!(names.contains(&"other".to_string()));
    }

    #[test]
    fn test_env_names_rejects_malformed_json() {
        assert!(env_names_from_json("not json").is_err());
    }

    #[test]
    fn test_context_serde_roundtrip() {
        let ctx = EnvironmentContext::Isolated {
            name: "e1".to_string(),
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let back: EnvironmentContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, back);
    }
}
