//! Job-server lifecycle control.
//!
//! The server runs detached from the harness, bound to the fixed address from
//! [`HarnessConfig`](crate::config::HarnessConfig). Which toolchain version it
//! runs is decided by the [`EnvironmentContext`] it is started under.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::env::EnvironmentContext;
use crate::error::HarnessError;
use crate::exec::run_capture;
use crate::Result;

/// Trait for server lifecycle backends.
#[async_trait]
pub trait ServerLifecycle: Send + Sync {
    /// Stop any server instance bound to the well-known address. Idempotent
    /// and safe when nothing is running; always invoked before [`start`]
    /// (stale-process port conflicts) and again during cleanup.
    ///
    /// [`start`]: Self::start
    async fn stop_force(&self, ctx: &EnvironmentContext) -> Result<()>;

    /// Launch the server detached, bound to the fixed address, using the
    /// toolchain active in `ctx`. This establishes the server version for
    /// the iteration.
    async fn start(&self, ctx: &EnvironmentContext) -> Result<()>;
}

/// Server lifecycle backed by the toolchain CLI (`<cli> start` / `<cli> stop`).
pub struct CliServerLifecycle {
    config: HarnessConfig,
}

impl CliServerLifecycle {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServerLifecycle for CliServerLifecycle {
    async fn stop_force(&self, ctx: &EnvironmentContext) -> Result<()> {
        let mut cmd = ctx.command(&self.config.conda_bin, &self.config.cli_bin);
        cmd.args(["stop", "--force"]);
        let out = run_capture(cmd).await?;
        if !out.success {
            // No running server to stop is the common case here.
            debug!(detail = %out.failure_summary(), "force-stop was a no-op");
        }
        Ok(())
    }

    async fn start(&self, ctx: &EnvironmentContext) -> Result<()> {
        info!(address = %self.config.server_address, ctx = ?ctx, "starting job server");

        let mut cmd = ctx.command(&self.config.conda_bin, &self.config.cli_bin);
        cmd.args(["start", "--head"]);
        cmd.arg(format!("--port={}", self.config.server_port()));
        let out = run_capture(cmd).await?;
        if !out.success {
            return Err(HarnessError::ServerStart(out.failure_summary()));
        }

        info!(address = %self.config.server_address, "job server running");
        Ok(())
    }
}
