//! Harness configuration.
//!
//! Every component receives an explicit [`HarnessConfig`] at construction.
//! The harness keeps no ambient process-global state: the server address and
//! the temp-environment name live here, not in environment variables.

use serde::{Deserialize, Serialize};

/// Opaque version identifier for the toolchain under test.
///
/// One per compatibility-matrix entry; the other axis of the matrix (the
/// client) is fixed to the host toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionSpec(String);

impl VersionSpec {
    pub fn new(version: impl Into<String>) -> Self {
        VersionSpec(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Packages installed into each provisioned environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageSet {
    /// Toolchain distribution name on the package index.
    pub toolchain: String,

    /// Extra pinned packages installed alongside the toolchain.
    pub extra_pins: Vec<String>,
}

impl Default for PackageSet {
    fn default() -> Self {
        Self {
            toolchain: "jobd".to_string(),
            // pydantic 2.x changed serialization in a way older servers reject
            extra_pins: vec!["pydantic<2".to_string()],
        }
    }
}

/// Configuration for one harness run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    /// Base name for the temporary environment. Reused between runs, so
    /// provisioning always removes a stale environment of this name first.
    pub tmp_env_name: String,

    /// Interpreter version the environment is pinned to.
    pub interpreter_version: String,

    /// Packages installed into each provisioned environment.
    pub packages: PackageSet,

    /// Environment-manager binary.
    pub conda_bin: String,

    /// Toolchain CLI binary (server control and job commands).
    pub cli_bin: String,

    /// Fixed server address, `http://<host>:<port>`.
    pub server_address: String,

    /// Wall-clock budget for the whole status-poll loop, in seconds.
    pub poll_timeout_secs: u64,

    /// Delay between status queries, in seconds.
    pub poll_interval_secs: u64,

    /// Stop the matrix at the first failed iteration.
    pub fail_fast: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            tmp_env_name: "jobcompat-tmp".to_string(),
            interpreter_version: "3.9".to_string(),
            packages: PackageSet::default(),
            conda_bin: "conda".to_string(),
            cli_bin: "jobd".to_string(),
            server_address: "http://127.0.0.1:8265".to_string(),
            poll_timeout_secs: 120,
            poll_interval_secs: 2,
            fail_fast: true,
        }
    }
}

impl HarnessConfig {
    /// Port component of [`server_address`](Self::server_address), falling
    /// back to 8265 when the address has no parseable port.
    pub fn server_port(&self) -> u16 {
        self.server_address
            .rsplit(':')
            .next()
            .and_then(|p| p.trim_end_matches('/').parse().ok())
            .unwrap_or(8265)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HarnessConfig::default();
        assert_eq!(config.server_address, "http://127.0.0.1:8265");
        assert_eq!(config.poll_timeout_secs, 120);
        assert!(config.fail_fast);
        assert_eq!(config.packages.toolchain, "jobd");
    }

    #[test]
    fn test_server_port_parses_from_address() {
        let config = HarnessConfig {
            server_address: "http://10.0.0.5:9400".to_string(),
            ..Default::default()
        };
        assert_eq!(config.server_port(), 9400);
    }

    #[test]
    fn test_server_port_falls_back_on_garbage() {
        let config = HarnessConfig {
            server_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert_eq!(config.server_port(), 8265);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = HarnessConfig {
            tmp_env_name: "compat-ci".to_string(),
            poll_timeout_secs: 30,
            fail_fast: false,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        let back: HarnessConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }

    #[test]
    fn test_version_spec_display() {
        let v = VersionSpec::new("2.0.1");
        assert_eq!(format!("{}", v), "2.0.1");
        assert_eq!(v.as_str(), "2.0.1");
    }
}
