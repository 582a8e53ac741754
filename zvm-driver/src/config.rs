//! Driver configuration.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the SMAPI command-line client.
pub const DEFAULT_SMCLI_PATH: &str = "/opt/zhcp/bin/smcli";

/// Default directory for native configuration artifacts.
pub const DEFAULT_CONFIG_DIR: &str = "/var/lib/zvm/directory";

/// Default maximum number of virtual CPUs per guest.
pub const DEFAULT_MAX_VCPUS: u32 = 64;

/// Settings for the z/VM driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Path to the SMAPI client executable
    pub smcli_path: PathBuf,
    /// SMAPI server target for host-level queries
    pub smapi_target: String,
    /// Timeout for every SMAPI invocation in seconds
    pub command_timeout_secs: u64,
    /// Directory where directory entries are written before hand-off
    pub config_dir: PathBuf,
    /// Maximum virtual CPUs per guest
    pub max_vcpus: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            smcli_path: PathBuf::from(DEFAULT_SMCLI_PATH),
            smapi_target: "zhcp".to_string(),
            command_timeout_secs: 120,
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            max_vcpus: DEFAULT_MAX_VCPUS,
        }
    }
}

impl DriverConfig {
    /// Command timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Use a different artifact directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }
}
