//! Configuration management for the node tool.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use zvm_driver::config::DEFAULT_CONFIG_DIR;
use zvm_driver::DriverConfig;

use crate::cli::Args;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zvm/node.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SMAPI backend selection
    pub backend: Backend,
    /// Driver settings
    pub driver: DriverConfig,
}

/// Where SMAPI calls and host facts come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Real `smcli` and the running host
    #[default]
    Smcli,
    /// Mock SMAPI and fixed host data for development
    Mock,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Defaults with CLI overrides applied.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref smcli) = args.smcli {
            self.driver.smcli_path = smcli.clone();
        }

        if args.dev {
            self.backend = Backend::Mock;
        }

        match args.config_dir {
            Some(ref dir) => self.driver.config_dir = dir.clone(),
            // The default directory needs root; keep dev artifacts in /tmp
            // unless the config file chose a directory.
            None if self.backend == Backend::Mock
                && self.driver.config_dir == Path::new(DEFAULT_CONFIG_DIR) =>
            {
                self.driver.config_dir = std::env::temp_dir().join("zvm-node-dev");
            }
            None => {}
        }

        self
    }
}
