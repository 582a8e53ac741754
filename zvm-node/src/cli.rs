//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// z/VM node tool - drives the z/VM hypervisor driver
#[derive(Parser, Debug)]
#[command(name = "zvm-node")]
#[command(about = "z/VM node tool - drives the z/VM hypervisor driver")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Enable development mode (mock SMAPI and fixed host data)
    #[arg(long)]
    pub dev: bool,

    /// Path to the SMAPI command-line client
    #[arg(long, env = "ZVM_SMCLI")]
    pub smcli: Option<PathBuf>,

    /// Directory for directory entry artifacts
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Connection URI (defaults to zvm:///system)
    #[arg(long)]
    pub uri: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// One-shot operation against the driver.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Driver type, hostname, hypervisor version and domain counts
    Info,
    /// Print the capabilities document
    Capabilities,
    /// Print the host sysinfo document
    Sysinfo,
    /// Host CPU and memory summary
    NodeInfo,
    /// Create and start a transient domain from a YAML description
    Create {
        /// Domain description file
        description: PathBuf,
    },
    /// Define a persistent domain from a YAML description
    Define {
        /// Domain description file
        description: PathBuf,
    },
}
