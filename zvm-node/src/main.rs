//! # zvm-node
//!
//! Process entry point for the z/VM driver. It owns the driver lifecycle:
//! initializes the driver, opens a connection, runs one command, and
//! cleans up.
//!
//! ## Usage
//! ```bash
//! zvm-node --config /etc/zvm/node.yaml info
//! zvm-node --dev create linux01.yaml
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use zvm_driver::{
    AllowAll, ClientIdentity, CommandRunner, MockSmcli, OpenOutcome, SystemCommandRunner,
    ZvmStateDriver,
};
use zvm_telemetry::{FixedHostProbe, HostProbe, LinuxHostProbe};

mod cli;
mod commands;
mod config;

use cli::Args;
use config::{Backend, Config, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    if args.log_json {
        zvm_common::init_logging_json(&args.log_level)?;
    } else {
        zvm_common::init_logging(&args.log_level, zvm_common::LogFormat::Pretty)?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting zvm-node");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => match Config::load(config_path) {
            Ok(cfg) => {
                info!(config_path = %config_path, "Configuration loaded");
                cfg.with_cli_overrides(&args)
            }
            Err(e) => {
                error!(error = %e, path = %config_path, "Failed to load configuration");
                return Err(e);
            }
        },
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => {
                info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                cfg.with_cli_overrides(&args)
            }
            Err(_) => {
                info!("No config file found, using CLI arguments and defaults");
                Config::default_with_cli(&args)
            }
        },
    };

    info!(
        backend = ?config.backend,
        smcli = %config.driver.smcli_path.display(),
        config_dir = %config.driver.config_dir.display(),
        "Node configured"
    );

    let probe: Arc<dyn HostProbe> = match config.backend {
        Backend::Mock => Arc::new(FixedHostProbe::s390x()),
        Backend::Smcli => Arc::new(LinuxHostProbe::new()),
    };
    let runner: Arc<dyn CommandRunner> = match config.backend {
        Backend::Mock => Arc::new(MockSmcli::new()),
        Backend::Smcli => Arc::new(SystemCommandRunner::new(config.driver.command_timeout())),
    };
    // The mock needs no privileges; real SMAPI management does.
    let privileged = config.backend == Backend::Mock || is_root();

    let state = ZvmStateDriver::new(Arc::new(AllowAll));
    state
        .initialize(privileged, config.driver.clone(), probe, runner)
        .context("Failed to initialize z/VM driver")?;

    if !state.is_active() {
        warn!("z/VM driver is inactive; run as root to manage guests");
        return Ok(());
    }

    let identity = ClientIdentity::new(std::env::var("USER").unwrap_or_else(|_| "root".to_string()));
    let conn = match state.open(args.uri.as_deref(), &identity)? {
        OpenOutcome::Opened(conn) => conn,
        OpenOutcome::Declined => bail!("URI is not handled by the z/VM driver"),
    };

    let result = commands::run(&conn, &args.command).await;
    conn.close();
    state.cleanup()?;

    println!("{}", result?);
    Ok(())
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}
