//! Command adapter: runs the hypervisor's control-plane executable.
//!
//! The adapter knows nothing about domains. It runs a program with an
//! argument list to completion, captures its output as text, and maps
//! spawn failures, non-zero exits and timeouts onto driver errors.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::{DriverError, Result};

/// Text captured from a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CapturedOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }
}

/// Something that can run an external program.
///
/// Implementations must only return `Ok` for a zero exit status.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait for it to finish.
    async fn run(&self, program: &Path, args: &[String]) -> Result<CapturedOutput>;
}

/// Runs programs as child processes with a timeout.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    /// Create a runner that kills programs running longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    #[instrument(skip(self, args), fields(program = %program.display(), function = args.first().map(String::as_str).unwrap_or("")))]
    async fn run(&self, program: &Path, args: &[String]) -> Result<CapturedOutput> {
        debug!(?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::ExternalCommandFailed {
                program: program.to_path_buf(),
                exit_code: None,
                detail: format!("failed to spawn: {}", e),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DriverError::ExternalCommandFailed {
                program: program.to_path_buf(),
                exit_code: None,
                detail: format!("failed to collect output: {}", e),
            })?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs_f64(), "Command timed out");
                return Err(DriverError::ExternalCommandTimeout {
                    program: program.to_path_buf(),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let detail = match (stderr.trim(), stdout.trim()) {
                ("", "") => match output.status.code() {
                    Some(_) => "no output".to_string(),
                    None => "terminated by signal".to_string(),
                },
                ("", out) => out.to_string(),
                (err, _) => err.to_string(),
            };
            warn!(exit_code = ?output.status.code(), detail = %detail, "Command failed");
            return Err(DriverError::ExternalCommandFailed {
                program: program.to_path_buf(),
                exit_code: output.status.code(),
                detail,
            });
        }

        debug!(bytes = stdout.len(), "Command completed");
        Ok(CapturedOutput {
            stdout,
            stderr,
            exit_code: 0,
        })
    }
}
