//! Error types for the z/VM driver.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::types::DomainState;

/// Errors that can occur during driver operations.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The domain description is malformed or cannot be expressed natively.
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// The description targets another virtualization type.
    #[error("Expecting virt type to be '{expected}' but found '{found}'")]
    WrongDriverType { expected: String, found: String },

    /// A domain with the same name or UUID is already registered.
    #[error("Domain already exists: {0}")]
    DuplicateIdentity(String),

    /// The domain is not (or no longer) registered.
    #[error("Domain not found: {0}")]
    NotFound(String),

    /// The domain's current state does not allow the requested transition.
    #[error("Domain '{name}' is {state}, cannot {action}")]
    InvalidStateTransition {
        name: String,
        state: DomainState,
        action: &'static str,
    },

    /// Another transition of the same domain is still in flight.
    #[error("Domain '{0}' has another operation in progress")]
    DomainBusy(String),

    /// The external program could not be spawned or exited non-zero.
    #[error("{} failed{}: {detail}", .program.display(), .exit_code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    ExternalCommandFailed {
        program: PathBuf,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The external program did not finish in time; its effect is unknown.
    #[error("{} timed out after {}s, outcome unknown", .program.display(), .timeout.as_secs_f64())]
    ExternalCommandTimeout { program: PathBuf, timeout: Duration },

    /// Command output did not have the expected shape.
    #[error("Unexpected output format: {0}")]
    UnexpectedOutputFormat(String),

    /// The version string after the expected prefix is not a dotted version.
    #[error("Cannot parse version '{0}'")]
    VersionParseFailed(String),

    /// The capability model could not be built.
    #[error("Failed to build capabilities: {0}")]
    CapabilityBuildFailed(String),

    /// The caller is not allowed to perform the operation.
    #[error("Access denied: {0}")]
    PermissionDenied(String),

    /// The connection target names this driver, but it is not running.
    #[error("z/VM state driver is not active")]
    DriverInactive,

    /// The registry and the hypervisor disagree and rollback did not fix it.
    #[error("Domain '{name}' diverged from the hypervisor: {detail}")]
    StateDiverged { name: String, detail: String },

    /// A host inventory query failed.
    #[error("Host probe failed: {0}")]
    Probe(#[from] zvm_telemetry::ProbeError),

    /// Reading or writing a native configuration artifact failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Shorthand for a domain lookup miss by UUID.
    pub fn uuid_not_found(uuid: &Uuid) -> Self {
        Self::NotFound(format!("no domain with matching uuid '{}'", uuid))
    }

    /// True for errors after which the hypervisor side effect is unknown.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::ExternalCommandTimeout { .. })
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
