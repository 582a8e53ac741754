//! Access control seam.
//!
//! Every connection operation asks an [`AccessCheck`] before touching the
//! driver. The policy itself belongs to whoever embeds the driver.

use serde::{Deserialize, Serialize};

/// Operation classes subject to access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Open a connection
    ConnectOpen,
    /// Read host and driver information
    ConnectRead,
    /// Look up and inspect domains
    DomainRead,
    /// Define or redefine domains, reconcile their state
    DomainWrite,
    /// Start domains
    DomainStart,
    /// Undefine domains
    DomainDelete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ConnectOpen => "connect:open",
            Permission::ConnectRead => "connect:read",
            Permission::DomainRead => "domain:read",
            Permission::DomainWrite => "domain:write",
            Permission::DomainStart => "domain:start",
            Permission::DomainDelete => "domain:delete",
        }
    }

    /// True for permissions that never change driver or hypervisor state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Permission::ConnectOpen | Permission::ConnectRead | Permission::DomainRead
        )
    }
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// User name of the caller
    pub user: String,
    /// The connection was opened read-only
    pub read_only: bool,
}

impl ClientIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into(), read_only: false }
    }

    pub fn read_only(user: impl Into<String>) -> Self {
        Self { user: user.into(), read_only: true }
    }
}

/// Allow/deny decision for each privileged operation.
pub trait AccessCheck: Send + Sync {
    fn check(&self, identity: &ClientIdentity, permission: Permission) -> bool;
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessCheck for AllowAll {
    fn check(&self, _identity: &ClientIdentity, _permission: Permission) -> bool {
        true
    }
}

/// Read-only identities may open connections and read, nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyPolicy;

impl AccessCheck for ReadOnlyPolicy {
    fn check(&self, identity: &ClientIdentity, permission: Permission) -> bool {
        !identity.read_only || permission.is_read_only()
    }
}
