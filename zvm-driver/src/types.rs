//! Type definitions for domain descriptions, references and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// DOMAIN DESCRIPTION
// =============================================================================

/// Virtualization type a domain description is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtType {
    Zvm,
    Kvm,
    Qemu,
    Xen,
    Lxc,
    Vmware,
    Hyperv,
}

impl VirtType {
    /// Get the type name as used in domain descriptions.
    pub fn as_str(&self) -> &'static str {
        match self {
            VirtType::Zvm => "zvm",
            VirtType::Kvm => "kvm",
            VirtType::Qemu => "qemu",
            VirtType::Xen => "xen",
            VirtType::Lxc => "lxc",
            VirtType::Vmware => "vmware",
            VirtType::Hyperv => "hyperv",
        }
    }
}

impl fmt::Display for VirtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured, machine-independent description of a domain.
///
/// Produced by the external description parser; the driver only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDescription {
    /// Domain name; becomes the z/VM user ID (upper-cased)
    pub name: String,
    /// Unique identifier
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    /// Virtualization type the description targets
    #[serde(rename = "type")]
    pub virt_type: VirtType,
    /// Initial storage in MiB
    pub memory_mib: u64,
    /// Maximum storage in MiB (defaults to `memory_mib`)
    #[serde(default)]
    pub max_memory_mib: Option<u64>,
    /// Virtual CPUs
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    /// CP privilege classes (the resource class of the guest)
    #[serde(default = "default_privilege_classes")]
    pub privilege_classes: String,
    /// Logon password (defaults to AUTOONLY)
    #[serde(default)]
    pub password: Option<String>,
    /// Directory profile to include
    #[serde(default)]
    pub profile: Option<String>,
    /// Device or system to IPL at logon
    #[serde(default)]
    pub ipl: Option<String>,
}

fn default_vcpus() -> u32 {
    1
}

fn default_privilege_classes() -> String {
    "G".to_string()
}

impl DomainDescription {
    /// Create a z/VM domain description with default values.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            virt_type: VirtType::Zvm,
            memory_mib: 512,
            max_memory_mib: None,
            vcpus: default_vcpus(),
            privilege_classes: default_privilege_classes(),
            password: None,
            profile: None,
            ipl: None,
        }
    }

    /// Set the UUID.
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Set the virtualization type.
    pub fn with_virt_type(mut self, virt_type: VirtType) -> Self {
        self.virt_type = virt_type;
        self
    }

    /// Set the initial storage in MiB.
    pub fn with_memory(mut self, mib: u64) -> Self {
        self.memory_mib = mib;
        self
    }

    /// Set the maximum storage in MiB.
    pub fn with_max_memory(mut self, mib: u64) -> Self {
        self.max_memory_mib = Some(mib);
        self
    }

    /// Set the number of virtual CPUs.
    pub fn with_vcpus(mut self, vcpus: u32) -> Self {
        self.vcpus = vcpus;
        self
    }

    /// Set the privilege classes.
    pub fn with_privilege_classes(mut self, classes: impl Into<String>) -> Self {
        self.privilege_classes = classes.into();
        self
    }

    /// Set the logon password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Include a directory profile.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// IPL a device or named system at logon.
    pub fn with_ipl(mut self, ipl: impl Into<String>) -> Self {
        self.ipl = Some(ipl.into());
        self
    }

    /// Maximum storage, falling back to the initial storage.
    pub fn effective_max_memory_mib(&self) -> u64 {
        self.max_memory_mib.unwrap_or(self.memory_mib)
    }

    /// The z/VM user ID for this domain.
    pub fn userid(&self) -> String {
        self.name.to_ascii_uppercase()
    }
}

// =============================================================================
// DOMAIN STATUS
// =============================================================================

/// Lifecycle state of a registered domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    /// Registered, not running
    Defined,
    /// Logged on
    Running,
    /// Was running, now logged off
    Shutoff,
}

impl DomainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainState::Defined => "defined",
            DomainState::Running => "running",
            DomainState::Shutoff => "shutoff",
        }
    }

    /// True if `start` may be attempted from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, DomainState::Defined | DomainState::Shutoff)
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRef {
    /// Domain name
    pub name: String,
    /// Domain UUID
    pub uuid: Uuid,
    /// Numeric id, -1 unless running
    pub id: i32,
}

/// Detailed domain status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Domain name
    pub name: String,
    /// Domain UUID
    pub uuid: Uuid,
    /// Numeric id, -1 unless running
    pub id: i32,
    /// Current lifecycle state
    pub state: DomainState,
    /// Survives a failed start and must be undefined explicitly
    pub persistent: bool,
    /// Initial storage in MiB
    pub memory_mib: u64,
    /// Maximum storage in MiB
    pub max_memory_mib: u64,
    /// Virtual CPUs
    pub vcpus: u32,
    /// When the domain last entered `Running`
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_defaults() {
        let json = r#"{"name": "linux01", "type": "zvm", "memory_mib": 1024}"#;
        let desc: DomainDescription = serde_json::from_str(json).unwrap();
        assert_eq!(desc.vcpus, 1);
        assert_eq!(desc.privilege_classes, "G");
        assert_eq!(desc.effective_max_memory_mib(), 1024);
        assert!(!desc.uuid.is_nil());
        assert_eq!(desc.userid(), "LINUX01");
    }

    #[test]
    fn test_state_transitions_allowed() {
        assert!(DomainState::Defined.can_start());
        assert!(DomainState::Shutoff.can_start());
        assert!(!DomainState::Running.can_start());
        assert_eq!(DomainState::Shutoff.to_string(), "shutoff");
    }

    #[test]
    fn test_virt_type_names() {
        assert_eq!(VirtType::Zvm.to_string(), "zvm");
        let t: VirtType = serde_json::from_str("\"kvm\"").unwrap();
        assert_eq!(t, VirtType::Kvm);
    }
}
