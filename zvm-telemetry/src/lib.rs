//! # zvm-telemetry
//!
//! Host inventory for the z/VM driver. The driver builds its capability
//! model from this data and passes node queries straight through to it.
//!
//! Two probes are provided:
//! - [`LinuxHostProbe`] reads `/sys`, `/proc` and `sysinfo` on the running host.
//! - [`FixedHostProbe`] returns canned values, for tests and `--dev` mode.

pub mod cpu;
pub mod fixed;
pub mod linux;
pub mod memory;
pub mod system;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub use cpu::CpuStats;
pub use fixed::FixedHostProbe;
pub use linux::LinuxHostProbe;
pub use memory::MemoryStats;
pub use system::{PowerMgmt, SysinfoEntry};

/// Errors raised while probing the host.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// A host file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A host file had unexpected content.
    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    /// The host architecture is not one we know how to describe.
    #[error("Unsupported host architecture: {0}")]
    UnsupportedArch(String),

    /// The requested data does not exist on this host.
    #[error("Not available: {0}")]
    Unavailable(String),
}

/// Result type alias for probe operations.
pub type Result<T> = std::result::Result<T, ProbeError>;

/// One NUMA cell of the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaCell {
    /// Cell number
    pub id: u32,
    /// Memory attached to the cell in KiB
    pub memory_kib: u64,
    /// Logical CPUs in the cell
    pub cpus: Vec<u32>,
}

/// One cache bank shared by a set of CPUs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBank {
    /// Bank id within its level
    pub id: u32,
    /// Cache level (1, 2, 3, ...)
    pub level: u32,
    /// "both", "data" or "instruction"
    pub cache_type: String,
    /// Size in KiB
    pub size_kib: u64,
    /// Logical CPUs sharing the bank
    pub cpus: Vec<u32>,
}

/// Summary of the host as reported by node-get-info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// CPU model (the architecture name)
    pub model: String,
    /// Total memory in KiB
    pub memory_kib: u64,
    /// Number of active logical CPUs
    pub cpus: u32,
    /// CPU frequency in MHz (0 if unknown)
    pub mhz: u32,
    /// NUMA nodes
    pub nodes: u32,
    /// Sockets per node
    pub sockets: u32,
    /// Cores per socket
    pub cores: u32,
    /// Threads per core
    pub threads: u32,
}

/// Source of host facts.
///
/// Every method is a fresh read of the host; callers cache what they need.
pub trait HostProbe: Send + Sync {
    /// Architecture name in libvirt spelling (e.g. "s390x", "x86_64").
    fn arch(&self) -> Result<String>;

    /// UUID identifying this host.
    fn host_uuid(&self) -> Result<Uuid>;

    /// NUMA cells of the host.
    fn numa_topology(&self) -> Result<Vec<NumaCell>>;

    /// Cache banks of the host.
    fn cache_topology(&self) -> Result<Vec<CacheBank>>;

    /// Supported suspend targets.
    fn power_management(&self) -> Result<PowerMgmt>;

    /// Machine identification entries (manufacturer, type, LPAR name, ...).
    fn system_info(&self) -> Result<Vec<SysinfoEntry>>;

    /// Host summary.
    fn node_info(&self) -> Result<NodeInfo>;

    /// Cumulative CPU times, for one CPU or the whole host.
    fn cpu_stats(&self, cpu: Option<u32>) -> Result<CpuStats>;

    /// Memory counters, for one NUMA cell or the whole host.
    fn memory_stats(&self, cell: Option<u32>) -> Result<MemoryStats>;

    /// Free memory in bytes for `max` cells starting at `start`.
    fn cells_free_memory(&self, start: u32, max: u32) -> Result<Vec<u64>>;

    /// Free memory of the whole host in bytes.
    fn free_memory(&self) -> Result<u64>;

    /// Online state of every present CPU, indexed by CPU number.
    fn cpu_map(&self) -> Result<Vec<bool>>;
}

/// Map Rust's target architecture name to the libvirt name.
pub fn arch_from_rust(arch: &str) -> Result<String> {
    let name = match arch {
        "s390x" => "s390x",
        "x86_64" => "x86_64",
        "x86" => "i686",
        "aarch64" => "aarch64",
        "arm" => "armv7l",
        "powerpc64" => "ppc64",
        "powerpc" => "ppc",
        "riscv64" => "riscv64",
        "mips64" => "mips64",
        other => return Err(ProbeError::UnsupportedArch(other.to_string())),
    };
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_names() {
        assert_eq!(arch_from_rust("s390x").unwrap(), "s390x");
        assert_eq!(arch_from_rust("powerpc64").unwrap(), "ppc64");
        assert_eq!(arch_from_rust("x86").unwrap(), "i686");
        assert!(matches!(
            arch_from_rust("wasm32"),
            Err(ProbeError::UnsupportedArch(a)) if a == "wasm32"
        ));
    }
}
