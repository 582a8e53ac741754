//! Driver capability-set trait.

use async_trait::async_trait;
use uuid::Uuid;
use zvm_telemetry::{CpuStats, MemoryStats, NodeInfo};

use crate::error::Result;
use crate::types::*;

/// Operations a hypervisor driver exposes to the management framework.
///
/// The framework registers an implementation and routes every client call
/// through it. Implementations are shared between callers, so every method
/// takes `&self` and must be safe to call concurrently.
#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Driver type name (e.g. "ZVM").
    async fn connect_get_type(&self) -> Result<String>;

    /// Host name of the machine running the driver.
    async fn connect_get_hostname(&self) -> Result<String>;

    /// Hypervisor version as `major * 1_000_000 + minor * 1_000 + micro`.
    ///
    /// Probed on first use and cached afterwards.
    async fn connect_get_version(&self) -> Result<u64>;

    /// Maximum virtual CPUs for a domain type (`None` for the driver's own).
    async fn connect_get_max_vcpus(&self, virt_type: Option<&str>) -> Result<u32>;

    /// Serialized capability document.
    async fn connect_get_capabilities(&self) -> Result<String>;

    /// Serialized host sysinfo document.
    async fn connect_get_sysinfo(&self) -> Result<String>;

    // =========================================================================
    // Node
    // =========================================================================

    async fn node_get_info(&self) -> Result<NodeInfo>;

    async fn node_get_cpu_stats(&self, cpu: Option<u32>) -> Result<CpuStats>;

    async fn node_get_memory_stats(&self, cell: Option<u32>) -> Result<MemoryStats>;

    /// Free memory in bytes for up to `max` cells starting at `start`.
    async fn node_get_cells_free_memory(&self, start: u32, max: u32) -> Result<Vec<u64>>;

    /// Free memory of the host in bytes.
    async fn node_get_free_memory(&self) -> Result<u64>;

    async fn node_get_cpu_map(&self) -> Result<Vec<bool>>;

    // =========================================================================
    // Domain Lifecycle
    // =========================================================================

    /// Create and start a transient domain.
    async fn domain_create(&self, desc: DomainDescription) -> Result<DomainRef>;

    /// Define (or redefine) a persistent domain without starting it.
    async fn domain_define(&self, desc: DomainDescription) -> Result<DomainRef>;

    /// Start a defined or shut off domain.
    async fn domain_start(&self, domain: &DomainRef) -> Result<DomainRef>;

    /// Remove a domain that is not running.
    async fn domain_undefine(&self, domain: &DomainRef) -> Result<()>;

    /// Reconcile the registered state with the hypervisor.
    async fn domain_sync_state(&self, domain: &DomainRef) -> Result<DomainState>;

    // =========================================================================
    // Domain Lookup
    // =========================================================================

    async fn domain_lookup_by_name(&self, name: &str) -> Result<DomainRef>;

    async fn domain_lookup_by_uuid(&self, uuid: &Uuid) -> Result<DomainRef>;

    /// Look up a running domain by numeric id.
    async fn domain_lookup_by_id(&self, id: i32) -> Result<DomainRef>;

    async fn domain_get_info(&self, domain: &DomainRef) -> Result<DomainInfo>;

    /// All domains, or only running ones.
    async fn list_domains(&self, active_only: bool) -> Result<Vec<DomainRef>>;

    async fn num_of_domains(&self, active_only: bool) -> Result<usize>;
}
