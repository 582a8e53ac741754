//! Host probe returning canned values.
//!
//! Used by the driver's tests and by the node binary in `--dev` mode, where
//! there is no z/VM host to inspect. Each facet can be switched off to
//! simulate a probe failure.

use uuid::Uuid;

use crate::cpu::CpuStats;
use crate::memory::MemoryStats;
use crate::system::{PowerMgmt, SysinfoEntry};
use crate::{CacheBank, HostProbe, NodeInfo, NumaCell, ProbeError, Result};

/// Probe with fixed answers. `None` fields report [`ProbeError::Unavailable`].
#[derive(Debug, Clone)]
pub struct FixedHostProbe {
    pub arch: Option<String>,
    pub host_uuid: Option<Uuid>,
    pub numa: Option<Vec<NumaCell>>,
    pub caches: Option<Vec<CacheBank>>,
    pub power: Option<PowerMgmt>,
    pub sysinfo: Option<Vec<SysinfoEntry>>,
    pub free_kib_per_cell: Vec<u64>,
    pub online_cpus: Vec<bool>,
}

impl FixedHostProbe {
    /// A two-cell s390x host with four CPUs and 4 GiB of memory.
    pub fn s390x() -> Self {
        Self {
            arch: Some("s390x".to_string()),
            host_uuid: Some(Uuid::from_u128(0x1f2e3d4c_5b6a_4978_8695_a4b3c2d1e0f9)),
            numa: Some(vec![
                NumaCell { id: 0, memory_kib: 2 * 1024 * 1024, cpus: vec![0, 1] },
                NumaCell { id: 1, memory_kib: 2 * 1024 * 1024, cpus: vec![2, 3] },
            ]),
            caches: Some(vec![CacheBank {
                id: 0,
                level: 3,
                cache_type: "both".to_string(),
                size_kib: 256 * 1024,
                cpus: vec![0, 1, 2, 3],
            }]),
            power: Some(PowerMgmt::default()),
            sysinfo: Some(vec![
                SysinfoEntry { name: "Manufacturer".to_string(), value: "IBM".to_string() },
                SysinfoEntry { name: "Type".to_string(), value: "8561".to_string() },
                SysinfoEntry { name: "VM00 Name".to_string(), value: "ZVMDEV".to_string() },
            ]),
            free_kib_per_cell: vec![1024 * 1024, 512 * 1024],
            online_cpus: vec![true, true, true, true],
        }
    }

    /// Drop the architecture, which makes capability building fail.
    pub fn without_arch(mut self) -> Self {
        self.arch = None;
        self
    }

    /// Drop the NUMA topology.
    pub fn without_numa(mut self) -> Self {
        self.numa = None;
        self
    }

    /// Drop the cache topology.
    pub fn without_caches(mut self) -> Self {
        self.caches = None;
        self
    }

    /// Drop power management data.
    pub fn without_power_management(mut self) -> Self {
        self.power = None;
        self
    }

    fn unavailable<T>(what: &str) -> Result<T> {
        Err(ProbeError::Unavailable(what.to_string()))
    }

    fn total_kib(&self) -> u64 {
        self.numa.as_ref()
            .map(|cells| cells.iter().map(|c| c.memory_kib).sum())
            .unwrap_or(4 * 1024 * 1024)
    }
}

impl Default for FixedHostProbe {
    fn default() -> Self {
        Self::s390x()
    }
}

impl HostProbe for FixedHostProbe {
    fn arch(&self) -> Result<String> {
        self.arch.clone().map_or_else(|| Self::unavailable("architecture"), Ok)
    }

    fn host_uuid(&self) -> Result<Uuid> {
        self.host_uuid.map_or_else(|| Self::unavailable("host uuid"), Ok)
    }

    fn numa_topology(&self) -> Result<Vec<NumaCell>> {
        self.numa.clone().map_or_else(|| Self::unavailable("NUMA topology"), Ok)
    }

    fn cache_topology(&self) -> Result<Vec<CacheBank>> {
        self.caches.clone().map_or_else(|| Self::unavailable("cache topology"), Ok)
    }

    fn power_management(&self) -> Result<PowerMgmt> {
        self.power.map_or_else(|| Self::unavailable("power management"), Ok)
    }

    fn system_info(&self) -> Result<Vec<SysinfoEntry>> {
        self.sysinfo.clone().map_or_else(|| Self::unavailable("sysinfo"), Ok)
    }

    fn node_info(&self) -> Result<NodeInfo> {
        let cpus = self.online_cpus.iter().filter(|c| **c).count() as u32;
        Ok(NodeInfo {
            model: self.arch()?,
            memory_kib: self.total_kib(),
            cpus,
            mhz: 5200,
            nodes: self.numa.as_ref().map(|c| c.len() as u32).unwrap_or(1).max(1),
            sockets: 1,
            cores: (cpus / 2).max(1),
            threads: 1,
        })
    }

    fn cpu_stats(&self, cpu: Option<u32>) -> Result<CpuStats> {
        if let Some(n) = cpu {
            if n as usize >= self.online_cpus.len() {
                return Self::unavailable(&format!("cpu {}", n));
            }
        }
        Ok(CpuStats {
            kernel_ns: 1_000_000,
            user_ns: 4_000_000,
            idle_ns: 95_000_000,
            iowait_ns: 0,
        })
    }

    fn memory_stats(&self, cell: Option<u32>) -> Result<MemoryStats> {
        match cell {
            None => Ok(MemoryStats {
                total_kib: self.total_kib(),
                free_kib: self.free_kib_per_cell.iter().sum(),
                buffers_kib: 0,
                cached_kib: 0,
            }),
            Some(n) => {
                let total = self.numa.as_ref()
                    .and_then(|cells| cells.iter().find(|c| c.id == n))
                    .map(|c| c.memory_kib);
                let free = self.free_kib_per_cell.get(n as usize).copied();
                match (total, free) {
                    (Some(total_kib), Some(free_kib)) => Ok(MemoryStats {
                        total_kib,
                        free_kib,
                        buffers_kib: 0,
                        cached_kib: 0,
                    }),
                    _ => Self::unavailable(&format!("NUMA cell {}", n)),
                }
            }
        }
    }

    fn cells_free_memory(&self, start: u32, max: u32) -> Result<Vec<u64>> {
        (start..start.saturating_add(max))
            .map(|cell| {
                self.free_kib_per_cell.get(cell as usize)
                    .map(|kib| kib * 1024)
                    .ok_or_else(|| ProbeError::Unavailable(format!("NUMA cell {}", cell)))
            })
            .collect()
    }

    fn free_memory(&self) -> Result<u64> {
        Ok(self.free_kib_per_cell.iter().sum::<u64>() * 1024)
    }

    fn cpu_map(&self) -> Result<Vec<bool>> {
        Ok(self.online_cpus.clone())
    }
}
