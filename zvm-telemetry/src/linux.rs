//! Host probe backed by `/sys`, `/proc` and `sysinfo`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::cpu::{self, CpuStats};
use crate::memory::{self, MemoryStats};
use crate::system::{self, PowerMgmt, SysinfoEntry};
use crate::{arch_from_rust, CacheBank, HostProbe, NodeInfo, NumaCell, ProbeError, Result};

/// Probe for the Linux host this process runs on.
///
/// All paths are resolved under `root`, which is `/` in production and a
/// temporary tree in tests.
pub struct LinuxHostProbe {
    root: PathBuf,
    arch: String,
    system: Mutex<System>,
}

impl LinuxHostProbe {
    /// Create a probe for the running host.
    pub fn new() -> Self {
        Self::with_root("/", std::env::consts::ARCH)
    }

    /// Create a probe reading a different filesystem root and reporting
    /// the given Rust architecture name.
    pub fn with_root(root: impl Into<PathBuf>, rust_arch: &str) -> Self {
        let system = System::new_with_specifics(refresh_kind());
        Self {
            root: root.into(),
            arch: rust_arch.to_string(),
            system: Mutex::new(system),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn read(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|source| ProbeError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Names of `dir` entries that start with `prefix` followed by a number,
    /// sorted by that number.
    fn numbered_entries(&self, dir: &Path, prefix: &str) -> Result<Vec<(u32, PathBuf)>> {
        let entries = std::fs::read_dir(dir).map_err(|source| ProbeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(n) = name.strip_prefix(prefix).and_then(|s| s.parse::<u32>().ok()) {
                out.push((n, entry.path()));
            }
        }
        out.sort_by_key(|(n, _)| *n);
        Ok(out)
    }

    fn node_dir(&self) -> PathBuf {
        self.path("sys/devices/system/node")
    }

    fn cpu_dir(&self) -> PathBuf {
        self.path("sys/devices/system/cpu")
    }

    fn cpu_list(&self, path: &Path) -> Result<Vec<u32>> {
        let text = self.read(path)?;
        cpu::parse_cpu_list(path, &text)
    }

    fn node_memory(&self, cell: u32) -> Result<MemoryStats> {
        let path = self.node_dir().join(format!("node{}", cell)).join("meminfo");
        let text = match self.read(&path) {
            Ok(text) => text,
            Err(ProbeError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::Unavailable(format!("NUMA cell {} not present", cell)));
            }
            Err(e) => return Err(e),
        };
        memory::memory_stats(&path, &memory::parse_meminfo(&path, &text)?)
    }
}

impl Default for LinuxHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn refresh_kind() -> RefreshKind {
    RefreshKind::new()
        .with_cpu(CpuRefreshKind::everything())
        .with_memory(MemoryRefreshKind::everything())
}

fn parse_cache_size(path: &Path, text: &str) -> Result<u64> {
    let text = text.trim();
    let (digits, multiplier) = match text.chars().last() {
        Some('K') => (&text[..text.len() - 1], 1),
        Some('M') => (&text[..text.len() - 1], 1024),
        Some('G') => (&text[..text.len() - 1], 1024 * 1024),
        _ => (text, 1),
    };
    digits.parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| ProbeError::Parse {
            path: path.to_path_buf(),
            detail: format!("bad cache size '{}'", text),
        })
}

fn cache_type(path: &Path, text: &str) -> Result<&'static str> {
    match text.trim() {
        "Unified" => Ok("both"),
        "Data" => Ok("data"),
        "Instruction" => Ok("instruction"),
        other => Err(ProbeError::Parse {
            path: path.to_path_buf(),
            detail: format!("unknown cache type '{}'", other),
        }),
    }
}

impl HostProbe for LinuxHostProbe {
    fn arch(&self) -> Result<String> {
        arch_from_rust(&self.arch)
    }

    fn host_uuid(&self) -> Result<Uuid> {
        let dmi = self.path("sys/class/dmi/id/product_uuid");
        if let Ok(text) = self.read(&dmi) {
            if let Ok(uuid) = system::parse_host_uuid(&dmi, &text) {
                return Ok(uuid);
            }
        }
        let machine_id = self.path("etc/machine-id");
        let text = self.read(&machine_id)?;
        system::parse_host_uuid(&machine_id, &text)
    }

    #[instrument(skip(self))]
    fn numa_topology(&self) -> Result<Vec<NumaCell>> {
        let mut cells = Vec::new();
        for (id, dir) in self.numbered_entries(&self.node_dir(), "node")? {
            let cpus = self.cpu_list(&dir.join("cpulist"))?;
            let memory = self.node_memory(id)?;
            cells.push(NumaCell {
                id,
                memory_kib: memory.total_kib,
                cpus,
            });
        }
        if cells.is_empty() {
            return Err(ProbeError::Unavailable("no NUMA nodes exported".to_string()));
        }
        debug!(cells = cells.len(), "NUMA topology read");
        Ok(cells)
    }

    #[instrument(skip(self))]
    fn cache_topology(&self) -> Result<Vec<CacheBank>> {
        // Banks are shared between CPUs; key by (level, type, id) to report each once.
        let mut banks: BTreeMap<(u32, &'static str, u32), CacheBank> = BTreeMap::new();

        for (_, cpu_path) in self.numbered_entries(&self.cpu_dir(), "cpu")? {
            let cache_dir = cpu_path.join("cache");
            if !cache_dir.exists() {
                continue;
            }
            for (_, index) in self.numbered_entries(&cache_dir, "index")? {
                let level_path = index.join("level");
                let level: u32 = self.read(&level_path)?.trim().parse()
                    .map_err(|_| ProbeError::Parse {
                        path: level_path.clone(),
                        detail: "bad cache level".to_string(),
                    })?;
                let type_path = index.join("type");
                let kind = cache_type(&type_path, &self.read(&type_path)?)?;
                let size_path = index.join("size");
                let size_kib = parse_cache_size(&size_path, &self.read(&size_path)?)?;
                let cpus = self.cpu_list(&index.join("shared_cpu_list"))?;

                // Older kernels have no id file; the lowest sharing CPU identifies the bank.
                let id = match self.read(&index.join("id")) {
                    Ok(text) => text.trim().parse().unwrap_or(0),
                    Err(_) => cpus.first().copied().unwrap_or(0),
                };

                banks.entry((level, kind, id)).or_insert(CacheBank {
                    id,
                    level,
                    cache_type: kind.to_string(),
                    size_kib,
                    cpus,
                });
            }
        }

        if banks.is_empty() {
            return Err(ProbeError::Unavailable("no cache information exported".to_string()));
        }
        Ok(banks.into_values().collect())
    }

    fn power_management(&self) -> Result<PowerMgmt> {
        let text = self.read(&self.path("sys/power/state"))?;
        Ok(system::parse_power_state(&text))
    }

    fn system_info(&self) -> Result<Vec<SysinfoEntry>> {
        let path = self.path("proc/sysinfo");
        let text = self.read(&path)?;
        Ok(system::parse_sysinfo(&text))
    }

    #[instrument(skip(self))]
    fn node_info(&self) -> Result<NodeInfo> {
        let (logical, physical, mhz, memory_kib) = {
            let mut sys = self.system.lock()
                .map_err(|_| ProbeError::Unavailable("system lock poisoned".to_string()))?;
            sys.refresh_specifics(refresh_kind());
            let cpus = sys.cpus();
            (
                cpus.len() as u32,
                sys.physical_core_count().unwrap_or(cpus.len()) as u32,
                cpus.first().map(|c| c.frequency() as u32).unwrap_or(0),
                sys.total_memory() / 1024,
            )
        };

        let nodes = self.numa_topology().map(|c| c.len() as u32).unwrap_or(1).max(1);
        let cores = (physical / nodes).max(1);
        let threads = (logical / (nodes * cores)).max(1);

        Ok(NodeInfo {
            model: self.arch()?,
            memory_kib,
            cpus: logical,
            mhz,
            nodes,
            sockets: 1,
            cores,
            threads,
        })
    }

    fn cpu_stats(&self, cpu: Option<u32>) -> Result<CpuStats> {
        let path = self.path("proc/stat");
        let text = self.read(&path)?;
        cpu::parse_proc_stat(&path, &text, cpu)
    }

    fn memory_stats(&self, cell: Option<u32>) -> Result<MemoryStats> {
        match cell {
            Some(cell) => self.node_memory(cell),
            None => {
                let path = self.path("proc/meminfo");
                let text = self.read(&path)?;
                memory::memory_stats(&path, &memory::parse_meminfo(&path, &text)?)
            }
        }
    }

    fn cells_free_memory(&self, start: u32, max: u32) -> Result<Vec<u64>> {
        (start..start.saturating_add(max))
            .map(|cell| self.node_memory(cell).map(|m| m.free_kib * 1024))
            .collect()
    }

    fn free_memory(&self) -> Result<u64> {
        let mut sys = self.system.lock()
            .map_err(|_| ProbeError::Unavailable("system lock poisoned".to_string()))?;
        sys.refresh_memory();
        Ok(sys.free_memory())
    }

    fn cpu_map(&self) -> Result<Vec<bool>> {
        let present = self.cpu_list(&self.cpu_dir().join("present"))?;
        let online = self.cpu_list(&self.cpu_dir().join("online"))?;
        Ok(cpu::cpu_map(&present, &online))
    }
}
