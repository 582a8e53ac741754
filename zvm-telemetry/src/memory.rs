//! Memory counters from `meminfo` style files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::{ProbeError, Result};

/// Memory counters in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total usable memory
    pub total_kib: u64,
    /// Completely unused memory
    pub free_kib: u64,
    /// Block device buffers
    pub buffers_kib: u64,
    /// Page cache
    pub cached_kib: u64,
}

/// Parse a `meminfo` file into a key -> KiB map.
///
/// Handles both `/proc/meminfo` (`MemFree:  123 kB`) and the per-node
/// variant (`Node 0 MemFree:  123 kB`).
pub fn parse_meminfo(path: &Path, text: &str) -> Result<HashMap<String, u64>> {
    let mut values = HashMap::new();

    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let key = key.split_whitespace().last().unwrap_or_default();
        let Some(number) = rest.split_whitespace().next() else {
            continue;
        };
        let value: u64 = number.parse().map_err(|_| ProbeError::Parse {
            path: path.to_path_buf(),
            detail: format!("bad value for {}: '{}'", key, number),
        })?;
        values.insert(key.to_string(), value);
    }

    Ok(values)
}

/// Build [`MemoryStats`] from a parsed meminfo map.
///
/// `MemTotal` and `MemFree` are required. Per-node files have no
/// `Buffers` line on older kernels, those counters default to zero.
pub fn memory_stats(path: &Path, values: &HashMap<String, u64>) -> Result<MemoryStats> {
    let required = |key: &str| {
        values.get(key).copied().ok_or_else(|| ProbeError::Parse {
            path: path.to_path_buf(),
            detail: format!("missing {}", key),
        })
    };

    Ok(MemoryStats {
        total_kib: required("MemTotal")?,
        free_kib: required("MemFree")?,
        buffers_kib: values.get("Buffers").copied().unwrap_or(0),
        cached_kib: values.get("Cached").copied().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_meminfo() {
        let text = "MemTotal:        8000000 kB\nMemFree:         1000000 kB\nBuffers:           20000 kB\nCached:           300000 kB\nHugePages_Total:       0\n";
        let path = Path::new("/proc/meminfo");
        let values = parse_meminfo(path, text).unwrap();
        assert_eq!(values["HugePages_Total"], 0);

        let stats = memory_stats(path, &values).unwrap();
        assert_eq!(stats.total_kib, 8_000_000);
        assert_eq!(stats.free_kib, 1_000_000);
        assert_eq!(stats.buffers_kib, 20_000);
        assert_eq!(stats.cached_kib, 300_000);
    }

    #[test]
    fn test_parse_node_meminfo() {
        let text = "Node 1 MemTotal:  4096000 kB\nNode 1 MemFree:   2048000 kB\n";
        let path = Path::new("node1/meminfo");
        let stats = memory_stats(path, &parse_meminfo(path, text).unwrap()).unwrap();
        assert_eq!(stats.total_kib, 4_096_000);
        assert_eq!(stats.free_kib, 2_048_000);
        assert_eq!(stats.buffers_kib, 0);
    }

    #[test]
    fn test_missing_required_counter() {
        let path = Path::new("meminfo");
        let values = parse_meminfo(path, "MemTotal: 10 kB\n").unwrap();
        assert!(matches!(memory_stats(path, &values), Err(ProbeError::Parse { .. })));
    }
}
