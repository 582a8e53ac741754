//! Machine identification, host UUID and power management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::{ProbeError, Result};

/// One `name: value` pair describing the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysinfoEntry {
    pub name: String,
    pub value: String,
}

/// Suspend targets the host supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerMgmt {
    /// Suspend to RAM
    pub suspend_mem: bool,
    /// Suspend to disk
    pub suspend_disk: bool,
    /// RAM and disk at once
    pub suspend_hybrid: bool,
}

impl PowerMgmt {
    /// True when no target is supported.
    pub fn is_empty(&self) -> bool {
        !(self.suspend_mem || self.suspend_disk || self.suspend_hybrid)
    }

    /// Names of the supported targets, in libvirt spelling.
    pub fn targets(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.suspend_mem { out.push("suspend_mem"); }
        if self.suspend_disk { out.push("suspend_disk"); }
        if self.suspend_hybrid { out.push("suspend_hybrid"); }
        out
    }
}

/// Parse `/sys/power/state` (e.g. `freeze mem disk`).
pub fn parse_power_state(text: &str) -> PowerMgmt {
    let states: Vec<&str> = text.split_whitespace().collect();
    let mem = states.contains(&"mem");
    let disk = states.contains(&"disk");
    PowerMgmt {
        suspend_mem: mem,
        suspend_disk: disk,
        suspend_hybrid: mem && disk,
    }
}

/// Parse `/proc/sysinfo` (s390) into entries.
///
/// Lines without a colon and entries with empty values are skipped.
pub fn parse_sysinfo(text: &str) -> Vec<SysinfoEntry> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .map(|(name, value)| SysinfoEntry {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Parse a host UUID from DMI `product_uuid` or a 32-digit `machine-id`.
pub fn parse_host_uuid(path: &Path, text: &str) -> Result<Uuid> {
    let text = text.trim();
    let uuid = Uuid::parse_str(text).map_err(|e| ProbeError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    if uuid.is_nil() {
        return Err(ProbeError::Parse {
            path: path.to_path_buf(),
            detail: "nil uuid".to_string(),
        });
    }
    Ok(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_power_state() {
        let pm = parse_power_state("freeze mem disk\n");
        assert!(pm.suspend_mem && pm.suspend_disk && pm.suspend_hybrid);
        assert_eq!(pm.targets(), vec!["suspend_mem", "suspend_disk", "suspend_hybrid"]);

        let pm = parse_power_state("freeze");
        assert!(pm.is_empty());
    }

    #[test]
    fn test_parse_sysinfo() {
        let text = "Manufacturer:         IBM\nType:                 2964\n\nVM00 Name:            ZVMHOST\nLPAR Extended Name:\n";
        let entries = parse_sysinfo(text);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], SysinfoEntry { name: "Manufacturer".into(), value: "IBM".into() });
        assert_eq!(entries[2].name, "VM00 Name");
    }

    #[test]
    fn test_parse_host_uuid() {
        let p = Path::new("machine-id");
        let uuid = parse_host_uuid(p, "4c4c4544004d3510804ac4c04f4d3232\n").unwrap();
        assert_eq!(uuid.to_string(), "4c4c4544-004d-3510-804a-c4c04f4d3232");
        assert!(parse_host_uuid(p, "00000000-0000-0000-0000-000000000000").is_err());
        assert!(parse_host_uuid(p, "not-a-uuid").is_err());
    }
}
