//! Capability model of the z/VM driver.
//!
//! The model is built once from the host probe when the driver starts and
//! is never mutated afterwards. A refresh builds a whole new model.
//!
//! Architecture and host UUID are load-bearing: guest compatibility checks
//! depend on them, so failing to read either fails the build. Topology and
//! power management are advisory and degrade to empty values with a warning.

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zvm_telemetry::{CacheBank, HostProbe, NumaCell, PowerMgmt, SysinfoEntry};

use crate::error::{DriverError, Result};
use crate::types::VirtType;

/// OS type of every guest z/VM hosts through this driver.
pub const GUEST_OS_TYPE: &str = "linux";

/// One supported guest OS type × architecture × domain type tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCapability {
    pub os_type: String,
    pub arch: String,
    pub domain_type: VirtType,
}

/// Immutable description of what this driver instance supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityModel {
    /// Host architecture (libvirt spelling)
    pub arch: String,
    /// Host UUID
    pub host_uuid: Uuid,
    /// NUMA cells, empty if the probe failed
    pub numa: Vec<NumaCell>,
    /// Cache banks, empty if the probe failed
    pub caches: Vec<CacheBank>,
    /// Suspend targets, empty if the probe failed
    pub power: PowerMgmt,
    /// Supported guests
    pub guests: Vec<GuestCapability>,
}

impl CapabilityModel {
    /// Build the model from a host probe.
    pub fn build(probe: &dyn HostProbe) -> Result<Self> {
        let arch = probe
            .arch()
            .map_err(|e| DriverError::CapabilityBuildFailed(format!("host architecture: {}", e)))?;
        let host_uuid = probe
            .host_uuid()
            .map_err(|e| DriverError::CapabilityBuildFailed(format!("host uuid: {}", e)))?;

        let numa = probe.numa_topology().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to query host NUMA topology, reporting none");
            Vec::new()
        });

        let caches = probe.cache_topology().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to get host CPU cache info, reporting none");
            Vec::new()
        });

        let power = probe.power_management().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to get host power management capabilities");
            PowerMgmt::default()
        });

        let guests = vec![GuestCapability {
            os_type: GUEST_OS_TYPE.to_string(),
            arch: arch.clone(),
            domain_type: VirtType::Zvm,
        }];

        info!(
            arch = %arch,
            host_uuid = %host_uuid,
            numa_cells = numa.len(),
            cache_banks = caches.len(),
            "Capability model built"
        );

        Ok(Self { arch, host_uuid, numa, caches, power, guests })
    }

    /// Whether a guest of this OS type, architecture and domain type can run here.
    pub fn supports(&self, os_type: &str, arch: &str, domain_type: VirtType) -> bool {
        self.guests
            .iter()
            .any(|g| g.os_type == os_type && g.arch == arch && g.domain_type == domain_type)
    }

    /// Render the `<capabilities>` document.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<capabilities>\n");

        xml.push_str("  <host>\n");
        xml.push_str(&format!("    <uuid>{}</uuid>\n", self.host_uuid));
        xml.push_str(&format!("    <cpu>\n      <arch>{}</arch>\n    </cpu>\n", escape(&self.arch)));
        xml.push_str(&self.build_power_management());
        xml.push_str(&self.build_topology());
        xml.push_str(&self.build_cache());
        xml.push_str("  </host>\n");

        for guest in &self.guests {
            xml.push_str(&format!(
                r#"  <guest>
    <os_type>{}</os_type>
    <arch name='{}'>
      <wordsize>{}</wordsize>
      <domain type='{}'/>
    </arch>
  </guest>
"#,
                escape(&guest.os_type),
                escape(&guest.arch),
                wordsize(&guest.arch),
                guest.domain_type
            ));
        }

        xml.push_str("</capabilities>\n");
        xml
    }

    fn build_power_management(&self) -> String {
        if self.power.is_empty() {
            return "    <power_management/>\n".to_string();
        }
        let mut xml = String::from("    <power_management>\n");
        for target in self.power.targets() {
            xml.push_str(&format!("      <{}/>\n", target));
        }
        xml.push_str("    </power_management>\n");
        xml
    }

    fn build_topology(&self) -> String {
        if self.numa.is_empty() {
            return String::new();
        }
        let mut xml = format!("    <topology>\n      <cells num='{}'>\n", self.numa.len());
        for cell in &self.numa {
            xml.push_str(&format!(
                "        <cell id='{}'>\n          <memory unit='KiB'>{}</memory>\n          <cpus num='{}'>\n",
                cell.id,
                cell.memory_kib,
                cell.cpus.len()
            ));
            for cpu in &cell.cpus {
                xml.push_str(&format!("            <cpu id='{}'/>\n", cpu));
            }
            xml.push_str("          </cpus>\n        </cell>\n");
        }
        xml.push_str("      </cells>\n    </topology>\n");
        xml
    }

    fn build_cache(&self) -> String {
        if self.caches.is_empty() {
            return String::new();
        }
        let mut xml = String::from("    <cache>\n");
        for bank in &self.caches {
            xml.push_str(&format!(
                "      <bank id='{}' level='{}' type='{}' size='{}' unit='KiB' cpus='{}'/>\n",
                bank.id,
                bank.level,
                escape(&bank.cache_type),
                bank.size_kib,
                format_cpu_list(&bank.cpus)
            ));
        }
        xml.push_str("    </cache>\n");
        xml
    }
}

/// Render host machine identification as a `<sysinfo type='s390'>` document.
pub fn sysinfo_to_xml(entries: &[SysinfoEntry]) -> String {
    let mut xml = String::from("<sysinfo type='s390'>\n");
    if !entries.is_empty() {
        xml.push_str("  <system>\n");
        for entry in entries {
            xml.push_str(&format!(
                "    <entry name='{}'>{}</entry>\n",
                escape(&entry.name),
                escape(&entry.value)
            ));
        }
        xml.push_str("  </system>\n");
    }
    xml.push_str("</sysinfo>\n");
    xml
}

fn wordsize(arch: &str) -> u32 {
    match arch {
        "s390x" | "x86_64" | "aarch64" | "ppc64" | "ppc64le" | "riscv64" | "mips64" => 64,
        _ => 32,
    }
}

/// Compress a sorted CPU list into `0-3,6` form.
pub fn format_cpu_list(cpus: &[u32]) -> String {
    let mut sorted = cpus.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(",")
}
