//! One-shot commands run over a driver connection.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use tracing::info;
use zvm_driver::{DomainDescription, HypervisorDriver, HypervisorVersion};

use crate::cli::Command;

/// Run `command` and return the text to print.
pub async fn run(conn: &dyn HypervisorDriver, command: &Command) -> Result<String> {
    match command {
        Command::Info => driver_info(conn).await,
        Command::Capabilities => Ok(conn.connect_get_capabilities().await?),
        Command::Sysinfo => Ok(conn.connect_get_sysinfo().await?),
        Command::NodeInfo => node_info(conn).await,
        Command::Create { description } => {
            let desc = load_description(description)?;
            let vm = conn.domain_create(desc).await.context("Failed to create domain")?;
            info!(domain = %vm.name, id = vm.id, "Domain created");
            domain_info(conn, &vm).await
        }
        Command::Define { description } => {
            let desc = load_description(description)?;
            let vm = conn.domain_define(desc).await.context("Failed to define domain")?;
            info!(domain = %vm.name, "Domain defined");
            domain_info(conn, &vm).await
        }
    }
}

async fn driver_info(conn: &dyn HypervisorDriver) -> Result<String> {
    let version = conn.connect_get_version().await.context("Failed to probe hypervisor version")?;
    let out = json!({
        "type": conn.connect_get_type().await?,
        "hostname": conn.connect_get_hostname().await?,
        "version": version,
        "version_string": HypervisorVersion::decode(version).to_string(),
        "max_vcpus": conn.connect_get_max_vcpus(None).await?,
        "domains": conn.num_of_domains(false).await?,
        "active_domains": conn.num_of_domains(true).await?,
    });
    Ok(serde_json::to_string_pretty(&out)?)
}

async fn node_info(conn: &dyn HypervisorDriver) -> Result<String> {
    let node = conn.node_get_info().await?;
    let out = json!({
        "node": node,
        "free_memory_bytes": conn.node_get_free_memory().await?,
        "cells_free_memory_bytes": conn.node_get_cells_free_memory(0, node.nodes).await?,
        "cpu_map": conn.node_get_cpu_map().await?,
        "memory": conn.node_get_memory_stats(None).await?,
        "cpu": conn.node_get_cpu_stats(None).await?,
    });
    Ok(serde_json::to_string_pretty(&out)?)
}

async fn domain_info(conn: &dyn HypervisorDriver, vm: &zvm_driver::DomainRef) -> Result<String> {
    let info = conn.domain_get_info(vm).await?;
    Ok(serde_json::to_string_pretty(&info)?)
}

/// Read a YAML domain description.
pub fn load_description(path: &Path) -> Result<DomainDescription> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read domain description: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse domain description: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use zvm_driver::{AllowAll, ClientIdentity, DriverConfig, MockSmcli, OpenOutcome, ZvmConnection, ZvmStateDriver};
    use zvm_telemetry::FixedHostProbe;

    fn connect(dir: &TempDir) -> (ZvmStateDriver, ZvmConnection) {
        let state = ZvmStateDriver::new(Arc::new(AllowAll));
        state
            .initialize(
                true,
                DriverConfig::default().with_config_dir(dir.path()),
                Arc::new(FixedHostProbe::s390x()),
                Arc::new(MockSmcli::new()),
            )
            .unwrap();
        match state.open(None, &ClientIdentity::new("root")).unwrap() {
            OpenOutcome::Opened(conn) => (state, conn),
            OpenOutcome::Declined => panic!("declined"),
        }
    }

    #[tokio::test]
    async fn test_info_command() {
        let dir = TempDir::new().unwrap();
        let (_state, conn) = connect(&dir);
        let out = run(&conn, &Command::Info).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["type"], "ZVM");
        assert_eq!(value["version"], 6_003_000);
        assert_eq!(value["version_string"], "6.3.0");
        assert_eq!(value["domains"], 0);
    }

    #[tokio::test]
    async fn test_create_from_yaml() {
        let dir = TempDir::new().unwrap();
        let (_state, conn) = connect(&dir);
        let path = dir.path().join("vm1.yaml");
        std::fs::write(
            &path,
            "name: vm1\ntype: zvm\nmemory_mib: 32\nuuid: 6f1c0000-0000-4000-8000-000000000001\n",
        )
        .unwrap();

        let out = run(&conn, &Command::Create { description: path }).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["name"], "vm1");
        assert_eq!(value["state"], "running");
        assert_eq!(value["uuid"], "6f1c0000-0000-4000-8000-000000000001");
        assert!(dir.path().join("VM1.direct").exists());
    }

    #[tokio::test]
    async fn test_bad_description() {
        let dir = TempDir::new().unwrap();
        let (_state, conn) = connect(&dir);
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "name: vm1\ntype: kvm\nmemory_mib: 32\n").unwrap();

        let err = run(&conn, &Command::Define { description: path }).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Expecting virt type to be 'zvm'"));
    }

    #[tokio::test]
    async fn test_node_info_command() {
        let dir = TempDir::new().unwrap();
        let (_state, conn) = connect(&dir);
        let out = run(&conn, &Command::NodeInfo).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["node"]["model"], "s390x");
        assert_eq!(value["cells_free_memory_bytes"].as_array().unwrap().len(), 2);
    }
}
