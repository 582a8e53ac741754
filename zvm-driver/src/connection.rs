//! Driver lifecycle and client connections.
//!
//! [`ZvmStateDriver`] is owned by the process entry point. It creates the
//! shared [`ZvmDriver`] on `initialize`, drops its reference on `cleanup`,
//! and hands out [`ZvmConnection`]s from `open`. Every connection shares the
//! same driver state; none is created per open.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;
use zvm_telemetry::{CpuStats, HostProbe, MemoryStats, NodeInfo};

use crate::acl::{AccessCheck, ClientIdentity, Permission};
use crate::command::CommandRunner;
use crate::config::DriverConfig;
use crate::driver::{ZvmDriver, DRIVER_TYPE};
use crate::error::{DriverError, Result};
use crate::traits::HypervisorDriver;
use crate::types::*;

/// URI scheme served by this driver.
pub const URI_SCHEME: &str = "zvm";

/// The only path a local z/VM connection may name.
pub const URI_PATH: &str = "/system";

/// Default connection target.
pub const DEFAULT_URI: &str = "zvm:///system";

/// Parsed `scheme://[server]/path` connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectUri {
    pub scheme: String,
    pub server: Option<String>,
    pub path: String,
}

impl ConnectUri {
    /// Parse a connection target; `None` if it is not a URI at all.
    pub fn parse(uri: &str) -> Option<Self> {
        let (scheme, rest) = uri.split_once("://")?;
        if scheme.is_empty() {
            return None;
        }
        let (server, path) = match rest.find('/') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            server: (!server.is_empty()).then(|| server.to_string()),
            path: path.to_string(),
        })
    }
}

/// Result of [`ZvmStateDriver::open`].
pub enum OpenOutcome {
    /// The target is ours and the connection is open.
    Opened(ZvmConnection),
    /// The target belongs to some other driver.
    Declined,
}

impl std::fmt::Debug for OpenOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenOutcome::Opened(conn) => f.debug_tuple("Opened").field(&conn.identity.user).finish(),
            OpenOutcome::Declined => f.write_str("Declined"),
        }
    }
}

/// Process-owned lifecycle of the z/VM driver.
pub struct ZvmStateDriver {
    driver: RwLock<Option<Arc<ZvmDriver>>>,
    access: Arc<dyn AccessCheck>,
}

impl ZvmStateDriver {
    /// Create an inactive state driver using `access` for every connection.
    pub fn new(access: Arc<dyn AccessCheck>) -> Self {
        Self {
            driver: RwLock::new(None),
            access,
        }
    }

    /// Activate the driver.
    ///
    /// Unprivileged processes cannot manage z/VM guests, so the driver stays
    /// inactive and this returns `Ok`. Check [`is_active`](Self::is_active).
    #[instrument(skip(self, config, probe, runner))]
    pub fn initialize(
        &self,
        privileged: bool,
        config: DriverConfig,
        probe: Arc<dyn HostProbe>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<()> {
        if !privileged {
            info!("Not running privileged, z/VM driver stays inactive");
            return Ok(());
        }

        let mut slot = self.driver.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        if slot.is_some() {
            return Err(DriverError::Internal("z/VM driver is already initialized".to_string()));
        }

        *slot = Some(Arc::new(ZvmDriver::new(config, probe, runner)?));
        info!("z/VM driver initialized");
        Ok(())
    }

    /// Release the driver state.
    ///
    /// Open connections keep their reference and stay usable until closed.
    pub fn cleanup(&self) -> Result<()> {
        let mut slot = self.driver.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        match slot.take() {
            Some(driver) => {
                info!(open_connections = Arc::strong_count(&driver) - 1, "z/VM driver cleaned up");
                Ok(())
            }
            None => Err(DriverError::DriverInactive),
        }
    }

    pub fn is_active(&self) -> bool {
        self.driver.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Open a connection to `uri`, or to the default target if `None`.
    #[instrument(skip(self, identity), fields(user = %identity.user))]
    pub fn open(&self, uri: Option<&str>, identity: &ClientIdentity) -> Result<OpenOutcome> {
        let active = self
            .driver
            .read()
            .map_err(|_| DriverError::Internal("Lock poisoned".to_string()))?
            .clone();

        let uri = match (uri, &active) {
            (Some(uri), _) => uri,
            (None, Some(_)) => DEFAULT_URI,
            (None, None) => return Ok(OpenOutcome::Declined),
        };

        let parsed = match ConnectUri::parse(uri) {
            Some(parsed) if parsed.scheme == URI_SCHEME && parsed.server.is_none() => parsed,
            _ => {
                debug!(uri, "Not a local z/VM connection, declining");
                return Ok(OpenOutcome::Declined);
            }
        };

        if parsed.path != URI_PATH {
            return Err(DriverError::ConfigurationInvalid(format!(
                "unexpected z/VM URI path '{}', try {}",
                parsed.path, DEFAULT_URI
            )));
        }

        let driver = active.ok_or(DriverError::DriverInactive)?;

        if !self.access.check(identity, Permission::ConnectOpen) {
            return Err(DriverError::PermissionDenied(format!(
                "{} may not open {}",
                identity.user, uri
            )));
        }

        info!(uri, read_only = identity.read_only, "Connection opened");
        Ok(OpenOutcome::Opened(ZvmConnection {
            driver,
            identity: identity.clone(),
            access: self.access.clone(),
        }))
    }
}

/// One client's view of the shared driver.
pub struct ZvmConnection {
    driver: Arc<ZvmDriver>,
    identity: ClientIdentity,
    access: Arc<dyn AccessCheck>,
}

impl ZvmConnection {
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Shared driver state behind this connection.
    pub fn driver(&self) -> &Arc<ZvmDriver> {
        &self.driver
    }

    /// Close the connection. The driver state outlives it if still in use.
    pub fn close(self) {
        debug!(user = %self.identity.user, "Connection closed");
    }

    fn authorize(&self, permission: Permission) -> Result<&ZvmDriver> {
        if self.access.check(&self.identity, permission) {
            Ok(&self.driver)
        } else {
            Err(DriverError::PermissionDenied(format!(
                "{} lacks {}",
                self.identity.user,
                permission.as_str()
            )))
        }
    }
}

#[async_trait]
impl HypervisorDriver for ZvmConnection {
    async fn connect_get_type(&self) -> Result<String> {
        self.authorize(Permission::ConnectRead)?;
        Ok(DRIVER_TYPE.to_string())
    }

    async fn connect_get_hostname(&self) -> Result<String> {
        self.authorize(Permission::ConnectRead)?.hostname()
    }

    async fn connect_get_version(&self) -> Result<u64> {
        self.authorize(Permission::ConnectRead)?.version().await
    }

    async fn connect_get_max_vcpus(&self, virt_type: Option<&str>) -> Result<u32> {
        self.authorize(Permission::ConnectRead)?.max_vcpus(virt_type)
    }

    async fn connect_get_capabilities(&self) -> Result<String> {
        Ok(self.authorize(Permission::ConnectRead)?.capabilities()?.to_xml())
    }

    async fn connect_get_sysinfo(&self) -> Result<String> {
        Ok(self.authorize(Permission::ConnectRead)?.sysinfo_xml())
    }

    async fn node_get_info(&self) -> Result<NodeInfo> {
        Ok(self.authorize(Permission::ConnectRead)?.probe().node_info()?)
    }

    async fn node_get_cpu_stats(&self, cpu: Option<u32>) -> Result<CpuStats> {
        Ok(self.authorize(Permission::ConnectRead)?.probe().cpu_stats(cpu)?)
    }

    async fn node_get_memory_stats(&self, cell: Option<u32>) -> Result<MemoryStats> {
        Ok(self.authorize(Permission::ConnectRead)?.probe().memory_stats(cell)?)
    }

    async fn node_get_cells_free_memory(&self, start: u32, max: u32) -> Result<Vec<u64>> {
        Ok(self.authorize(Permission::ConnectRead)?.probe().cells_free_memory(start, max)?)
    }

    async fn node_get_free_memory(&self) -> Result<u64> {
        Ok(self.authorize(Permission::ConnectRead)?.probe().free_memory()?)
    }

    async fn node_get_cpu_map(&self) -> Result<Vec<bool>> {
        Ok(self.authorize(Permission::ConnectRead)?.probe().cpu_map()?)
    }

    async fn domain_create(&self, desc: DomainDescription) -> Result<DomainRef> {
        self.authorize(Permission::DomainStart)?.create(desc).await
    }

    async fn domain_define(&self, desc: DomainDescription) -> Result<DomainRef> {
        self.authorize(Permission::DomainWrite)?.define(desc).await
    }

    async fn domain_start(&self, domain: &DomainRef) -> Result<DomainRef> {
        self.authorize(Permission::DomainStart)?.start(domain).await
    }

    async fn domain_undefine(&self, domain: &DomainRef) -> Result<()> {
        self.authorize(Permission::DomainDelete)?.undefine(domain).await
    }

    async fn domain_sync_state(&self, domain: &DomainRef) -> Result<DomainState> {
        self.authorize(Permission::DomainWrite)?.sync_state(domain).await
    }

    async fn domain_lookup_by_name(&self, name: &str) -> Result<DomainRef> {
        self.authorize(Permission::DomainRead)?.lookup_by_name(name)
    }

    async fn domain_lookup_by_uuid(&self, uuid: &Uuid) -> Result<DomainRef> {
        self.authorize(Permission::DomainRead)?.lookup_by_uuid(uuid)
    }

    async fn domain_lookup_by_id(&self, id: i32) -> Result<DomainRef> {
        self.authorize(Permission::DomainRead)?.lookup_by_id(id)
    }

    async fn domain_get_info(&self, domain: &DomainRef) -> Result<DomainInfo> {
        self.authorize(Permission::DomainRead)?.get_info(domain)
    }

    async fn list_domains(&self, active_only: bool) -> Result<Vec<DomainRef>> {
        self.authorize(Permission::DomainRead)?.list(active_only)
    }

    async fn num_of_domains(&self, active_only: bool) -> Result<usize> {
        self.authorize(Permission::DomainRead)?.count(active_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        let uri = ConnectUri::parse("zvm:///system").unwrap();
        assert_eq!(uri.scheme, "zvm");
        assert_eq!(uri.server, None);
        assert_eq!(uri.path, "/system");

        let uri = ConnectUri::parse("ZVM://host.example.com/system").unwrap();
        assert_eq!(uri.scheme, "zvm");
        assert_eq!(uri.server.as_deref(), Some("host.example.com"));

        let uri = ConnectUri::parse("qemu://").unwrap();
        assert_eq!(uri.path, "");

        assert!(ConnectUri::parse("zvm").is_none());
        assert!(ConnectUri::parse(":///system").is_none());
    }
}
