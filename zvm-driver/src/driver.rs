//! The z/VM driver core.
//!
//! [`ZvmDriver`] owns the capability model, the cached hypervisor version
//! and the domain registry. Capabilities and version sit behind one driver
//! lock that is only held for in-memory reads and writes; SMAPI calls run
//! with no driver or registry lock held, and with the domain's job marker
//! claimed but its lock released.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use zvm_telemetry::{HostProbe, SysinfoEntry};

use crate::capabilities::{sysinfo_to_xml, CapabilityModel};
use crate::command::CommandRunner;
use crate::config::DriverConfig;
use crate::domain::{DomainObject, JobGuard, JobKind, Provisioning};
use crate::error::{DriverError, Result};
use crate::registry::DomainRegistry;
use crate::smcli::{ImageStatus, Smcli};
use crate::translate::{translate, ZVM_CPU_ADDRESS_LIMIT};
use crate::types::{DomainDescription, DomainInfo, DomainRef, DomainState, VirtType};
use crate::version::{parse_api_level, HypervisorVersion, VERSION_UNPROBED};

/// Driver type name reported to callers.
pub const DRIVER_TYPE: &str = "ZVM";

/// Extension of directory entry artifacts in the config directory.
pub const ARTIFACT_EXTENSION: &str = "direct";

struct DriverMeta {
    caps: Arc<CapabilityModel>,
    version: u64,
}

/// Process-wide driver state.
pub struct ZvmDriver {
    config: DriverConfig,
    smcli: Smcli,
    probe: Arc<dyn HostProbe>,
    sysinfo: Vec<SysinfoEntry>,
    meta: Mutex<DriverMeta>,
    registry: DomainRegistry,
}

impl ZvmDriver {
    /// Build the driver state. Fails if the capability model cannot be built.
    pub fn new(
        config: DriverConfig,
        probe: Arc<dyn HostProbe>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let caps = CapabilityModel::build(probe.as_ref())?;

        let sysinfo = probe.system_info().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read host sysinfo");
            Vec::new()
        });

        let smcli = Smcli::new(runner, config.smcli_path.clone(), config.smapi_target.clone());

        info!(
            smcli = %config.smcli_path.display(),
            config_dir = %config.config_dir.display(),
            arch = %caps.arch,
            "z/VM driver state created"
        );

        Ok(Self {
            config,
            smcli,
            probe,
            sysinfo,
            meta: Mutex::new(DriverMeta { caps: Arc::new(caps), version: VERSION_UNPROBED }),
            registry: DomainRegistry::new(),
        })
    }

    fn meta(&self) -> Result<MutexGuard<'_, DriverMeta>> {
        self.meta
            .lock()
            .map_err(|_| DriverError::Internal("Lock poisoned".to_string()))
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn probe(&self) -> &dyn HostProbe {
        self.probe.as_ref()
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    // =========================================================================
    // Host and driver information
    // =========================================================================

    pub fn hostname(&self) -> Result<String> {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .map_err(|e| DriverError::Internal(format!("failed to get hostname: {}", e)))
    }

    pub fn capabilities(&self) -> Result<Arc<CapabilityModel>> {
        Ok(self.meta()?.caps.clone())
    }

    /// Rebuild the capability model and swap it in whole.
    ///
    /// On failure the previous model stays in place.
    pub fn refresh_capabilities(&self) -> Result<Arc<CapabilityModel>> {
        let caps = Arc::new(CapabilityModel::build(self.probe.as_ref())?);
        self.meta()?.caps = caps.clone();
        info!("Capability model refreshed");
        Ok(caps)
    }

    pub fn sysinfo_xml(&self) -> String {
        sysinfo_to_xml(&self.sysinfo)
    }

    /// Maximum vcpus for a domain type; `None` means this driver's type.
    ///
    /// Never above what the translator accepts.
    pub fn max_vcpus(&self, virt_type: Option<&str>) -> Result<u32> {
        let limit = self.config.max_vcpus.min(ZVM_CPU_ADDRESS_LIMIT);
        match virt_type {
            None => Ok(limit),
            Some(t) if t.eq_ignore_ascii_case(VirtType::Zvm.as_str()) => Ok(limit),
            Some(t) => Err(DriverError::ConfigurationInvalid(format!("unknown type '{}'", t))),
        }
    }

    /// Hypervisor version, probed once and cached.
    ///
    /// The driver lock is released while SMAPI runs. A failed probe leaves
    /// the cache unprobed, so the next call tries again.
    #[instrument(skip(self))]
    pub async fn version(&self) -> Result<u64> {
        let cached = self.meta()?.version;
        if cached != VERSION_UNPROBED {
            return Ok(cached);
        }

        let output = self.smcli.query_api_level().await?;
        let parsed = parse_api_level(&output)?;

        let mut meta = self.meta()?;
        // A concurrent probe may have published first; keep its value.
        if meta.version == VERSION_UNPROBED {
            meta.version = parsed.encode();
            info!(version = %parsed, "Hypervisor version probed");
        }
        Ok(meta.version)
    }

    /// Cached version without probing.
    pub fn cached_version(&self) -> Result<Option<HypervisorVersion>> {
        let value = self.meta()?.version;
        Ok((value != VERSION_UNPROBED).then(|| HypervisorVersion::decode(value)))
    }

    // =========================================================================
    // Configuration artifacts
    // =========================================================================

    /// Path of the directory entry artifact for a user ID.
    pub fn artifact_path(&self, userid: &str) -> PathBuf {
        self.config
            .config_dir
            .join(format!("{}.{}", userid, ARTIFACT_EXTENSION))
    }

    async fn write_artifact(&self, userid: &str, entry: &str) -> Result<PathBuf> {
        let dir = &self.config.config_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| DriverError::Io {
            path: dir.clone(),
            source: e,
        })?;

        let path = self.artifact_path(userid);
        let tmp = path.with_extension(format!("{}.tmp", ARTIFACT_EXTENSION));
        tokio::fs::write(&tmp, entry).await.map_err(|e| DriverError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| DriverError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    async fn remove_artifact(&self, userid: &str) {
        let path = self.artifact_path(userid);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove directory entry artifact"),
        }
    }

    /// Write the artifact and hand it to the hypervisor.
    ///
    /// A timeout leaves provisioning `Unknown`.
    async fn provision(&self, job: &JobGuard<'_>, entry: &str) -> Result<()> {
        let userid = job.object().key();
        let path = self.write_artifact(userid, entry).await?;
        match self.smcli.image_create(userid, &path).await {
            Ok(()) => job.set_provisioning(Provisioning::Yes),
            Err(e) if e.is_outcome_unknown() => {
                job.set_provisioning(Provisioning::Unknown)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve an `Unknown` provisioning by asking the hypervisor.
    ///
    /// If the query fails the state stays `Unknown` and the error is returned.
    async fn settle_provisioning(&self, job: &JobGuard<'_>) -> Result<Provisioning> {
        let current = job.provisioning()?;
        if current != Provisioning::Unknown {
            return Ok(current);
        }

        let settled = if self.smcli.image_exists(job.object().key()).await? {
            Provisioning::Yes
        } else {
            Provisioning::No
        };
        job.set_provisioning(settled)?;
        info!(provisioning = settled.as_str(), "Settled directory entry after earlier timeout");
        Ok(settled)
    }

    /// Delete the directory entry if the hypervisor may hold it.
    async fn deprovision(&self, job: &JobGuard<'_>) -> Result<()> {
        let userid = job.object().key();
        match job.provisioning()? {
            Provisioning::No => return Ok(()),
            Provisioning::Yes => self.smcli.image_delete(userid).await?,
            Provisioning::Unknown => self.smcli.image_delete_if_present(userid).await?,
        }
        job.set_provisioning(Provisioning::No)
    }

    // =========================================================================
    // Domain lifecycle
    // =========================================================================

    /// Create and start a transient domain.
    #[instrument(skip(self, desc), fields(domain = %desc.name, uuid = %desc.uuid))]
    pub async fn create(&self, desc: DomainDescription) -> Result<DomainRef> {
        let entry = translate(&desc, self.config.max_vcpus)?;

        let object = Arc::new(DomainObject::new(desc, false));
        let job = object.begin_job(JobKind::Start)?;
        // Uniqueness is settled here, before anything is written.
        self.registry.insert(object.clone())?;

        self.start_job(&object, &job, Some(entry)).await
    }

    /// Define a persistent domain, or redefine one that is not running.
    #[instrument(skip(self, desc), fields(domain = %desc.name, uuid = %desc.uuid))]
    pub async fn define(&self, desc: DomainDescription) -> Result<DomainRef> {
        let entry = translate(&desc, self.config.max_vcpus)?;

        if let Some(existing) = self.registry.lookup_by_name(&desc.name)? {
            if existing.uuid() != desc.uuid {
                return Err(DriverError::DuplicateIdentity(format!(
                    "domain '{}' already exists with uuid {}",
                    existing.name(),
                    existing.uuid()
                )));
            }
            return self.redefine(&existing, desc, &entry).await;
        }

        let object = Arc::new(DomainObject::new(desc, true));
        let job = object.begin_job(JobKind::Define)?;
        self.registry.insert(object.clone())?;

        match self.provision(&job, &entry).await {
            Ok(()) => {
                info!(id = object.id(), "Domain defined");
                Ok(object.to_ref())
            }
            Err(e) if e.is_outcome_unknown() => {
                warn!(error = %e, "Define outcome unknown, keeping domain registered");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Define failed, removing domain");
                self.remove_artifact(object.key()).await;
                job.mark_removed()?;
                self.registry.remove(&object)?;
                Err(e)
            }
        }
    }

    async fn redefine(&self, object: &Arc<DomainObject>, desc: DomainDescription, entry: &str) -> Result<DomainRef> {
        let job = object.begin_job(JobKind::Define)?;
        let state = job.require("redefine", |s| s != DomainState::Running)?;
        if !object.is_persistent()? {
            return Err(DriverError::InvalidStateTransition {
                name: object.name().to_string(),
                state,
                action: "redefine transient domain",
            });
        }

        // z/VM cannot replace a directory entry in place.
        if self.settle_provisioning(&job).await? == Provisioning::Yes {
            self.smcli.image_delete(object.key()).await?;
            job.set_provisioning(Provisioning::No)?;
        }
        job.redefine(desc)?;

        self.provision(&job, entry).await?;
        info!(domain = %object.name(), "Domain redefined");
        Ok(object.to_ref())
    }

    /// Start a defined or shut off domain.
    #[instrument(skip(self), fields(domain = %domain.name, uuid = %domain.uuid))]
    pub async fn start(&self, domain: &DomainRef) -> Result<DomainRef> {
        let object = self.resolve(domain)?;
        let job = object.begin_job(JobKind::Start)?;
        self.start_job(&object, &job, None).await
    }

    /// The start transition, run with the job already claimed.
    ///
    /// A failed start of a transient domain discards it. A timeout leaves
    /// the domain registered in its previous state.
    async fn start_job(&self, object: &Arc<DomainObject>, job: &JobGuard<'_>, entry: Option<String>) -> Result<DomainRef> {
        job.require("start", |s| s.can_start())?;

        let result = async {
            if self.settle_provisioning(job).await? != Provisioning::Yes {
                let entry = match entry {
                    Some(entry) => entry,
                    None => translate(&object.description()?, self.config.max_vcpus)?,
                };
                self.provision(job, &entry).await?;
            }
            self.smcli.image_activate(object.key()).await
        }
        .await;

        match result {
            Ok(()) => {
                let id = self.registry.allocate_id();
                job.enter_running(id)?;
                info!(id, "Domain started");
                Ok(object.to_ref())
            }
            Err(e) if e.is_outcome_unknown() => {
                warn!(error = %e, "Start outcome unknown, domain state unchanged");
                Err(e)
            }
            Err(e) => {
                if object.is_persistent()? {
                    error!(error = %e, "Failed to start persistent domain");
                    Err(e)
                } else {
                    self.discard_transient(object, job, e).await
                }
            }
        }
    }

    /// Roll back a transient domain after a failed start.
    async fn discard_transient(&self, object: &Arc<DomainObject>, job: &JobGuard<'_>, cause: DriverError) -> Result<DomainRef> {
        error!(error = %cause, "Failed to start transient domain, rolling back");

        let rollback = self.deprovision(job).await.err();

        self.remove_artifact(object.key()).await;
        job.mark_removed()?;
        self.registry.remove(object)?;

        match rollback {
            None => Err(cause),
            Some(rollback) => {
                error!(error = %rollback, "Rollback failed, directory entry left behind");
                Err(DriverError::StateDiverged {
                    name: object.name().to_string(),
                    detail: format!("start failed ({}); removing the directory entry failed ({})", cause, rollback),
                })
            }
        }
    }

    /// Remove a domain that is not running.
    #[instrument(skip(self), fields(domain = %domain.name, uuid = %domain.uuid))]
    pub async fn undefine(&self, domain: &DomainRef) -> Result<()> {
        let object = self.resolve(domain)?;
        let job = object.begin_job(JobKind::Undefine)?;
        job.require("undefine", |s| s != DomainState::Running)?;

        if job.provisioning()? == Provisioning::Unknown {
            // The entry may still exist.
            self.deprovision(&job).await.map_err(|e| DriverError::StateDiverged {
                name: object.name().to_string(),
                detail: format!("directory entry may still exist after a timed out call ({})", e),
            })?;
        } else {
            self.deprovision(&job).await?;
        }

        self.remove_artifact(object.key()).await;
        job.mark_removed()?;
        self.registry.remove(&object)?;
        info!("Domain undefined");
        Ok(())
    }

    /// Reconcile a domain's state with what the hypervisor reports.
    #[instrument(skip(self), fields(domain = %domain.name, uuid = %domain.uuid))]
    pub async fn sync_state(&self, domain: &DomainRef) -> Result<DomainState> {
        let object = self.resolve(domain)?;
        let job = object.begin_job(JobKind::SyncState)?;
        let state = job.state()?;

        if self.settle_provisioning(&job).await? != Provisioning::Yes {
            return Ok(state);
        }

        match (self.smcli.image_status(object.key()).await?, state) {
            (ImageStatus::Off, DomainState::Running) => {
                job.enter_shutoff()?;
                info!("Domain logged off outside the driver, now shut off");
                Ok(DomainState::Shutoff)
            }
            (ImageStatus::On, DomainState::Defined | DomainState::Shutoff) => {
                let id = self.registry.allocate_id();
                job.enter_running(id)?;
                info!(id, "Domain logged on outside the driver, now running");
                Ok(DomainState::Running)
            }
            (_, state) => Ok(state),
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    fn resolve(&self, domain: &DomainRef) -> Result<Arc<DomainObject>> {
        self.registry
            .lookup_by_uuid(&domain.uuid)?
            .ok_or_else(|| DriverError::uuid_not_found(&domain.uuid))
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<DomainRef> {
        self.registry
            .lookup_by_name(name)?
            .map(|o| o.to_ref())
            .ok_or_else(|| DriverError::NotFound(format!("no domain with matching name '{}'", name)))
    }

    pub fn lookup_by_uuid(&self, uuid: &Uuid) -> Result<DomainRef> {
        self.registry
            .lookup_by_uuid(uuid)?
            .map(|o| o.to_ref())
            .ok_or_else(|| DriverError::uuid_not_found(uuid))
    }

    pub fn lookup_by_id(&self, id: i32) -> Result<DomainRef> {
        self.registry
            .lookup_by_id(id)?
            .map(|o| o.to_ref())
            .ok_or_else(|| DriverError::NotFound(format!("no domain with matching id {}", id)))
    }

    pub fn get_info(&self, domain: &DomainRef) -> Result<DomainInfo> {
        self.resolve(domain)?.info()
    }

    pub fn list(&self, active_only: bool) -> Result<Vec<DomainRef>> {
        Ok(self.registry.list(active_only)?.iter().map(|o| o.to_ref()).collect())
    }

    pub fn count(&self, active_only: bool) -> Result<usize> {
        self.registry.count(active_only)
    }

    pub fn smcli_program(&self) -> &Path {
        self.smcli.program()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockSmcli};
    use tempfile::TempDir;
    use zvm_telemetry::FixedHostProbe;

    fn driver(dir: &TempDir) -> (ZvmDriver, Arc<MockSmcli>) {
        let mock = Arc::new(MockSmcli::new());
        let config = DriverConfig::default().with_config_dir(dir.path());
        let driver = ZvmDriver::new(config, Arc::new(FixedHostProbe::s390x()), mock.clone()).unwrap();
        (driver, mock)
    }

    #[tokio::test]
    async fn test_capability_failure_prevents_driver() {
        let dir = TempDir::new().unwrap();
        let result = ZvmDriver::new(
            DriverConfig::default().with_config_dir(dir.path()),
            Arc::new(FixedHostProbe::s390x().without_arch()),
            Arc::new(MockSmcli::new()),
        );
        assert!(matches!(result, Err(DriverError::CapabilityBuildFailed(_))));
    }

    #[tokio::test]
    async fn test_version_cached_after_probe() {
        let dir = TempDir::new().unwrap();
        let (driver, mock) = driver(&dir);

        assert_eq!(driver.cached_version().unwrap(), None);
        assert_eq!(driver.version().await.unwrap(), 6_003_000);
        assert_eq!(driver.version().await.unwrap(), 6_003_000);
        assert_eq!(mock.call_count("Query_API_Functional_Level"), 1);
        assert_eq!(driver.cached_version().unwrap(), Some(HypervisorVersion::new(6, 3, 0)));
    }

    #[tokio::test]
    async fn test_version_failure_stays_unprobed() {
        let dir = TempDir::new().unwrap();
        let (driver, mock) = driver(&dir);
        mock.push_reply("Query_API_Functional_Level", MockReply::Stdout("Functional level 6.3".to_string()));

        assert!(matches!(driver.version().await, Err(DriverError::UnexpectedOutputFormat(_))));
        assert_eq!(driver.cached_version().unwrap(), None);

        // The next call probes again.
        assert_eq!(driver.version().await.unwrap(), 6_003_000);
        assert_eq!(mock.call_count("Query_API_Functional_Level"), 2);
    }

    #[tokio::test]
    async fn test_max_vcpus() {
        let dir = TempDir::new().unwrap();
        let (driver, _) = driver(&dir);
        assert_eq!(driver.max_vcpus(None).unwrap(), 64);
        assert_eq!(driver.max_vcpus(Some("ZVM")).unwrap(), 64);
        assert!(matches!(driver.max_vcpus(Some("kvm")), Err(DriverError::ConfigurationInvalid(_))));
    }

    #[tokio::test]
    async fn test_refresh_capabilities_swaps_model() {
        let dir = TempDir::new().unwrap();
        let (driver, _) = driver(&dir);
        let before = driver.capabilities().unwrap();
        let after = driver.refresh_capabilities().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
        assert!(Arc::ptr_eq(&after, &driver.capabilities().unwrap()));
    }

    #[tokio::test]
    async fn test_artifact_path() {
        let dir = TempDir::new().unwrap();
        let (driver, _) = driver(&dir);
        assert_eq!(driver.artifact_path("VM1"), dir.path().join("VM1.direct"));
    }
}
