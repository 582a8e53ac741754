//! Domain objects and their state machine.
//!
//! Each domain carries its own lock, separate from the registry and driver
//! locks. A transition claims a job marker under that lock, releases the
//! lock while SMAPI runs, and re-acquires it to commit. The [`JobGuard`]
//! clears the marker when dropped, whether the transition committed or not.
//!
//! ```text
//!   define ──► Defined ──start──► Running ──(logged off)──► Shutoff
//!                 ▲                                            │
//!                 └──────────────── redefine ◄─────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{DriverError, Result};
use crate::types::{DomainDescription, DomainInfo, DomainRef, DomainState};

/// Id of a domain that is not running.
pub const INACTIVE_ID: i32 = -1;

/// Kind of transition holding a domain's job marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Define,
    Start,
    Undefine,
    SyncState,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Define => "define",
            JobKind::Start => "start",
            JobKind::Undefine => "undefine",
            JobKind::SyncState => "sync state",
        }
    }
}

/// Whether the hypervisor holds this domain's directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioning {
    /// Never handed over, or deleted since
    No,
    /// `Image_Create_DM` succeeded
    Yes,
    /// A create or delete timed out; ask the hypervisor before acting
    Unknown,
}

impl Provisioning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provisioning::No => "no",
            Provisioning::Yes => "yes",
            Provisioning::Unknown => "unknown",
        }
    }
}

struct DomainInner {
    description: DomainDescription,
    state: DomainState,
    persistent: bool,
    provisioning: Provisioning,
    /// Set once the object has left the registry for good
    removed: bool,
    job: Option<JobKind>,
    started_at: Option<DateTime<Utc>>,
}

/// A domain known to the driver.
pub struct DomainObject {
    name: String,
    key: String,
    uuid: Uuid,
    /// Kept outside the lock so id lookups never wait on a transition
    id: AtomicI32,
    inner: Mutex<DomainInner>,
}

impl DomainObject {
    /// Create an object in the `Defined` state.
    pub fn new(description: DomainDescription, persistent: bool) -> Self {
        Self {
            name: description.name.clone(),
            key: description.userid(),
            uuid: description.uuid,
            id: AtomicI32::new(INACTIVE_ID),
            inner: Mutex::new(DomainInner {
                description,
                state: DomainState::Defined,
                persistent,
                provisioning: Provisioning::No,
                removed: false,
                job: None,
                started_at: None,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DomainInner>> {
        self.inner
            .lock()
            .map_err(|_| DriverError::Internal("Lock poisoned".to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry key: the z/VM user ID.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Numeric id, [`INACTIVE_ID`] unless running.
    pub fn id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.id() != INACTIVE_ID
    }

    pub fn state(&self) -> Result<DomainState> {
        Ok(self.lock()?.state)
    }

    pub fn is_persistent(&self) -> Result<bool> {
        Ok(self.lock()?.persistent)
    }

    pub fn description(&self) -> Result<DomainDescription> {
        Ok(self.lock()?.description.clone())
    }

    /// Reference handed back to callers.
    pub fn to_ref(&self) -> DomainRef {
        DomainRef {
            name: self.name.clone(),
            uuid: self.uuid,
            id: self.id(),
        }
    }

    pub fn info(&self) -> Result<DomainInfo> {
        let inner = self.lock()?;
        Ok(DomainInfo {
            name: self.name.clone(),
            uuid: self.uuid,
            id: self.id(),
            state: inner.state,
            persistent: inner.persistent,
            memory_mib: inner.description.memory_mib,
            max_memory_mib: inner.description.effective_max_memory_mib(),
            vcpus: inner.description.vcpus,
            started_at: inner.started_at,
        })
    }

    /// Claim the job marker for a transition.
    ///
    /// Fails with `DomainBusy` if another transition holds it and with
    /// `NotFound` if the object was removed after the caller looked it up.
    pub fn begin_job(&self, kind: JobKind) -> Result<JobGuard<'_>> {
        let mut inner = self.lock()?;
        if inner.removed {
            return Err(DriverError::NotFound(format!("domain '{}' was removed", self.name)));
        }
        if let Some(active) = inner.job {
            tracing::debug!(domain = %self.name, active = active.as_str(), wanted = kind.as_str(), "Domain busy");
            return Err(DriverError::DomainBusy(self.name.clone()));
        }
        inner.job = Some(kind);
        Ok(JobGuard { object: self, kind })
    }
}

impl std::fmt::Debug for DomainObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainObject")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("id", &self.id())
            .finish()
    }
}

/// Exclusive right to transition one domain.
///
/// All commits go through the guard, so only the job holder can change
/// the object's state.
pub struct JobGuard<'a> {
    object: &'a DomainObject,
    kind: JobKind,
}

impl<'a> JobGuard<'a> {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn object(&self) -> &'a DomainObject {
        self.object
    }

    pub fn state(&self) -> Result<DomainState> {
        self.object.state()
    }

    pub fn provisioning(&self) -> Result<Provisioning> {
        Ok(self.object.lock()?.provisioning)
    }

    /// Fail with `InvalidStateTransition` unless `allowed` accepts the current state.
    pub fn require(&self, action: &'static str, allowed: impl Fn(DomainState) -> bool) -> Result<DomainState> {
        let state = self.state()?;
        if allowed(state) {
            Ok(state)
        } else {
            Err(DriverError::InvalidStateTransition {
                name: self.object.name.clone(),
                state,
                action,
            })
        }
    }

    pub fn set_provisioning(&self, provisioning: Provisioning) -> Result<()> {
        self.object.lock()?.provisioning = provisioning;
        Ok(())
    }

    /// Replace the description of a persistent domain and return it to `Defined`.
    pub fn redefine(&self, description: DomainDescription) -> Result<()> {
        let mut inner = self.object.lock()?;
        if !inner.persistent {
            return Err(DriverError::InvalidStateTransition {
                name: self.object.name.clone(),
                state: inner.state,
                action: "redefine transient domain",
            });
        }
        inner.description = description;
        inner.state = DomainState::Defined;
        Ok(())
    }

    /// Commit entry into `Running` with a freshly allocated id.
    pub fn enter_running(&self, id: i32) -> Result<()> {
        let mut inner = self.object.lock()?;
        inner.state = DomainState::Running;
        inner.started_at = Some(Utc::now());
        self.object.id.store(id, Ordering::Release);
        Ok(())
    }

    /// Commit entry into `Shutoff`, dropping the id.
    pub fn enter_shutoff(&self) -> Result<()> {
        let mut inner = self.object.lock()?;
        inner.state = DomainState::Shutoff;
        self.object.id.store(INACTIVE_ID, Ordering::Release);
        Ok(())
    }

    /// Mark the object as gone; later `begin_job` calls fail with `NotFound`.
    pub fn mark_removed(&self) -> Result<()> {
        let mut inner = self.object.lock()?;
        inner.removed = true;
        self.object.id.store(INACTIVE_ID, Ordering::Release);
        Ok(())
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self
            .object
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.job = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object() -> DomainObject {
        DomainObject::new(DomainDescription::new("vm1").with_memory(32), false)
    }

    #[test]
    fn test_new_object_is_defined() {
        let obj = object();
        assert_eq!(obj.state().unwrap(), DomainState::Defined);
        assert_eq!(obj.id(), INACTIVE_ID);
        assert_eq!(obj.key(), "VM1");
        assert_eq!(obj.name(), "vm1");
        assert!(!obj.is_persistent().unwrap());
    }

    #[test]
    fn test_second_job_is_busy() {
        let obj = object();
        let job = obj.begin_job(JobKind::Start).unwrap();
        assert!(matches!(obj.begin_job(JobKind::Undefine), Err(DriverError::DomainBusy(_))));
        drop(job);
        assert!(obj.begin_job(JobKind::Undefine).is_ok());
    }

    #[test]
    fn test_running_and_shutoff() {
        let obj = object();
        let job = obj.begin_job(JobKind::Start).unwrap();
        job.enter_running(7).unwrap();
        drop(job);

        assert_eq!(obj.state().unwrap(), DomainState::Running);
        assert_eq!(obj.to_ref().id, 7);
        assert!(obj.info().unwrap().started_at.is_some());

        let job = obj.begin_job(JobKind::Start).unwrap();
        let err = job.require("start", |s| s.can_start()).unwrap_err();
        assert!(matches!(err, DriverError::InvalidStateTransition { state: DomainState::Running, .. }));
        job.enter_shutoff().unwrap();
        drop(job);

        assert_eq!(obj.state().unwrap(), DomainState::Shutoff);
        assert!(!obj.is_active());
    }

    #[test]
    fn test_redefine_returns_to_defined() {
        let obj = DomainObject::new(DomainDescription::new("vm1").with_memory(32), true);
        let job = obj.begin_job(JobKind::Start).unwrap();
        job.enter_running(3).unwrap();
        job.enter_shutoff().unwrap();
        job.redefine(DomainDescription::new("vm1").with_memory(64)).unwrap();
        drop(job);

        assert_eq!(obj.state().unwrap(), DomainState::Defined);
        assert_eq!(obj.description().unwrap().memory_mib, 64);
    }

    #[test]
    fn test_redefine_rejects_transient() {
        let obj = object();
        let job = obj.begin_job(JobKind::Define).unwrap();
        let err = job.redefine(DomainDescription::new("vm1").with_memory(64)).unwrap_err();
        assert!(matches!(err, DriverError::InvalidStateTransition { state: DomainState::Defined, .. }));
        assert_eq!(obj.lock().unwrap().description.memory_mib, 32);
    }

    #[test]
    fn test_removed_object_rejects_jobs() {
        let obj = object();
        obj.begin_job(JobKind::Undefine).unwrap().mark_removed().unwrap();
        assert!(matches!(obj.begin_job(JobKind::Start), Err(DriverError::NotFound(_))));
    }
}
