//! Domain registry.
//!
//! Both keys live in one map pair behind one lock, so a domain is either
//! reachable by name and by UUID or by neither. Names are keyed by their
//! z/VM user ID, which makes `vm1` and `VM1` the same domain.
//!
//! The registry never locks a domain object: ids are read atomically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{DomainObject, INACTIVE_ID};
use crate::error::{DriverError, Result};
use crate::types::DomainDescription;

#[derive(Default)]
struct RegistryMaps {
    by_name: HashMap<String, Arc<DomainObject>>,
    by_uuid: HashMap<Uuid, Arc<DomainObject>>,
}

/// Thread-safe collection of domain objects.
pub struct DomainRegistry {
    maps: RwLock<RegistryMaps>,
    next_id: AtomicI32,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(RegistryMaps::default()),
            next_id: AtomicI32::new(1),
        }
    }

    /// Create a `Defined` object for `description` and register it.
    pub fn add(&self, description: DomainDescription, persistent: bool) -> Result<Arc<DomainObject>> {
        let object = Arc::new(DomainObject::new(description, persistent));
        self.insert(object.clone())?;
        Ok(object)
    }

    /// Register an existing object under its name and UUID.
    ///
    /// Fails with `DuplicateIdentity`, leaving the registry unchanged, if
    /// either key is taken.
    pub fn insert(&self, object: Arc<DomainObject>) -> Result<()> {
        let mut maps = self.maps.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;

        if let Some(existing) = maps.by_name.get(object.key()) {
            return Err(DriverError::DuplicateIdentity(format!(
                "domain '{}' already exists with uuid {}",
                existing.name(),
                existing.uuid()
            )));
        }
        if let Some(existing) = maps.by_uuid.get(&object.uuid()) {
            return Err(DriverError::DuplicateIdentity(format!(
                "domain '{}' is already defined with uuid {}",
                existing.name(),
                object.uuid()
            )));
        }

        maps.by_name.insert(object.key().to_string(), object.clone());
        maps.by_uuid.insert(object.uuid(), object.clone());
        debug!(domain = %object.name(), uuid = %object.uuid(), "Domain registered");
        Ok(())
    }

    /// Remove `object` from both maps.
    ///
    /// Fails with `NotFound` if the registered object under its keys is not
    /// this one. Safe while the caller holds the object's own lock.
    pub fn remove(&self, object: &Arc<DomainObject>) -> Result<()> {
        let mut maps = self.maps.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;

        let by_name = maps.by_name.get(object.key()).is_some_and(|o| Arc::ptr_eq(o, object));
        let by_uuid = maps.by_uuid.get(&object.uuid()).is_some_and(|o| Arc::ptr_eq(o, object));
        if !(by_name && by_uuid) {
            return Err(DriverError::NotFound(format!("domain '{}' is not registered", object.name())));
        }

        maps.by_name.remove(object.key());
        maps.by_uuid.remove(&object.uuid());
        debug!(domain = %object.name(), uuid = %object.uuid(), "Domain unregistered");
        Ok(())
    }

    pub fn lookup_by_name(&self, name: &str) -> Result<Option<Arc<DomainObject>>> {
        let maps = self.maps.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        Ok(maps.by_name.get(&name.to_ascii_uppercase()).cloned())
    }

    pub fn lookup_by_uuid(&self, uuid: &Uuid) -> Result<Option<Arc<DomainObject>>> {
        let maps = self.maps.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        Ok(maps.by_uuid.get(uuid).cloned())
    }

    /// Find the running domain with numeric id `id`.
    pub fn lookup_by_id(&self, id: i32) -> Result<Option<Arc<DomainObject>>> {
        if id == INACTIVE_ID {
            return Ok(None);
        }
        let maps = self.maps.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        Ok(maps.by_uuid.values().find(|o| o.id() == id).cloned())
    }

    /// All domains, or only running ones, ordered by name.
    pub fn list(&self, active_only: bool) -> Result<Vec<Arc<DomainObject>>> {
        let maps = self.maps.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        let mut objects: Vec<_> = maps
            .by_name
            .values()
            .filter(|o| !active_only || o.is_active())
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(objects)
    }

    pub fn count(&self, active_only: bool) -> Result<usize> {
        let maps = self.maps.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        Ok(maps.by_name.values().filter(|o| !active_only || o.is_active()).count())
    }

    /// Next numeric id for a domain entering `Running`.
    ///
    /// Ids stay positive: after `i32::MAX` allocation starts over at 1.
    pub fn allocate_id(&self) -> i32 {
        let next = |id: i32| Some(id.checked_add(1).unwrap_or(1));
        match self.next_id.fetch_update(Ordering::Relaxed, Ordering::Relaxed, next) {
            Ok(id) | Err(id) => id,
        }
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;

    fn desc(name: &str, uuid: u128) -> DomainDescription {
        DomainDescription::new(name).with_uuid(Uuid::from_u128(uuid))
    }

    #[test]
    fn test_duplicates_leave_registry_unchanged() {
        let registry = DomainRegistry::new();
        let first = registry.add(desc("vm1", 1), false).unwrap();

        // Same name, differently cased.
        assert!(matches!(registry.add(desc("VM1", 2), false), Err(DriverError::DuplicateIdentity(_))));
        // Same UUID.
        assert!(matches!(registry.add(desc("vm2", 1), false), Err(DriverError::DuplicateIdentity(_))));

        assert_eq!(registry.count(false).unwrap(), 1);
        assert!(registry.lookup_by_uuid(&Uuid::from_u128(2)).unwrap().is_none());
        assert!(registry.lookup_by_name("vm2").unwrap().is_none());
        let by_name = registry.lookup_by_name("vm1").unwrap().unwrap();
        assert!(Arc::ptr_eq(&by_name, &first));
    }

    #[test]
    fn test_both_keys_resolve_to_same_object() {
        let registry = DomainRegistry::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            registry.add(desc(name, i as u128 + 10), true).unwrap();
        }
        for object in registry.list(false).unwrap() {
            let by_name = registry.lookup_by_name(object.name()).unwrap().unwrap();
            let by_uuid = registry.lookup_by_uuid(&object.uuid()).unwrap().unwrap();
            assert!(Arc::ptr_eq(&by_name, &by_uuid));
        }
    }

    #[test]
    fn test_remove_and_stale_reference() {
        let registry = DomainRegistry::new();
        let object = registry.add(desc("vm1", 1), false).unwrap();

        registry.remove(&object).unwrap();
        assert!(registry.lookup_by_name("vm1").unwrap().is_none());
        assert!(registry.lookup_by_uuid(&object.uuid()).unwrap().is_none());
        assert!(matches!(registry.remove(&object), Err(DriverError::NotFound(_))));

        // A new object under the same keys does not make the old one current.
        registry.add(desc("vm1", 1), false).unwrap();
        assert!(matches!(registry.remove(&object), Err(DriverError::NotFound(_))));
        assert_eq!(registry.count(false).unwrap(), 1);
    }

    #[test]
    fn test_remove_while_object_job_held() {
        let registry = DomainRegistry::new();
        let object = registry.add(desc("vm1", 1), false).unwrap();
        let job = object.begin_job(JobKind::Undefine).unwrap();
        registry.remove(&object).unwrap();
        drop(job);
    }

    #[test]
    fn test_lookup_by_id_and_active_list() {
        let registry = DomainRegistry::new();
        let a = registry.add(desc("a", 1), true).unwrap();
        registry.add(desc("b", 2), true).unwrap();

        let id = registry.allocate_id();
        assert!(id >= 1);
        a.begin_job(JobKind::Start).unwrap().enter_running(id).unwrap();

        let found = registry.lookup_by_id(id).unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &a));
        assert!(registry.lookup_by_id(INACTIVE_ID).unwrap().is_none());
        assert_eq!(registry.count(true).unwrap(), 1);
        assert_eq!(registry.list(true).unwrap().len(), 1);
        assert_eq!(registry.list(false).unwrap().len(), 2);
        assert_ne!(registry.allocate_id(), id);
    }

    #[test]
    fn test_id_allocation_never_reaches_inactive_id() {
        let registry = DomainRegistry::new();
        registry.next_id.store(i32::MAX, Ordering::Relaxed);

        assert_eq!(registry.allocate_id(), i32::MAX);
        assert_eq!(registry.allocate_id(), 1);
        assert_eq!(registry.allocate_id(), 2);
    }
}
