//! Mock host registry
//!
//! [`MockHost`] delegates to real in-memory [`Registries`], records every
//! mutating call in order, and fails calls for ids the test marks as broken.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serac_core::{EntityId, DOMAIN};
use serac_registries::{
    DeviceDescriptor, DeviceIdentifier, EntityDescriptor, HostRegistry, RegisteredSet,
    Registries, RegistryError, RegistryResult,
};

/// One mutating host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    RegisterDevice(String),
    RegisterEntity(String),
    RemoveEntity(String),
    RemoveDevice(String),
    Rename(String, String),
}

#[derive(Default)]
pub struct MockHost {
    pub registries: Registries,
    ops: Mutex<Vec<Op>>,
    failing: Mutex<HashSet<String>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call touching `id` (entity id or device identifier) fails
    pub fn fail_on(&self, id: impl Into<String>) {
        self.failing.lock().unwrap().insert(id.into());
    }

    /// Clear every injected failure
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn has_entity(&self, entity_id: &str) -> bool {
        self.registries.entities.is_registered(entity_id)
    }

    pub fn has_device(&self, identifier: &str) -> bool {
        self.registries
            .devices
            .get_by_identifier(DOMAIN, identifier)
            .is_some()
    }

    /// Register an entity the way an older release did, bypassing id checks
    pub fn seed_legacy_entity(
        &self,
        entry_id: &str,
        entity_id: &str,
        unique_id: &str,
        device_identifier: &str,
    ) {
        let device = self.registries.devices.get_or_create(
            DeviceIdentifier::new(DOMAIN, device_identifier),
            Some(entry_id),
            None,
        );
        self.registries.entities.get_or_create(
            DOMAIN,
            entity_id,
            Some(unique_id),
            Some(entry_id),
            Some(device.id.as_str()),
        );
    }

    fn check(&self, id: &str) -> RegistryResult<()> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(RegistryError::Unavailable(format!("injected failure for {}", id)));
        }
        Ok(())
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl HostRegistry for MockHost {
    async fn register_device(
        &self,
        entry_id: &str,
        device: &DeviceDescriptor,
    ) -> RegistryResult<()> {
        self.check(&device.identifier)?;
        self.registries.register_device(entry_id, device).await?;
        self.record(Op::RegisterDevice(device.identifier.clone()));
        Ok(())
    }

    async fn register_entity(
        &self,
        entry_id: &str,
        entity: &EntityDescriptor,
    ) -> RegistryResult<()> {
        let entity_id = entity.entity_id.to_string();
        self.check(&entity_id)?;
        self.registries.register_entity(entry_id, entity).await?;
        self.record(Op::RegisterEntity(entity_id));
        Ok(())
    }

    async fn remove_entity(&self, entity_id: &str) -> RegistryResult<()> {
        self.check(entity_id)?;
        self.registries.remove_entity(entity_id).await?;
        self.record(Op::RemoveEntity(entity_id.to_string()));
        Ok(())
    }

    async fn remove_device(&self, identifier: &str) -> RegistryResult<()> {
        self.check(identifier)?;
        self.registries.remove_device(identifier).await?;
        self.record(Op::RemoveDevice(identifier.to_string()));
        Ok(())
    }

    async fn list_registered_for(&self, entry_id: &str) -> RegistryResult<RegisteredSet> {
        self.registries.list_registered_for(entry_id).await
    }

    async fn rename_entity(
        &self,
        entity_id: &str,
        new_entity_id: &EntityId,
    ) -> RegistryResult<()> {
        self.check(entity_id)?;
        self.registries.rename_entity(entity_id, new_entity_id).await?;
        self.record(Op::Rename(entity_id.to_string(), new_entity_id.to_string()));
        Ok(())
    }
}
