//! Serac Registries
//!
//! This crate provides the in-memory registries the integration registers
//! into:
//! - Entities (EntityRegistry)
//! - Devices (DeviceRegistry)
//!
//! and the [`HostRegistry`] contract the coordination layer programs against.
//! Nothing is persisted; the host owns durability.

pub mod device_registry;
pub mod entity_registry;
pub mod host;

pub use device_registry::{DeviceEntry, DeviceEntryType, DeviceIdentifier, DeviceRegistry};
pub use entity_registry::{EntityEntry, EntityRegistry, EntityRegistryError};
pub use host::{
    DeviceDescriptor, EntityDescriptor, HostRegistry, RegisteredDevice, RegisteredEntity,
    RegisteredSet, RegistryError, RegistryResult,
};

use async_trait::async_trait;
use serac_core::{EntityId, DOMAIN};
use tracing::debug;

/// Both registries bundled together
#[derive(Default)]
pub struct Registries {
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    fn device_identifier_of(&self, device_id: &str) -> Option<String> {
        self.devices
            .get(device_id)
            .and_then(|d| d.identifier_for(DOMAIN).map(String::from))
    }
}

#[async_trait]
impl HostRegistry for Registries {
    async fn register_device(
        &self,
        entry_id: &str,
        device: &DeviceDescriptor,
    ) -> RegistryResult<()> {
        let entry = self.devices.get_or_create(
            DeviceIdentifier::new(DOMAIN, &device.identifier),
            Some(entry_id),
            Some(device.name.as_str()),
        );
        if entry.manufacturer.is_none() || entry.model.is_none() {
            self.devices.update(&entry.id, |e| {
                e.manufacturer = Some(device.manufacturer.clone());
                e.model = Some(device.model.clone());
                e.entry_type = Some(DeviceEntryType::Service);
            });
        }
        Ok(())
    }

    async fn register_entity(
        &self,
        entry_id: &str,
        entity: &EntityDescriptor,
    ) -> RegistryResult<()> {
        let device = self
            .devices
            .get_by_identifier(DOMAIN, &entity.device_identifier)
            .ok_or_else(|| RegistryError::DeviceNotFound(entity.device_identifier.clone()))?;

        let entity_id = entity.entity_id.to_string();
        if let Some(holder) = self.entities.get(&entity_id) {
            if holder.unique_id.as_deref() != Some(entity.unique_id.as_str()) {
                return Err(RegistryError::EntityIdTaken(entity_id));
            }
        }

        let entry = self.entities.get_or_create(
            DOMAIN,
            &entity_id,
            Some(entity.unique_id.as_str()),
            Some(entry_id),
            Some(device.id.as_str()),
        );
        if entry.original_name.is_none() {
            let _ = self.entities.update(&entry.entity_id, |e| {
                e.original_name = Some(entity.name.clone());
            });
        }
        Ok(())
    }

    async fn remove_entity(&self, entity_id: &str) -> RegistryResult<()> {
        self.entities
            .remove(entity_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::EntityNotFound(entity_id.to_string()))
    }

    async fn remove_device(&self, identifier: &str) -> RegistryResult<()> {
        let device = self
            .devices
            .get_by_identifier(DOMAIN, identifier)
            .ok_or_else(|| RegistryError::DeviceNotFound(identifier.to_string()))?;

        let count = self.entities.get_by_device_id(&device.id).len();
        if count > 0 {
            return Err(RegistryError::DeviceHasEntities {
                device: identifier.to_string(),
                count,
            });
        }

        self.devices.remove(&device.id);
        Ok(())
    }

    async fn list_registered_for(&self, entry_id: &str) -> RegistryResult<RegisteredSet> {
        let entities = self
            .entities
            .get_by_config_entry_id(entry_id)
            .into_iter()
            .map(|e| RegisteredEntity {
                entity_id: e.entity_id.clone(),
                unique_id: e.unique_id.clone(),
                device_identifier: e
                    .device_id
                    .as_deref()
                    .and_then(|id| self.device_identifier_of(id)),
            })
            .collect();

        let devices = self
            .devices
            .get_by_config_entry_id(entry_id)
            .into_iter()
            .filter_map(|d| {
                d.identifier_for(DOMAIN).map(|identifier| RegisteredDevice {
                    identifier: identifier.to_string(),
                    name: d.name.clone(),
                })
            })
            .collect();

        let set = RegisteredSet { entities, devices };
        debug!(
            "Entry {} has {} entities and {} devices registered",
            entry_id,
            set.entities.len(),
            set.devices.len()
        );
        Ok(set)
    }

    async fn rename_entity(&self, entity_id: &str, new_entity_id: &EntityId) -> RegistryResult<()> {
        self.entities
            .rename(entity_id, &new_entity_id.to_string())
            .map(|_| ())
            .map_err(|e| match e {
                EntityRegistryError::NotFound(id) => RegistryError::EntityNotFound(id),
                EntityRegistryError::AlreadyRegistered(id) => RegistryError::EntityIdTaken(id),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_device() -> DeviceDescriptor {
        DeviceDescriptor {
            identifier: "serac_45.92_6.87".into(),
            name: "Chamonix (Serac)".into(),
            manufacturer: "Météo-France".into(),
            model: "Mountain Weather Station".into(),
        }
    }

    fn humidity() -> EntityDescriptor {
        EntityDescriptor {
            entity_id: "sensor.serac_chamonix_humidity".parse().unwrap(),
            unique_id: "serac_45.92_6.87_humidity".into(),
            name: "Humidity".into(),
            device_identifier: "serac_45.92_6.87".into(),
        }
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registries = Registries::new();
        registries.register_device("e1", &main_device()).await.unwrap();
        registries.register_entity("e1", &humidity()).await.unwrap();
        // Registering twice is harmless
        registries.register_entity("e1", &humidity()).await.unwrap();

        let set = registries.list_registered_for("e1").await.unwrap();
        assert_eq!(set.entities.len(), 1);
        assert_eq!(set.devices.len(), 1);
        assert_eq!(
            set.entities[0].device_identifier.as_deref(),
            Some("serac_45.92_6.87")
        );
        let device = registries
            .devices
            .get_by_identifier(DOMAIN, "serac_45.92_6.87")
            .unwrap();
        assert_eq!(device.model.as_deref(), Some("Mountain Weather Station"));
        assert!(registries.list_registered_for("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entity_requires_device() {
        let registries = Registries::new();
        let result = registries.register_entity("e1", &humidity()).await;
        assert!(matches!(result, Err(RegistryError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_device_removal_refused_while_entities_remain() {
        let registries = Registries::new();
        registries.register_device("e1", &main_device()).await.unwrap();
        registries.register_entity("e1", &humidity()).await.unwrap();

        let result = registries.remove_device("serac_45.92_6.87").await;
        assert!(matches!(
            result,
            Err(RegistryError::DeviceHasEntities { count: 1, .. })
        ));

        registries
            .remove_entity("sensor.serac_chamonix_humidity")
            .await
            .unwrap();
        registries.remove_device("serac_45.92_6.87").await.unwrap();
        assert!(registries.devices.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_entity_id() {
        let registries = Registries::new();
        registries.register_device("e1", &main_device()).await.unwrap();
        registries.register_entity("e1", &humidity()).await.unwrap();

        let mut other = humidity();
        other.unique_id = "something_else".into();
        let result = registries.register_entity("e1", &other).await;
        assert!(matches!(result, Err(RegistryError::EntityIdTaken(_))));
    }
}
