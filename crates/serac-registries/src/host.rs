//! Host registry contract
//!
//! The coordination layer never touches [`EntityRegistry`](crate::EntityRegistry)
//! or [`DeviceRegistry`](crate::DeviceRegistry) directly. It goes through
//! [`HostRegistry`], which is also the seam tests use to inject failures.
//! No call is assumed to be atomic with any other; callers sequence entity
//! and device operations themselves.

use async_trait::async_trait;
use serac_core::EntityId;
use serde::Serialize;
use thiserror::Error;

/// Errors reported by the host registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("entity id already taken: {0}")]
    EntityIdTaken(String),

    #[error("device {device} still owns {count} entities")]
    DeviceHasEntities { device: String, count: usize },

    #[error("host registry unavailable: {0}")]
    Unavailable(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// What a device should look like once registered
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceDescriptor {
    /// Identifier within the integration domain (e.g. `serac_45.92_6.87`)
    pub identifier: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

/// What an entity should look like once registered
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityDescriptor {
    pub entity_id: EntityId,
    pub unique_id: String,
    pub name: String,
    /// Identifier of the owning device
    pub device_identifier: String,
}

/// One entity as the host currently has it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredEntity {
    /// Raw id; may not be compliant if an older release registered it
    pub entity_id: String,
    pub unique_id: Option<String>,
    pub device_identifier: Option<String>,
}

/// One device as the host currently has it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredDevice {
    pub identifier: String,
    pub name: Option<String>,
}

/// Everything the host has registered for one config entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegisteredSet {
    pub entities: Vec<RegisteredEntity>,
    pub devices: Vec<RegisteredDevice>,
}

impl RegisteredSet {
    pub fn has_entity(&self, entity_id: &str) -> bool {
        self.entities.iter().any(|e| e.entity_id == entity_id)
    }

    pub fn has_device(&self, identifier: &str) -> bool {
        self.devices.iter().any(|d| d.identifier == identifier)
    }

    pub fn entity_by_unique_id(&self, unique_id: &str) -> Option<&RegisteredEntity> {
        self.entities
            .iter()
            .find(|e| e.unique_id.as_deref() == Some(unique_id))
    }

    /// Entities currently attached to `identifier`
    pub fn entities_of(&self, identifier: &str) -> impl Iterator<Item = &RegisteredEntity> + '_ {
        let identifier = identifier.to_string();
        self.entities
            .iter()
            .filter(move |e| e.device_identifier.as_deref() == Some(identifier.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.devices.is_empty()
    }
}

/// The host platform's entity/device registry as seen by the integration
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Register (or re-link) a device for `entry_id`
    async fn register_device(&self, entry_id: &str, device: &DeviceDescriptor)
        -> RegistryResult<()>;

    /// Register an entity for `entry_id`. The owning device must exist.
    async fn register_entity(&self, entry_id: &str, entity: &EntityDescriptor)
        -> RegistryResult<()>;

    /// Remove one entity
    async fn remove_entity(&self, entity_id: &str) -> RegistryResult<()>;

    /// Remove one device. Fails while entities still reference it.
    async fn remove_device(&self, identifier: &str) -> RegistryResult<()>;

    /// Everything registered under `entry_id`
    async fn list_registered_for(&self, entry_id: &str) -> RegistryResult<RegisteredSet>;

    /// Move an entity to a new id, keeping its unique_id and links
    async fn rename_entity(&self, entity_id: &str, new_entity_id: &EntityId)
        -> RegistryResult<()>;
}
