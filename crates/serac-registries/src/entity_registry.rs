//! Entity Registry
//!
//! Tracks all registered entities with unique_id tracking, device linking,
//! and multiple indexes for fast lookups.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur in the entity registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    /// Entity was not found
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Target entity_id is already taken
    #[error("Entity already registered: {0}")]
    AlreadyRegistered(String),
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal ULID
    pub id: String,
    /// Full entity ID (domain.object_id)
    ///
    /// Kept as a plain string: the registry has to be able to hold ids that
    /// older releases registered before identifier rules were enforced.
    pub entity_id: String,
    /// Platform-specific unique identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Parent device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Config entry that created this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// Component/platform that provides this entity
    pub platform: String,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modified timestamp
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Create a new entity entry with minimal required fields
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id,
            device_id: None,
            config_entry_id: None,
            original_name: None,
            platform: platform.into(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Get the domain from entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }
}

/// Entity Registry with multi-index support
///
/// Provides O(1) lookups by:
/// - entity_id (primary)
/// - unique_id
/// - device_id (multi)
/// - config_entry_id (multi)
///
/// Entries are stored as `Arc<EntityEntry>` to avoid cloning on reads.
pub struct EntityRegistry {
    /// Primary index: entity_id -> EntityEntry
    /// IndexMap keeps registration order for stable listings
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: unique_id -> entity_id
    by_unique_id: DashMap<String, String>,

    /// Index: device_id -> set of entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: config_entry_id -> set of entity_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    /// Create a new entity registry
    pub fn new() -> Self {
        Self {
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
            by_device_id: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    /// Index an entry in all indexes
    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert(unique_id.clone(), entity_id.clone());
        }

        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    /// Remove an entry from the secondary indexes
    fn unindex_secondary(&self, entry: &EntityEntry) {
        let entity_id = &entry.entity_id;

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.remove(unique_id);
        }

        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(entity_id);
            }
        }

        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(entity_id);
            }
        }
    }

    /// Get entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Get entity by unique_id
    pub fn get_by_unique_id(&self, unique_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_unique_id
            .get(unique_id)
            .and_then(|entity_id| self.get(&entity_id))
    }

    /// Get all entities for a device
    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get all entities for a config entry
    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create an entity entry
    ///
    /// If an entity with the same unique_id exists, returns it unchanged.
    /// Otherwise creates a new entry.
    pub fn get_or_create(
        &self,
        platform: &str,
        entity_id: &str,
        unique_id: Option<&str>,
        config_entry_id: Option<&str>,
        device_id: Option<&str>,
    ) -> Arc<EntityEntry> {
        if let Some(uid) = unique_id {
            if let Some(existing) = self.get_by_unique_id(uid) {
                debug!("Found existing entity by unique_id: {}", existing.entity_id);
                return existing;
            }
        }

        if let Some(existing) = self.get(entity_id) {
            if existing.unique_id.is_none() && unique_id.is_some() {
                if let Ok(updated) = self.update(entity_id, |entry| {
                    entry.unique_id = unique_id.map(String::from);
                    entry.modified_at = Utc::now();
                }) {
                    return updated;
                }
            }
            return existing;
        }

        let mut entry = EntityEntry::new(entity_id, platform, unique_id.map(String::from));
        entry.config_entry_id = config_entry_id.map(String::from);
        entry.device_id = device_id.map(String::from);

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("Registered new entity: {}", entity_id);
        arc_entry
    }

    /// Update an entity entry
    ///
    /// The closure receives a mutable copy; the result replaces the stored
    /// entry and all indexes are rebuilt for it. Changing `entity_id` inside
    /// the closure is how a rename happens.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let arc_entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id));

        let Some(arc_entry) = arc_entry else {
            return Err(EntityRegistryError::NotFound(entity_id.to_string()));
        };

        self.unindex_secondary(&arc_entry);

        let mut entry = (*arc_entry).clone();
        f(&mut entry);

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));
        Ok(new_arc)
    }

    /// Move an entity to a new entity_id, keeping its internal id and links
    pub fn rename(
        &self,
        entity_id: &str,
        new_entity_id: &str,
    ) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        if self.is_registered(new_entity_id) {
            return Err(EntityRegistryError::AlreadyRegistered(
                new_entity_id.to_string(),
            ));
        }
        let renamed = self.update(entity_id, |entry| {
            entry.entity_id = new_entity_id.to_string();
            entry.modified_at = Utc::now();
        })?;
        info!("Renamed entity: {} -> {}", entity_id, new_entity_id);
        Ok(renamed)
    }

    /// Remove an entity
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let arc_entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id));

        if let Some(arc_entry) = arc_entry {
            self.unindex_secondary(&arc_entry);
            info!("Removed entity: {}", entity_id);
            Some(arc_entry)
        } else {
            None
        }
    }

    /// Get all entity IDs
    pub fn entity_ids(&self) -> Vec<String> {
        self.by_entity_id
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get count of registered entities
    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if an entity_id is registered
    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    /// Snapshot of all entries in registration order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_keyed_by_unique_id() {
        let registry = EntityRegistry::new();
        let first = registry.get_or_create(
            "serac",
            "sensor.serac_chamonix_humidity",
            Some("serac_45.92_6.87_humidity"),
            Some("entry1"),
            Some("dev1"),
        );
        let second = registry.get_or_create(
            "serac",
            "sensor.other_name",
            Some("serac_45.92_6.87_humidity"),
            Some("entry1"),
            Some("dev1"),
        );
        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_by_device_id("dev1").len(), 1);
        assert_eq!(registry.get_by_config_entry_id("entry1").len(), 1);
    }

    #[test]
    fn test_remove_clears_indexes() {
        let registry = EntityRegistry::new();
        registry.get_or_create("serac", "sensor.a", Some("uid_a"), Some("e"), Some("d"));
        assert!(registry.remove("sensor.a").is_some());
        assert!(registry.get_by_unique_id("uid_a").is_none());
        assert!(registry.get_by_device_id("d").is_empty());
        assert!(registry.get_by_config_entry_id("e").is_empty());
        assert!(registry.remove("sensor.a").is_none());
    }

    #[test]
    fn test_rename() {
        let registry = EntityRegistry::new();
        let original =
            registry.get_or_create("serac", "sensor.serac_old_humidity", Some("uid"), Some("e"), None);
        let renamed = registry
            .rename("sensor.serac_old_humidity", "sensor.serac_new_humidity")
            .unwrap();
        assert_eq!(renamed.id, original.id);
        assert!(!registry.is_registered("sensor.serac_old_humidity"));
        assert_eq!(
            registry.get_by_unique_id("uid").unwrap().entity_id,
            "sensor.serac_new_humidity"
        );
    }

    #[test]
    fn test_rename_onto_taken_id_fails() {
        let registry = EntityRegistry::new();
        registry.get_or_create("serac", "sensor.a", Some("ua"), None, None);
        registry.get_or_create("serac", "sensor.b", Some("ub"), None, None);
        assert_eq!(
            registry.rename("sensor.a", "sensor.b").unwrap_err(),
            EntityRegistryError::AlreadyRegistered("sensor.b".into())
        );
        assert!(registry.is_registered("sensor.a"));
    }
}
