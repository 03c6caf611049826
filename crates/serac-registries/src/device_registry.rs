//! Device Registry
//!
//! Tracks registered devices by identifier, with a config entry index so a
//! whole entry's devices can be listed or torn down.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Device entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEntryType {
    /// Service device (virtual)
    Service,
}

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    /// Create a key for indexing
    pub fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal UUID
    pub id: String,

    /// Unique identifiers by domain (e.g., [["serac", "serac_45.92_6.87"]])
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    /// Associated config entries
    #[serde(default)]
    pub config_entries: Vec<String>,

    /// Device name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Manufacturer name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    /// Model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Entry type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<DeviceEntryType>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last modified timestamp
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    /// Create a new device entry with the current time
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            config_entries: Vec::new(),
            name: name.map(|s| s.to_string()),
            manufacturer: None,
            model: None,
            entry_type: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// First identifier registered for `domain`
    pub fn identifier_for(&self, domain: &str) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|i| i.domain() == domain)
            .map(|i| i.id())
    }
}

/// Device Registry with multi-index support
///
/// Provides O(1) lookups by:
/// - id (primary)
/// - identifier
/// - config_entry_id (multi)
pub struct DeviceRegistry {
    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device_id
    by_identifier: DashMap<String, String>,

    /// Index: config_entry_id -> set of device_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Create a new device registry
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_config_entry_id: DashMap::new(),
        }
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier
                .insert(identifier.key(), device_id.clone());
        }

        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        let device_id = &entry.id;

        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }

        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(device_id);
            }
        }

        self.by_id.remove(device_id);
    }

    /// Get device by ID
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Get device by identifier
    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let key = format!("{}:{}", domain, id);
        self.by_identifier
            .get(&key)
            .and_then(|device_id| self.get(&device_id))
    }

    /// Get all devices for a config entry
    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create a device
    ///
    /// An existing device found by identifier is linked to `config_entry_id`
    /// if it was not already; its other fields are left alone.
    pub fn get_or_create(
        &self,
        identifier: DeviceIdentifier,
        config_entry_id: Option<&str>,
        name: Option<&str>,
    ) -> Arc<DeviceEntry> {
        if let Some(existing) = self.get_by_identifier(identifier.domain(), identifier.id()) {
            debug!("Found existing device by identifier: {}", existing.id);
            let needs_link = config_entry_id
                .map(|ce| !existing.config_entries.iter().any(|c| c == ce))
                .unwrap_or(false);
            if needs_link {
                if let Some(updated) = self.update(&existing.id, |e| {
                    if let Some(ce) = config_entry_id {
                        e.config_entries.push(ce.to_string());
                    }
                }) {
                    return updated;
                }
            }
            return existing;
        }

        let mut entry = DeviceEntry::new(name);
        entry.identifiers.push(identifier);
        if let Some(config_id) = config_entry_id {
            entry.config_entries.push(config_id.to_string());
        }

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("Registered new device: {:?} ({})", name, arc_entry.id);
        arc_entry
    }

    /// Update a device entry; `modified_at` is bumped automatically
    pub fn update<F>(&self, device_id: &str, f: F) -> Option<Arc<DeviceEntry>>
    where
        F: FnOnce(&mut DeviceEntry),
    {
        let (_, arc_entry) = self.by_id.remove(device_id)?;
        self.unindex_entry(&arc_entry);

        let mut entry = (*arc_entry).clone();
        f(&mut entry);
        entry.modified_at = Utc::now();

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));
        Some(new_arc)
    }

    /// Remove a device
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);
        info!("Removed device: {:?} ({})", entry.name, device_id);
        Some(entry)
    }

    /// Get count of registered devices
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
