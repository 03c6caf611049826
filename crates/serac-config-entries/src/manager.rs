//! Config Entries Manager
//!
//! Holds every location entry and tells subscribers how each one changed.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::entry::{
    is_valid_prefix, ConfigEntryState, ConfigurationEntry, EntryOptions, EntryValidationError,
};
use crate::state_machine::InvalidTransition;

/// How many change notifications a slow subscriber may fall behind by
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for location {0}")]
    AlreadyExists(String),

    #[error("Entity prefix '{0}' is already used by another entry")]
    PrefixInUse(String),

    #[error("Invalid entry: {0}")]
    Invalid(#[from] EntryValidationError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// One change to the set of entries
///
/// Every variant carries immutable snapshots; `Updated` and `PrefixMigrated`
/// carry the entry as it was before and after the change.
#[derive(Debug, Clone)]
pub enum ConfigChange {
    Added(Arc<ConfigurationEntry>),
    Updated {
        old: Arc<ConfigurationEntry>,
        new: Arc<ConfigurationEntry>,
    },
    PrefixMigrated {
        old: Arc<ConfigurationEntry>,
        new: Arc<ConfigurationEntry>,
    },
    Removed(Arc<ConfigurationEntry>),
}

impl ConfigChange {
    pub fn entry_id(&self) -> &str {
        match self {
            ConfigChange::Added(entry) | ConfigChange::Removed(entry) => &entry.entry_id,
            ConfigChange::Updated { new, .. } | ConfigChange::PrefixMigrated { new, .. } => {
                &new.entry_id
            }
        }
    }
}

/// Config Entries Manager
///
/// Manages:
/// - Entry creation and removal
/// - Option updates and prefix migration
/// - Lifecycle state
/// - Change notification to subscribers
pub struct ConfigEntries {
    /// Primary index: entry_id -> ConfigurationEntry
    entries: DashMap<String, ConfigurationEntry>,

    /// Index: "{lat}_{lon}" -> entry_id
    by_unique_id: DashMap<String, String>,

    /// Index: entity prefix -> entry_id
    by_prefix: DashMap<String, String>,

    /// Serializes mutations so each notification pairs the right old/new
    write_lock: Mutex<()>,

    changes: broadcast::Sender<ConfigChange>,
}

impl Default for ConfigEntries {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigEntries {
    /// Create a new config entries manager
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            by_unique_id: DashMap::new(),
            by_prefix: DashMap::new(),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Receive every change made after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: ConfigChange) {
        let entry_id = change.entry_id().to_string();
        if self.changes.send(change).is_err() {
            debug!("No subscribers for change to entry {}", entry_id);
        }
    }

    fn index_entry(&self, entry: &ConfigurationEntry) {
        let entry_id = entry.entry_id.clone();
        self.entries.insert(entry_id.clone(), entry.clone());
        self.by_unique_id.insert(entry.unique_id(), entry_id.clone());
        self.by_prefix.insert(entry.entity_prefix.clone(), entry_id);
    }

    fn unindex_entry(&self, entry: &ConfigurationEntry) {
        self.by_unique_id.remove(&entry.unique_id());
        self.by_prefix.remove(&entry.entity_prefix);
        self.entries.remove(&entry.entry_id);
    }

    /// Get an entry by ID
    pub fn get(&self, entry_id: &str) -> Option<ConfigurationEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    /// Get entry by unique_id ("{lat}_{lon}")
    pub fn get_by_unique_id(&self, unique_id: &str) -> Option<ConfigurationEntry> {
        self.by_unique_id
            .get(unique_id)
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Get entry owning an entity prefix
    pub fn get_by_prefix(&self, prefix: &str) -> Option<ConfigurationEntry> {
        self.by_prefix
            .get(prefix)
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry
    pub async fn add(&self, entry: ConfigurationEntry) -> ConfigEntriesResult<ConfigurationEntry> {
        let _lock = self.write_lock.lock().await;

        entry.validate()?;
        if self.by_unique_id.contains_key(&entry.unique_id()) {
            return Err(ConfigEntriesError::AlreadyExists(entry.unique_id()));
        }
        if self.by_prefix.contains_key(&entry.entity_prefix) {
            return Err(ConfigEntriesError::PrefixInUse(entry.entity_prefix.clone()));
        }

        self.index_entry(&entry);
        info!(
            "Added config entry: {} ({}) [{}]",
            entry.location_name,
            entry.unique_id(),
            entry.entry_id
        );

        self.notify(ConfigChange::Added(Arc::new(entry.clone())));
        Ok(entry)
    }

    /// Replace the options of an existing entry
    ///
    /// Notifies subscribers even when nothing changed; consumers are expected
    /// to treat a redundant notification as a no-op.
    pub async fn update_options(
        &self,
        entry_id: &str,
        options: EntryOptions,
    ) -> ConfigEntriesResult<ConfigurationEntry> {
        let _lock = self.write_lock.lock().await;

        let old = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let mut updated = old.clone();
        updated.massif_ids = options.massif_ids;
        updated.bulletin_token = options.bulletin_token;
        updated.alert_token = options.alert_token;
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        debug!(
            "Updated options for entry {}: {} massifs, bulletin token {}, alert token {}",
            entry_id,
            updated.massif_ids.len(),
            if updated.has_bulletin_token() { "set" } else { "unset" },
            if updated.has_alert_token() { "set" } else { "unset" },
        );

        self.notify(ConfigChange::Updated {
            old: Arc::new(old),
            new: Arc::new(updated.clone()),
        });
        Ok(updated)
    }

    /// Move an entry to a new entity prefix
    ///
    /// This is the only way a prefix changes once an entry exists. Subscribers
    /// receive a `PrefixMigrated` change and are responsible for renaming the
    /// registered entities.
    pub async fn migrate_prefix(
        &self,
        entry_id: &str,
        new_prefix: &str,
    ) -> ConfigEntriesResult<ConfigurationEntry> {
        let _lock = self.write_lock.lock().await;

        let old = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if old.entity_prefix == new_prefix {
            debug!("Entry {} already uses prefix {}", entry_id, new_prefix);
            return Ok(old);
        }
        if !is_valid_prefix(new_prefix) {
            return Err(EntryValidationError::Prefix(new_prefix.to_string()).into());
        }
        if self.by_prefix.contains_key(new_prefix) {
            return Err(ConfigEntriesError::PrefixInUse(new_prefix.to_string()));
        }

        self.unindex_entry(&old);
        let mut migrated = old.clone();
        migrated.entity_prefix = new_prefix.to_string();
        migrated.modified_at = Utc::now();
        self.index_entry(&migrated);

        info!(
            "Migrated entry {} prefix: {} -> {}",
            entry_id, old.entity_prefix, new_prefix
        );

        self.notify(ConfigChange::PrefixMigrated {
            old: Arc::new(old),
            new: Arc::new(migrated.clone()),
        });
        Ok(migrated)
    }

    /// Remove an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigurationEntry> {
        let _lock = self.write_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);
        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.location_name,
            entry.unique_id(),
            entry_id
        );

        self.notify(ConfigChange::Removed(Arc::new(entry.clone())));
        Ok(entry)
    }

    /// Move an entry through its lifecycle
    pub fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let from = entry.state;
        if let Err(e) = entry.try_set_state(state, reason) {
            warn!("Entry {}: {}", entry_id, e);
            return Err(e.into());
        }
        debug!("Entry {} state changed {:?} -> {:?}", entry_id, from, state);
        Ok(())
    }

    /// Get all entry IDs
    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Get count of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = ConfigurationEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }
}
