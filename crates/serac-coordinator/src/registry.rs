//! Coordinator Registry
//!
//! Owns every running engine, grouped per configuration entry. Each entry has
//! its own slot behind an async mutex; whoever holds the slot guard is the
//! only one allowed to start or stop that entry's engines. Work for different
//! entries proceeds in parallel, work for the same entry queues.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use serac_config_entries::ConfigurationEntry;
use serac_core::{MassifId, SourceKind};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::bulletins::RegionalBulletinPollSet;
use crate::engines::{AlertPollEngine, WeatherPollEngine};
use crate::poll::PollEngine;

/// Identifies one engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoordinatorKey {
    pub entry_id: String,
    pub kind: SourceKind,
    pub massif: Option<MassifId>,
}

impl fmt::Display for CoordinatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.massif {
            Some(massif) => write!(f, "{}/{}/{}", self.entry_id, self.kind, massif),
            None => write!(f, "{}/{}", self.entry_id, self.kind),
        }
    }
}

/// The engines belonging to one entry
#[derive(Debug)]
pub struct EntryCoordinators {
    /// Configuration the engines were built from
    pub entry: Arc<ConfigurationEntry>,
    pub weather: Option<WeatherPollEngine>,
    pub alert: Option<AlertPollEngine>,
    pub bulletins: RegionalBulletinPollSet,
}

impl EntryCoordinators {
    pub fn entry_id(&self) -> &str {
        &self.entry.entry_id
    }

    fn key(&self, kind: SourceKind, massif: Option<MassifId>) -> CoordinatorKey {
        CoordinatorKey {
            entry_id: self.entry.entry_id.clone(),
            kind,
            massif,
        }
    }

    /// Every running engine with its key
    pub fn engines(&self) -> Vec<(CoordinatorKey, Arc<PollEngine>)> {
        let mut engines = Vec::with_capacity(2 + self.bulletins.len());
        if let Some(weather) = &self.weather {
            engines.push((
                self.key(SourceKind::Weather, None),
                Arc::clone(weather.engine()),
            ));
        }
        if let Some(alert) = &self.alert {
            engines.push((self.key(SourceKind::Alert, None), Arc::clone(alert.engine())));
        }
        for (massif, engine) in self.bulletins.all() {
            engines.push((
                self.key(SourceKind::Bulletin, Some(massif)),
                Arc::clone(engine),
            ));
        }
        engines
    }

    pub fn keys(&self) -> Vec<CoordinatorKey> {
        self.engines().into_iter().map(|(key, _)| key).collect()
    }

    /// Engine feeding `kind` (and `massif`, for bulletins)
    pub fn engine(&self, kind: SourceKind, massif: Option<MassifId>) -> Option<Arc<PollEngine>> {
        match (kind, massif) {
            (SourceKind::Weather, _) => self.weather.as_ref().map(|w| Arc::clone(w.engine())),
            (SourceKind::Alert, _) => self.alert.as_ref().map(|a| Arc::clone(a.engine())),
            (SourceKind::Bulletin, Some(massif)) => self.bulletins.get(massif).cloned(),
            (SourceKind::Bulletin, None) => None,
        }
    }

    /// Stop everything. Returns the keys that were running.
    pub fn stop_all(&mut self) -> Vec<CoordinatorKey> {
        let keys = self.keys();
        if let Some(weather) = self.weather.take() {
            weather.stop();
        }
        if let Some(alert) = self.alert.take() {
            alert.stop();
        }
        self.bulletins.stop_all();
        keys
    }
}

type Slot = Arc<Mutex<Option<EntryCoordinators>>>;

/// Exclusive access to one entry's engines
///
/// The slot is dropped from the registry when the guard is released with no
/// engines in it.
pub struct SlotGuard<'a> {
    registry: &'a CoordinatorRegistry,
    entry_id: String,
    slot: Slot,
    guard: OwnedMutexGuard<Option<EntryCoordinators>>,
}

impl Deref for SlotGuard<'_> {
    type Target = Option<EntryCoordinators>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.guard.is_none() {
            let removed = self
                .registry
                .slots
                .remove_if(&self.entry_id, |_, slot| Arc::ptr_eq(slot, &self.slot));
            if removed.is_some() {
                debug!(entry_id = %self.entry_id, "Released coordinator slot");
            }
        }
    }
}

/// Every entry's engines, keyed by entry id
#[derive(Default)]
pub struct CoordinatorRegistry {
    slots: DashMap<String, Slot>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entry_id`'s engines
    pub async fn lock(&self, entry_id: &str) -> SlotGuard<'_> {
        loop {
            let slot = Arc::clone(
                self.slots
                    .entry(entry_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(None)))
                    .value(),
            );
            let guard = Arc::clone(&slot).lock_owned().await;

            // The previous holder may have released and removed the slot while
            // we were waiting; start over on the fresh one.
            let current = self
                .slots
                .get(entry_id)
                .map(|s| Arc::ptr_eq(s.value(), &slot))
                .unwrap_or(false);
            if current {
                return SlotGuard {
                    registry: self,
                    entry_id: entry_id.to_string(),
                    slot,
                    guard,
                };
            }
        }
    }

    /// Keys of every engine `entry_id` has running
    pub async fn keys_for(&self, entry_id: &str) -> Vec<CoordinatorKey> {
        if !self.slots.contains_key(entry_id) {
            return Vec::new();
        }
        self.lock(entry_id)
            .await
            .as_ref()
            .map(EntryCoordinators::keys)
            .unwrap_or_default()
    }

    /// Engines of `entry_id`, cloned out so the slot is not held while using them
    pub async fn engines_for(&self, entry_id: &str) -> Vec<(CoordinatorKey, Arc<PollEngine>)> {
        if !self.slots.contains_key(entry_id) {
            return Vec::new();
        }
        self.lock(entry_id)
            .await
            .as_ref()
            .map(EntryCoordinators::engines)
            .unwrap_or_default()
    }

    pub async fn engine(
        &self,
        entry_id: &str,
        kind: SourceKind,
        massif: Option<MassifId>,
    ) -> Option<Arc<PollEngine>> {
        if !self.slots.contains_key(entry_id) {
            return None;
        }
        self.lock(entry_id)
            .await
            .as_ref()
            .and_then(|c| c.engine(kind, massif))
    }

    /// True if `entry_id` has a slot, set up or being set up
    pub fn contains(&self, entry_id: &str) -> bool {
        self.slots.contains_key(entry_id)
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for CoordinatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorRegistry")
            .field("entries", &self.entry_ids())
            .finish()
    }
}
