//! Reconciliation Engine
//!
//! Keeps two things equal to what configuration implies:
//! - the engines running in the [`CoordinatorRegistry`]
//! - the entities and devices registered with the host
//!
//! Every host call is preceded by a look at what is currently registered, so
//! reconciling an already consistent entry makes no host mutations. Failures
//! of individual host calls are logged and collected in the
//! [`ReconcileReport`]; they never stop the remaining work.
//!
//! All work for one entry happens while holding that entry's registry slot,
//! so concurrent notifications for the same entry queue instead of
//! interleaving.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serac_config_entries::ConfigurationEntry;
use serac_core::{resolve_department, EntityId, MassifId, SourceKind};
use serac_registries::{HostRegistry, RegisteredSet, RegistryError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bulletins::{BulletinDelta, RegionalBulletinPollSet};
use crate::desired::DesiredSet;
use crate::engines::{AlertPollEngine, PollSettings, WeatherPollEngine};
use crate::fetch::{SourceFactory, SourceSetupError};
use crate::platform::register_missing;
use crate::poll::PollEngine;
use crate::registry::{CoordinatorKey, CoordinatorRegistry, EntryCoordinators};

/// One thing that went wrong during a reconciliation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("failed to set up {kind} source: {source}")]
    SourceSetup {
        kind: SourceKind,
        massif: Option<MassifId>,
        source: SourceSetupError,
    },

    #[error("failed to remove entity {entity_id}: {source}")]
    RemoveEntity {
        entity_id: String,
        source: RegistryError,
    },

    #[error("failed to remove device {identifier}: {source}")]
    RemoveDevice {
        identifier: String,
        source: RegistryError,
    },

    #[error("failed to rename entity {entity_id}: {source}")]
    RenameEntity {
        entity_id: String,
        source: RegistryError,
    },

    #[error("failed to register device {identifier}: {source}")]
    RegisterDevice {
        identifier: String,
        source: RegistryError,
    },

    #[error("failed to register entity {entity_id}: {source}")]
    RegisterEntity {
        entity_id: String,
        source: RegistryError,
    },

    #[error("failed to list registered entities: {0}")]
    Listing(RegistryError),
}

/// Everything one reconciliation did
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub entry_id: String,
    pub started: Vec<CoordinatorKey>,
    pub stopped: Vec<CoordinatorKey>,
    pub removed_entities: Vec<String>,
    pub removed_devices: Vec<String>,
    /// (old entity id, new entity id)
    pub renamed_entities: Vec<(String, String)>,
    pub registered_devices: Vec<String>,
    pub registered_entities: Vec<String>,
    pub failures: Vec<ReconcileError>,
}

impl ReconcileReport {
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            ..Default::default()
        }
    }

    /// Number of host calls that changed something
    pub fn registry_mutations(&self) -> usize {
        self.removed_entities.len()
            + self.removed_devices.len()
            + self.renamed_entities.len()
            + self.registered_devices.len()
            + self.registered_entities.len()
    }

    /// True if neither the host nor the engines were touched
    pub fn is_noop(&self) -> bool {
        self.registry_mutations() == 0 && self.started.is_empty() && self.stopped.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// One line per failure, for an entry's state reason
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn key(&self, kind: SourceKind, massif: Option<MassifId>) -> CoordinatorKey {
        CoordinatorKey {
            entry_id: self.entry_id.clone(),
            kind,
            massif,
        }
    }

    fn source_failed(&mut self, kind: SourceKind, massif: Option<MassifId>, source: SourceSetupError) {
        warn!(
            entry_id = %self.entry_id,
            %kind,
            massif = ?massif.map(MassifId::get),
            "Source setup failed: {}", source
        );
        self.failures.push(ReconcileError::SourceSetup {
            kind,
            massif,
            source,
        });
    }

    fn record_bulletins(&mut self, delta: BulletinDelta) {
        for massif in delta.stopped {
            let key = self.key(SourceKind::Bulletin, Some(massif));
            self.stopped.push(key);
        }
        for massif in delta.started {
            let key = self.key(SourceKind::Bulletin, Some(massif));
            self.started.push(key);
        }
        for (massif, source) in delta.failed {
            self.failures.push(ReconcileError::SourceSetup {
                kind: SourceKind::Bulletin,
                massif: Some(massif),
                source,
            });
        }
    }

    fn log(&self, action: &str) {
        if self.is_noop() {
            debug!(entry_id = %self.entry_id, "{}: nothing to do", action);
        } else {
            info!(
                entry_id = %self.entry_id,
                "{}: started {} / stopped {} engines, registered {} entities and {} devices, \
                 renamed {} entities, removed {} entities and {} devices",
                action,
                self.started.len(),
                self.stopped.len(),
                self.registered_entities.len(),
                self.registered_devices.len(),
                self.renamed_entities.len(),
                self.removed_entities.len(),
                self.removed_devices.len(),
            );
        }
        if self.has_failures() {
            warn!(
                entry_id = %self.entry_id,
                "{}: {} operations failed",
                action,
                self.failures.len()
            );
        }
    }
}

/// Makes engines and registrations follow configuration
pub struct ReconciliationEngine {
    host: Arc<dyn HostRegistry>,
    sources: Arc<dyn SourceFactory>,
    coordinators: Arc<CoordinatorRegistry>,
    settings: PollSettings,
}

impl ReconciliationEngine {
    pub fn new(
        host: Arc<dyn HostRegistry>,
        sources: Arc<dyn SourceFactory>,
        settings: PollSettings,
    ) -> Self {
        Self {
            host,
            sources,
            coordinators: Arc::new(CoordinatorRegistry::new()),
            settings,
        }
    }

    pub fn coordinators(&self) -> &Arc<CoordinatorRegistry> {
        &self.coordinators
    }

    pub fn host(&self) -> &Arc<dyn HostRegistry> {
        &self.host
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn is_set_up(&self, entry_id: &str) -> bool {
        self.coordinators.contains(entry_id)
    }

    /// Start the engines of a new entry, clean up what earlier releases left
    /// in the registry, and register the desired entities.
    ///
    /// On an entry that is already set up this behaves like a configuration
    /// change from the configuration the engines were built from.
    pub async fn setup_entry(&self, entry: &ConfigurationEntry) -> ReconcileReport {
        let mut report = ReconcileReport::new(&entry.entry_id);
        let mut slot = self.coordinators.lock(&entry.entry_id).await;

        if let Some(current) = slot.as_mut() {
            debug!(entry_id = %entry.entry_id, "Entry already set up, reconciling instead");
            self.apply_change(current, entry, &mut report).await;
        } else {
            *slot = Some(self.build(entry, &mut report));

            let desired = DesiredSet::for_entry(entry);
            if let Some(registered) = self.list(&entry.entry_id, &mut report).await {
                self.sweep(&entry.entry_id, &desired, &registered, &mut report)
                    .await;
            }
            self.register(&entry.entry_id, &desired, &mut report).await;
        }

        report.log("Setup");
        report
    }

    /// Bring engines and registrations from `old` to `new`.
    ///
    /// Every registered entity of the entry that `new` does not derive is
    /// removed, then devices left with no entities. Bulletin and alert engines
    /// follow, and finally anything `new` adds is registered.
    pub async fn on_configuration_changed(
        &self,
        old: &ConfigurationEntry,
        new: &ConfigurationEntry,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::new(&new.entry_id);
        let mut slot = self.coordinators.lock(&new.entry_id).await;

        match slot.as_mut() {
            Some(current) => {
                debug!(
                    entry_id = %new.entry_id,
                    "Massifs {:?} -> {:?}",
                    old.massif_ids.iter().map(|m| m.get()).collect::<Vec<_>>(),
                    new.massif_ids.iter().map(|m| m.get()).collect::<Vec<_>>()
                );
                self.apply_change(current, new, &mut report).await;
            }
            None => {
                debug!(entry_id = %new.entry_id, "Entry not set up, setting up from new configuration");
                *slot = Some(self.build(new, &mut report));
                let desired = DesiredSet::for_entry(new);
                self.register(&new.entry_id, &desired, &mut report).await;
            }
        }

        report.log("Reconcile");
        report
    }

    /// Stop every engine of the entry and remove everything it registered
    pub async fn on_entry_removed(&self, entry: &ConfigurationEntry) -> ReconcileReport {
        self.teardown(&entry.entry_id).await
    }

    /// Full teardown by entry id
    pub async fn teardown(&self, entry_id: &str) -> ReconcileReport {
        let mut report = ReconcileReport::new(entry_id);
        let mut slot = self.coordinators.lock(entry_id).await;

        if let Some(mut coordinators) = slot.take() {
            report.stopped = coordinators.stop_all();
        }

        if let Some(registered) = self.list(entry_id, &mut report).await {
            let entity_ids: Vec<String> = registered
                .entities
                .iter()
                .map(|e| e.entity_id.clone())
                .collect();
            let removed = self.remove_entities(entity_ids, &mut report).await;

            let devices: Vec<String> = registered
                .devices
                .iter()
                .map(|d| d.identifier.clone())
                .collect();
            self.remove_empty_devices(devices, &registered, &removed, &mut report)
                .await;
        }

        drop(slot);
        report.log("Teardown");
        report
    }

    /// Move registered entities from the old prefix to the new one
    pub async fn migrate_entity_prefix(
        &self,
        old: &ConfigurationEntry,
        new: &ConfigurationEntry,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::new(&new.entry_id);
        let mut slot = self.coordinators.lock(&new.entry_id).await;
        if let Some(current) = slot.as_mut() {
            current.entry = Arc::new(new.clone());
        }

        info!(
            entry_id = %new.entry_id,
            "Migrating entity prefix {} -> {}",
            old.entity_prefix,
            new.entity_prefix
        );
        let desired = DesiredSet::for_entry(new);
        if let Some(registered) = self.list(&new.entry_id, &mut report).await {
            self.sweep(&new.entry_id, &desired, &registered, &mut report)
                .await;
        }
        self.register(&new.entry_id, &desired, &mut report).await;

        drop(slot);
        report.log("Prefix migration");
        report
    }

    /// Force a refresh of the weather and alert engines, or of one bulletin
    /// engine when `massif` is given. Returns false when nothing matched.
    pub async fn force_refresh(&self, entry_id: &str, massif: Option<MassifId>) -> bool {
        if !self.coordinators.contains(entry_id) {
            warn!(entry_id, "Refresh requested for unknown entry");
            return false;
        }

        let engines: Vec<Arc<PollEngine>> = {
            let slot = self.coordinators.lock(entry_id).await;
            match (slot.as_ref(), massif) {
                (None, _) => Vec::new(),
                (Some(c), Some(massif)) => c.bulletins.get(massif).cloned().into_iter().collect(),
                (Some(c), None) => [
                    c.engine(SourceKind::Weather, None),
                    c.engine(SourceKind::Alert, None),
                ]
                .into_iter()
                .flatten()
                .collect(),
            }
        };

        if engines.is_empty() {
            warn!(
                entry_id,
                massif = ?massif.map(MassifId::get),
                "Nothing to refresh"
            );
            return false;
        }

        join_all(engines.iter().map(|e| e.force_refresh())).await;
        true
    }

    fn build(&self, entry: &ConfigurationEntry, report: &mut ReconcileReport) -> EntryCoordinators {
        let mut coordinators = EntryCoordinators {
            entry: Arc::new(entry.clone()),
            weather: None,
            alert: None,
            bulletins: RegionalBulletinPollSet::new(
                entry.entry_id.clone(),
                self.settings.bulletin_interval,
                self.settings.retry.clone(),
            ),
        };
        self.ensure_weather(&mut coordinators, report);
        self.reconcile_bulletins(&mut coordinators, entry, report);
        self.reconcile_alert(&mut coordinators, entry, report);
        coordinators
    }

    async fn apply_change(
        &self,
        current: &mut EntryCoordinators,
        new: &ConfigurationEntry,
        report: &mut ReconcileReport,
    ) {
        let new_desired = DesiredSet::for_entry(new);

        // Diffed against the registry, not the previous configuration, so
        // leftovers of an earlier failed removal are retried too
        if let Some(registered) = self.list(&new.entry_id, report).await {
            self.sweep(&new.entry_id, &new_desired, &registered, report)
                .await;
        }

        self.ensure_weather(current, report);
        self.reconcile_bulletins(current, new, report);
        self.reconcile_alert(current, new, report);
        current.entry = Arc::new(new.clone());

        self.register(&new.entry_id, &new_desired, report).await;
    }

    /// Start the weather engine if it is not running (e.g. its source failed
    /// to build last time)
    fn ensure_weather(&self, current: &mut EntryCoordinators, report: &mut ReconcileReport) {
        if current.weather.is_some() {
            return;
        }
        match self.sources.weather(&current.entry) {
            Ok(fetcher) => {
                current.weather = Some(WeatherPollEngine::start(
                    current.entry_id(),
                    fetcher,
                    &self.settings,
                ));
                let key = report.key(SourceKind::Weather, None);
                report.started.push(key);
            }
            Err(e) => report.source_failed(SourceKind::Weather, None, e),
        }
    }

    fn reconcile_bulletins(
        &self,
        current: &mut EntryCoordinators,
        new: &ConfigurationEntry,
        report: &mut ReconcileReport,
    ) {
        // Fetchers hold the token they were built with
        if !new.has_bulletin_token() || !current.entry.same_bulletin_token(new) {
            for massif in current.bulletins.stop_all() {
                let key = report.key(SourceKind::Bulletin, Some(massif));
                report.stopped.push(key);
            }
        }

        let selected = if new.has_bulletin_token() {
            new.massif_ids.clone()
        } else {
            BTreeSet::new()
        };
        let sources = &self.sources;
        let delta = current
            .bulletins
            .reconcile(&selected, |massif| sources.bulletin(new, massif));
        report.record_bulletins(delta);
    }

    fn reconcile_alert(
        &self,
        current: &mut EntryCoordinators,
        new: &ConfigurationEntry,
        report: &mut ReconcileReport,
    ) {
        let wanted = if new.has_alert_token() {
            resolve_department(new.latitude, new.longitude)
        } else {
            None
        };

        let keep = match (&current.alert, wanted) {
            (Some(alert), Some(department)) => {
                alert.department().code == department.code && current.entry.same_alert_token(new)
            }
            _ => false,
        };
        if keep {
            return;
        }

        if let Some(alert) = current.alert.take() {
            alert.stop();
            let key = report.key(SourceKind::Alert, None);
            report.stopped.push(key);
        }

        let Some(department) = wanted else {
            if new.has_alert_token() {
                debug!(
                    entry_id = %new.entry_id,
                    "No alert jurisdiction for {}, {}", new.latitude, new.longitude
                );
            }
            return;
        };

        match self.sources.alert(new, department) {
            Ok(fetcher) => {
                current.alert = Some(AlertPollEngine::start(
                    &new.entry_id,
                    department,
                    fetcher,
                    &self.settings,
                ));
                let key = report.key(SourceKind::Alert, None);
                report.started.push(key);
            }
            Err(e) => report.source_failed(SourceKind::Alert, None, e),
        }
    }

    /// Remove entities the registry holds but configuration no longer derives:
    /// non-compliant ids and unique ids nothing maps to are removed, compliant
    /// ids that differ from the desired one are renamed. Devices left without
    /// entities follow.
    async fn sweep(
        &self,
        entry_id: &str,
        desired: &DesiredSet,
        registered: &RegisteredSet,
        report: &mut ReconcileReport,
    ) {
        let mut to_remove = Vec::new();
        let mut to_rename = Vec::new();

        for entity in &registered.entities {
            if !EntityId::is_compliant(&entity.entity_id) {
                info!(entry_id, entity_id = %entity.entity_id, "Removing non-compliant entity");
                to_remove.push(entity.entity_id.clone());
                continue;
            }

            let target = entity
                .unique_id
                .as_deref()
                .and_then(|uid| desired.by_unique_id(uid));
            let Some(target) = target else {
                info!(entry_id, entity_id = %entity.entity_id, "Removing orphaned entity");
                to_remove.push(entity.entity_id.clone());
                continue;
            };

            let target_id = &target.descriptor.entity_id;
            if entity.entity_id == target_id.to_string() {
                continue;
            }
            if registered.has_entity(&target_id.to_string()) {
                // Someone already holds the new id
                to_remove.push(entity.entity_id.clone());
            } else {
                to_rename.push((entity.entity_id.clone(), target_id.clone()));
            }
        }

        for (from, to) in to_rename {
            match self.host.rename_entity(&from, &to).await {
                Ok(()) => {
                    debug!(entry_id, "Renamed {} -> {}", from, to);
                    report.renamed_entities.push((from, to.to_string()));
                }
                Err(RegistryError::EntityIdTaken(_)) => to_remove.push(from),
                Err(source) => {
                    warn!(entry_id, entity_id = %from, "Failed to rename entity: {}", source);
                    report.failures.push(ReconcileError::RenameEntity {
                        entity_id: from,
                        source,
                    });
                }
            }
        }

        let removed = self.remove_entities(to_remove, report).await;

        let candidates: Vec<String> = registered
            .devices
            .iter()
            .filter(|d| !desired.has_device(&d.identifier))
            .map(|d| d.identifier.clone())
            .collect();
        self.remove_empty_devices(candidates, registered, &removed, report)
            .await;
    }

    /// Remove each entity independently. Returns the ids that are gone.
    async fn remove_entities(
        &self,
        entity_ids: impl IntoIterator<Item = String>,
        report: &mut ReconcileReport,
    ) -> BTreeSet<String> {
        let mut removed = BTreeSet::new();
        for entity_id in entity_ids {
            match self.host.remove_entity(&entity_id).await {
                Ok(()) => {
                    debug!(entry_id = %report.entry_id, "Removed entity {}", entity_id);
                    report.removed_entities.push(entity_id.clone());
                    removed.insert(entity_id);
                }
                Err(RegistryError::EntityNotFound(_)) => {
                    debug!(entry_id = %report.entry_id, "Entity {} already gone", entity_id);
                    removed.insert(entity_id);
                }
                Err(source) => {
                    warn!(
                        entry_id = %report.entry_id,
                        entity_id = %entity_id,
                        "Failed to remove entity: {}", source
                    );
                    report.failures.push(ReconcileError::RemoveEntity { entity_id, source });
                }
            }
        }
        removed
    }

    /// Remove every candidate device that is registered and has no entities
    /// left once `removed` are gone
    async fn remove_empty_devices(
        &self,
        candidates: impl IntoIterator<Item = String>,
        registered: &RegisteredSet,
        removed: &BTreeSet<String>,
        report: &mut ReconcileReport,
    ) {
        for identifier in candidates {
            if !registered.has_device(&identifier) {
                continue;
            }
            let remaining = registered
                .entities_of(&identifier)
                .filter(|e| !removed.contains(&e.entity_id))
                .count();
            if remaining > 0 {
                warn!(
                    entry_id = %report.entry_id,
                    device = %identifier,
                    "Keeping device with {} remaining entities", remaining
                );
                continue;
            }

            match self.host.remove_device(&identifier).await {
                Ok(()) => {
                    debug!(entry_id = %report.entry_id, "Removed device {}", identifier);
                    report.removed_devices.push(identifier);
                }
                Err(RegistryError::DeviceNotFound(_)) => {}
                Err(source) => {
                    warn!(
                        entry_id = %report.entry_id,
                        device = %identifier,
                        "Failed to remove device: {}", source
                    );
                    report
                        .failures
                        .push(ReconcileError::RemoveDevice { identifier, source });
                }
            }
        }
    }

    async fn register(&self, entry_id: &str, desired: &DesiredSet, report: &mut ReconcileReport) {
        if let Some(registered) = self.list(entry_id, report).await {
            register_missing(self.host.as_ref(), entry_id, desired, &registered, report).await;
        }
    }

    async fn list(&self, entry_id: &str, report: &mut ReconcileReport) -> Option<RegisteredSet> {
        match self.host.list_registered_for(entry_id).await {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(entry_id, "Cannot list registered entities: {}", e);
                report.failures.push(ReconcileError::Listing(e));
                None
            }
        }
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("coordinators", &self.coordinators)
            .field("settings", &self.settings)
            .finish()
    }
}
