//! Serac integration
//!
//! Glue between [`ConfigEntries`] and the [`ReconciliationEngine`]: consumes
//! configuration change notifications in arrival order, drives entry
//! lifecycle states, and exposes manual refresh, entity reads and
//! diagnostics.

use std::sync::Arc;

use serac_config_entries::{ConfigChange, ConfigEntries, ConfigEntryState, ConfigurationEntry};
use serac_core::{MassifId, SourceKind};
use serac_registries::HostRegistry;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::desired::DesiredSet;
use crate::diagnostics::{DiagnosticsExporter, EntryDiagnostics};
use crate::engines::PollSettings;
use crate::fetch::SourceFactory;
use crate::platform::EntityReading;
use crate::reconcile::{ReconcileReport, ReconciliationEngine};

pub struct SeracIntegration {
    entries: Arc<ConfigEntries>,
    engine: Arc<ReconciliationEngine>,
}

impl SeracIntegration {
    pub fn new(
        entries: Arc<ConfigEntries>,
        host: Arc<dyn HostRegistry>,
        sources: Arc<dyn SourceFactory>,
        settings: PollSettings,
    ) -> Self {
        Self {
            entries,
            engine: Arc::new(ReconciliationEngine::new(host, sources, settings)),
        }
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        &self.entries
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Apply one change notification
    pub async fn handle_change(&self, change: ConfigChange) -> ReconcileReport {
        debug!(entry_id = %change.entry_id(), "Handling configuration change");
        match change {
            ConfigChange::Added(entry) => self.setup(&entry).await,
            ConfigChange::Updated { old, new } => {
                let loaded = self
                    .entries
                    .get(&new.entry_id)
                    .is_some_and(|entry| entry.is_loaded());
                if loaded && self.engine.is_set_up(&new.entry_id) {
                    self.engine.on_configuration_changed(&old, &new).await
                } else {
                    // A failed entry gets a fresh setup attempt with the new options
                    self.setup(&new).await
                }
            }
            ConfigChange::PrefixMigrated { old, new } => {
                self.engine.migrate_entity_prefix(&old, &new).await
            }
            ConfigChange::Removed(entry) => self.engine.on_entry_removed(&entry).await,
        }
    }

    /// Set up an entry, moving it through SetupInProgress to Loaded or
    /// SetupError
    async fn setup(&self, entry: &ConfigurationEntry) -> ReconcileReport {
        let entry_id = entry.entry_id.as_str();

        let current = self.entries.get(entry_id);
        let Some(current) = current else {
            debug!(entry_id, "Entry removed before setup");
            return ReconcileReport::new(entry_id);
        };
        if current.is_loaded() {
            // Redelivered notification
            return self.engine.on_configuration_changed(&current, &current).await;
        }

        if let Err(e) = self
            .entries
            .set_state(entry_id, ConfigEntryState::SetupInProgress, None)
        {
            warn!(entry_id, "Cannot start setup: {}", e);
            return ReconcileReport::new(entry_id);
        }

        let report = self.engine.setup_entry(&current).await;

        // Without a weather engine the entry has nothing to show
        let weather = self
            .engine
            .coordinators()
            .engine(entry_id, SourceKind::Weather, None)
            .await;
        let state = if weather.is_some() {
            ConfigEntryState::Loaded
        } else {
            ConfigEntryState::SetupError
        };

        match self
            .entries
            .set_state(entry_id, state, report.failure_summary())
        {
            Ok(()) if state == ConfigEntryState::Loaded => {
                info!(entry_id, "Set up {} ({})", current.location_name, current.unique_id());
            }
            Ok(()) => error!(entry_id, "Setup of {} failed", current.location_name),
            Err(e) => debug!(entry_id, "Entry state not updated: {}", e),
        }
        report
    }

    /// Bring every entry in line with the current configuration, and tear
    /// down engines of entries that no longer exist
    pub async fn resync(&self) {
        let known: Vec<ConfigurationEntry> = self.entries.iter().collect();
        for entry in &known {
            self.setup(entry).await;
        }

        for entry_id in self.engine.coordinators().entry_ids() {
            if self.entries.get(&entry_id).is_none() {
                info!(entry_id = %entry_id, "Tearing down engines of vanished entry");
                self.engine.teardown(&entry_id).await;
            }
        }
    }

    /// Consume change notifications until `cancel` fires.
    ///
    /// Changes are applied one at a time in arrival order. If the listener
    /// falls behind and notifications are lost, every entry is resynced.
    pub fn spawn_listener(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut changes = self.entries.subscribe();
        let integration = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(change) => {
                            integration.handle_change(change).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Missed {} configuration changes, resyncing", skipped);
                            integration.resync().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Configuration listener stopped");
        })
    }

    /// Fire-and-forget refresh of an entry's weather and alert engines, or of
    /// one bulletin engine
    pub fn request_refresh(&self, entry_id: &str, massif: Option<MassifId>) -> JoinHandle<bool> {
        let engine = Arc::clone(&self.engine);
        let entry_id = entry_id.to_string();
        tokio::spawn(async move { engine.force_refresh(&entry_id, massif).await })
    }

    /// What `entity_id` of `entry_id` currently shows
    pub async fn entity_reading(&self, entry_id: &str, entity_id: &str) -> Option<EntityReading> {
        let entry = self.entries.get(entry_id)?;
        let desired = DesiredSet::for_entry(&entry);
        let entity = desired.entity(entity_id)?;
        let engine = self
            .engine
            .coordinators()
            .engine(entry_id, entity.source, entity.massif)
            .await;
        Some(EntityReading::read(entity, engine.as_deref()))
    }

    pub async fn diagnostics(&self, entry_id: &str) -> Option<EntryDiagnostics> {
        let entry = self.entries.get(entry_id)?;
        let engines = self.engine.coordinators().engines_for(entry_id).await;
        let registered = match self.engine.host().list_registered_for(entry_id).await {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(entry_id, "Diagnostics without registry statistics: {}", e);
                None
            }
        };
        Some(DiagnosticsExporter::new(&entry).export(&engines, registered.as_ref()))
    }

    /// Stop every engine. Registrations are left in place.
    pub async fn shutdown(&self) {
        for entry_id in self.engine.coordinators().entry_ids() {
            let mut slot = self.engine.coordinators().lock(&entry_id).await;
            if let Some(mut coordinators) = slot.take() {
                let stopped = coordinators.stop_all();
                debug!(entry_id = %entry_id, "Stopped {} engines", stopped.len());
            }
        }
        info!("All poll engines stopped");
    }
}
