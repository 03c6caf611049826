//! Entity platform
//!
//! Normal registration of desired entities and the per-entity reads that go
//! with them. Registration is additive: anything already present (by entity id
//! or by unique id) is left alone, so running it on a consistent registry does
//! not touch the host.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serac_core::{MassifId, SourceKind};
use serac_registries::{HostRegistry, RegisteredSet};
use serde::Serialize;
use tracing::{debug, warn};

use crate::desired::{DesiredEntity, DesiredSet};
use crate::fetch::Payload;
use crate::poll::{Availability, PollEngine};
use crate::reconcile::{ReconcileError, ReconcileReport};

/// Register every desired device and entity `registered` does not have yet.
///
/// Devices go first since the host rejects entities whose device is unknown.
/// Entities of a device that failed to register are skipped.
pub async fn register_missing(
    host: &dyn HostRegistry,
    entry_id: &str,
    desired: &DesiredSet,
    registered: &RegisteredSet,
    report: &mut ReconcileReport,
) {
    let mut failed_devices = BTreeSet::new();

    for device in desired.devices.values() {
        if registered.has_device(&device.identifier) {
            continue;
        }
        match host.register_device(entry_id, device).await {
            Ok(()) => {
                debug!(entry_id, device = %device.identifier, "Registered device");
                report.registered_devices.push(device.identifier.clone());
            }
            Err(source) => {
                warn!(
                    entry_id,
                    device = %device.identifier,
                    "Failed to register device: {}", source
                );
                failed_devices.insert(device.identifier.clone());
                report.failures.push(ReconcileError::RegisterDevice {
                    identifier: device.identifier.clone(),
                    source,
                });
            }
        }
    }

    for (entity_id, desired_entity) in &desired.entities {
        let descriptor = &desired_entity.descriptor;
        if registered.has_entity(entity_id)
            || registered.entity_by_unique_id(&descriptor.unique_id).is_some()
            || failed_devices.contains(&descriptor.device_identifier)
        {
            continue;
        }
        match host.register_entity(entry_id, descriptor).await {
            Ok(()) => report.registered_entities.push(entity_id.clone()),
            Err(source) => {
                warn!(entry_id, entity_id = %entity_id, "Failed to register entity: {}", source);
                report.failures.push(ReconcileError::RegisterEntity {
                    entity_id: entity_id.clone(),
                    source,
                });
            }
        }
    }

    if !report.registered_entities.is_empty() {
        debug!(
            entry_id,
            "Registered {} entities",
            report.registered_entities.len()
        );
    }
}

/// What an entity currently shows
#[derive(Debug, Clone, Serialize)]
pub struct EntityReading {
    pub entity_id: String,
    pub source: SourceKind,
    pub massif: Option<MassifId>,
    /// Metric key inside the source payload
    pub key: String,
    pub availability: Availability,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub payload: Option<Arc<Payload>>,
}

impl EntityReading {
    /// Read `entity` from the engine that feeds it. Without an engine the
    /// entity shows no data.
    pub fn read(entity: &DesiredEntity, engine: Option<&PollEngine>) -> Self {
        let state = engine.map(PollEngine::state);
        Self {
            entity_id: entity.descriptor.entity_id.to_string(),
            source: entity.source,
            massif: entity.massif,
            key: entity.key.clone(),
            availability: state
                .as_ref()
                .map(|s| s.availability())
                .unwrap_or(Availability::NoDataYet),
            last_update: state.as_ref().and_then(|s| s.last_update_time()),
            payload: state
                .as_ref()
                .and_then(|s| s.snapshot.as_ref())
                .map(|s| Arc::clone(&s.payload)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }
}
