//! Diagnostics export
//!
//! A serializable picture of one entry for support requests. Tokens never
//! appear: token fields carry [`REDACTED`] instead, and every free-text field
//! is scrubbed of any configured token value before export. Payload bodies
//! are summarized by their top-level keys only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serac_config_entries::{ConfigEntryState, ConfigurationEntry};
use serac_core::{FetchErrorKind, MassifId, SourceKind};
use serac_registries::RegisteredSet;
use serde::Serialize;

use crate::poll::{Availability, PollEngine};
use crate::registry::CoordinatorKey;

/// Replaces every token value
pub const REDACTED: &str = "**REDACTED**";

#[derive(Debug, Clone, Serialize)]
pub struct EntryDiagnostics {
    pub config: ConfigDiagnostics,
    pub coordinators: Vec<EngineDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigDiagnostics {
    pub entry_id: String,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub entity_prefix: String,
    pub massif_ids: Vec<u16>,
    pub bulletin_token: Option<&'static str>,
    pub alert_token: Option<&'static str>,
    pub state: ConfigEntryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineDiagnostics {
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub massif: Option<MassifId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub massif_name: Option<&'static str>,
    pub running: bool,
    pub has_data: bool,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_error_kind: Option<FetchErrorKind>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub consecutive_failures: u32,
    pub update_interval_seconds: u64,
    pub availability: Availability,
    pub next_due: Option<DateTime<Utc>>,
    /// Top-level keys of the last payload
    pub payload_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_entities: usize,
    pub weather_entities: usize,
    pub sensor_entities: usize,
    pub avalanche_sensors: usize,
    pub other_sensors: usize,
    pub devices: usize,
}

impl Statistics {
    pub fn from_registered(registered: &RegisteredSet) -> Self {
        let mut stats = Statistics {
            total_entities: registered.entities.len(),
            devices: registered.devices.len(),
            ..Default::default()
        };
        for entity in &registered.entities {
            if entity.entity_id.starts_with("weather.") {
                stats.weather_entities += 1;
            } else if entity.entity_id.starts_with("sensor.") {
                stats.sensor_entities += 1;
                if entity.entity_id.contains("avalanche") {
                    stats.avalanche_sensors += 1;
                } else {
                    stats.other_sensors += 1;
                }
            }
        }
        stats
    }
}

/// Builds [`EntryDiagnostics`]
pub struct DiagnosticsExporter<'a> {
    entry: &'a ConfigurationEntry,
    secrets: Vec<String>,
}

impl<'a> DiagnosticsExporter<'a> {
    pub fn new(entry: &'a ConfigurationEntry) -> Self {
        let secrets = [&entry.bulletin_token, &entry.alert_token]
            .into_iter()
            .flatten()
            .map(|t| t.expose_secret().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self { entry, secrets }
    }

    pub fn export(
        &self,
        engines: &[(CoordinatorKey, Arc<PollEngine>)],
        registered: Option<&RegisteredSet>,
    ) -> EntryDiagnostics {
        EntryDiagnostics {
            config: self.config(),
            coordinators: engines
                .iter()
                .map(|(key, engine)| self.engine(key, engine))
                .collect(),
            statistics: registered.map(Statistics::from_registered),
        }
    }

    fn config(&self) -> ConfigDiagnostics {
        let entry = self.entry;
        ConfigDiagnostics {
            entry_id: self.scrub(&entry.entry_id),
            location_name: self.scrub(&entry.location_name),
            latitude: entry.latitude,
            longitude: entry.longitude,
            entity_prefix: self.scrub(&entry.entity_prefix),
            massif_ids: entry.massif_ids.iter().map(|m| m.get()).collect(),
            bulletin_token: entry.bulletin_token.as_ref().map(|_| REDACTED),
            alert_token: entry.alert_token.as_ref().map(|_| REDACTED),
            state: entry.state,
            reason: entry.reason.as_deref().map(|r| self.scrub(r)),
        }
    }

    fn engine(&self, key: &CoordinatorKey, engine: &PollEngine) -> EngineDiagnostics {
        let state = engine.state();
        let error = state.last_error.as_ref();
        let payload_keys = state
            .snapshot
            .as_ref()
            .and_then(|s| s.payload.as_object())
            .map(|obj| obj.keys().map(|k| self.scrub(k)).collect())
            .unwrap_or_default();

        EngineDiagnostics {
            kind: key.kind,
            massif: key.massif,
            massif_name: key.massif.map(MassifId::name),
            running: engine.is_running(),
            has_data: state.has_data(),
            last_update_time: state.last_update_time(),
            last_error_kind: error.map(|e| e.kind),
            last_error_time: error.map(|e| e.at),
            last_error_message: error.map(|e| self.scrub(&e.message)),
            consecutive_failures: state.consecutive_failures,
            update_interval_seconds: engine.interval().as_secs(),
            availability: state.availability(),
            next_due: state.next_due,
            payload_keys,
        }
    }

    /// Replace any token value that made it into free text
    fn scrub(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }
}

impl EntryDiagnostics {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
