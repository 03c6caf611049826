//! Desired entity and device set
//!
//! [`DesiredSet::for_entry`] enumerates everything that should be registered
//! for a configuration entry. It has no side effects and is used both as the
//! registration list and as the reconciliation target.

use std::collections::BTreeMap;

use serac_config_entries::ConfigurationEntry;
use serac_core::{
    format_coordinate, resolve_department, EntityId, MassifId, SourceKind, DOMAIN, MANUFACTURER,
};
use serac_registries::{DeviceDescriptor, EntityDescriptor};
use tracing::warn;

pub const WEATHER_DOMAIN: &str = "weather";
pub const SENSOR_DOMAIN: &str = "sensor";

pub const STATION_MODEL: &str = "Mountain Weather Station";
pub const BULLETIN_MODEL: &str = "BRA Avalanche Bulletin";

/// Metrics read from the weather engine, one sensor each
pub const WEATHER_SENSORS: &[(&str, &str)] = &[
    ("elevation", "Elevation"),
    ("temperature_current", "Temperature"),
    ("humidity", "Humidity"),
    ("is_day", "Is Day"),
    ("wind_speed_current", "Wind Speed"),
    ("wind_direction_current", "Wind Direction"),
    ("wind_gust_current", "Wind Gust"),
    ("precipitation_current", "Precipitation"),
    ("rain_current", "Rain"),
    ("showers_current", "Showers"),
    ("snowfall_current", "Snowfall"),
    ("cloud_coverage", "Cloud Coverage"),
    ("european_aqi", "Air Quality Index"),
    ("pm2_5", "Particulate Matter 2.5"),
    ("pm10", "Particulate Matter 10"),
    ("nitrogen_dioxide", "Nitrogen Dioxide"),
    ("ozone", "Ozone"),
    ("sulphur_dioxide", "Sulphur Dioxide"),
];

/// Daily metrics, expanded to `{key}_day{n}` for each forecast day
pub const DAILY_SENSORS: &[(&str, &str)] = &[
    ("wind_speed_max", "Wind Speed Max"),
    ("wind_gust_max", "Wind Gust Max"),
    ("wind_direction", "Wind Direction"),
    ("sunrise", "Sunrise"),
    ("sunset", "Sunset"),
    ("sunshine_duration", "Sunshine Duration"),
    ("daylight_duration", "Daylight Duration"),
    ("uv_index", "UV Index"),
    ("rain_sum", "Rain Sum"),
    ("showers_sum", "Showers Sum"),
    ("snowfall_sum", "Snowfall Sum"),
    ("precipitation_sum", "Precipitation Sum"),
    ("precipitation_hours", "Precipitation Hours"),
];

pub const FORECAST_DAYS: &[&str] = &["Today", "Tomorrow", "Day 2"];

/// Per-massif bulletin sensors
pub const BULLETIN_SENSORS: &[(&str, &str)] = &[
    ("avalanche_risk_today", "Avalanche Risk Today"),
    ("avalanche_risk_tomorrow", "Avalanche Risk Tomorrow"),
    ("avalanche_accidental", "Avalanche Accidental Risk"),
    ("avalanche_natural", "Avalanche Natural Risk"),
    ("avalanche_summary", "Avalanche Risk Summary"),
    ("avalanche_bulletin_date", "Avalanche Bulletin Date"),
    ("avalanche_risk_high_altitude", "Avalanche Risk High Altitude"),
    ("avalanche_risk_low_altitude", "Avalanche Risk Low Altitude"),
];

pub const ALERT_SENSORS: &[(&str, &str)] = &[
    ("alert_level", "Weather Alert Level"),
    ("alert_color", "Weather Alert Color"),
    ("alert_phenomena", "Weather Alert Phenomena"),
];

/// One entity that should exist, and the engine that feeds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntity {
    pub descriptor: EntityDescriptor,
    pub source: SourceKind,
    pub massif: Option<MassifId>,
    /// Metric key, or `weather` for the weather entity
    pub key: String,
}

/// Everything that should be registered for one entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredSet {
    /// Keyed by device identifier
    pub devices: BTreeMap<String, DeviceDescriptor>,
    /// Keyed by entity id
    pub entities: BTreeMap<String, DesiredEntity>,
}

/// `serac_{lat}_{lon}`
pub fn location_key(entry: &ConfigurationEntry) -> String {
    format!(
        "{}_{}_{}",
        DOMAIN,
        format_coordinate(entry.latitude),
        format_coordinate(entry.longitude)
    )
}

pub fn main_device_identifier(entry: &ConfigurationEntry) -> String {
    location_key(entry)
}

pub fn massif_device_identifier(entry: &ConfigurationEntry, massif: MassifId) -> String {
    format!("{}_massif_{}", location_key(entry), massif.get())
}

impl DesiredSet {
    pub fn for_entry(entry: &ConfigurationEntry) -> Self {
        let mut set = DesiredSet::default();
        let base = location_key(entry);
        let prefix = &entry.entity_prefix;

        let main = main_device_identifier(entry);
        set.devices.insert(
            main.clone(),
            DeviceDescriptor {
                identifier: main.clone(),
                name: format!("{} (Serac)", entry.location_name),
                manufacturer: MANUFACTURER.to_string(),
                model: STATION_MODEL.to_string(),
            },
        );

        set.push(
            WEATHER_DOMAIN,
            format!("{}_{}", DOMAIN, prefix),
            format!("{}_weather", base),
            entry.location_name.clone(),
            &main,
            SourceKind::Weather,
            None,
            "weather".to_string(),
        );

        for (key, name) in WEATHER_SENSORS {
            set.push_sensor(&base, prefix, key, name.to_string(), &main, SourceKind::Weather);
        }
        for (day, day_name) in FORECAST_DAYS.iter().enumerate() {
            for (key, name) in DAILY_SENSORS {
                let key = format!("{}_day{}", key, day);
                set.push_sensor(
                    &base,
                    prefix,
                    &key,
                    format!("{} {}", name, day_name),
                    &main,
                    SourceKind::Weather,
                );
            }
        }

        if entry.has_alert_token() && resolve_department(entry.latitude, entry.longitude).is_some()
        {
            for (key, name) in ALERT_SENSORS {
                set.push_sensor(&base, prefix, key, name.to_string(), &main, SourceKind::Alert);
            }
        }

        if entry.has_bulletin_token() {
            for &massif in &entry.massif_ids {
                set.push_massif(entry, &base, massif);
            }
        }

        set
    }

    fn push_sensor(
        &mut self,
        base: &str,
        prefix: &str,
        key: &str,
        name: String,
        device: &str,
        source: SourceKind,
    ) {
        self.push(
            SENSOR_DOMAIN,
            format!("{}_{}_{}", DOMAIN, prefix, key),
            format!("{}_{}", base, key),
            name,
            device,
            source,
            None,
            key.to_string(),
        );
    }

    fn push_massif(&mut self, entry: &ConfigurationEntry, base: &str, massif: MassifId) {
        let device = massif_device_identifier(entry, massif);
        self.devices.insert(
            device.clone(),
            DeviceDescriptor {
                identifier: device.clone(),
                name: format!("{} - {} (Serac)", entry.location_name, massif.name()),
                manufacturer: MANUFACTURER.to_string(),
                model: BULLETIN_MODEL.to_string(),
            },
        );

        let slug = massif.slug();
        for (key, name) in BULLETIN_SENSORS {
            self.push(
                SENSOR_DOMAIN,
                format!("{}_{}_{}_{}", DOMAIN, entry.entity_prefix, slug, key),
                format!("{}_{}_{}", base, massif.get(), key),
                format!("{} - {}", name, massif.name()),
                &device,
                SourceKind::Bulletin,
                Some(massif),
                key.to_string(),
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        domain: &str,
        object_id: String,
        unique_id: String,
        name: String,
        device: &str,
        source: SourceKind,
        massif: Option<MassifId>,
        key: String,
    ) {
        let entity_id = match EntityId::new(domain, &object_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Skipping entity {}.{}: {}", domain, object_id, e);
                return;
            }
        };
        self.entities.insert(
            entity_id.to_string(),
            DesiredEntity {
                descriptor: EntityDescriptor {
                    entity_id,
                    unique_id,
                    name,
                    device_identifier: device.to_string(),
                },
                source,
                massif,
                key,
            },
        );
    }

    pub fn entity(&self, entity_id: &str) -> Option<&DesiredEntity> {
        self.entities.get(entity_id)
    }

    pub fn by_unique_id(&self, unique_id: &str) -> Option<&DesiredEntity> {
        self.entities
            .values()
            .find(|e| e.descriptor.unique_id == unique_id)
    }

    pub fn has_device(&self, identifier: &str) -> bool {
        self.devices.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
