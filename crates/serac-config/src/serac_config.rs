//! Top-level Serac configuration
//!
//! Parses `serac.yaml`:
//!
//! ```yaml
//! logging:
//!   level: info
//! polling:
//!   weather_interval: 3600
//!   bulletin_interval: 21600
//!   alert_interval: 1800
//!   fetch_timeout: 30
//! locations:
//!   - location_name: Chamonix
//!     latitude: 45.92
//!     longitude: 6.87
//!     bulletin_token: !secret bra_token
//!     massif_ids: [3]
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serac_core::{format_coordinate, MassifId};
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE: &str = "serac.yaml";

/// Logging section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Polling section, all values in seconds
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_weather_interval")]
    pub weather_interval: u64,
    #[serde(default = "default_bulletin_interval")]
    pub bulletin_interval: u64,
    #[serde(default = "default_alert_interval")]
    pub alert_interval: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            weather_interval: default_weather_interval(),
            bulletin_interval: default_bulletin_interval(),
            alert_interval: default_alert_interval(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

impl PollingConfig {
    pub fn weather(&self) -> Duration {
        Duration::from_secs(self.weather_interval)
    }

    pub fn bulletin(&self) -> Duration {
        Duration::from_secs(self.bulletin_interval)
    }

    pub fn alert(&self) -> Duration {
        Duration::from_secs(self.alert_interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }
}

/// One monitored location
#[derive(Clone, Deserialize)]
pub struct LocationConfig {
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub entity_prefix: Option<String>,
    #[serde(default)]
    pub bulletin_token: Option<String>,
    #[serde(default)]
    pub massif_ids: Vec<u16>,
    #[serde(default)]
    pub alert_token: Option<String>,
}

impl fmt::Debug for LocationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |t: &Option<String>| t.as_ref().map(|_| "**REDACTED**");
        f.debug_struct("LocationConfig")
            .field("location_name", &self.location_name)
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .field("entity_prefix", &self.entity_prefix)
            .field("bulletin_token", &redact(&self.bulletin_token))
            .field("massif_ids", &self.massif_ids)
            .field("alert_token", &redact(&self.alert_token))
            .finish()
    }
}

impl LocationConfig {
    /// Key matching a location across reloads: one location per coordinate pair
    pub fn key(&self) -> String {
        format!(
            "{}_{}",
            format_coordinate(self.latitude),
            format_coordinate(self.longitude)
        )
    }

    /// Massif ids checked against the fixed enumeration
    pub fn massifs(&self) -> ConfigResult<Vec<MassifId>> {
        self.massif_ids
            .iter()
            .map(|id| {
                MassifId::new(*id).map_err(|e| ConfigError::InvalidValue {
                    key: format!("locations[{}].massif_ids", self.location_name),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    pub fn bulletin_secret(&self) -> Option<SecretString> {
        to_secret(&self.bulletin_token)
    }

    pub fn alert_secret(&self) -> Option<SecretString> {
        to_secret(&self.alert_token)
    }
}

fn to_secret(token: &Option<String>) -> Option<SecretString> {
    token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.to_string()))
}

/// Everything in serac.yaml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeracConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weather_interval() -> u64 {
    3600
}

fn default_bulletin_interval() -> u64 {
    6 * 3600
}

fn default_alert_interval() -> u64 {
    1800
}

fn default_fetch_timeout() -> u64 {
    30
}

impl SeracConfig {
    /// Load and validate `serac.yaml` from a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), CONFIG_FILE)?;
        let config = Self::from_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an already tag-processed YAML value
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        if yaml.is_null() {
            return Ok(Self::default());
        }
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }
        serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
            key: "root".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let p = &self.polling;
        if p.weather_interval == 0 || p.alert_interval == 0 || p.fetch_timeout == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "polling intervals and fetch_timeout must be positive".to_string(),
            });
        }
        if p.bulletin_interval <= p.weather_interval {
            return Err(ConfigError::ValidationFailed {
                message: format!(
                    "bulletin_interval ({}s) must be longer than weather_interval ({}s)",
                    p.bulletin_interval, p.weather_interval
                ),
            });
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            if !seen.insert(location.key()) {
                return Err(ConfigError::ValidationFailed {
                    message: format!(
                        "location '{}' duplicates coordinates {}",
                        location.location_name,
                        location.key()
                    ),
                });
            }
            location.massifs()?;
        }
        Ok(())
    }
}
