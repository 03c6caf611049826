//! Per-entry weather and alert engines

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serac_core::{Department, SourceKind};

use crate::fetch::Fetcher;
use crate::poll::PollEngine;
use crate::retry::RetryPolicy;

/// Intervals and retry policy shared by all engines of an integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub weather_interval: Duration,
    pub bulletin_interval: Duration,
    pub alert_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            weather_interval: Duration::from_secs(3600),
            bulletin_interval: Duration::from_secs(6 * 3600),
            alert_interval: Duration::from_secs(1800),
            retry: RetryPolicy::standard(),
        }
    }
}

/// Forecast and air quality for one entry
#[derive(Debug)]
pub struct WeatherPollEngine {
    engine: Arc<PollEngine>,
}

impl WeatherPollEngine {
    pub fn start(entry_id: &str, fetcher: Arc<dyn Fetcher>, settings: &PollSettings) -> Self {
        let engine = PollEngine::spawn(
            format!("{}/weather", entry_id),
            SourceKind::Weather,
            fetcher,
            settings.weather_interval,
            settings.retry.clone(),
        );
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Arc<PollEngine> {
        &self.engine
    }
}

impl Deref for WeatherPollEngine {
    type Target = PollEngine;

    fn deref(&self) -> &PollEngine {
        &self.engine
    }
}

/// Vigilance alerts for the department an entry falls in
#[derive(Debug)]
pub struct AlertPollEngine {
    engine: Arc<PollEngine>,
    department: &'static Department,
}

impl AlertPollEngine {
    pub fn start(
        entry_id: &str,
        department: &'static Department,
        fetcher: Arc<dyn Fetcher>,
        settings: &PollSettings,
    ) -> Self {
        let engine = PollEngine::spawn(
            format!("{}/alert/{}", entry_id, department.code),
            SourceKind::Alert,
            fetcher,
            settings.alert_interval,
            settings.retry.clone(),
        );
        Self {
            engine: Arc::new(engine),
            department,
        }
    }

    pub fn department(&self) -> &'static Department {
        self.department
    }

    pub fn engine(&self) -> &Arc<PollEngine> {
        &self.engine
    }
}

impl Deref for AlertPollEngine {
    type Target = PollEngine;

    fn deref(&self) -> &PollEngine {
        &self.engine
    }
}
