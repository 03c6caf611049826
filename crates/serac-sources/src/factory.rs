//! [`SourceFactory`] over HTTP

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Client;
use secrecy::SecretString;
use serac_config_entries::ConfigurationEntry;
use serac_coordinator::{Fetcher, SourceFactory, SourceSetupError, DEFAULT_FETCH_TIMEOUT};
use serac_core::{Department, MassifId, SourceKind};
use tracing::debug;

use crate::alert::VigilanceFetcher;
use crate::bulletin::BulletinFetcher;
use crate::http::{api_key_headers, build_client};
use crate::weather::OpenMeteoFetcher;

pub const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";
pub const BULLETIN_URL: &str = "https://public-api.meteofrance.fr/public/DPBRA/v1";
pub const ALERT_URL: &str = "https://public-api.meteofrance.fr/public/DPVigilance/v1";

/// Upstream locations and the per-request time budget
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub forecast_url: String,
    pub air_quality_url: String,
    pub bulletin_url: String,
    pub alert_url: String,
    pub timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            forecast_url: FORECAST_URL.to_string(),
            air_quality_url: AIR_QUALITY_URL.to_string(),
            bulletin_url: BULLETIN_URL.to_string(),
            alert_url: ALERT_URL.to_string(),
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl SourceSettings {
    /// Every upstream under one base url: `/forecast`, `/air-quality`,
    /// `/bra` and `/vigilance`
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            forecast_url: format!("{base}/forecast"),
            air_quality_url: format!("{base}/air-quality"),
            bulletin_url: format!("{base}/bra"),
            alert_url: format!("{base}/vigilance"),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Builds HTTP fetchers sharing one connection pool
pub struct HttpSources {
    client: Client,
    settings: SourceSettings,
}

impl HttpSources {
    pub fn new(settings: SourceSettings) -> Result<Self, reqwest::Error> {
        let client = build_client(settings.timeout)?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }
}

fn key_headers(
    kind: SourceKind,
    token: Option<&SecretString>,
) -> Result<HeaderMap, SourceSetupError> {
    let token = token.ok_or(SourceSetupError::MissingToken(kind))?;
    api_key_headers(token).map_err(|reason| SourceSetupError::Client { kind, reason })
}

impl SourceFactory for HttpSources {
    fn weather(&self, entry: &ConfigurationEntry) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        debug!(entry_id = %entry.entry_id, "Building forecast source");
        Ok(Arc::new(OpenMeteoFetcher::new(
            self.client.clone(),
            &self.settings.forecast_url,
            &self.settings.air_quality_url,
            entry.latitude,
            entry.longitude,
            self.settings.timeout,
        )))
    }

    fn bulletin(
        &self,
        entry: &ConfigurationEntry,
        massif: MassifId,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        let headers = key_headers(SourceKind::Bulletin, entry.bulletin_token.as_ref())?;
        debug!(
            entry_id = %entry.entry_id,
            massif = massif.get(),
            "Building bulletin source"
        );
        Ok(Arc::new(BulletinFetcher::new(
            self.client.clone(),
            &self.settings.bulletin_url,
            massif,
            headers,
            self.settings.timeout,
        )))
    }

    fn alert(
        &self,
        entry: &ConfigurationEntry,
        department: &'static Department,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        let headers = key_headers(SourceKind::Alert, entry.alert_token.as_ref())?;
        debug!(
            entry_id = %entry.entry_id,
            department = department.code,
            "Building vigilance source"
        );
        Ok(Arc::new(VigilanceFetcher::new(
            self.client.clone(),
            &self.settings.alert_url,
            department,
            headers,
            self.settings.timeout,
        )))
    }
}
