//! Météo-France avalanche bulletins (BRA)
//!
//! The bulletin is XML. It is passed through untouched; the only thing read
//! here is whether the risk cartouche is present, since bulletins published
//! outside the season come without one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serac_coordinator::{FetchResult, Fetcher};
use serac_core::{MassifId, SourceError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::http::{cancellable, get_text};

const RISK_CARTOUCHE: &str = "<CARTOUCHERISQUE";

/// Bulletin for one massif
pub struct BulletinFetcher {
    client: Client,
    url: String,
    massif: MassifId,
    headers: HeaderMap,
    timeout: Duration,
}

impl BulletinFetcher {
    /// `headers` carries the API key
    pub fn new(
        client: Client,
        base_url: &str,
        massif: MassifId,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: format!("{}/massif/BRA", base_url.trim_end_matches('/')),
            massif,
            headers,
            timeout,
        }
    }

    async fn bulletin(&self) -> FetchResult {
        let request = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .query(&[
                ("id-massif", self.massif.get().to_string()),
                ("format", "xml".to_string()),
            ]);
        let what = format!("bulletin for {}", self.massif.name());
        let body = get_text(request, &what).await?;

        if !body.trim_start().starts_with('<') {
            return Err(SourceError::malformed(format!("{what} is not XML")));
        }
        if !body.contains(RISK_CARTOUCHE) {
            info!(
                massif = self.massif.get(),
                "No risk published for {}, out of season",
                self.massif.name()
            );
            return Err(SourceError::not_found(format!(
                "{what} has no risk cartouche"
            )));
        }

        debug!(massif = self.massif.get(), bytes = body.len(), "Fetched bulletin");
        Ok(json!({
            "massif": self.massif.get(),
            "massif_name": self.massif.name(),
            "format": "xml",
            "bulletin": body,
        }))
    }
}

#[async_trait]
impl Fetcher for BulletinFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> FetchResult {
        cancellable(cancel, self.bulletin()).await
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
