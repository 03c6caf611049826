//! Open-Meteo forecast and air quality

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serac_coordinator::{FetchResult, Fetcher};
use serac_core::SourceError;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http::{cancellable, get_json};

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,pressure_msl,\
wind_speed_10m,wind_direction_10m,wind_gusts_10m,cloud_cover,is_day,\
precipitation,rain,showers,snowfall,weather_code";

const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,weather_code,\
wind_speed_10m_max,wind_gusts_10m_max,wind_direction_10m_dominant,sunrise,sunset,\
sunshine_duration,daylight_duration,uv_index_max,rain_sum,showers_sum,\
snowfall_sum,precipitation_sum,precipitation_hours";

const AIR_QUALITY_FIELDS: &str = "european_aqi,pm2_5,pm10,nitrogen_dioxide,ozone,sulphur_dioxide";

/// Days of daily forecast requested (today and the next two)
pub const FORECAST_DAYS: u8 = 3;

/// Forecast for one location, with current air quality merged in under
/// `air_quality` when that upstream answers
pub struct OpenMeteoFetcher {
    client: Client,
    forecast_url: String,
    air_quality_url: String,
    latitude: f64,
    longitude: f64,
    timeout: Duration,
}

impl OpenMeteoFetcher {
    pub fn new(
        client: Client,
        forecast_url: impl Into<String>,
        air_quality_url: impl Into<String>,
        latitude: f64,
        longitude: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            forecast_url: forecast_url.into(),
            air_quality_url: air_quality_url.into(),
            latitude,
            longitude,
            timeout,
        }
    }

    fn located(&self, url: &str) -> RequestBuilder {
        self.client.get(url).query(&[
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("timezone", "auto".to_string()),
        ])
    }

    async fn forecast(&self) -> Result<Value, SourceError> {
        let request = self.located(&self.forecast_url).query(&[
            ("current", CURRENT_FIELDS.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
        ]);
        get_json(request, "Open-Meteo forecast").await
    }

    async fn air_quality(&self) -> Result<Value, SourceError> {
        let request = self
            .located(&self.air_quality_url)
            .query(&[("current", AIR_QUALITY_FIELDS)]);
        let body = get_json(request, "Open-Meteo air quality").await?;
        body.get("current")
            .cloned()
            .ok_or_else(|| SourceError::malformed("air quality response has no current block"))
    }
}

#[async_trait]
impl Fetcher for OpenMeteoFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> FetchResult {
        cancellable(cancel, async {
            let mut forecast = self.forecast().await?;
            let Some(fields) = forecast.as_object_mut() else {
                return Err(SourceError::malformed("forecast response is not an object"));
            };
            if !fields.contains_key("current") {
                return Err(SourceError::malformed("forecast response has no current block"));
            }

            // Air quality is optional
            match self.air_quality().await {
                Ok(current) => {
                    fields.insert("air_quality".to_string(), current);
                }
                Err(e) => warn!(
                    latitude = self.latitude,
                    longitude = self.longitude,
                    "Air quality unavailable: {}",
                    e
                ),
            }

            debug!(
                latitude = self.latitude,
                longitude = self.longitude,
                "Fetched forecast"
            );
            Ok(forecast)
        })
        .await
    }

    /// Two sequential requests share the budget
    fn timeout(&self) -> Duration {
        self.timeout * 2
    }
}
