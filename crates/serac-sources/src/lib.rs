//! HTTP data sources for Serac
//!
//! Each upstream gets a [`Fetcher`](serac_coordinator::Fetcher) that performs
//! one request, classifies the failure when there is one, and otherwise hands
//! back the upstream payload as JSON:
//! - Open-Meteo forecast, with air quality merged in when available
//! - Météo-France avalanche bulletins, one per massif
//! - Météo-France vigilance alerts, one per department
//!
//! [`HttpSources`] builds them for a configuration entry.

mod alert;
mod bulletin;
mod factory;
mod http;
mod weather;

pub use alert::VigilanceFetcher;
pub use bulletin::BulletinFetcher;
pub use factory::{
    HttpSources, SourceSettings, AIR_QUALITY_URL, ALERT_URL, BULLETIN_URL, FORECAST_URL,
};
pub use http::{classify_status, API_KEY_HEADER};
pub use weather::{OpenMeteoFetcher, FORECAST_DAYS};
