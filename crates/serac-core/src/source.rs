//! Data sources and their classified failures

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind of upstream a poll engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Forecast plus air quality, one per location
    Weather,
    /// Avalanche bulletin, one per selected massif
    Bulletin,
    /// Vigilance alerts, one per location inside a covered department
    Alert,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Weather => "weather",
            SourceKind::Bulletin => "bulletin",
            SourceKind::Alert => "alert",
        };
        f.write_str(s)
    }
}

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Timeouts, connection failures, 429 and 5xx. Expected to self-resolve.
    TransientNetwork,
    /// Token rejected. Needs a credential update.
    Authorization,
    /// Nothing published for this target right now (404, bulletin out of season)
    NotFoundOrOutOfSeason,
    /// Upstream answered with something we cannot read
    MalformedData,
}

impl FetchErrorKind {
    /// Only network trouble is worth another attempt within the same cycle
    pub fn is_retryable(self) -> bool {
        matches!(self, FetchErrorKind::TransientNetwork)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::TransientNetwork => "transient_network",
            FetchErrorKind::Authorization => "authorization",
            FetchErrorKind::NotFoundOrOutOfSeason => "not_found_or_out_of_season",
            FetchErrorKind::MalformedData => "malformed_data",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure returned by a data source
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct SourceError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::TransientNetwork, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Authorization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFoundOrOutOfSeason, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::MalformedData, message)
    }
}
