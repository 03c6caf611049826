//! Fetch contract between poll engines and data sources
//!
//! A [`Fetcher`] performs one attempt against one upstream. It is bound to its
//! credentials and target when constructed by a [`SourceFactory`], so the
//! engine only ever calls `fetch` with a cancellation token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serac_config_entries::ConfigurationEntry;
use serac_core::{Department, MassifId, SourceError, SourceKind};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Opaque upstream payload
pub type Payload = serde_json::Value;

/// Result of a single fetch attempt
pub type FetchResult = Result<Payload, SourceError>;

/// Upper bound for one attempt when a fetcher does not say otherwise
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One upstream, ready to be polled
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform one attempt.
    ///
    /// Implementations should return early once `cancel` fires, but are not
    /// required to: the engine discards late results either way.
    async fn fetch(&self, cancel: &CancellationToken) -> FetchResult;

    /// Time budget for one attempt. Exceeding it counts as a transient failure.
    fn timeout(&self) -> Duration {
        DEFAULT_FETCH_TIMEOUT
    }
}

/// Errors raised while constructing a fetcher
///
/// These are configuration problems, not runtime data problems; they fail the
/// setup of the one source concerned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceSetupError {
    #[error("{0} source requires an access token")]
    MissingToken(SourceKind),

    #[error("failed to build {kind} client: {reason}")]
    Client { kind: SourceKind, reason: String },
}

/// Builds fetchers for an entry
pub trait SourceFactory: Send + Sync {
    fn weather(&self, entry: &ConfigurationEntry) -> Result<Arc<dyn Fetcher>, SourceSetupError>;

    fn bulletin(
        &self,
        entry: &ConfigurationEntry,
        massif: MassifId,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError>;

    fn alert(
        &self,
        entry: &ConfigurationEntry,
        department: &'static Department,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError>;
}
