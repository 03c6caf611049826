//! Serac Coordinator
//!
//! This crate provides the multi-source coordination layer:
//! - Periodic fetching with retry and backoff (PollEngine)
//! - Per-massif bulletin engines (RegionalBulletinPollSet)
//! - Per-entry engine ownership (CoordinatorRegistry)
//! - Desired entity/device derivation and registry reconciliation
//! - Diagnostics export
//!
//! [`SeracIntegration`] ties it to configuration change notifications.

pub mod bulletins;
pub mod desired;
pub mod diagnostics;
pub mod engines;
pub mod fetch;
pub mod integration;
pub mod platform;
pub mod poll;
pub mod reconcile;
pub mod registry;
pub mod retry;

pub use bulletins::{BulletinDelta, RegionalBulletinPollSet};
pub use desired::{DesiredEntity, DesiredSet};
pub use diagnostics::{DiagnosticsExporter, EntryDiagnostics, REDACTED};
pub use engines::{AlertPollEngine, PollSettings, WeatherPollEngine};
pub use fetch::{
    FetchResult, Fetcher, Payload, SourceFactory, SourceSetupError, DEFAULT_FETCH_TIMEOUT,
};
pub use integration::SeracIntegration;
pub use platform::EntityReading;
pub use poll::{Availability, LastError, PollEngine, PollState, Snapshot, SnapshotView};
pub use reconcile::{ReconcileError, ReconcileReport, ReconciliationEngine};
pub use registry::{CoordinatorKey, CoordinatorRegistry, EntryCoordinators};
pub use retry::RetryPolicy;
