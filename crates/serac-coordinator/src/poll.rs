//! Poll Engine
//!
//! Runs one [`Fetcher`] on a fixed interval and keeps the last good payload.
//!
//! Each engine owns a single background task. The first fetch happens as soon
//! as the engine starts; afterwards the task sleeps for the interval between
//! cycles. A cycle is one fetch plus up to [`RetryPolicy::max_retries`]
//! retries for transient failures. Cycles never overlap: the scheduled loop
//! and [`PollEngine::force_refresh`] share one fetch lock.
//!
//! State is published through a `watch` channel as `Arc<PollState>`. Every
//! update replaces the whole state, so readers always see a consistent value.
//!
//! Stopping bumps a generation counter. A fetch that was already in flight is
//! allowed to finish, but its result is dropped because its captured
//! generation no longer matches.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serac_core::{FetchErrorKind, SourceError, SourceKind};
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fetch::{FetchResult, Fetcher, Payload};
use crate::retry::RetryPolicy;

/// The last successful payload
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub payload: Arc<Payload>,
    pub fetched_at: DateTime<Utc>,
    fetched_instant: Instant,
}

impl Snapshot {
    fn new(payload: Payload) -> Self {
        Self {
            payload: Arc::new(payload),
            fetched_at: Utc::now(),
            fetched_instant: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_instant.elapsed()
    }
}

/// The most recent failure
#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub kind: FetchErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&SourceError> for LastError {
    fn from(err: &SourceError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            at: Utc::now(),
        }
    }
}

/// How a consumer should present an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Holds data (possibly stale)
    Available,
    /// Nothing yet; transient or malformed failures only
    NoDataYet,
    /// Token rejected on the latest cycle
    CredentialsRequired,
    /// Nothing published, and never has been since start
    OutOfSeason,
}

/// Everything an engine knows, replaced wholesale on every change
#[derive(Debug, Clone, Default)]
pub struct PollState {
    pub snapshot: Option<Snapshot>,
    pub last_error: Option<LastError>,
    pub consecutive_failures: u32,
    pub next_due: Option<DateTime<Utc>>,
    /// Completed cycles, successful or not
    pub cycles: u64,
}

impl PollState {
    pub fn has_data(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.snapshot.as_ref().map(|s| s.fetched_at)
    }

    /// The last error, if the latest cycle failed
    pub fn current_error(&self) -> Option<&LastError> {
        if self.consecutive_failures > 0 {
            self.last_error.as_ref()
        } else {
            None
        }
    }

    pub fn availability(&self) -> Availability {
        match self.current_error().map(|e| e.kind) {
            Some(FetchErrorKind::Authorization) => Availability::CredentialsRequired,
            _ if self.snapshot.is_some() => Availability::Available,
            Some(FetchErrorKind::NotFoundOrOutOfSeason) => Availability::OutOfSeason,
            _ => Availability::NoDataYet,
        }
    }

    pub fn view(&self) -> SnapshotView {
        match &self.snapshot {
            Some(snapshot) => SnapshotView::Ready {
                payload: Arc::clone(&snapshot.payload),
                fetched_at: snapshot.fetched_at,
                age: snapshot.age(),
            },
            None => SnapshotView::NeverSucceeded,
        }
    }
}

/// What [`PollEngine::snapshot`] hands out
#[derive(Debug, Clone)]
pub enum SnapshotView {
    Ready {
        payload: Arc<Payload>,
        fetched_at: DateTime<Utc>,
        age: Duration,
    },
    NeverSucceeded,
}

impl SnapshotView {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            SnapshotView::Ready { payload, .. } => Some(payload),
            SnapshotView::NeverSucceeded => None,
        }
    }

    pub fn age(&self) -> Option<Duration> {
        match self {
            SnapshotView::Ready { age, .. } => Some(*age),
            SnapshotView::NeverSucceeded => None,
        }
    }
}

struct EngineInner {
    label: String,
    kind: SourceKind,
    fetcher: Arc<dyn Fetcher>,
    interval: Duration,
    retry: RetryPolicy,
    state: watch::Sender<Arc<PollState>>,
    generation: AtomicU64,
    fetch_lock: Mutex<()>,
}

/// Periodic fetch-and-cache unit for one upstream
pub struct PollEngine {
    inner: Arc<EngineInner>,
    /// Cancellation token of the current run, if started
    running: StdMutex<Option<CancellationToken>>,
}

impl fmt::Debug for PollEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollEngine")
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .field("interval", &self.inner.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PollEngine {
    /// Create an idle engine
    pub fn new(
        label: impl Into<String>,
        kind: SourceKind,
        fetcher: Arc<dyn Fetcher>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(PollState::default()));
        Self {
            inner: Arc::new(EngineInner {
                label: label.into(),
                kind,
                fetcher,
                interval,
                retry,
                state,
                generation: AtomicU64::new(0),
                fetch_lock: Mutex::new(()),
            }),
            running: StdMutex::new(None),
        }
    }

    /// Create an engine and start it right away
    pub fn spawn(
        label: impl Into<String>,
        kind: SourceKind,
        fetcher: Arc<dyn Fetcher>,
        interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let engine = Self::new(label, kind, fetcher, interval, retry);
        engine.start();
        engine
    }

    fn running(&self) -> StdMutexGuard<'_, Option<CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin scheduling. The first fetch runs immediately.
    ///
    /// Starting a running engine does nothing.
    pub fn start(&self) {
        let mut running = self.running();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            generation,
            cancel.clone(),
        ));
        *running = Some(cancel);

        debug!(
            engine = %self.inner.label,
            interval_secs = self.inner.interval.as_secs(),
            "Started poll engine"
        );
    }

    /// Cancel the schedule. An in-flight fetch finishes in the background and
    /// its result is discarded.
    pub fn stop(&self) {
        let Some(cancel) = self.running().take() else {
            return;
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
        debug!(engine = %self.inner.label, "Stopped poll engine");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Fetch now, outside the schedule.
    ///
    /// When a fetch is already in flight this does not start another one; it
    /// resolves once the in-flight cycle has completed.
    pub async fn force_refresh(&self) {
        let cancel = { self.running().clone() };
        let Some(cancel) = cancel else {
            debug!(engine = %self.inner.label, "Ignoring refresh of stopped engine");
            return;
        };
        let generation = self.inner.generation.load(Ordering::SeqCst);

        match self.inner.fetch_lock.try_lock() {
            Ok(guard) => {
                debug!(engine = %self.inner.label, "Forced refresh");
                self.inner.cycle_locked(guard, generation, &cancel).await;
            }
            Err(_) => {
                debug!(engine = %self.inner.label, "Refresh coalesced with in-flight fetch");
                let _done = self.inner.fetch_lock.lock().await;
            }
        }
    }

    /// Last successful payload and its age, or [`SnapshotView::NeverSucceeded`]
    pub fn snapshot(&self) -> SnapshotView {
        self.state().view()
    }

    pub fn state(&self) -> Arc<PollState> {
        Arc::clone(&self.inner.state.borrow())
    }

    /// Notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<Arc<PollState>> {
        self.inner.state.subscribe()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn kind(&self) -> SourceKind {
        self.inner.kind
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }
}

impl Drop for PollEngine {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancel) = running {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            cancel.cancel();
        }
    }
}

async fn run_loop(inner: Arc<EngineInner>, generation: u64, cancel: CancellationToken) {
    loop {
        let guard = inner.fetch_lock.lock().await;
        inner.cycle_locked(guard, generation, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }

        let next = Instant::now() + inner.interval;
        inner.publish_next_due(generation);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(next) => {}
        }
    }
    debug!(engine = %inner.label, "Poll loop exited");
}

impl EngineInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn cycle_locked(
        &self,
        _guard: MutexGuard<'_, ()>,
        generation: u64,
        cancel: &CancellationToken,
    ) {
        if !self.is_current(generation) {
            return;
        }

        let Some(outcome) = self.fetch_with_retry(cancel).await else {
            debug!(engine = %self.label, "Cycle cancelled during retry delay");
            return;
        };

        if !self.is_current(generation) {
            debug!(engine = %self.label, "Discarding result of stopped engine");
            return;
        }
        self.record(outcome);
    }

    /// `None` when cancelled while waiting to retry
    async fn fetch_with_retry(&self, cancel: &CancellationToken) -> Option<FetchResult> {
        let mut retry = 0;
        loop {
            let err = match self.attempt(cancel).await {
                Ok(payload) => return Some(Ok(payload)),
                Err(err) => err,
            };

            let Some(delay) = self.retry.delay_for(err.kind, retry) else {
                return Some(Err(err));
            };
            retry += 1;
            warn!(
                engine = %self.label,
                attempt = retry,
                "Fetch failed ({}), retrying in {}s",
                err,
                delay.as_secs()
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, cancel: &CancellationToken) -> FetchResult {
        let timeout = self.fetcher.timeout();
        match tokio::time::timeout(timeout, self.fetcher.fetch(cancel)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::transient(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn record(&self, outcome: FetchResult) {
        let previous = Arc::clone(&self.state.borrow());
        let mut next = (*previous).clone();
        next.cycles += 1;

        match outcome {
            Ok(payload) => {
                if previous.consecutive_failures > 0 {
                    info!(
                        engine = %self.label,
                        "Recovered after {} failed cycles", previous.consecutive_failures
                    );
                } else {
                    debug!(engine = %self.label, "Fetched new data");
                }
                next.snapshot = Some(Snapshot::new(payload));
                next.consecutive_failures = 0;
            }
            Err(err) => {
                next.consecutive_failures += 1;
                let failures = next.consecutive_failures;
                match err.kind {
                    FetchErrorKind::TransientNetwork => {
                        warn!(engine = %self.label, failures, "Fetch failed: {}", err)
                    }
                    FetchErrorKind::NotFoundOrOutOfSeason => {
                        info!(engine = %self.label, failures, "No data published: {}", err)
                    }
                    FetchErrorKind::Authorization | FetchErrorKind::MalformedData => {
                        error!(engine = %self.label, failures, "Fetch failed: {}", err)
                    }
                }
                next.last_error = Some(LastError::from(&err));
            }
        }

        self.state.send_replace(Arc::new(next));
    }

    fn publish_next_due(&self, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let next_due = chrono::Duration::from_std(self.interval)
            .ok()
            .map(|d| Utc::now() + d);
        self.state.send_modify(|state| {
            let mut updated = (**state).clone();
            updated.next_due = next_due;
            *state = Arc::new(updated);
        });
    }
}
