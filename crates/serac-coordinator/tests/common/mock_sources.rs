//! Mock data sources
//!
//! [`MockSources`] is a [`SourceFactory`] whose fetchers answer from a script
//! shared with the test, so results can change while engines run. Every
//! fetcher counts its calls per target.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serac_config_entries::ConfigurationEntry;
use serac_coordinator::{FetchResult, Fetcher, SourceFactory, SourceSetupError};
use serac_core::{Department, MassifId, SourceError, SourceKind};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// What a fetcher polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Weather,
    Alert,
    Bulletin(u16),
}

impl Target {
    pub fn bulletin(massif: MassifId) -> Self {
        Target::Bulletin(massif.get())
    }

    fn kind(self) -> SourceKind {
        match self {
            Target::Weather => SourceKind::Weather,
            Target::Alert => SourceKind::Alert,
            Target::Bulletin(_) => SourceKind::Bulletin,
        }
    }
}

#[derive(Default)]
struct Script {
    queued: VecDeque<FetchResult>,
    fallback: Option<FetchResult>,
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<HashMap<Target, Script>>,
    calls: Mutex<HashMap<Target, Arc<AtomicUsize>>>,
    /// Token each built fetcher was handed
    built: Mutex<Vec<(Target, Option<String>)>>,
    broken: Mutex<HashSet<Target>>,
}

impl Shared {
    fn counter(&self, target: Target) -> Arc<AtomicUsize> {
        let mut calls = self.calls.lock().unwrap();
        Arc::clone(calls.entry(target).or_default())
    }

    fn next(&self, target: Target) -> FetchResult {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(target).or_default();
        if let Some(result) = script.queued.pop_front() {
            return result;
        }
        script
            .fallback
            .clone()
            .unwrap_or_else(|| Ok(default_payload(target)))
    }
}

fn default_payload(target: Target) -> serde_json::Value {
    match target {
        Target::Weather => json!({"current": {"temperature_2m": -2.0}, "daily": {}}),
        Target::Alert => json!({"department": "74", "level": 1}),
        Target::Bulletin(id) => json!({"massif": id, "risk": 3}),
    }
}

pub struct MockFetcher {
    target: Target,
    shared: Arc<Shared>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, _cancel: &CancellationToken) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.shared.next(self.target)
    }
}

/// Scripted [`SourceFactory`]
#[derive(Clone, Default)]
pub struct MockSources {
    shared: Arc<Shared>,
}

impl MockSources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Results returned in order before falling back
    pub fn queue(&self, target: Target, results: impl IntoIterator<Item = FetchResult>) {
        let mut scripts = self.shared.scripts.lock().unwrap();
        scripts.entry(target).or_default().queued.extend(results);
    }

    /// Result returned once the queue is empty
    pub fn always(&self, target: Target, result: FetchResult) {
        let mut scripts = self.shared.scripts.lock().unwrap();
        scripts.entry(target).or_default().fallback = Some(result);
    }

    /// Make construction of `target`'s fetcher fail
    pub fn break_setup(&self, target: Target) {
        self.shared.broken.lock().unwrap().insert(target);
    }

    pub fn fix_setup(&self, target: Target) {
        self.shared.broken.lock().unwrap().remove(&target);
    }

    pub fn calls(&self, target: Target) -> usize {
        self.shared.counter(target).load(Ordering::SeqCst)
    }

    /// How many fetchers were built for `target`
    pub fn built(&self, target: Target) -> usize {
        self.shared
            .built
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == target)
            .count()
    }

    /// Token the most recent fetcher for `target` was built with
    pub fn last_token(&self, target: Target) -> Option<String> {
        self.shared
            .built
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| *t == target)
            .and_then(|(_, token)| token.clone())
    }

    fn build(
        &self,
        target: Target,
        token: Option<String>,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        if self.shared.broken.lock().unwrap().contains(&target) {
            return Err(SourceSetupError::Client {
                kind: target.kind(),
                reason: "mock client refused".into(),
            });
        }
        self.shared.built.lock().unwrap().push((target, token));
        Ok(Arc::new(MockFetcher {
            target,
            shared: Arc::clone(&self.shared),
            calls: self.shared.counter(target),
        }))
    }
}

impl SourceFactory for MockSources {
    fn weather(&self, _entry: &ConfigurationEntry) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        self.build(Target::Weather, None)
    }

    fn bulletin(
        &self,
        entry: &ConfigurationEntry,
        massif: MassifId,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        let token = entry
            .bulletin_token
            .as_ref()
            .ok_or(SourceSetupError::MissingToken(SourceKind::Bulletin))?;
        self.build(
            Target::bulletin(massif),
            Some(token.expose_secret().to_string()),
        )
    }

    fn alert(
        &self,
        entry: &ConfigurationEntry,
        _department: &'static Department,
    ) -> Result<Arc<dyn Fetcher>, SourceSetupError> {
        let token = entry
            .alert_token
            .as_ref()
            .ok_or(SourceSetupError::MissingToken(SourceKind::Alert))?;
        self.build(Target::Alert, Some(token.expose_secret().to_string()))
    }
}

pub fn out_of_season() -> FetchResult {
    Err(SourceError::not_found("no bulletin published for this massif"))
}

pub fn unauthorized(token: &str) -> FetchResult {
    Err(SourceError::authorization(format!(
        "401 Unauthorized (apikey={})",
        token
    )))
}
