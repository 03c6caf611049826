//! Regional Bulletin Poll Set
//!
//! One bulletin engine per selected massif. [`RegionalBulletinPollSet::reconcile`]
//! is the only place engines are added or removed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serac_core::{MassifId, SourceKind};
use tracing::{debug, info, warn};

use crate::fetch::{Fetcher, SourceSetupError};
use crate::poll::PollEngine;
use crate::retry::RetryPolicy;

/// What a call to `reconcile` changed
#[derive(Debug, Default)]
pub struct BulletinDelta {
    pub started: Vec<MassifId>,
    pub stopped: Vec<MassifId>,
    pub failed: Vec<(MassifId, SourceSetupError)>,
}

impl BulletinDelta {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

/// Keyed collection of bulletin engines for one entry
#[derive(Debug)]
pub struct RegionalBulletinPollSet {
    entry_id: String,
    interval: Duration,
    retry: RetryPolicy,
    engines: BTreeMap<MassifId, Arc<PollEngine>>,
}

impl RegionalBulletinPollSet {
    pub fn new(entry_id: impl Into<String>, interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            entry_id: entry_id.into(),
            interval,
            retry,
            engines: BTreeMap::new(),
        }
    }

    /// Make the running engines match `selected`.
    ///
    /// Engines for massifs no longer selected are stopped and dropped first;
    /// new massifs get an engine bound to the fetcher `make` returns for them.
    /// Calling this twice with the same set changes nothing the second time.
    pub fn reconcile<F>(&mut self, selected: &BTreeSet<MassifId>, mut make: F) -> BulletinDelta
    where
        F: FnMut(MassifId) -> Result<Arc<dyn Fetcher>, SourceSetupError>,
    {
        let mut delta = BulletinDelta::default();

        let stale: Vec<MassifId> = self
            .engines
            .keys()
            .filter(|id| !selected.contains(id))
            .copied()
            .collect();
        for massif in stale {
            if let Some(engine) = self.engines.remove(&massif) {
                engine.stop();
                delta.stopped.push(massif);
            }
        }

        for &massif in selected {
            if self.engines.contains_key(&massif) {
                continue;
            }
            match make(massif) {
                Ok(fetcher) => {
                    let engine = PollEngine::spawn(
                        format!("{}/bulletin/{}", self.entry_id, massif.get()),
                        SourceKind::Bulletin,
                        fetcher,
                        self.interval,
                        self.retry.clone(),
                    );
                    self.engines.insert(massif, Arc::new(engine));
                    delta.started.push(massif);
                }
                Err(e) => {
                    warn!(
                        entry_id = %self.entry_id,
                        massif = massif.get(),
                        "Cannot set up bulletin source: {}", e
                    );
                    delta.failed.push((massif, e));
                }
            }
        }

        if delta.started.is_empty() && delta.stopped.is_empty() {
            debug!(entry_id = %self.entry_id, "Bulletin engines already match selection");
        } else {
            info!(
                entry_id = %self.entry_id,
                "Bulletin engines: started {:?}, stopped {:?}",
                delta.started.iter().map(|m| m.get()).collect::<Vec<_>>(),
                delta.stopped.iter().map(|m| m.get()).collect::<Vec<_>>()
            );
        }
        delta
    }

    pub fn get(&self, massif: MassifId) -> Option<&Arc<PollEngine>> {
        self.engines.get(&massif)
    }

    pub fn all(&self) -> impl Iterator<Item = (MassifId, &Arc<PollEngine>)> + '_ {
        self.engines.iter().map(|(id, engine)| (*id, engine))
    }

    pub fn ids(&self) -> BTreeSet<MassifId> {
        self.engines.keys().copied().collect()
    }

    /// Stop and drop every engine
    pub fn stop_all(&mut self) -> Vec<MassifId> {
        let stopped: Vec<MassifId> = self.engines.keys().copied().collect();
        for engine in self.engines.values() {
            engine.stop();
        }
        self.engines.clear();
        stopped
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Fetcher for Counting {
        async fn fetch(&self, _cancel: &CancellationToken) -> FetchResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({}))
        }
    }

    fn ids(raw: &[u16]) -> BTreeSet<MassifId> {
        raw.iter().map(|id| MassifId::new(*id).unwrap()).collect()
    }

    fn set() -> RegionalBulletinPollSet {
        RegionalBulletinPollSet::new("e1", Duration::from_secs(21600), RetryPolicy::none())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_adds_and_removes() {
        let mut set = set();
        let made = AtomicUsize::new(0);
        let make = |_| -> Result<Arc<dyn Fetcher>, SourceSetupError> {
            made.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counting(AtomicUsize::new(0))))
        };

        let delta = set.reconcile(&ids(&[2, 3]), make);
        assert_eq!(delta.started.len(), 2);
        let engine_3 = Arc::clone(set.get(MassifId::new(3).unwrap()).unwrap());

        let delta = set.reconcile(&ids(&[3, 4]), |_| {
            Ok(Arc::new(Counting(AtomicUsize::new(0))) as Arc<dyn Fetcher>)
        });
        assert_eq!(delta.started, vec![MassifId::new(4).unwrap()]);
        assert_eq!(delta.stopped, vec![MassifId::new(2).unwrap()]);
        assert_eq!(set.ids(), ids(&[3, 4]));
        // Engine 3 survived untouched
        assert!(Arc::ptr_eq(
            &engine_3,
            set.get(MassifId::new(3).unwrap()).unwrap()
        ));
        assert!(engine_3.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_is_idempotent() {
        let mut set = set();
        set.reconcile(&ids(&[1, 3]), |_| {
            Ok(Arc::new(Counting(AtomicUsize::new(0))) as Arc<dyn Fetcher>)
        });

        let mut calls = 0;
        let delta = set.reconcile(&ids(&[1, 3]), |_| {
            calls += 1;
            Ok(Arc::new(Counting(AtomicUsize::new(0))) as Arc<dyn Fetcher>)
        });
        assert!(delta.is_empty());
        assert_eq!(calls, 0);
        assert_eq!(set.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_construction_only_skips_that_massif() {
        let mut set = set();
        let delta = set.reconcile(&ids(&[2, 3]), |massif| {
            if massif.get() == 2 {
                Err(SourceSetupError::MissingToken(SourceKind::Bulletin))
            } else {
                Ok(Arc::new(Counting(AtomicUsize::new(0))) as Arc<dyn Fetcher>)
            }
        });
        assert_eq!(delta.failed.len(), 1);
        assert_eq!(set.ids(), ids(&[3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let mut set = set();
        set.reconcile(&ids(&[1, 2, 3]), |_| {
            Ok(Arc::new(Counting(AtomicUsize::new(0))) as Arc<dyn Fetcher>)
        });
        let engines: Vec<_> = set.all().map(|(_, e)| Arc::clone(e)).collect();
        assert_eq!(set.stop_all().len(), 3);
        assert!(set.is_empty());
        assert!(engines.iter().all(|e| !e.is_running()));
    }
}
