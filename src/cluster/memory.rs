//! In-memory resource API.
//!
//! [`MemoryCluster`] holds the authoritative resources, hands out version
//! tokens, rejects stale writes, and records every API call made through it
//! so tests can assert on them. [`MemoryInformer`] lists and watches it and
//! keeps the controller's local cache.

use super::{CacheError, Informer, ResourceStore, StoreError};
use crate::model::{Notification, Resource, ResourceKey};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WATCH_BUFFER: usize = 1024;

/// An API call observed by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: &'static str,
    pub key: Option<ResourceKey>,
    /// The object sent with the call, for writes.
    pub object: Option<Resource>,
}

impl Action {
    pub fn matches(&self, verb: &str) -> bool {
        self.verb == verb
    }
}

#[derive(Debug, Clone)]
enum Change {
    Upserted(Resource),
    Deleted(ResourceKey),
}

struct ClusterState {
    resources: BTreeMap<ResourceKey, Resource>,
    next_version: u64,
    actions: Vec<Action>,
}

impl ClusterState {
    fn bump_version(&mut self) -> String {
        self.next_version = self.next_version.saturating_add(1);
        self.next_version.to_string()
    }
}

/// Shared handle to an in-memory set of resources.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
    changes: broadcast::Sender<Change>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                resources: BTreeMap::new(),
                next_version: 0,
                actions: Vec::new(),
            })),
            changes,
        }
    }

    /// Build a cluster pre-populated with `resources`. Seeding is not
    /// recorded as an action.
    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let cluster = Self::new();
        for resource in resources {
            cluster.apply(resource);
        }
        cluster
    }

    /// Load seed resources from a TOML file of `[[resource]]` tables.
    pub fn load_seed(path: &Path) -> crate::error::Result<Self> {
        #[derive(Deserialize)]
        struct Seed {
            #[serde(default)]
            resource: Vec<Resource>,
        }

        let content = std::fs::read_to_string(path)?;
        let seed: Seed = toml::from_str(&content).map_err(|e| {
            crate::error::Error::Config(format!("bad seed file {}: {e}", path.display()))
        })?;
        info!(count = seed.resource.len(), path = %path.display(), "loaded seed resources");
        Ok(Self::with_resources(seed.resource))
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a resource as some other client would, ignoring
    /// version tokens. Not recorded as an action.
    pub fn apply(&self, mut resource: Resource) -> Resource {
        let mut state = self.state();
        resource.resource_version = state.bump_version();
        state.resources.insert(resource.key(), resource.clone());
        let _ = self.changes.send(Change::Upserted(resource.clone()));
        resource
    }

    /// Remove a resource. Not recorded as an action.
    pub fn delete(&self, key: &ResourceKey) -> Option<Resource> {
        let mut state = self.state();
        let removed = state.resources.remove(key);
        if removed.is_some() {
            let _ = self.changes.send(Change::Deleted(key.clone()));
        }
        removed
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Resource> {
        self.state().resources.get(key).cloned()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.state().resources.values().cloned().collect()
    }

    /// Every recorded API call, oldest first.
    pub fn actions(&self) -> Vec<Action> {
        self.state().actions.clone()
    }

    /// A fresh informer over this cluster with an empty cache.
    pub fn informer(&self) -> MemoryInformer {
        MemoryInformer {
            cluster: self.clone(),
            cache: RwLock::new(BTreeMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Snapshot the resources and subscribe to later changes atomically, so
    /// nothing falls between the list and the watch.
    fn list_and_watch(&self) -> (Vec<Resource>, broadcast::Receiver<Change>) {
        let mut state = self.state();
        let receiver = self.changes.subscribe();
        let snapshot = state.resources.values().cloned().collect();
        state.actions.push(Action {
            verb: "list",
            key: None,
            object: None,
        });
        state.actions.push(Action {
            verb: "watch",
            key: None,
            object: None,
        });
        (snapshot, receiver)
    }

    fn relist(&self) -> Vec<Resource> {
        let mut state = self.state();
        state.actions.push(Action {
            verb: "list",
            key: None,
            object: None,
        });
        state.resources.values().cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryCluster {
    async fn update(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        let key = resource.key();
        let mut state = self.state();
        state.actions.push(Action {
            verb: "update",
            key: Some(key.clone()),
            object: Some(resource.clone()),
        });

        let current = state
            .resources
            .get(&key)
            .map(|r| r.resource_version.clone())
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if current != resource.resource_version {
            return Err(StoreError::Conflict {
                key,
                current,
                attempted: resource.resource_version,
            });
        }

        resource.resource_version = state.bump_version();
        state.resources.insert(key.clone(), resource.clone());
        let _ = self.changes.send(Change::Upserted(resource.clone()));
        debug!(%key, version = %resource.resource_version, "resource updated");
        Ok(resource)
    }
}

// ---------------------------------------------------------------------------
// Informer
// ---------------------------------------------------------------------------

/// Lists and watches a [`MemoryCluster`], keeping a local cache.
pub struct MemoryInformer {
    cluster: MemoryCluster,
    cache: RwLock<BTreeMap<ResourceKey, Resource>>,
    synced: AtomicBool,
}

impl MemoryInformer {
    /// Store `resource` in the cache and describe the change.
    fn observe(&self, resource: Resource) -> Notification {
        let previous = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.key(), resource.clone());
        match previous {
            Some(old) => Notification::Updated { old, new: resource },
            None => Notification::Added(resource),
        }
    }

    fn forget(&self, key: &ResourceKey) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Re-read everything after the watch fell behind. Emits a notification
    /// for every resource that differs from the cache.
    fn resync(&self, events: &mpsc::UnboundedSender<Notification>) -> bool {
        let fresh = self.cluster.relist();
        let fresh_keys: Vec<_> = fresh.iter().map(Resource::key).collect();

        let stale: Vec<_> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| !fresh_keys.contains(k))
            .cloned()
            .collect();
        for key in &stale {
            self.forget(key);
        }

        for resource in fresh {
            let unchanged = self
                .cache
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&resource.key())
                .is_some_and(|cached| cached == &resource);
            if unchanged {
                continue;
            }
            if events.send(self.observe(resource)).is_err() {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Informer for MemoryInformer {
    async fn run(&self, events: mpsc::UnboundedSender<Notification>, stop: CancellationToken) {
        let (initial, mut changes) = self.cluster.list_and_watch();
        let mut added = Vec::with_capacity(initial.len());
        for resource in initial {
            added.push(self.observe(resource));
        }
        self.synced.store(true, Ordering::Release);
        debug!(count = added.len(), "informer cache synced");

        for notification in added {
            if events.send(notification).is_err() {
                return;
            }
        }

        loop {
            let change = tokio::select! {
                _ = stop.cancelled() => return,
                change = changes.recv() => change,
            };

            let delivered = match change {
                Ok(Change::Upserted(resource)) => events.send(self.observe(resource)).is_ok(),
                Ok(Change::Deleted(key)) => {
                    self.forget(&key);
                    true
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "watch fell behind, relisting");
                    self.resync(&events)
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if !delivered {
                return;
            }
        }
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    fn get_by_key(&self, key: &ResourceKey) -> Result<Option<Resource>, CacheError> {
        let cache = self
            .cache
            .read()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".to_string()))?;
        Ok(cache.get(key).cloned())
    }
}
