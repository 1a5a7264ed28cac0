//! Boundary to the resource API: the watch source with its local cache, and
//! the store that accepts writes.
//!
//! The controller only talks to these traits. [`memory`] provides an
//! in-process implementation used by the binary and the tests.

pub mod memory;

use crate::model::{Notification, Resource, ResourceKey};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("conflict: resource {key} is at version {current}, write was based on {attempted}")]
    Conflict {
        key: ResourceKey,
        current: String,
        attempted: String,
    },

    #[error("resource {0} not found")]
    NotFound(ResourceKey),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Lists and watches resources, keeping a local read-only cache.
#[async_trait]
pub trait Informer: Send + Sync {
    /// List, then watch, sending every change to `events` until `stop`
    /// fires or the receiver is dropped.
    async fn run(&self, events: mpsc::UnboundedSender<Notification>, stop: CancellationToken);

    /// True once the initial list has been loaded into the cache.
    fn has_synced(&self) -> bool;

    fn get_by_key(&self, key: &ResourceKey) -> Result<Option<Resource>, CacheError>;
}

/// Accepts writes to resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Replace the stored resource. Fails with [`StoreError::Conflict`] when
    /// `resource.resource_version` is stale.
    async fn update(&self, resource: Resource) -> Result<Resource, StoreError>;
}
