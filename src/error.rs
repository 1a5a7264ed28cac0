//! Error types for config-getter.

use thiserror::Error;

use crate::cluster::{CacheError, StoreError};
use crate::fetch::FetchError;
use crate::model::ResourceKey;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?} waiting for caches to sync")]
    CacheSyncTimeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single reconcile attempt failed.
///
/// Every variant is retried the same way; the variant only picks the event
/// reason attached to the warning.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("annotation {value:?} does not match format key=https://path.com")]
    Parse { value: String },

    #[error("invalid URL {url}: {reason}")]
    Validation { url: String, reason: String },

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to update {key}: {source}")]
    WriteConflict {
        key: ResourceKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to look up {key} in cache: {source}")]
    Lookup {
        key: ResourceKey,
        #[source]
        source: CacheError,
    },
}

impl ReconcileError {
    /// Event reason for this failure class.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Parse { .. } => "ParseFailure",
            ReconcileError::Validation { .. } => "ValidationFailure",
            ReconcileError::Fetch { .. } => "GetFailure",
            ReconcileError::WriteConflict { .. } => "UpdateFailure",
            ReconcileError::Lookup { .. } => "LookupFailure",
        }
    }
}
