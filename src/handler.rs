//! Annotation handler: decides whether a resource needs fetched content and
//! produces the updated resource.
//!
//! The handler knows nothing about queues or retries and never writes to the
//! store. It returns `Ok(None)` when there is nothing to do.

use crate::error::ReconcileError;
use crate::fetch::Fetcher;
use crate::model::Resource;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};
use url::Url;

// ASCII word characters only: data keys must be valid config map keys.
static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?-u:\w)+)=((?-u:\w)\S*)$").expect("hardcoded directive pattern is valid")
});

/// Turns a resource snapshot into "no change" or an updated copy.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(&self, resource: &Resource) -> Result<Option<Resource>, ReconcileError>;
}

/// A parsed `key=target` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Destination entry in the resource's data.
    pub key: String,
    /// URL, or host and path without a scheme.
    pub target: String,
}

impl Directive {
    pub fn parse(value: &str) -> Result<Self, ReconcileError> {
        let captures = DIRECTIVE
            .captures(value)
            .ok_or_else(|| ReconcileError::Parse {
                value: value.to_string(),
            })?;
        Ok(Self {
            key: captures[1].to_string(),
            target: captures[2].to_string(),
        })
    }
}

/// Qualify `target` with `https://` unless it already has an HTTP scheme,
/// then require a host. The returned string is the qualified input, not a
/// re-serialized URL.
pub fn normalize_url(target: &str) -> Result<String, ReconcileError> {
    let qualified = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("https://{target}")
    };

    // The WHATWG parser skips extra slashes (`https:///x` gets host `x`),
    // so the authority is checked on the raw text first.
    if authority(&qualified).is_empty() {
        return Err(ReconcileError::Validation {
            url: qualified,
            reason: "no host".to_string(),
        });
    }

    let parsed = Url::parse(&qualified).map_err(|e| ReconcileError::Validation {
        url: qualified.clone(),
        reason: e.to_string(),
    })?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(qualified),
        _ => Err(ReconcileError::Validation {
            url: qualified,
            reason: "no host".to_string(),
        }),
    }
}

/// Text between `://` and the first `/`, `?` or `#`.
fn authority(url: &str) -> &str {
    let rest = url.split_once("://").map_or("", |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    &rest[..end]
}

/// Fills `data[key]` with the content behind the directive's URL, once.
pub struct AnnotationHandler {
    fetcher: Arc<dyn Fetcher>,
}

impl AnnotationHandler {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Handler for AnnotationHandler {
    async fn process(&self, resource: &Resource) -> Result<Option<Resource>, ReconcileError> {
        let Some(value) = resource.directive() else {
            debug!(key = %resource.key(), "no directive annotation");
            return Ok(None);
        };

        let directive = Directive::parse(value)?;

        // Set-once: existing data is never refetched or overwritten.
        if resource.has_datum(&directive.key) {
            debug!(key = %resource.key(), data_key = %directive.key, "data already present");
            return Ok(None);
        }

        let url = normalize_url(&directive.target)?;
        let body = self
            .fetcher
            .get(&url)
            .await
            .map_err(|source| ReconcileError::Fetch {
                url: url.clone(),
                source,
            })?;
        info!(key = %resource.key(), data_key = %directive.key, %url, bytes = body.len(), "fetched directive target");

        let mut updated = resource.clone();
        updated.set_datum(directive.key, String::from_utf8_lossy(&body).into_owned());
        Ok(Some(updated))
    }
}
