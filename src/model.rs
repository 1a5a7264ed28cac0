//! Core data model.
//!
//! A resource is a namespaced key-value document with annotations. The
//! controller watches resources and, when the directive annotation asks for
//! it, fills one entry of `data` with content fetched from a URL.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation whose value carries the `dataKey=url` directive.
pub const DIRECTIVE_ANNOTATION: &str = "x-k8s-io/curl-me-that";

// ---------------------------------------------------------------------------
// Resource Key
// ---------------------------------------------------------------------------

/// Identity of a resource: `namespace/name`. The unit of queue deduplication.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        if namespace.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{namespace}/{name}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A watched, annotatable key-value document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub name: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Absent until something writes to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, String>>,

    /// Opaque version token owned by the store. Used to reject stale writes.
    #[serde(default)]
    pub resource_version: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Resource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            annotations: BTreeMap::new(),
            data: None,
            resource_version: String::new(),
        }
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn datum(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_datum(key, value);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.namespace, &self.name)
    }

    /// Raw value of the directive annotation, if present.
    pub fn directive(&self) -> Option<&str> {
        self.annotations.get(DIRECTIVE_ANNOTATION).map(String::as_str)
    }

    pub fn has_datum(&self, key: &str) -> bool {
        self.data.as_ref().is_some_and(|d| d.contains_key(key))
    }

    /// Set a data entry, creating the data map on first write.
    pub fn set_datum(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// A change observed by the watch source.
#[derive(Debug, Clone)]
pub enum Notification {
    Added(Resource),
    Updated { old: Resource, new: Resource },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Added(_) => "add",
            Notification::Updated { .. } => "update",
        }
    }
}
