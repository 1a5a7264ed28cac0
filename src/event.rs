//! Events recorded against resources.
//!
//! Events are the controller's voice towards resource owners: every failed
//! reconcile attempt leaves a warning on the resource it concerns. Logs are
//! for operators; events are for whoever wrote the annotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

use crate::model::{Resource, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        };
        write!(f, "{s}")
    }
}

/// A structured event about one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub involved: ResourceKey,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Short machine-readable cause, e.g. `GetFailure`.
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn new(
        involved: ResourceKey,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            involved,
            timestamp: Utc::now(),
            event_type,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.event_type, self.reason, self.message)
    }
}

/// Sink for resource events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);

    fn eventf(&self, resource: &Resource, event_type: EventType, reason: &str, message: String) {
        self.record(Event::new(resource.key(), event_type, reason, message));
    }
}

/// Writes events to the tracing pipeline.
#[derive(Debug, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                involved = %event.involved,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                involved = %event.involved,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Buffers up to `capacity` events as `"<Type> <Reason> <message>"` strings.
/// Events past capacity are dropped.
#[derive(Debug)]
pub struct FakeRecorder {
    capacity: usize,
    events: Mutex<Vec<String>>,
}

impl FakeRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Take every buffered event, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventRecorder for FakeRecorder {
    fn record(&self, event: Event) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() < self.capacity {
            events.push(event.to_string());
        }
    }
}
