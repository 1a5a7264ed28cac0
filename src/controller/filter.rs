//! Turns watch notifications into queue adds.

use crate::model::Notification;
use crate::queue::WorkQueue;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tracing::debug;

/// Should this notification enqueue its resource?
///
/// Adds always do. Updates only do when the version token moved and the new
/// resource carries the directive annotation, which skips no-op resyncs and
/// resources that could never need work.
pub fn is_relevant(notification: &Notification) -> bool {
    match notification {
        Notification::Added(_) => true,
        Notification::Updated { old, new } => {
            old.resource_version != new.resource_version && new.directive().is_some()
        }
    }
}

/// Drain `notifications` into `queue` until the sender side closes.
pub(crate) async fn pump(mut notifications: mpsc::UnboundedReceiver<Notification>, queue: WorkQueue) {
    while let Some(notification) = notifications.recv().await {
        let key = match &notification {
            Notification::Added(resource) => resource.key(),
            Notification::Updated { new, .. } => new.key(),
        };
        let accepted = is_relevant(&notification);
        metrics::notifications().add(
            1,
            &[
                KeyValue::new("kind", notification.kind()),
                KeyValue::new("accepted", accepted),
            ],
        );

        if accepted {
            debug!(%key, kind = notification.kind(), "queueing");
            queue.add(key);
        } else {
            debug!(%key, kind = notification.kind(), "skipping irrelevant notification");
        }
    }
}
