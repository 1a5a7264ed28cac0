//! Reconcile span helpers.
//!
//! Provides span creation and outcome recording for keys flowing through
//! the controller's worker loop.

use tracing::Span;

use crate::model::ResourceKey;

/// Start a span for one reconcile attempt of `key`.
///
/// The `reconcile.outcome` field is declared empty and filled in by
/// [`record_outcome`].
pub fn start_reconcile_span(key: &ResourceKey, attempt: u32) -> Span {
    tracing::info_span!(
        "reconcile",
        "reconcile.key" = %key,
        "reconcile.attempt" = attempt,
        "reconcile.outcome" = tracing::field::Empty,
    )
}

/// Record how the attempt ended on the given span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("reconcile.outcome", outcome);
}
