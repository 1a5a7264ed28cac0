//! Metric instrument factories for config-getter.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"config-getter"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for config-getter instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("config-getter")
}

/// Counter: work queue operations.
/// Labels: `operation` ("add" | "add_rate_limited" | "shutdown").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("config_getter.queue.operations")
        .with_description("Number of work queue operations")
        .build()
}

/// Counter: change notifications seen by the controller.
/// Labels: `kind` ("add" | "update"), `accepted` (bool).
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("config_getter.notifications")
        .with_description("Number of change notifications received")
        .build()
}

/// Counter: finished reconcile attempts.
/// Labels: `outcome` ("unchanged" | "updated" | "dropped" | "retry" | "gave_up").
pub fn reconcile_total() -> Counter<u64> {
    meter()
        .u64_counter("config_getter.reconcile.total")
        .with_description("Number of reconcile attempts by outcome")
        .build()
}

/// Histogram: reconcile attempt duration in milliseconds.
/// Labels: `outcome`.
pub fn reconcile_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("config_getter.reconcile.duration_ms")
        .with_description("Reconcile attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}
