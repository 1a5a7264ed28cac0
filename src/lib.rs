//! # config-getter
//!
//! Level-triggered reconciliation controller. Watches resources, and for each
//! one annotated with `x-k8s-io/curl-me-that: key=url` fetches the URL once
//! and stores the body under `data[key]`.
//!
//! Provides a deduplicating rate-limited work queue, the controller that
//! drains it, the annotation handler, an in-memory resource backend, an HTTP
//! fetcher, and OpenTelemetry observability.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod fetch;
pub mod handler;
pub mod model;
pub mod queue;
pub mod telemetry;
