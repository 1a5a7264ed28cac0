//! Reconciliation controller: cache sync barrier, notification filtering,
//! worker loop, retry policy.

pub mod control;
pub mod filter;

pub use control::{Controller, ControllerConfig, ControllerState, MAX_RETRIES};
pub use filter::is_relevant;
