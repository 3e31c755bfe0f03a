//! Shared utilities for Murmur: logging, clocks, helpers.
//!
//! This crate provides common infrastructure used across all Murmur components.

#![forbid(unsafe_code)]

pub mod clock;
pub mod helpers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use helpers::constant_time_eq;

/// Initialize tracing.
///
/// `RUST_LOG` takes precedence; `default_level` applies when it is unset.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
