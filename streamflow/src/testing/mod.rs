//! Testing utilities for streamflow components.
//!
//! This module provides:
//! - Mock inputs, outputs, processors and retry resources
//! - Log initialization for tests

mod mocks;

pub use mocks::{MockInput, MockOutput, MockProcessor, MockRetry};

use tracing_subscriber::EnvFilter;

/// Installs a test log subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
