//! # Streamflow
//!
//! The component registry and resilience control plane of a stream
//! processing engine.
//!
//! Streamflow provides:
//!
//! - **Component environments**: per-kind registries of named constructors
//!   and their settings schemas, cheaply cloned and derived into bundles
//! - **Retry resources**: shared backoff state machines, local or backed by
//!   a window store
//! - **Strict and retry bundles**: environments whose components reject
//!   errored batches or retry them with backoff
//! - **Resources**: labelled retries, caches and rate limits reachable by
//!   every component
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamflow::prelude::*;
//!
//! let base = Environment::with_builtins();
//! let env = retry_bundle(&base, RetryOptions::new("backoff"));
//!
//! let resources = Resources::new(env);
//! resources.store_retry("backoff", Arc::new(LocalRetry::new(BackoffConfig::new())));
//!
//! let input = resources.new_input(&ComponentConfig::new("generate").with_settings(json!({
//!     "messages": ["hello"],
//! })))?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bundle;
pub mod cache;
pub mod cancellation;
pub mod component;
pub mod errors;
pub mod io;
pub mod manager;
pub mod message;
pub mod processors;
pub mod retry;
pub mod strict;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bundle::{ComponentSet, Constructor, Environment};
    pub use crate::cache::{CacheCall, CacheFunction, MemoryCache};
    pub use crate::cancellation::CancellationToken;
    pub use crate::component::{
        Cache, ComponentConfig, ComponentKind, ComponentSpec, FieldSpec, Input, Output,
        ParsedConfig, Processor, RateLimit, Retry,
    };
    pub use crate::errors::{
        CacheError, ComponentConstructionError, ConfigError, StreamflowError,
    };
    pub use crate::manager::{Resources, ResourcesConfig};
    pub use crate::message::{Batch, BatchError, Part, Transaction};
    pub use crate::retry::{BackoffConfig, LocalRetry, SharedRetry};
    pub use crate::strict::{
        apply_error_handling, retry_bundle, retry_config_bundle, strict_bundle,
        AccessErrorPolicy, ErrorHandlingConfig, FeedbackOptions, RetryOptions, StrictOptions,
    };
}
