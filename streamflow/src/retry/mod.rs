//! Retry resources: named backoff state machines shared by components.
//!
//! [`LocalRetry`] keeps its state in this process. [`SharedRetry`] and
//! [`SharedRateLimit`] keep theirs in a [`WindowStore`] so several
//! instances can coordinate.

mod backoff;
mod local;
mod shared;
mod store;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use local::LocalRetry;
pub use shared::{SharedRateLimit, SharedRetry};
pub use store::{InMemoryWindowStore, StoreError, WindowLimits, WindowStore};
