//! Retry and rate-limit resources backed by a shared [`WindowStore`].

use super::store::{StoreError, WindowLimits, WindowStore};
use crate::component::{
    ComponentKind, ComponentSpec, FieldSpec, ParsedConfig, RateLimit, Retry, Status,
};
use crate::errors::{ConfigError, RetryAccessError, StreamflowError};
use crate::message::Part;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn non_negative(parsed: &ParsedConfig, name: &str) -> Result<u64, ConfigError> {
    u64::try_from(parsed.field_int(name)?)
        .map_err(|_| ConfigError::new(name, "cannot be less than zero"))
}

fn access_error(key: &str, err: &StoreError) -> StreamflowError {
    RetryAccessError::new(key, err.to_string()).into()
}

/// A retry resource whose state is shared through a window store.
///
/// Triggering backoff saturates the window under `key`, so every instance
/// sharing the store waits until the same instant. The state outlives this
/// instance, which is why `close` leaves it alone.
pub struct SharedRetry {
    store: Arc<dyn WindowStore>,
    key: String,
    interval: Duration,
    count: u64,
}

impl SharedRetry {
    /// Creates a shared retry resource.
    #[must_use]
    pub fn new(store: Arc<dyn WindowStore>, key: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            key: key.into(),
            interval,
            count: 0,
        }
    }

    /// Limits accesses per window. Zero disables the limit.
    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Builds a resource from validated settings.
    ///
    /// # Errors
    ///
    /// Returns a config error for negative counts or a zero interval.
    pub fn from_parsed(
        parsed: &ParsedConfig,
        store: Arc<dyn WindowStore>,
    ) -> Result<Self, StreamflowError> {
        let interval = parsed.field_duration("interval")?;
        if interval.is_zero() {
            return Err(ConfigError::new("interval", "must be greater than zero").into());
        }
        Ok(Self::new(store, parsed.field_string("key")?, interval)
            .with_count(non_negative(parsed, "count")?))
    }

    /// The documentation and settings schema of the `shared` retry type.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Retry, "shared")
            .summary("Stores retry state in a window store shared between instances.")
            .status(Status::Experimental)
            .field(FieldSpec::string("key").description("The key the retry window is stored under."))
            .field(
                FieldSpec::duration("interval")
                    .description("How long every instance waits once backoff is triggered.")
                    .default("1s"),
            )
            .field(
                FieldSpec::int("count")
                    .description("Maximum accesses per interval. Zero disables the limit.")
                    .default(0)
                    .advanced(),
            )
    }

    fn limits(&self) -> WindowLimits {
        WindowLimits {
            count: self.count,
            byte_size: 0,
        }
    }
}

#[async_trait]
impl Retry for SharedRetry {
    async fn access(&self) -> Result<Duration, StreamflowError> {
        self.store
            .access(&self.key, self.limits(), self.interval)
            .await
            .map_err(|e| access_error(&self.key, &e))
    }

    async fn trigger_backoff(&self) -> Result<(), StreamflowError> {
        debug!(key = %self.key, "Saturating shared retry window");
        self.store
            .saturate(&self.key, self.interval)
            .await
            .map_err(|e| access_error(&self.key, &e))
    }

    async fn reset(&self) -> Result<(), StreamflowError> {
        self.store
            .clear(&self.key)
            .await
            .map_err(|e| access_error(&self.key, &e))
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        Ok(())
    }
}

/// A rate limit shared through a window store.
pub struct SharedRateLimit {
    store: Arc<dyn WindowStore>,
    key: String,
    interval: Duration,
    limits: WindowLimits,
}

impl SharedRateLimit {
    /// Creates a shared rate limit.
    ///
    /// # Errors
    ///
    /// Returns a config error if both limits are zero.
    pub fn new(
        store: Arc<dyn WindowStore>,
        key: impl Into<String>,
        interval: Duration,
        limits: WindowLimits,
    ) -> Result<Self, StreamflowError> {
        if limits.count == 0 && limits.byte_size == 0 {
            return Err(ConfigError::new(
                "count",
                "either count or byte size must be larger than zero",
            )
            .into());
        }
        Ok(Self {
            store,
            key: key.into(),
            interval,
            limits,
        })
    }

    /// Builds a rate limit from validated settings.
    ///
    /// # Errors
    ///
    /// Returns a config error for negative or all-zero limits.
    pub fn from_parsed(
        parsed: &ParsedConfig,
        store: Arc<dyn WindowStore>,
    ) -> Result<Self, StreamflowError> {
        let limits = WindowLimits {
            count: non_negative(parsed, "count")?,
            byte_size: non_negative(parsed, "byte_size")?,
        };
        Self::new(
            store,
            parsed.field_string("key")?,
            parsed.field_duration("interval")?,
            limits,
        )
    }

    /// The documentation and settings schema of the `shared` rate limit type.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::RateLimit, "shared")
            .summary("Limits requests and bytes per interval across every instance sharing a window store.")
            .field(
                FieldSpec::int("count")
                    .description("The maximum number of requests per interval. Zero disables count based limiting.")
                    .default(1000),
            )
            .field(
                FieldSpec::int("byte_size")
                    .description("The maximum number of bytes per interval. Zero disables size based limiting.")
                    .default(0),
            )
            .field(
                FieldSpec::duration("interval")
                    .description("The time window to limit requests by.")
                    .default("1s"),
            )
            .field(FieldSpec::string("key").description("The key to use for the rate limit."))
    }
}

#[async_trait]
impl RateLimit for SharedRateLimit {
    async fn access(&self) -> Result<Duration, StreamflowError> {
        self.store
            .access(&self.key, self.limits, self.interval)
            .await
            .map_err(|e| access_error(&self.key, &e))
    }

    async fn add(&self, parts: &[Part]) -> bool {
        if self.limits.byte_size == 0 || parts.is_empty() {
            return false;
        }
        let total: u64 = parts.iter().map(|p| p.as_bytes().len() as u64).sum();
        match self
            .store
            .add_bytes(&self.key, total, self.limits.byte_size, self.interval)
            .await
        {
            Ok(wait) => !wait.is_zero(),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to account bytes against rate limit");
                false
            }
        }
    }
}
