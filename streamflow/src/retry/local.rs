//! In-process retry resource.

use super::backoff::{BackoffConfig, ExponentialBackoff};
use crate::component::{ComponentKind, ComponentSpec, ParsedConfig, Retry, Status};
use crate::errors::StreamflowError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct LocalRetryState {
    enabled: bool,
    backoff: ExponentialBackoff,
    current_retries: u64,
    backoff_duration: Duration,
    last_retry: Instant,
}

impl LocalRetryState {
    fn disarm(&mut self) {
        self.enabled = false;
        self.backoff.reset();
        self.current_retries = 0;
        self.backoff_duration = Duration::ZERO;
    }
}

/// A retry resource whose state lives in this process.
///
/// Every operation holds one mutex for its whole duration, so concurrent
/// callers within one window observe the same release instant.
#[derive(Debug)]
pub struct LocalRetry {
    state: Mutex<LocalRetryState>,
}

impl LocalRetry {
    /// Creates a disarmed retry resource.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            state: Mutex::new(LocalRetryState {
                enabled: false,
                backoff: ExponentialBackoff::new(config),
                current_retries: 0,
                backoff_duration: Duration::ZERO,
                last_retry: Instant::now(),
            }),
        }
    }

    /// Builds a resource from validated settings.
    ///
    /// # Errors
    ///
    /// Returns a config error if the backoff settings are unusable.
    pub fn from_parsed(parsed: &ParsedConfig) -> Result<Self, StreamflowError> {
        Ok(Self::new(BackoffConfig::from_parsed(parsed)?))
    }

    /// The documentation and settings schema of the `local` retry type.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Retry, "local")
            .summary("Stores retry state in memory, shared by every component of this process.")
            .status(Status::Beta)
            .fields(BackoffConfig::fields())
    }

    /// Number of intervals handed out since the last trigger.
    #[must_use]
    pub fn current_retries(&self) -> u64 {
        self.state.lock().current_retries
    }

    /// Whether an escalation is in progress.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

#[async_trait]
impl Retry for LocalRetry {
    async fn access(&self) -> Result<Duration, StreamflowError> {
        let mut state = self.state.lock();
        if !state.enabled {
            return Ok(Duration::ZERO);
        }

        let remaining = state.backoff_duration.saturating_sub(state.last_retry.elapsed());
        if !remaining.is_zero() {
            return Ok(remaining);
        }

        match state.backoff.next_backoff() {
            Some(next) => {
                state.backoff_duration = next;
                state.last_retry = Instant::now();
                state.current_retries += 1;
                debug!(
                    retries = state.current_retries,
                    wait_ms = next.as_millis() as u64,
                    "Backing off"
                );
                Ok(next)
            }
            None => {
                debug!(retries = state.current_retries, "Backoff exhausted");
                state.enabled = false;
                state.backoff_duration = Duration::ZERO;
                Ok(Duration::ZERO)
            }
        }
    }

    async fn trigger_backoff(&self) -> Result<(), StreamflowError> {
        let mut state = self.state.lock();
        state.enabled = true;
        state.backoff.reset();
        Ok(())
    }

    async fn reset(&self) -> Result<(), StreamflowError> {
        self.state.lock().disarm();
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.state.lock().disarm();
        Ok(())
    }

    fn is_unbounded(&self) -> bool {
        self.state.lock().backoff.config().is_unbounded()
    }
}
