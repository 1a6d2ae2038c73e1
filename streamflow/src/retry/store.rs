//! Fixed-window counters shared by every instance pointed at the same store.
//!
//! The operations mirror two atomic server-side scripts: `access` counts a
//! request against the window and `add_bytes` accounts for payload size.
//! Both report the time left in the window once a limit is exceeded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors reported by a window store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("window store unavailable: {0}")]
    Unavailable(String),
}

/// Limits applied by [`WindowStore::access`]. Zero disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowLimits {
    /// Maximum requests per window.
    pub count: u64,
    /// Maximum bytes per window.
    pub byte_size: u64,
}

/// An atomic fixed-window store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Starts the window if unset, counts one request and returns the time
    /// left in the window when a limit is exceeded, otherwise zero.
    async fn access(
        &self,
        key: &str,
        limits: WindowLimits,
        window: Duration,
    ) -> Result<Duration, StoreError>;

    /// Adds `bytes` to the window's byte counter and returns the time left
    /// in the window when `byte_limit` is exceeded, otherwise zero.
    async fn add_bytes(
        &self,
        key: &str,
        bytes: u64,
        byte_limit: u64,
        window: Duration,
    ) -> Result<Duration, StoreError>;

    /// Restarts the window and marks it exceeded until it expires.
    async fn saturate(&self, key: &str, window: Duration) -> Result<(), StoreError>;

    /// Deletes the window.
    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Window {
    count: u64,
    bytes: u64,
    saturated: bool,
    expires_at: Option<Instant>,
}

impl Window {
    fn remaining(&self, now: Instant) -> Duration {
        self.expires_at
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
    }
}

/// A process-local [`WindowStore`].
///
/// Used when no external store is configured, and in tests, where
/// [`set_unavailable`](Self::set_unavailable) simulates an outage.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: Mutex<HashMap<String, Window>>,
    unavailable: AtomicBool,
}

impl InMemoryWindowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn with_window<T>(&self, key: &str, window: Duration, f: impl FnOnce(&mut Window, Instant) -> T) -> T {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_string()).or_default();
        if entry.expires_at.is_some_and(|at| at <= now) {
            *entry = Window::default();
        }
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now + window);
        }
        f(entry, now)
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn access(
        &self,
        key: &str,
        limits: WindowLimits,
        window: Duration,
    ) -> Result<Duration, StoreError> {
        self.check()?;
        Ok(self.with_window(key, window, |w, now| {
            if w.saturated {
                return w.remaining(now);
            }
            if limits.count > 0 {
                w.count += 1;
                if w.count > limits.count {
                    return w.remaining(now);
                }
            }
            if limits.byte_size > 0 && w.bytes > limits.byte_size {
                return w.remaining(now);
            }
            Duration::ZERO
        }))
    }

    async fn add_bytes(
        &self,
        key: &str,
        bytes: u64,
        byte_limit: u64,
        window: Duration,
    ) -> Result<Duration, StoreError> {
        self.check()?;
        Ok(self.with_window(key, window, |w, now| {
            w.bytes += bytes;
            if w.bytes > byte_limit {
                w.remaining(now)
            } else {
                Duration::ZERO
            }
        }))
    }

    async fn saturate(&self, key: &str, window: Duration) -> Result<(), StoreError> {
        self.check()?;
        let now = Instant::now();
        self.windows.lock().insert(
            key.to_string(),
            Window {
                saturated: true,
                expires_at: Some(now + window),
                ..Window::default()
            },
        );
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.windows.lock().remove(key);
        Ok(())
    }
}
