//! Mock components for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::component::{Input, Output, Processor, Retry};
use crate::errors::StreamflowError;
use crate::message::{Batch, Transaction};

/// An input fed by the test through a channel.
#[derive(Debug)]
pub struct MockInput {
    rx: Mutex<Option<mpsc::Receiver<Transaction>>>,
    close_triggered: AtomicBool,
    closed: AtomicBool,
}

impl MockInput {
    /// Creates a mock input and the sender that feeds it.
    #[must_use]
    pub fn new() -> (Self, mpsc::Sender<Transaction>) {
        let (tx, rx) = mpsc::channel(16);
        let input = Self {
            rx: Mutex::new(Some(rx)),
            close_triggered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        (input, tx)
    }

    /// Returns true once `trigger_close` or `close` was called.
    #[must_use]
    pub fn is_close_triggered(&self) -> bool {
        self.close_triggered.load(Ordering::SeqCst)
    }

    /// Returns true once `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Input for MockInput {
    fn take_transactions(&self) -> Option<mpsc::Receiver<Transaction>> {
        self.rx.lock().take()
    }

    fn trigger_close(&self) {
        self.close_triggered.store(true, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.trigger_close();
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// An output that records written batches and can fail on demand.
#[derive(Debug, Default)]
pub struct MockOutput {
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
    written: Mutex<Vec<Batch>>,
    closed: AtomicBool,
}

impl MockOutput {
    /// Creates an output that accepts every batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` writes.
    #[must_use]
    pub fn fail_next(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Returns the number of write attempts.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the successfully written batches.
    #[must_use]
    pub fn written(&self) -> Vec<Batch> {
        self.written.lock().clone()
    }

    /// Returns true once `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Output for MockOutput {
    async fn write_batch(&self, batch: &Batch) -> Result<(), StreamflowError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StreamflowError::output(anyhow::anyhow!("mock write failed")));
        }
        self.written.lock().push(batch.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type ProcessFn = dyn Fn(Batch) -> Result<Vec<Batch>, StreamflowError> + Send + Sync;

/// A processor driven by a closure.
pub struct MockProcessor {
    process: Box<ProcessFn>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl MockProcessor {
    /// Creates a processor that runs `f` on every batch.
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Batch) -> Result<Vec<Batch>, StreamflowError> + Send + Sync + 'static,
    {
        Self {
            process: Box::new(f),
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates a processor that returns every batch unchanged.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::new(|batch| Ok(vec![batch]))
    }

    /// Returns the number of processed batches.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns true once `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProcessor")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Processor for MockProcessor {
    async fn process_batch(&self, batch: Batch) -> Result<Vec<Batch>, StreamflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.process)(batch)
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type AccessFn = dyn Fn() -> Result<Duration, StreamflowError> + Send + Sync;

/// A retry resource whose `access` answer comes from a closure.
///
/// `trigger_backoff`, `reset` and `close` only count their calls.
pub struct MockRetry {
    access: Box<AccessFn>,
    triggers: AtomicUsize,
    resets: AtomicUsize,
}

impl MockRetry {
    /// Creates a retry answering `access` with `f`.
    #[must_use]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<Duration, StreamflowError> + Send + Sync + 'static,
    {
        Self {
            access: Box::new(f),
            triggers: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    /// Creates a retry that always asks for `wait`.
    #[must_use]
    pub fn fixed(wait: Duration) -> Self {
        Self::new(move || Ok(wait))
    }

    /// Returns the number of `trigger_backoff` calls.
    #[must_use]
    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    /// Returns the number of `reset` calls.
    #[must_use]
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRetry")
            .field("triggers", &self.trigger_count())
            .field("resets", &self.reset_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Retry for MockRetry {
    async fn access(&self) -> Result<Duration, StreamflowError> {
        (self.access)()
    }

    async fn trigger_backoff(&self) -> Result<(), StreamflowError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset(&self) -> Result<(), StreamflowError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        Ok(())
    }
}
