//! Backoff-gated input decorator.

use super::gate::RetryGate;
use crate::cancellation::CancellationToken;
use crate::component::Input;
use crate::errors::StreamflowError;
use crate::message::Transaction;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delays every transaction of the wrapped input until its retry resource
/// stops asking for backoff.
///
/// One task reads the wrapped input and republishes transactions in order
/// on this input's channel. The task exits, closing the channel, when the
/// source closes or the input is closed.
pub struct RetryInput {
    wrapped: Arc<dyn Input>,
    gate: RetryGate,
    shutdown: Arc<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryInput {
    /// Wraps `wrapped`, gating it on `gate`.
    #[must_use]
    pub fn new(wrapped: Arc<dyn Input>, gate: RetryGate) -> Self {
        Self {
            wrapped,
            gate,
            shutdown: Arc::new(CancellationToken::new()),
            worker: Mutex::new(None),
        }
    }

    /// Returns the wrapped input.
    #[must_use]
    pub fn unwrap_input(&self) -> Arc<dyn Input> {
        Arc::clone(&self.wrapped)
    }
}

async fn forward_loop(
    mut source: mpsc::Receiver<Transaction>,
    out: mpsc::Sender<Transaction>,
    gate: RetryGate,
    shutdown: Arc<CancellationToken>,
) {
    loop {
        let tran = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            tran = source.recv() => match tran {
                Some(tran) => tran,
                None => return,
            },
        };

        let wait = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            wait = gate.wait_duration() => wait,
        };
        if !wait.is_zero() {
            debug!(
                resource = gate.resource(),
                wait_ms = wait.as_millis() as u64,
                "Delaying transaction"
            );
            if !RetryGate::sleep(wait, &shutdown).await {
                return;
            }
        }

        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            sent = out.send(tran) => if sent.is_err() {
                return;
            },
        }
    }
}

#[async_trait]
impl Input for RetryInput {
    async fn connect(&self) -> Result<(), StreamflowError> {
        self.wrapped.connect().await
    }

    fn take_transactions(&self) -> Option<mpsc::Receiver<Transaction>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Cannot start retry input outside a tokio runtime");
                return None;
            }
        };
        let source = self.wrapped.take_transactions()?;
        let (tx, rx) = mpsc::channel(1);
        let worker = handle.spawn(forward_loop(
            source,
            tx,
            self.gate.clone(),
            Arc::clone(&self.shutdown),
        ));
        *self.worker.lock() = Some(worker);
        Some(rx)
    }

    fn trigger_close(&self) {
        self.shutdown.cancel("input closing");
        self.wrapped.trigger_close();
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.trigger_close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Retry input worker ended abnormally");
            }
        }
        self.wrapped.close().await
    }
}
