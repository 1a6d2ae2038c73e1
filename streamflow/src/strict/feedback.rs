//! Feedback routing: rejected transactions are delivered again.

use super::gate::RetryGate;
use crate::cancellation::CancellationToken;
use crate::component::Input;
use crate::errors::StreamflowError;
use crate::message::{AckResult, AckSender, Batch, Transaction};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Options of a feedback input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackOptions {
    /// Deliveries before a transaction is abandoned. Zero leaves the
    /// decision to the retry resource.
    pub max_attempts: u32,
}

impl FeedbackOptions {
    /// Creates options with no attempt limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

struct Envelope {
    id: Uuid,
    payload: Batch,
    ack: AckSender,
    attempt: u32,
    retrying: bool,
    last_error: Option<StreamflowError>,
}

type PendingAck = BoxFuture<'static, (Envelope, AckResult)>;

/// An input whose transactions are delivered again when rejected.
///
/// Acknowledgements are intercepted. A rejection joins the escalation on the
/// retry resource and the same payload goes back through the gate. A
/// transaction is rejected to its source with the last error once the
/// resource reports exhaustion, cannot be consulted under a fail-open
/// policy, or `max_attempts` is reached. An acceptance is passed on, and
/// leaves the escalation once nothing is left being retried.
pub struct FeedbackInput {
    wrapped: Arc<dyn Input>,
    gate: RetryGate,
    options: FeedbackOptions,
    shutdown: Arc<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeedbackInput {
    /// Wraps `wrapped`, gating and retrying through `gate`.
    #[must_use]
    pub fn new(wrapped: Arc<dyn Input>, gate: RetryGate, options: FeedbackOptions) -> Self {
        if options.max_attempts == 0 && gate.is_unbounded() {
            warn!(
                resource = gate.resource(),
                "Feedback input has no attempt limit and its retry resource never gives up; rejected transactions are retried forever"
            );
        }
        Self {
            wrapped,
            gate,
            options,
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

struct FeedbackLoop {
    gate: RetryGate,
    options: FeedbackOptions,
    shutdown: Arc<CancellationToken>,
    out: mpsc::Sender<Transaction>,
    queue: VecDeque<Envelope>,
    pending: FuturesUnordered<PendingAck>,
    escalating: bool,
    in_retry: usize,
}

impl FeedbackLoop {
    async fn run(mut self, mut source: mpsc::Receiver<Transaction>) {
        let mut source_open = true;
        loop {
            if let Some(envelope) = self.queue.pop_front() {
                if !self.forward(envelope).await {
                    return;
                }
                continue;
            }
            if !source_open && self.pending.is_empty() {
                return;
            }

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                Some((envelope, result)) = self.pending.next() => {
                    self.settle(envelope, result).await;
                }
                tran = source.recv(), if source_open => match tran {
                    Some(tran) => {
                        let (id, payload, ack) = tran.into_parts();
                        self.queue.push_back(Envelope {
                            id,
                            payload,
                            ack,
                            attempt: 0,
                            retrying: false,
                            last_error: None,
                        });
                    }
                    None => source_open = false,
                },
            }
        }
    }

    /// Gates and delivers one envelope. Returns false on shutdown.
    async fn forward(&mut self, mut envelope: Envelope) -> bool {
        let access = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return false,
            access = self.gate.access() => access,
        };
        let wait = match access {
            Ok(wait) => wait,
            Err(e) => self.gate.on_access_error(&e),
        };
        if wait.is_zero() && envelope.retrying {
            debug!(
                resource = self.gate.resource(),
                attempt = envelope.attempt,
                "Retry resource exhausted or unreachable"
            );
            self.abandon(envelope);
            return true;
        }
        if !RetryGate::sleep(wait, &self.shutdown).await {
            return false;
        }

        envelope.attempt += 1;
        let (tran, ack_rx) = Transaction::with_id(envelope.id, envelope.payload.clone());
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return false,
            sent = self.out.send(tran) => if sent.is_err() {
                return false;
            },
        }

        self.pending.push(Box::pin(async move {
            let result = ack_rx.await.unwrap_or(Err(StreamflowError::Unacknowledged));
            (envelope, result)
        }));
        true
    }

    async fn settle(&mut self, mut envelope: Envelope, result: AckResult) {
        let err = match result {
            Ok(()) => {
                if envelope.retrying {
                    self.in_retry -= 1;
                }
                envelope.ack.send(Ok(()));
                if self.escalating && self.in_retry == 0 {
                    self.escalating = false;
                    debug!(resource = self.gate.resource(), "Recovered, leaving escalation");
                    self.gate.recover().await;
                }
                return;
            }
            Err(err) => err,
        };

        let max = self.options.max_attempts;
        if max > 0 && envelope.attempt >= max {
            envelope.last_error = Some(err);
            self.abandon(envelope);
            return;
        }

        debug!(
            resource = self.gate.resource(),
            attempt = envelope.attempt,
            error = %err,
            "Transaction rejected, delivering again"
        );
        if !envelope.retrying {
            envelope.retrying = true;
            self.in_retry += 1;
        }
        envelope.last_error = Some(err);
        if !self.escalating {
            self.escalating = true;
            self.gate.escalate().await;
        }
        self.queue.push_back(envelope);
    }

    fn abandon(&mut self, envelope: Envelope) {
        if envelope.retrying {
            self.in_retry -= 1;
        }
        if self.escalating && self.in_retry == 0 {
            self.escalating = false;
            self.gate.give_up();
        }
        warn!(
            resource = self.gate.resource(),
            attempts = envelope.attempt,
            "Giving up on transaction"
        );
        let err = envelope.last_error.unwrap_or(StreamflowError::Unacknowledged);
        envelope.ack.send(Err(err));
    }
}

#[async_trait]
impl Input for FeedbackInput {
    async fn connect(&self) -> Result<(), StreamflowError> {
        self.wrapped.connect().await
    }

    fn take_transactions(&self) -> Option<mpsc::Receiver<Transaction>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Cannot start feedback input outside a tokio runtime");
                return None;
            }
        };
        let source = self.wrapped.take_transactions()?;
        let (tx, rx) = mpsc::channel(1);
        let feedback = FeedbackLoop {
            gate: self.gate.clone(),
            options: self.options,
            shutdown: Arc::clone(&self.shutdown),
            out: tx,
            queue: VecDeque::new(),
            pending: FuturesUnordered::new(),
            escalating: false,
            in_retry: 0,
        };
        *self.worker.lock() = Some(handle.spawn(feedback.run(source)));
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
                warn!(error = %e, "Feedback input worker ended abnormally");
            }
        }
        self.wrapped.close().await
    }
}
