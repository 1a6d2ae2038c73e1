//! Transactions pair a batch with its acknowledgement.

use super::Batch;
use crate::errors::StreamflowError;
use tokio::sync::oneshot;
use uuid::Uuid;

/// The outcome delivered to whoever produced a transaction.
pub type AckResult = Result<(), StreamflowError>;

/// Receives the acknowledgement of a transaction.
pub type AckReceiver = oneshot::Receiver<AckResult>;

/// The acknowledgement half of a transaction.
#[derive(Debug)]
pub struct AckSender {
    inner: oneshot::Sender<AckResult>,
}

impl AckSender {
    /// Delivers the outcome. A producer that stopped listening is ignored.
    pub fn send(self, result: AckResult) {
        let _ = self.inner.send(result);
    }

    /// Returns true if the producer stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// One batch in flight between an input and a pipeline.
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    payload: Batch,
    ack: AckSender,
}

impl Transaction {
    /// Creates a transaction and the receiver its producer awaits.
    #[must_use]
    pub fn new(payload: Batch) -> (Self, AckReceiver) {
        Self::with_id(Uuid::new_v4(), payload)
    }

    /// Creates a transaction that keeps an existing identifier, used when
    /// the same payload is delivered again.
    #[must_use]
    pub fn with_id(id: Uuid, payload: Batch) -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id,
                payload,
                ack: AckSender { inner: tx },
            },
            rx,
        )
    }

    /// Reassembles a transaction from its parts.
    #[must_use]
    pub fn from_parts(id: Uuid, payload: Batch, ack: AckSender) -> Self {
        Self { id, payload, ack }
    }

    /// Returns the transaction identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Batch {
        &self.payload
    }

    /// Acknowledges the transaction.
    pub fn ack(self, result: AckResult) {
        self.ack.send(result);
    }

    /// Splits the transaction into its identifier, payload and acknowledgement.
    #[must_use]
    pub fn into_parts(self) -> (Uuid, Batch, AckSender) {
        (self.id, self.payload, self.ack)
    }
}
