//! An input emitting a fixed list of messages.

use crate::cancellation::CancellationToken;
use crate::component::{ComponentKind, ComponentSpec, FieldSpec, Input, ParsedConfig};
use crate::errors::{ConfigError, StreamflowError};
use crate::message::{Batch, Transaction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Emits `messages` in batches of `batch_size`, then closes.
///
/// Each batch waits for its acknowledgement before the next is emitted.
/// Rejected batches are logged and not emitted again.
pub struct GenerateInput {
    messages: Arc<[String]>,
    batch_size: usize,
    interval: Duration,
    shutdown: Arc<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GenerateInput {
    /// Creates an input emitting one message per batch.
    #[must_use]
    pub fn new(messages: Vec<String>) -> Self {
        Self {
            messages: messages.into(),
            batch_size: 1,
            interval: Duration::ZERO,
            shutdown: Arc::new(CancellationToken::new()),
            worker: Mutex::new(None),
        }
    }

    /// Sets the number of messages per batch. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the pause between batches.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Builds the input from parsed settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is not positive.
    pub fn from_parsed(parsed: &ParsedConfig) -> Result<Self, StreamflowError> {
        let messages: Vec<String> = parsed.field_as("messages")?;
        let batch_size = parsed.field_int("batch_size")?;
        let batch_size = usize::try_from(batch_size)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::new("batch_size", "must be a positive integer"))?;
        Ok(Self::new(messages)
            .with_batch_size(batch_size)
            .with_interval(parsed.field_duration("interval")?))
    }

    /// The documentation of the `generate` input.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Input, "generate")
            .summary("Emits a static list of messages and then closes.")
            .fields([
                FieldSpec::array("messages").description("The message payloads."),
                FieldSpec::int("batch_size")
                    .description("Messages per batch.")
                    .default(1),
                FieldSpec::duration("interval")
                    .description("Pause between batches.")
                    .default("")
                    .advanced(),
            ])
    }
}

async fn generate_loop(
    messages: Arc<[String]>,
    batch_size: usize,
    interval: Duration,
    out: mpsc::Sender<Transaction>,
    shutdown: Arc<CancellationToken>,
) {
    for (i, chunk) in messages.chunks(batch_size).enumerate() {
        if i > 0 && !interval.is_zero() {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
        }

        let (tran, ack) = Transaction::new(Batch::quick(chunk.iter().cloned()));
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            sent = out.send(tran) => if sent.is_err() {
                return;
            },
        }

        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            result = ack => result,
        };
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, batch = i, "Generated batch was rejected"),
            Err(_) => warn!(batch = i, "Generated batch was dropped unacknowledged"),
        }
    }
    debug!(messages = messages.len(), "Generate input exhausted");
}

#[async_trait]
impl Input for GenerateInput {
    fn take_transactions(&self) -> Option<mpsc::Receiver<Transaction>> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return None;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Cannot start generate input outside a tokio runtime");
                return None;
            }
        };
        let (tx, rx) = mpsc::channel(1);
        *worker = Some(handle.spawn(generate_loop(
            Arc::clone(&self.messages),
            self.batch_size,
            self.interval,
            tx,
            Arc::clone(&self.shutdown),
        )));
        Some(rx)
    }

    fn trigger_close(&self) {
        self.shutdown.cancel("input closing");
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.trigger_close();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Generate input worker ended abnormally");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payloads(batch: &Batch) -> Vec<String> {
        batch
            .iter()
            .map(|p| String::from_utf8_lossy(p.as_bytes()).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_emits_batches_then_closes() {
        let parsed = GenerateInput::spec()
            .parse(&json!({ "messages": ["a", "b", "c"], "batch_size": 2 }))
            .unwrap();
        let input = GenerateInput::from_parsed(&parsed).unwrap();
        let mut rx = input.take_transactions().unwrap();

        let mut seen = Vec::new();
        while let Some(t) = rx.recv().await {
            seen.push(payloads(t.payload()));
            t.ack(Ok(()));
        }
        assert_eq!(seen, vec![vec!["a", "b"], vec!["c"]]);
        input.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_acknowledgement() {
        let input = GenerateInput::new(vec!["a".into(), "b".into()]);
        let mut rx = input.take_transactions().unwrap();

        let first = rx.recv().await.unwrap();
        let early = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
        assert!(early.is_err());

        first.ack(Err(StreamflowError::Unacknowledged));
        let second = rx.recv().await.unwrap();
        assert_eq!(payloads(second.payload()), vec!["b"]);
        input.close().await.unwrap();
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let parsed = GenerateInput::spec()
            .parse(&json!({ "messages": [], "batch_size": 0 }))
            .unwrap();
        assert!(GenerateInput::from_parsed(&parsed).is_err());
    }
}
