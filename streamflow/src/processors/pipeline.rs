//! Running processor lists on behalf of inputs and outputs.

use crate::cancellation::CancellationToken;
use crate::component::{ComponentConfig, Input, Output, Processor};
use crate::errors::StreamflowError;
use crate::manager::Resources;
use crate::message::{Batch, Transaction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Runs `processors` in order, feeding every output batch of one processor
/// into the next.
///
/// Stops early once no batches are left.
///
/// # Errors
///
/// Returns the first hard processing error.
pub async fn execute_all(
    processors: &[Arc<dyn Processor>],
    batch: Batch,
) -> Result<Vec<Batch>, StreamflowError> {
    let mut batches = vec![batch];
    for processor in processors {
        let mut next = Vec::with_capacity(batches.len());
        for batch in batches {
            next.extend(processor.process_batch(batch).await?);
        }
        batches = next;
        if batches.is_empty() {
            break;
        }
    }
    Ok(batches)
}

async fn close_all(processors: &[Arc<dyn Processor>]) {
    for processor in processors {
        if let Err(e) = processor.close().await {
            warn!(error = %e, "Failed to close processor");
        }
    }
}

/// Wraps `input` with the processors listed in `config`, if any.
///
/// # Errors
///
/// Returns the first processor construction error.
pub fn attach_input(
    input: Arc<dyn Input>,
    config: &ComponentConfig,
    resources: &Resources,
) -> Result<Arc<dyn Input>, StreamflowError> {
    if config.processors.is_empty() {
        return Ok(input);
    }
    let processors = resources.new_processors(&config.processors)?;
    Ok(Arc::new(ProcessedInput::new(input, processors)))
}

/// Wraps `output` with the processors listed in `config`, if any.
///
/// # Errors
///
/// Returns the first processor construction error.
pub fn attach_output(
    output: Arc<dyn Output>,
    config: &ComponentConfig,
    resources: &Resources,
) -> Result<Arc<dyn Output>, StreamflowError> {
    if config.processors.is_empty() {
        return Ok(output);
    }
    let processors = resources.new_processors(&config.processors)?;
    Ok(Arc::new(ProcessedOutput::new(output, processors)))
}

/// An input whose transactions pass through a processor list.
///
/// A processing error rejects the transaction. A transaction whose batch
/// is filtered away entirely is accepted.
pub struct ProcessedInput {
    wrapped: Arc<dyn Input>,
    processors: Arc<[Arc<dyn Processor>]>,
    shutdown: Arc<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessedInput {
    /// Wraps `wrapped` with `processors`.
    #[must_use]
    pub fn new(wrapped: Arc<dyn Input>, processors: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            wrapped,
            processors: processors.into(),
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

async fn process_loop(
    mut source: mpsc::Receiver<Transaction>,
    out: mpsc::Sender<Transaction>,
    processors: Arc<[Arc<dyn Processor>]>,
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

        let (id, payload, ack) = tran.into_parts();
        let batches = match execute_all(&processors, payload).await {
            Ok(batches) => batches,
            Err(e) => {
                ack.send(Err(e));
                continue;
            }
        };
        if batches.is_empty() {
            ack.send(Ok(()));
            continue;
        }

        let tran = Transaction::from_parts(id, Batch::concat(batches), ack);
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
impl Input for ProcessedInput {
    async fn connect(&self) -> Result<(), StreamflowError> {
        self.wrapped.connect().await
    }

    fn take_transactions(&self) -> Option<mpsc::Receiver<Transaction>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Cannot start input processors outside a tokio runtime");
                return None;
            }
        };
        let source = self.wrapped.take_transactions()?;
        let (tx, rx) = mpsc::channel(1);
        let worker = handle.spawn(process_loop(
            source,
            tx,
            Arc::clone(&self.processors),
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
                warn!(error = %e, "Input processor worker ended abnormally");
            }
        }
        close_all(&self.processors).await;
        self.wrapped.close().await
    }
}

/// An output that runs a processor list before writing.
pub struct ProcessedOutput {
    wrapped: Arc<dyn Output>,
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessedOutput {
    /// Wraps `wrapped` with `processors`.
    #[must_use]
    pub fn new(wrapped: Arc<dyn Output>, processors: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            wrapped,
            processors,
        }
    }

    /// Returns the wrapped output.
    #[must_use]
    pub fn unwrap_output(&self) -> Arc<dyn Output> {
        Arc::clone(&self.wrapped)
    }
}

#[async_trait]
impl Output for ProcessedOutput {
    async fn connect(&self) -> Result<(), StreamflowError> {
        self.wrapped.connect().await
    }

    async fn write_batch(&self, batch: &Batch) -> Result<(), StreamflowError> {
        let batches = execute_all(&self.processors, batch.clone()).await?;
        if batches.is_empty() {
            return Ok(());
        }
        self.wrapped.write_batch(&Batch::concat(batches)).await
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        close_all(&self.processors).await;
        self.wrapped.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockInput, MockOutput, MockProcessor};

    fn upper() -> Arc<dyn Processor> {
        Arc::new(MockProcessor::new(|mut batch: Batch| {
            for part in batch.iter_mut() {
                let upper = part.as_bytes().to_ascii_uppercase();
                part.set_bytes(upper);
            }
            Ok(vec![batch])
        }))
    }

    fn filter_all() -> Arc<dyn Processor> {
        Arc::new(MockProcessor::new(|_| Ok(Vec::new())))
    }

    fn failing() -> Arc<dyn Processor> {
        Arc::new(MockProcessor::new(|_| {
            Err(StreamflowError::processing(anyhow::anyhow!("cannot process")))
        }))
    }

    #[tokio::test]
    async fn test_execute_all_chains_processors() {
        let passthrough: Arc<dyn Processor> = Arc::new(MockProcessor::passthrough());
        let out = execute_all(&[upper(), passthrough], Batch::quick(["ab"]))
            .await
            .unwrap();
        assert_eq!(out[0].get(0).unwrap().as_bytes(), b"AB");

        let filtered = execute_all(&[filter_all(), failing()], Batch::quick(["a"])).await.unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_processed_input_forwards_and_rejects() {
        let (mock, feed) = MockInput::new();
        let input = ProcessedInput::new(Arc::new(mock), vec![upper()]);
        let mut rx = input.take_transactions().unwrap();

        let (tran, ack) = Transaction::new(Batch::quick(["hi"]));
        let id = tran.id();
        feed.send(tran).await.unwrap();

        let got = rx.recv().await.unwrap();
        assert_eq!(got.id(), id);
        assert_eq!(got.payload().get(0).unwrap().as_bytes(), b"HI");
        got.ack(Ok(()));
        assert!(ack.await.unwrap().is_ok());
        input.close().await.unwrap();

        let (mock, feed) = MockInput::new();
        let input = ProcessedInput::new(Arc::new(mock), vec![failing()]);
        let _rx = input.take_transactions().unwrap();
        let (tran, ack) = Transaction::new(Batch::quick(["hi"]));
        feed.send(tran).await.unwrap();
        assert!(matches!(ack.await.unwrap(), Err(StreamflowError::Processing(_))));
        input.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_processed_output_skips_filtered() {
        let mock = Arc::new(MockOutput::new());
        let output = ProcessedOutput::new(mock.clone(), vec![filter_all()]);
        output.write_batch(&Batch::quick(["a"])).await.unwrap();
        assert!(mock.written().is_empty());

        let output = ProcessedOutput::new(mock.clone(), vec![upper()]);
        output.write_batch(&Batch::quick(["a"])).await.unwrap();
        assert_eq!(mock.written()[0].get(0).unwrap().as_bytes(), b"A");
    }
}
