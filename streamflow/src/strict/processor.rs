//! Turns partial batch failure into whole-batch failure.

use crate::component::Processor;
use crate::errors::StreamflowError;
use crate::message::{Batch, BatchError};
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a processor so that any errored message fails the whole call.
///
/// The first output batch containing errored messages is reported as one
/// [`BatchError`] listing every failing index of that batch. The markers
/// are cleared and no batches are returned.
pub struct StrictProcessor {
    wrapped: Arc<dyn Processor>,
    enabled: bool,
}

impl StrictProcessor {
    /// Wraps `wrapped` with strict checking enabled.
    #[must_use]
    pub fn new(wrapped: Arc<dyn Processor>) -> Self {
        Self {
            wrapped,
            enabled: true,
        }
    }

    /// Wraps `wrapped` as a pass-through.
    #[must_use]
    pub fn disabled(wrapped: Arc<dyn Processor>) -> Self {
        Self {
            wrapped,
            enabled: false,
        }
    }

    /// Returns the wrapped processor.
    #[must_use]
    pub fn unwrap_processor(&self) -> Arc<dyn Processor> {
        Arc::clone(&self.wrapped)
    }
}

fn aggregate(batch: &mut Batch) -> Option<BatchError> {
    let headline = batch.iter().find_map(|p| p.error().cloned())?;
    let mut batch_err = BatchError::new(batch, headline);
    for (i, part) in batch.iter_mut().enumerate() {
        if let Some(err) = part.take_error() {
            batch_err.failed(i, err);
        }
    }
    Some(batch_err)
}

#[async_trait]
impl Processor for StrictProcessor {
    async fn process_batch(&self, batch: Batch) -> Result<Vec<Batch>, StreamflowError> {
        if !self.enabled {
            return self.wrapped.process_batch(batch).await;
        }

        let mut batches = self.wrapped.process_batch(batch).await?;
        for out in &mut batches {
            if let Some(err) = aggregate(out) {
                return Err(err.into());
            }
        }
        Ok(batches)
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.wrapped.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProcessor;
    use pretty_assertions::assert_eq;

    fn fail_index(index: usize) -> Arc<dyn Processor> {
        Arc::new(MockProcessor::new(move |mut batch: Batch| {
            if let Some(part) = batch.get_mut(index) {
                part.set_error(anyhow::anyhow!("bad message {index}"));
            }
            Ok(vec![batch])
        }))
    }

    #[tokio::test]
    async fn test_aggregates_errored_messages() {
        let strict = StrictProcessor::new(fail_index(1));

        let err = strict
            .process_batch(Batch::quick(["a", "b", "c"]))
            .await
            .unwrap_err();

        let batch_err = err.as_batch_error().expect("batch error");
        assert_eq!(batch_err.indexed_errors(), 1);
        assert_eq!(batch_err.failed_indexes(), vec![1]);
        assert_eq!(batch_err.batch_size(), 3);
        assert_eq!(batch_err.error_at(1).unwrap().to_string(), "bad message 1");
    }

    #[tokio::test]
    async fn test_passes_clean_batches_through() {
        let strict = StrictProcessor::new(Arc::new(MockProcessor::passthrough()));

        let out = strict.process_batch(Batch::quick(["a", "b"])).await.unwrap();

        assert_eq!(out.len(), 1);
        let payloads: Vec<&[u8]> = out[0].iter().map(|p| p.as_bytes()).collect();
        assert_eq!(payloads, vec![&b"a"[..], &b"b"[..]]);
    }

    #[tokio::test]
    async fn test_collects_every_index_of_first_failing_batch() {
        let inner = MockProcessor::new(|batch: Batch| {
            let mut first = batch.clone();
            first.get_mut(0).unwrap().set_error(anyhow::anyhow!("x"));
            first.get_mut(2).unwrap().set_error(anyhow::anyhow!("y"));
            let mut second = batch;
            second.get_mut(1).unwrap().set_error(anyhow::anyhow!("z"));
            Ok(vec![first, second])
        });
        let strict = StrictProcessor::new(Arc::new(inner));

        let err = strict
            .process_batch(Batch::quick(["a", "b", "c"]))
            .await
            .unwrap_err();

        let batch_err = err.as_batch_error().unwrap();
        assert_eq!(batch_err.failed_indexes(), vec![0, 2]);
        assert_eq!(batch_err.headline().to_string(), "x");
        assert_eq!(err.to_string(), "2 of 3 messages failed: x");
    }

    #[tokio::test]
    async fn test_hard_error_propagates() {
        let strict = StrictProcessor::new(Arc::new(MockProcessor::new(|_| {
            Err(StreamflowError::processing(anyhow::anyhow!("boom")))
        })));

        let err = strict.process_batch(Batch::quick(["a"])).await.unwrap_err();
        assert!(matches!(err, StreamflowError::Processing(_)));
    }

    #[tokio::test]
    async fn test_disabled_is_pass_through() {
        let inner = fail_index(0);
        let strict = StrictProcessor::disabled(Arc::clone(&inner));

        let out = strict.process_batch(Batch::quick(["a"])).await.unwrap();
        assert!(out[0].has_errors());
        assert!(Arc::ptr_eq(&strict.unwrap_processor(), &inner));
    }
}
