//! Output decorator retrying failed writes.

use super::gate::RetryGate;
use crate::cancellation::CancellationToken;
use crate::component::Output;
use crate::errors::StreamflowError;
use crate::message::Batch;
use async_trait::async_trait;
use std::sync::Arc;

/// Retries a failed `write_batch` after waiting out the retry resource,
/// until a write succeeds or the resource reports exhaustion.
pub struct RetryOutput {
    wrapped: Arc<dyn Output>,
    gate: RetryGate,
    shutdown: CancellationToken,
}

impl RetryOutput {
    /// Wraps `wrapped`, retrying through `gate`.
    #[must_use]
    pub fn new(wrapped: Arc<dyn Output>, gate: RetryGate) -> Self {
        Self {
            wrapped,
            gate,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the wrapped output.
    #[must_use]
    pub fn unwrap_output(&self) -> Arc<dyn Output> {
        Arc::clone(&self.wrapped)
    }
}

#[async_trait]
impl Output for RetryOutput {
    async fn connect(&self) -> Result<(), StreamflowError> {
        self.wrapped.connect().await
    }

    async fn write_batch(&self, batch: &Batch) -> Result<(), StreamflowError> {
        let wait = self.gate.wait_duration().await;
        if !RetryGate::sleep(wait, &self.shutdown).await {
            return Err(StreamflowError::Shutdown("output closing".to_string()));
        }
        self.gate
            .with_backoff(
                &self.shutdown,
                || self.wrapped.write_batch(batch),
                Result::is_err,
            )
            .await
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.shutdown.cancel("output closing");
        self.wrapped.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Environment;
    use crate::manager::Resources;
    use crate::retry::{BackoffConfig, LocalRetry};
    use crate::strict::AccessErrorPolicy;
    use crate::testing::MockOutput;
    use std::time::Duration;

    fn gate(max_retries: u64) -> RetryGate {
        let res = Resources::new(Environment::new());
        res.store_retry(
            "backoff",
            Arc::new(LocalRetry::new(
                BackoffConfig::new()
                    .with_initial_interval(Duration::from_millis(50))
                    .with_randomization_factor(0.0)
                    .with_max_retries(max_retries),
            )),
        );
        RetryGate::new(res, "backoff", AccessErrorPolicy::FailOpen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_write_succeeds() {
        let mock = Arc::new(MockOutput::new().fail_next(2));
        let output = RetryOutput::new(mock.clone(), gate(5));

        output.write_batch(&Batch::quick(["a"])).await.unwrap();

        assert_eq!(mock.attempts(), 3);
        assert_eq!(mock.written().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_exhausted() {
        let mock = Arc::new(MockOutput::new().fail_next(10));
        let output = RetryOutput::new(mock.clone(), gate(1));

        let err = output.write_batch(&Batch::quick(["a"])).await.unwrap_err();

        assert!(matches!(err, StreamflowError::Output(_)));
        assert_eq!(mock.attempts(), 2);
        assert!(mock.written().is_empty());
    }

    #[tokio::test]
    async fn test_close_delegates() {
        let mock = Arc::new(MockOutput::new());
        let output = RetryOutput::new(mock.clone(), gate(1));
        output.close().await.unwrap();
        assert!(mock.is_closed());
        assert!(Arc::ptr_eq(&output.unwrap_output(), &(mock as Arc<dyn Output>)));
    }
}
