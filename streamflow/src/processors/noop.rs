use crate::component::{ComponentKind, ComponentSpec, Processor};
use crate::errors::StreamflowError;
use crate::message::Batch;
use async_trait::async_trait;

/// Returns every batch unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProcessor;

impl NoopProcessor {
    /// The documentation of the `noop` processor.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Processor, "noop").summary("Does nothing.")
    }
}

#[async_trait]
impl Processor for NoopProcessor {
    async fn process_batch(&self, batch: Batch) -> Result<Vec<Batch>, StreamflowError> {
        Ok(vec![batch])
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        Ok(())
    }
}
