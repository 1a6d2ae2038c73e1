use crate::component::{ComponentKind, ComponentSpec, Output};
use crate::errors::StreamflowError;
use crate::message::Batch;
use async_trait::async_trait;
use tracing::trace;

/// Discards every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropOutput;

impl DropOutput {
    /// The documentation of the `drop` output.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Output, "drop").summary("Drops all messages.")
    }
}

#[async_trait]
impl Output for DropOutput {
    async fn write_batch(&self, batch: &Batch) -> Result<(), StreamflowError> {
        trace!(size = batch.len(), "Dropping batch");
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        Ok(())
    }
}
