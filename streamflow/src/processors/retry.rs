//! The `retry` processor: reruns a child processor list until it succeeds
//! or a retry resource gives up.

use super::pipeline::execute_all;
use crate::cancellation::CancellationToken;
use crate::component::{
    ComponentConfig, ComponentKind, ComponentSpec, FieldSpec, ParsedConfig, Processor, Status,
};
use crate::errors::StreamflowError;
use crate::manager::Resources;
use crate::message::Batch;
use crate::strict::{AccessErrorPolicy, RetryGate};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

type Outcome = Result<Vec<Batch>, StreamflowError>;

fn failed(outcome: &Outcome) -> bool {
    outcome
        .as_ref()
        .map_or(true, |batches| batches.iter().any(Batch::has_errors))
}

/// Runs child processors, reprocessing the original batch with backoff
/// whenever they fail or mark a message as errored.
///
/// Once the resource reports exhaustion the last outcome is returned as is.
pub struct RetryProcessor {
    children: Vec<Arc<dyn Processor>>,
    gate: RetryGate,
    shutdown: CancellationToken,
}

impl RetryProcessor {
    /// The registered type name.
    pub const NAME: &'static str = "retry";

    /// Creates a processor running `children` behind `gate`.
    #[must_use]
    pub fn new(children: Vec<Arc<dyn Processor>>, gate: RetryGate) -> Self {
        Self {
            children,
            gate,
            shutdown: CancellationToken::new(),
        }
    }

    /// Builds the processor from parsed settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings are malformed or a child cannot be built.
    pub fn from_parsed(
        parsed: &ParsedConfig,
        resources: &Resources,
        policy: AccessErrorPolicy,
    ) -> Result<Self, StreamflowError> {
        let resource = parsed.field_string("resource")?;
        let configs: Vec<ComponentConfig> = parsed.field_as("processors")?;
        let children = resources.new_processors(&configs)?;
        Ok(Self::new(
            children,
            RetryGate::new(resources.clone(), resource, policy),
        ))
    }

    /// The documentation of the `retry` processor.
    #[must_use]
    pub fn spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Processor, Self::NAME)
            .summary("Reprocesses a batch with a list of processors until they succeed.")
            .status(Status::Experimental)
            .fields([
                FieldSpec::string("resource").description("The retry resource to back off on."),
                FieldSpec::array("processors")
                    .description("The processors to run.")
                    .default(Vec::<serde_json::Value>::new()),
            ])
    }

    /// Returns the child processors.
    #[must_use]
    pub fn children(&self) -> &[Arc<dyn Processor>] {
        &self.children
    }
}

#[async_trait]
impl Processor for RetryProcessor {
    async fn process_batch(&self, batch: Batch) -> Result<Vec<Batch>, StreamflowError> {
        let children = &self.children;
        let batch = &batch;
        self.gate
            .with_backoff(
                &self.shutdown,
                move || async move { execute_all(children, batch.clone()).await },
                failed,
            )
            .await
    }

    async fn close(&self) -> Result<(), StreamflowError> {
        self.shutdown.cancel("processor closing");
        for child in &self.children {
            if let Err(e) = child.close().await {
                warn!(error = %e, "Failed to close retried processor");
            }
        }
        Ok(())
    }
}
