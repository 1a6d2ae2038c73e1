//! Environment bundles that change how failures are handled.
//!
//! Every bundle clones a base [`Environment`] and replaces the constructor
//! of each registered component of the relevant kinds with one that wraps
//! what the base would have built. Specs are left untouched and the base is
//! never modified.

mod feedback;
mod gate;
mod input_retry;
mod output_retry;
mod processor;

pub use feedback::{FeedbackInput, FeedbackOptions};
pub use gate::{AccessErrorPolicy, RetryGate};
pub use input_retry::RetryInput;
pub use output_retry::RetryOutput;
pub use processor::StrictProcessor;

use crate::bundle::{constructor, Environment};
use crate::component::{ComponentConfig, Input, Output, Processor};
use crate::errors::{ConfigError, StreamflowError};
use crate::processors::{ProcessedInput, RetryProcessor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Options of [`strict_bundle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrictOptions {
    /// Retry resource gating every input. Inputs are left alone when unset.
    pub retry_resource: Option<String>,
    /// What gated inputs do when the resource cannot be consulted.
    pub policy: AccessErrorPolicy,
}

impl StrictOptions {
    /// Creates options with no retry resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gates inputs on `resource`.
    #[must_use]
    pub fn with_retry_resource(mut self, resource: impl Into<String>) -> Self {
        self.retry_resource = Some(resource.into());
        self
    }

    /// Sets the access error policy.
    #[must_use]
    pub fn with_policy(mut self, policy: AccessErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Options of [`retry_bundle`] and [`retry_config_bundle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// The retry resource consulted by every wrapper.
    pub resource: String,
    /// What wrappers do when the resource cannot be consulted.
    pub policy: AccessErrorPolicy,
    /// Feedback loop options.
    pub feedback: FeedbackOptions,
}

impl RetryOptions {
    /// Creates options for `resource`.
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            policy: AccessErrorPolicy::default(),
            feedback: FeedbackOptions::default(),
        }
    }

    /// Sets the access error policy.
    #[must_use]
    pub fn with_policy(mut self, policy: AccessErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the feedback options.
    #[must_use]
    pub fn with_feedback(mut self, feedback: FeedbackOptions) -> Self {
        self.feedback = feedback;
        self
    }
}

/// Derives an environment where every processor is strict.
///
/// With a retry resource, every input is also gated on it.
#[must_use]
pub fn strict_bundle(base: &Environment, options: StrictOptions) -> Environment {
    let mut env = base.clone();

    if let Some(resource) = options.retry_resource {
        let policy = options.policy;
        env.inputs_mut().wrap_all(move |_, inner| {
            let resource = resource.clone();
            constructor(move |conf, parsed, res| {
                let input = inner(conf, parsed, res)?;
                let gate = RetryGate::new(res.clone(), resource.as_str(), policy);
                Ok(Arc::new(RetryInput::new(input, gate)) as Arc<dyn Input>)
            })
        });
    }

    env.processors_mut().wrap_all(|_, inner| {
        constructor(move |conf, parsed, res| {
            let processor = inner(conf, parsed, res)?;
            Ok(Arc::new(StrictProcessor::new(processor)) as Arc<dyn Processor>)
        })
    });

    debug!(
        inputs = env.inputs().len(),
        processors = env.processors().len(),
        "Derived strict environment"
    );
    env
}

/// Derives an environment where rejected transactions are retried.
///
/// Inputs are gated on the retry resource and rejected transactions are
/// routed back through the gate. The processors listed on an input are run
/// after the feedback loop, so a processing failure counts as a rejection.
/// Failed output writes are retried.
#[must_use]
pub fn retry_bundle(base: &Environment, options: RetryOptions) -> Environment {
    let mut env = base.clone();
    let RetryOptions {
        resource,
        policy,
        feedback,
    } = options;

    let input_resource = resource.clone();
    env.inputs_mut().wrap_all(move |_, inner| {
        let resource = input_resource.clone();
        constructor(move |conf, parsed, res| {
            let mut raw_conf = conf.clone();
            raw_conf.processors.clear();
            let raw = inner(&raw_conf, parsed, res)?;

            let gate = RetryGate::new(res.clone(), resource.as_str(), policy);
            let input: Arc<dyn Input> = Arc::new(FeedbackInput::new(raw, gate, feedback));
            if conf.processors.is_empty() {
                return Ok(input);
            }
            let processors = res.new_processors(&conf.processors)?;
            Ok(Arc::new(ProcessedInput::new(input, processors)) as Arc<dyn Input>)
        })
    });

    env.outputs_mut().wrap_all(move |_, inner| {
        let resource = resource.clone();
        constructor(move |conf, parsed, res| {
            let output = inner(conf, parsed, res)?;
            let gate = RetryGate::new(res.clone(), resource.as_str(), policy);
            Ok(Arc::new(RetryOutput::new(output, gate)) as Arc<dyn Output>)
        })
    });

    env
}

fn retry_processor_config(resource: &str, processors: &[ComponentConfig]) -> ComponentConfig {
    ComponentConfig::new(RetryProcessor::NAME).with_settings(json!({
        "resource": resource,
        "processors": processors,
    }))
}

/// Derives an environment where the processors of every input and output
/// are rewritten into a single `retry` processor wrapping the original list.
#[must_use]
pub fn retry_config_bundle(base: &Environment, options: RetryOptions) -> Environment {
    let mut env = base.clone();
    let policy = options.policy;

    let registered = env.processors_mut().add(
        move |_, parsed, res| {
            RetryProcessor::from_parsed(parsed, res, policy).map(|p| Arc::new(p) as Arc<dyn Processor>)
        },
        RetryProcessor::spec(),
    );
    if let Err(e) = registered {
        warn!(error = %e, "Failed to register the retry processor");
    }

    let input_resource = options.resource.clone();
    env.inputs_mut().wrap_all(move |_, inner| {
        let resource = input_resource.clone();
        constructor(move |conf, parsed, res| {
            if conf.processors.is_empty() {
                return inner(conf, parsed, res);
            }
            let rewritten = conf
                .clone()
                .with_processors(vec![retry_processor_config(&resource, &conf.processors)]);
            inner(&rewritten, parsed, res)
        })
    });

    let output_resource = options.resource;
    env.outputs_mut().wrap_all(move |_, inner| {
        let resource = output_resource.clone();
        constructor(move |conf, parsed, res| {
            if conf.processors.is_empty() {
                return inner(conf, parsed, res);
            }
            let rewritten = conf
                .clone()
                .with_processors(vec![retry_processor_config(&resource, &conf.processors)]);
            inner(&rewritten, parsed, res)
        })
    });

    env
}

/// The global error handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingStrategy {
    /// Errored messages flow on.
    #[default]
    None,
    /// Batches with errored messages are rejected.
    Reject,
    /// Rejected transactions are retried with backoff.
    Backoff,
}

/// Selects which bundle [`apply_error_handling`] derives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// The strategy.
    #[serde(default)]
    pub strategy: ErrorHandlingStrategy,
    /// The retry resource label.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

/// Derives the environment selected by `config`.
///
/// # Errors
///
/// Returns a config error if the `backoff` strategy has no resource.
pub fn apply_error_handling(
    base: &Environment,
    config: &ErrorHandlingConfig,
) -> Result<Environment, StreamflowError> {
    match config.strategy {
        ErrorHandlingStrategy::None => Ok(base.clone()),
        ErrorHandlingStrategy::Reject => {
            let mut options = StrictOptions::new();
            if !config.resource.is_empty() {
                options = options.with_retry_resource(&config.resource);
            }
            Ok(strict_bundle(base, options))
        }
        ErrorHandlingStrategy::Backoff => {
            if config.resource.is_empty() {
                return Err(ConfigError::new(
                    "error_handling.resource",
                    "the backoff strategy needs a retry resource",
                )
                .into());
            }
            Ok(retry_bundle(base, RetryOptions::new(&config.resource)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentKind, ComponentSpec};
    use crate::manager::Resources;
    use crate::message::Batch;
    use crate::retry::{BackoffConfig, LocalRetry};
    use crate::testing::{MockProcessor, MockRetry};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn with_flaky(failures: u32, calls: Arc<AtomicU32>) -> Environment {
        let mut env = Environment::with_builtins();
        env.processors_mut()
            .add(
                move |_, _, _| {
                    let calls = Arc::clone(&calls);
                    Ok(Arc::new(MockProcessor::new(move |batch: Batch| {
                        if calls.fetch_add(1, Ordering::SeqCst) < failures {
                            Err(StreamflowError::processing(anyhow::anyhow!("flaky")))
                        } else {
                            Ok(vec![batch])
                        }
                    })) as Arc<dyn Processor>)
                },
                ComponentSpec::new(ComponentKind::Processor, "flaky"),
            )
            .unwrap();
        env.processors_mut()
            .add(
                |_, _, _| {
                    Ok(Arc::new(MockProcessor::new(|mut batch: Batch| {
                        if let Some(part) = batch.get_mut(1) {
                            part.set_error(anyhow::anyhow!("bad message"));
                        }
                        Ok(vec![batch])
                    })) as Arc<dyn Processor>)
                },
                ComponentSpec::new(ComponentKind::Processor, "mark"),
            )
            .unwrap();
        env
    }

    fn resources(env: Environment) -> Resources {
        let res = Resources::new(env);
        let config = BackoffConfig::new()
            .with_initial_interval(Duration::from_millis(10))
            .with_max_interval(Duration::from_millis(10))
            .with_randomization_factor(0.0)
            .with_max_retries(5);
        res.store_retry("backoff", Arc::new(LocalRetry::new(config)));
        res
    }

    fn generate_with(processor: &str) -> ComponentConfig {
        serde_json::from_value(json!({
            "type": "generate",
            "settings": { "messages": ["a"] },
            "processors": [{ "type": processor }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_strict_bundle_leaves_base_alone() {
        let base = with_flaky(0, Arc::new(AtomicU32::new(0)));
        let before = base.processors().docs();
        let strict = strict_bundle(&base, StrictOptions::new());

        assert_eq!(base.processors().docs(), before);
        assert_eq!(strict.processors().docs(), before);

        let three = || Batch::quick(["a", "b", "c"]);
        let loose = Resources::new(base).new_processor(&ComponentConfig::new("mark")).unwrap();
        let out = loose.process_batch(three()).await.unwrap();
        assert!(out[0].has_errors());

        let strict = Resources::new(strict).new_processor(&ComponentConfig::new("mark")).unwrap();
        let err = strict.process_batch(three()).await.unwrap_err();
        let batch_err = err.as_batch_error().unwrap();
        assert_eq!(batch_err.failed_indexes(), vec![1]);
    }

    #[tokio::test]
    async fn test_strict_bundle_gates_inputs_on_resource() {
        let base = Environment::with_builtins();
        let env = strict_bundle(&base, StrictOptions::new().with_retry_resource("gate"));
        let res = Resources::new(env);
        let retry = Arc::new(MockRetry::fixed(Duration::ZERO));
        res.store_retry("gate", retry);

        let conf = ComponentConfig::new("generate").with_settings(json!({ "messages": ["a"] }));
        let input = res.new_input(&conf).unwrap();
        let mut rx = input.take_transactions().unwrap();
        rx.recv().await.unwrap().ack(Ok(()));
        assert!(rx.recv().await.is_none());
        input.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bundle_redelivers_after_processing_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = with_flaky(2, calls.clone());
        let res = resources(retry_bundle(&base, RetryOptions::new("backoff")));

        let input = res.new_input(&generate_with("flaky")).unwrap();
        let mut rx = input.take_transactions().unwrap();

        let tran = rx.recv().await.unwrap();
        assert_eq!(tran.payload().get(0).unwrap().as_bytes(), b"a");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        tran.ack(Ok(()));

        assert!(rx.recv().await.is_none());
        input.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bundle_retries_output_writes() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = with_flaky(1, calls.clone());
        let res = resources(retry_bundle(&base, RetryOptions::new("backoff")));

        let conf: ComponentConfig = serde_json::from_value(json!({
            "type": "drop",
            "processors": [{ "type": "flaky" }]
        }))
        .unwrap();
        let output = res.new_output(&conf).unwrap();
        output.write_batch(&Batch::quick(["a"])).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_config_bundle_rewrites_processors() {
        let calls = Arc::new(AtomicU32::new(0));
        let base = with_flaky(2, calls.clone());
        let res = resources(retry_config_bundle(&base, RetryOptions::new("backoff")));

        let input = res.new_input(&generate_with("flaky")).unwrap();
        let mut rx = input.take_transactions().unwrap();
        let tran = rx.recv().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!tran.payload().has_errors());
        tran.ack(Ok(()));
        assert!(rx.recv().await.is_none());
        input.close().await.unwrap();

        let conf: ComponentConfig = serde_json::from_value(json!({
            "type": "drop",
            "processors": [{ "type": "flaky" }]
        }))
        .unwrap();
        calls.store(1, Ordering::SeqCst);
        res.new_output(&conf)
            .unwrap()
            .write_batch(&Batch::quick(["a"]))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_processor_config_shape() {
        let conf = retry_processor_config("backoff", &[ComponentConfig::new("noop")]);
        assert_eq!(
            serde_json::to_value(conf).unwrap(),
            json!({
                "type": "retry",
                "settings": { "resource": "backoff", "processors": [{ "type": "noop", "settings": null }] }
            })
        );
    }

    #[tokio::test]
    async fn test_apply_error_handling() {
        let base = with_flaky(0, Arc::new(AtomicU32::new(0)));

        let none = apply_error_handling(&base, &ErrorHandlingConfig::default()).unwrap();
        let out = Resources::new(none)
            .new_processor(&ComponentConfig::new("mark"))
            .unwrap()
            .process_batch(Batch::quick(["a", "b"]))
            .await;
        assert!(out.is_ok());

        let config: ErrorHandlingConfig = serde_json::from_value(json!({ "strategy": "reject" })).unwrap();
        let reject = apply_error_handling(&base, &config).unwrap();
        let out = Resources::new(reject)
            .new_processor(&ComponentConfig::new("mark"))
            .unwrap()
            .process_batch(Batch::quick(["a", "b"]))
            .await;
        assert!(matches!(out, Err(StreamflowError::Batch(_))));

        let config: ErrorHandlingConfig = serde_json::from_value(json!({ "strategy": "backoff" })).unwrap();
        let err = apply_error_handling(&base, &config).err().unwrap();
        assert!(matches!(&err, StreamflowError::Config(c) if c.path == "error_handling.resource"));

        let config = ErrorHandlingConfig {
            strategy: ErrorHandlingStrategy::Backoff,
            resource: "backoff".into(),
        };
        assert!(apply_error_handling(&base, &config).is_ok());
    }
}
