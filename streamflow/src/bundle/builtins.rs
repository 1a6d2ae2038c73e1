//! Registration of the built-in component types.

use super::environment::{ComponentSet, Environment};
use crate::cache::MemoryCache;
use crate::component::{
    Cache, ComponentConfig, ComponentSpec, Input, Output, ParsedConfig, Processor, RateLimit,
    Retry,
};
use crate::errors::StreamflowError;
use crate::io::{DropOutput, GenerateInput};
use crate::manager::Resources;
use crate::processors::{attach_input, attach_output, NoopProcessor, RetryProcessor};
use crate::retry::{LocalRetry, SharedRateLimit, SharedRetry};
use crate::strict::AccessErrorPolicy;
use std::sync::Arc;
use tracing::warn;

fn register<T, F>(set: &mut ComponentSet<T>, spec: ComponentSpec, f: F)
where
    F: Fn(&ComponentConfig, &ParsedConfig, &Resources) -> Result<T, StreamflowError>
        + Send
        + Sync
        + 'static,
{
    let name = spec.name.clone();
    if let Err(e) = set.add(f, spec) {
        warn!(kind = %set.kind(), name = %name, error = %e, "Failed to register built-in component");
    }
}

impl Environment {
    /// Creates an environment with every built-in component registered.
    ///
    /// | kind | names |
    /// |---|---|
    /// | input | `generate` |
    /// | output | `drop` |
    /// | processor | `noop`, `retry` |
    /// | cache | `memory` |
    /// | rate limit | `shared` |
    /// | retry | `local`, `shared` |
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut env = Self::new();

        register(env.inputs_mut(), GenerateInput::spec(), |conf, parsed, res| {
            let input: Arc<dyn Input> = Arc::new(GenerateInput::from_parsed(parsed)?);
            attach_input(input, conf, res)
        });

        register(env.outputs_mut(), DropOutput::spec(), |conf, _, res| {
            attach_output(Arc::new(DropOutput) as Arc<dyn Output>, conf, res)
        });

        register(env.processors_mut(), NoopProcessor::spec(), |_, _, _| {
            Ok(Arc::new(NoopProcessor) as Arc<dyn Processor>)
        });
        register(env.processors_mut(), RetryProcessor::spec(), |_, parsed, res| {
            let processor = RetryProcessor::from_parsed(parsed, res, AccessErrorPolicy::FailOpen)?;
            Ok(Arc::new(processor) as Arc<dyn Processor>)
        });

        register(env.caches_mut(), MemoryCache::spec(), |_, parsed, _| {
            Ok(Arc::new(MemoryCache::from_parsed(parsed)?) as Arc<dyn Cache>)
        });

        register(env.rate_limits_mut(), SharedRateLimit::spec(), |_, parsed, res| {
            let rate_limit = SharedRateLimit::from_parsed(parsed, res.window_store())?;
            Ok(Arc::new(rate_limit) as Arc<dyn RateLimit>)
        });

        register(env.retries_mut(), LocalRetry::spec(), |_, parsed, _| {
            Ok(Arc::new(LocalRetry::from_parsed(parsed)?) as Arc<dyn Retry>)
        });
        register(env.retries_mut(), SharedRetry::spec(), |_, parsed, res| {
            let retry = SharedRetry::from_parsed(parsed, res.window_store())?;
            Ok(Arc::new(retry) as Arc<dyn Retry>)
        });

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use crate::message::Batch;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn names<T>(set: &ComponentSet<T>) -> Vec<String> {
        set.docs().iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_builtin_names() {
        let env = Environment::with_builtins();
        assert_eq!(names(env.inputs()), vec!["generate"]);
        assert_eq!(names(env.outputs()), vec!["drop"]);
        assert_eq!(names(env.processors()), vec!["noop", "retry"]);
        assert_eq!(names(env.caches()), vec!["memory"]);
        assert_eq!(names(env.rate_limits()), vec!["shared"]);
        assert_eq!(names(env.retries()), vec!["local", "shared"]);
        assert_eq!(
            env.retries().docs_for("shared").unwrap().kind,
            ComponentKind::Retry
        );
    }

    #[tokio::test]
    async fn test_generate_with_processors() {
        let res = Resources::new(Environment::with_builtins());
        let conf: ComponentConfig = serde_json::from_value(json!({
            "type": "generate",
            "settings": { "messages": ["a", "b"], "batch_size": 2 },
            "processors": [{ "type": "noop" }]
        }))
        .unwrap();

        let input = res.new_input(&conf).unwrap();
        let mut rx = input.take_transactions().unwrap();
        let tran = rx.recv().await.unwrap();
        assert_eq!(tran.payload().len(), 2);
        tran.ack(Ok(()));
        assert!(rx.recv().await.is_none());
        input.close().await.unwrap();

        let output = res.new_output(&ComponentConfig::new("drop")).unwrap();
        output.write_batch(&Batch::quick(["a"])).await.unwrap();
    }

    #[test]
    fn test_shared_rate_limit_needs_a_limit() {
        let res = Resources::new(Environment::with_builtins());
        let conf = ComponentConfig::new("shared").with_settings(json!({
            "key": "rl",
            "count": 0,
            "byte_size": 0,
        }));
        let err = res.environment().rate_limits().init(&conf, &res).err().unwrap();
        assert!(err.to_string().contains("failed to init rate_limit 'shared'"));
    }
}
