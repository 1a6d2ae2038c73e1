//! The resources handle passed to constructors.
//!
//! Named retry, cache and rate-limit resources are registered here and
//! looked up by label. The handle also builds nested components through the
//! environment it was created from, so wrappers derived by a bundle apply to
//! children as well.

use crate::bundle::{validate_name, Environment};
use crate::component::{Cache, ComponentConfig, ComponentKind, Input, Output, Processor, RateLimit, Retry};
use crate::errors::{ConfigError, StreamflowError, UnknownResourceError};
use crate::retry::{InMemoryWindowStore, WindowStore};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resource declarations, each selected by type and named by its label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Retry resources.
    #[serde(default)]
    pub retry_resources: Vec<ComponentConfig>,
    /// Cache resources.
    #[serde(default)]
    pub cache_resources: Vec<ComponentConfig>,
    /// Rate limit resources.
    #[serde(default)]
    pub rate_limit_resources: Vec<ComponentConfig>,
}

struct ResourcesInner {
    env: Environment,
    window_store: Arc<dyn WindowStore>,
    retries: RwLock<HashMap<String, Arc<dyn Retry>>>,
    caches: RwLock<HashMap<String, Arc<dyn Cache>>>,
    rate_limits: RwLock<HashMap<String, Arc<dyn RateLimit>>>,
    escalations: Mutex<HashMap<String, usize>>,
}

/// A cheaply cloneable handle to labelled resources and the environment.
#[derive(Clone)]
pub struct Resources {
    inner: Arc<ResourcesInner>,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut retries: Vec<_> = self.inner.retries.read().keys().cloned().collect();
        retries.sort();
        let mut caches: Vec<_> = self.inner.caches.read().keys().cloned().collect();
        caches.sort();
        let mut rate_limits: Vec<_> = self.inner.rate_limits.read().keys().cloned().collect();
        rate_limits.sort();
        f.debug_struct("Resources")
            .field("retries", &retries)
            .field("caches", &caches)
            .field("rate_limits", &rate_limits)
            .finish_non_exhaustive()
    }
}

fn lookup<T: ?Sized>(
    map: &RwLock<HashMap<String, Arc<T>>>,
    kind: ComponentKind,
    name: &str,
) -> Result<Arc<T>, StreamflowError> {
    map.read()
        .get(name)
        .cloned()
        .ok_or_else(|| UnknownResourceError::new(kind, name).into())
}

impl Resources {
    /// Creates a handle with no resources and an in-memory window store.
    #[must_use]
    pub fn new(env: Environment) -> Self {
        Self::with_store(env, Arc::new(InMemoryWindowStore::new()))
    }

    /// Creates a handle whose shared resources use `store`.
    #[must_use]
    pub fn with_store(env: Environment, store: Arc<dyn WindowStore>) -> Self {
        Self {
            inner: Arc::new(ResourcesInner {
                env,
                window_store: store,
                retries: RwLock::new(HashMap::new()),
                caches: RwLock::new(HashMap::new()),
                rate_limits: RwLock::new(HashMap::new()),
                escalations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Builds every declared resource through `env`.
    ///
    /// # Errors
    ///
    /// Returns the first construction error, or `Config` for a resource
    /// without a valid label.
    pub fn from_config(env: Environment, config: &ResourcesConfig) -> Result<Self, StreamflowError> {
        let resources = Self::new(env);
        for conf in &config.retry_resources {
            let label = resource_label(conf)?;
            let retry = resources.inner.env.retries().init(conf, &resources)?;
            resources.store_retry(label, retry);
        }
        for conf in &config.cache_resources {
            let label = resource_label(conf)?;
            let cache = resources.inner.env.caches().init(conf, &resources)?;
            resources.store_cache(label, cache);
        }
        for conf in &config.rate_limit_resources {
            let label = resource_label(conf)?;
            let rate_limit = resources.inner.env.rate_limits().init(conf, &resources)?;
            resources.store_rate_limit(label, rate_limit);
        }
        Ok(resources)
    }

    /// Returns the environment components are built from.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    /// Returns the store shared resources keep their windows in.
    #[must_use]
    pub fn window_store(&self) -> Arc<dyn WindowStore> {
        Arc::clone(&self.inner.window_store)
    }

    /// Registers a retry resource, replacing any with the same label.
    pub fn store_retry(&self, name: impl Into<String>, retry: Arc<dyn Retry>) {
        self.inner.retries.write().insert(name.into(), retry);
    }

    /// Registers a cache resource, replacing any with the same label.
    pub fn store_cache(&self, name: impl Into<String>, cache: Arc<dyn Cache>) {
        self.inner.caches.write().insert(name.into(), cache);
    }

    /// Registers a rate limit resource, replacing any with the same label.
    pub fn store_rate_limit(&self, name: impl Into<String>, rate_limit: Arc<dyn RateLimit>) {
        self.inner.rate_limits.write().insert(name.into(), rate_limit);
    }

    /// Returns the retry resource labelled `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if no such resource exists.
    pub fn retry(&self, name: &str) -> Result<Arc<dyn Retry>, StreamflowError> {
        lookup(&self.inner.retries, ComponentKind::Retry, name)
    }

    /// Returns the cache resource labelled `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if no such resource exists.
    pub fn cache(&self, name: &str) -> Result<Arc<dyn Cache>, StreamflowError> {
        lookup(&self.inner.caches, ComponentKind::Cache, name)
    }

    /// Returns the rate limit resource labelled `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if no such resource exists.
    pub fn rate_limit(&self, name: &str) -> Result<Arc<dyn RateLimit>, StreamflowError> {
        lookup(&self.inner.rate_limits, ComponentKind::RateLimit, name)
    }

    /// Returns true if a retry resource labelled `name` exists.
    #[must_use]
    pub fn probe_retry(&self, name: &str) -> bool {
        self.inner.retries.read().contains_key(name)
    }

    /// Returns true if a cache resource labelled `name` exists.
    #[must_use]
    pub fn probe_cache(&self, name: &str) -> bool {
        self.inner.caches.read().contains_key(name)
    }

    /// Returns true if a rate limit resource labelled `name` exists.
    #[must_use]
    pub fn probe_rate_limit(&self, name: &str) -> bool {
        self.inner.rate_limits.read().contains_key(name)
    }

    /// Runs `f` against the retry resource labelled `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if no such resource exists, otherwise
    /// whatever `f` returns.
    pub async fn access_retry<F, Fut, T>(&self, name: &str, f: F) -> Result<T, StreamflowError>
    where
        F: FnOnce(Arc<dyn Retry>) -> Fut,
        Fut: Future<Output = Result<T, StreamflowError>>,
    {
        f(self.retry(name)?).await
    }

    /// Runs `f` against the cache resource labelled `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if no such resource exists, otherwise
    /// whatever `f` returns.
    pub async fn access_cache<F, Fut, T>(&self, name: &str, f: F) -> Result<T, StreamflowError>
    where
        F: FnOnce(Arc<dyn Cache>) -> Fut,
        Fut: Future<Output = Result<T, StreamflowError>>,
    {
        f(self.cache(name)?).await
    }

    /// Runs `f` against the rate limit resource labelled `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if no such resource exists, otherwise
    /// whatever `f` returns.
    pub async fn access_rate_limit<F, Fut, T>(&self, name: &str, f: F) -> Result<T, StreamflowError>
    where
        F: FnOnce(Arc<dyn RateLimit>) -> Fut,
        Fut: Future<Output = Result<T, StreamflowError>>,
    {
        f(self.rate_limit(name)?).await
    }

    /// Records a caller escalating on the retry resource labelled `name`.
    ///
    /// Returns true if no other caller was escalating on it.
    pub(crate) fn join_escalation(&self, name: &str) -> bool {
        let mut escalations = self.inner.escalations.lock();
        let count = escalations.entry(name.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Records a caller leaving its escalation on `name`.
    ///
    /// Returns true if it was the last one escalating.
    pub(crate) fn leave_escalation(&self, name: &str) -> bool {
        let mut escalations = self.inner.escalations.lock();
        let Some(count) = escalations.get_mut(name) else {
            return true;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return false;
        }
        escalations.remove(name);
        true
    }

    /// Builds an input through the environment.
    ///
    /// # Errors
    ///
    /// Returns the registry's construction error.
    pub fn new_input(&self, config: &ComponentConfig) -> Result<Arc<dyn Input>, StreamflowError> {
        self.inner.env.inputs().init(config, self)
    }

    /// Builds an output through the environment.
    ///
    /// # Errors
    ///
    /// Returns the registry's construction error.
    pub fn new_output(&self, config: &ComponentConfig) -> Result<Arc<dyn Output>, StreamflowError> {
        self.inner.env.outputs().init(config, self)
    }

    /// Builds a processor through the environment.
    ///
    /// # Errors
    ///
    /// Returns the registry's construction error.
    pub fn new_processor(
        &self,
        config: &ComponentConfig,
    ) -> Result<Arc<dyn Processor>, StreamflowError> {
        self.inner.env.processors().init(config, self)
    }

    /// Builds a list of processors through the environment.
    ///
    /// # Errors
    ///
    /// Returns the first construction error.
    pub fn new_processors(
        &self,
        configs: &[ComponentConfig],
    ) -> Result<Vec<Arc<dyn Processor>>, StreamflowError> {
        configs.iter().map(|c| self.new_processor(c)).collect()
    }

    /// Closes every registered resource.
    ///
    /// All resources are closed even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn close(&self) -> Result<(), StreamflowError> {
        let retries: Vec<_> = self.inner.retries.read().clone().into_iter().collect();
        let caches: Vec<_> = self.inner.caches.read().clone().into_iter().collect();
        let rate_limits: Vec<_> = self.inner.rate_limits.read().clone().into_iter().collect();

        let mut first_err = None;
        let mut record = |kind: ComponentKind, name: &str, result: Result<(), StreamflowError>| {
            if let Err(e) = result {
                warn!(%kind, name, error = %e, "Failed to close resource");
                first_err.get_or_insert(e);
            }
        };

        for (name, retry) in retries {
            record(ComponentKind::Retry, &name, retry.close().await);
        }
        for (name, cache) in caches {
            record(ComponentKind::Cache, &name, cache.close().await);
        }
        for (name, rate_limit) in rate_limits {
            record(ComponentKind::RateLimit, &name, rate_limit.close().await);
        }

        debug!("Resources closed");
        first_err.map_or(Ok(()), Err)
    }
}

fn resource_label(conf: &ComponentConfig) -> Result<&str, StreamflowError> {
    validate_name(&conf.label)
        .map_err(|e| ConfigError::new("label", format!("resources need a valid label: {e}")))?;
    Ok(&conf.label)
}
