//! Cache functions exposed to an embedding mapping language.
//!
//! Each function is identified by name, documented by a parameter list and
//! executed against the cache resources of an explicit [`Resources`] handle.

use crate::component::{parse_fields, FieldSpec};
use crate::errors::{ConfigError, StreamflowError};
use crate::manager::Resources;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// The cache functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheFunction {
    /// Retrieves a value.
    Get,
    /// Stores a value, overwriting any existing one.
    Set,
    /// Stores a value, failing if the key exists.
    Add,
    /// Removes a key.
    Delete,
}

impl CacheFunction {
    /// Every cache function.
    pub const ALL: [Self; 4] = [Self::Get, Self::Set, Self::Add, Self::Delete];

    /// Returns the function name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Get => "cache_get",
            Self::Set => "cache_set",
            Self::Add => "cache_add",
            Self::Delete => "cache_delete",
        }
    }

    /// Looks a function up by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Returns a one line description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Get => "Retrieves a value from a cache resource.",
            Self::Set => "Sets a key in a cache resource, overriding any existing value.",
            Self::Add => "Sets a key in a cache resource, failing if the key already exists.",
            Self::Delete => "Removes a key from a cache resource.",
        }
    }

    /// Returns the parameters, in positional order.
    #[must_use]
    pub fn params(self) -> Vec<FieldSpec> {
        let mut params = vec![
            FieldSpec::string("resource").description("The label of the cache resource."),
            FieldSpec::string("key").description("The key to operate on."),
        ];
        if matches!(self, Self::Set | Self::Add) {
            params.push(FieldSpec::string("value").description("The value to store."));
        }
        params
    }

    /// Binds named arguments, validating them against [`Self::params`].
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing or malformed argument.
    pub fn bind(self, args: &Value) -> Result<CacheCall, ConfigError> {
        let parsed = parse_fields(&self.params(), args)?;
        let value = match self {
            Self::Set | Self::Add => Some(parsed.field_string("value")?.into_bytes()),
            Self::Get | Self::Delete => None,
        };
        Ok(CacheCall {
            function: self,
            resource: parsed.field_string("resource")?,
            key: parsed.field_string("key")?,
            value,
        })
    }

    /// Binds positional arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the argument count does not match.
    pub fn bind_positional(self, args: &[Value]) -> Result<CacheCall, ConfigError> {
        let params = self.params();
        if args.len() != params.len() {
            return Err(ConfigError::new(
                self.name(),
                format!("expected {} arguments, got {}", params.len(), args.len()),
            ));
        }
        let named = params
            .iter()
            .map(|p| p.name.clone())
            .zip(args.iter().cloned())
            .collect::<serde_json::Map<_, _>>();
        self.bind(&Value::Object(named))
    }
}

impl fmt::Display for CacheFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cache function with its arguments bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheCall {
    /// The function.
    pub function: CacheFunction,
    /// The cache resource label.
    pub resource: String,
    /// The key.
    pub key: String,
    /// The value, for `cache_set` and `cache_add`.
    pub value: Option<Vec<u8>>,
}

impl CacheCall {
    /// Runs the call against the cache resources of `resources`.
    ///
    /// `cache_get` returns the stored value; the other functions return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is missing or the cache operation fails.
    pub async fn execute(&self, resources: &Resources) -> Result<Option<Vec<u8>>, StreamflowError> {
        debug!(function = %self.function, resource = %self.resource, "Executing cache function");
        let key = self.key.as_str();
        let value = self.value.clone().unwrap_or_default();
        resources
            .access_cache(&self.resource, |cache| async move {
                match self.function {
                    CacheFunction::Get => cache.get(key).await.map(Some),
                    CacheFunction::Set => cache.set(key, value, None).await.map(|()| None),
                    CacheFunction::Add => cache.add(key, value, None).await.map(|()| None),
                    CacheFunction::Delete => cache.delete(key).await.map(|()| None),
                }
            })
            .await
    }
}
