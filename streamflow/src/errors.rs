//! Error types for the streamflow engine.
//!
//! Registration, construction, data-plane and resource-access failures each
//! have their own type so callers can decide how to react to them.

use crate::component::ComponentKind;
use crate::message::BatchError;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for streamflow operations.
#[derive(Debug, Error)]
pub enum StreamflowError {
    /// A component name failed the identifier grammar.
    #[error("{0}")]
    InvalidName(#[from] InvalidNameError),

    /// A config referenced a component type that is not registered.
    #[error("{0}")]
    UnknownComponent(#[from] UnknownComponentError),

    /// A registered constructor failed.
    #[error("{0}")]
    ComponentConstruction(#[from] ComponentConstructionError),

    /// Component settings did not match the registered schema.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// One or more messages of a batch failed.
    #[error("{0}")]
    Batch(#[from] BatchError),

    /// A retry or rate-limit resource could not be consulted.
    #[error("{0}")]
    RetryAccess(#[from] RetryAccessError),

    /// A named resource does not exist.
    #[error("{0}")]
    UnknownResource(#[from] UnknownResourceError),

    /// A cache operation failed.
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// A processor failed the whole batch.
    #[error("Processing error: {0}")]
    Processing(#[source] anyhow::Error),

    /// An output failed to write a batch.
    #[error("Output error: {0}")]
    Output(#[source] anyhow::Error),

    /// A transaction was dropped without being acknowledged.
    #[error("Transaction dropped without acknowledgement")]
    Unacknowledged,

    /// The component is shutting down.
    #[error("Component is shutting down: {0}")]
    Shutdown(String),
}

impl StreamflowError {
    /// Creates a processing error from anything convertible to `anyhow::Error`.
    pub fn processing(err: impl Into<anyhow::Error>) -> Self {
        Self::Processing(err.into())
    }

    /// Creates an output error from anything convertible to `anyhow::Error`.
    pub fn output(err: impl Into<anyhow::Error>) -> Self {
        Self::Output(err.into())
    }

    /// Returns the batch error if this is a batch-level failure.
    #[must_use]
    pub fn as_batch_error(&self) -> Option<&BatchError> {
        match self {
            Self::Batch(err) => Some(err),
            _ => None,
        }
    }
}

/// Error raised when a component name does not match the identifier grammar.
#[derive(Debug, Clone, Error)]
#[error("component name '{name}' does not match the required regular expression /{pattern}/")]
pub struct InvalidNameError {
    /// The rejected name.
    pub name: String,
    /// The grammar the name was checked against.
    pub pattern: String,
}

impl InvalidNameError {
    /// Creates a new invalid name error.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Error raised when a config references an unregistered component type.
#[derive(Debug, Clone, Error)]
#[error("{kind} type '{type_name}' was not recognised")]
pub struct UnknownComponentError {
    /// The registry that was searched.
    pub kind: ComponentKind,
    /// The requested type name.
    pub type_name: String,
}

impl UnknownComponentError {
    /// Creates a new unknown component error.
    #[must_use]
    pub fn new(kind: ComponentKind, type_name: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
        }
    }
}

/// Error raised when a registered constructor fails.
///
/// The underlying error is kept as the source.
#[derive(Debug, Error)]
#[error("failed to init {kind} '{name}'{}: {source}", label_suffix(.label))]
pub struct ComponentConstructionError {
    /// The kind of component being built.
    pub kind: ComponentKind,
    /// The registered type name.
    pub name: String,
    /// The config label, if any.
    pub label: String,
    /// The constructor's error.
    #[source]
    pub source: Box<StreamflowError>,
}

fn label_suffix(label: &str) -> String {
    if label.is_empty() {
        String::new()
    } else {
        format!(" (label '{label}')")
    }
}

impl ComponentConstructionError {
    /// Creates a new construction error.
    #[must_use]
    pub fn new(
        kind: ComponentKind,
        name: impl Into<String>,
        label: impl Into<String>,
        source: StreamflowError,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            label: label.into(),
            source: Box::new(source),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), json!(self.kind.as_str()));
        map.insert("name".to_string(), json!(self.name));
        if !self.label.is_empty() {
            map.insert("label".to_string(), json!(self.label));
        }
        map.insert("cause".to_string(), json!(self.source.to_string()));
        map
    }
}

/// Error raised when settings do not match a component's field schema.
#[derive(Debug, Clone, Error)]
#[error("{path}: {message}")]
pub struct ConfigError {
    /// Dotted path of the offending field.
    pub path: String,
    /// What went wrong.
    pub message: String,
}

impl ConfigError {
    /// Creates a new config error.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a retry or rate-limit resource cannot be consulted.
///
/// Distinct from a zero wait: the resource did not answer.
#[derive(Debug, Clone, Error)]
#[error("accessing {resource}: {message}")]
pub struct RetryAccessError {
    /// The resource or store key that failed.
    pub resource: String,
    /// The failure reported by the backing store.
    pub message: String,
}

impl RetryAccessError {
    /// Creates a new access error.
    #[must_use]
    pub fn new(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a named resource is not registered.
#[derive(Debug, Clone, Error)]
#[error("{kind} resource '{name}' was not found")]
pub struct UnknownResourceError {
    /// The resource kind.
    pub kind: ComponentKind,
    /// The requested label.
    pub name: String,
}

impl UnknownResourceError {
    /// Creates a new unknown resource error.
    #[must_use]
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Errors related to cache operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The key does not exist.
    #[error("key does not exist: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// The key already exists (returned by `add`).
    #[error("key already exists: {key}")]
    KeyAlreadyExists {
        /// The existing key.
        key: String,
    },
}

impl CacheError {
    /// Creates a key not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a key already exists error.
    #[must_use]
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::KeyAlreadyExists { key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_name_message() {
        let err = InvalidNameError::new("Bad-Name", "^[a-z]+$");
        assert!(err.to_string().contains("'Bad-Name'"));
        assert!(err.to_string().contains("/^[a-z]+$/"));
    }

    #[test]
    fn test_construction_error_keeps_source() {
        let inner = StreamflowError::from(ConfigError::new("count", "expected an integer"));
        let err = ComponentConstructionError::new(ComponentKind::Retry, "local", "", inner);

        assert_eq!(
            err.to_string(),
            "failed to init retry 'local': count: expected an integer"
        );
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("count: expected an integer"));
    }

    #[test]
    fn test_construction_error_with_label() {
        let inner = StreamflowError::processing(anyhow::anyhow!("boom"));
        let err = ComponentConstructionError::new(ComponentKind::Processor, "noop", "first", inner);

        assert!(err.to_string().contains("(label 'first')"));
        let dict = err.to_dict();
        assert_eq!(dict.get("label").unwrap(), "first");
        assert_eq!(dict.get("kind").unwrap(), "processor");
    }

    #[test]
    fn test_unknown_component_message() {
        let err = UnknownComponentError::new(ComponentKind::Input, "kafka");
        assert_eq!(err.to_string(), "input type 'kafka' was not recognised");
    }

    #[test]
    fn test_cache_error_variants() {
        assert_eq!(
            CacheError::not_found("foo").to_string(),
            "key does not exist: foo"
        );
        assert_ne!(CacheError::not_found("a"), CacheError::already_exists("a"));
    }
}
