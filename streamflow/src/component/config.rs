//! The `{type, settings}` record every component is selected by.

use serde::{Deserialize, Serialize};

/// Selects and parameterizes a component.
///
/// Inputs and outputs may carry a list of processors applied to every
/// batch they deliver or write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Optional label, used to name resources.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    /// The registered type name.
    #[serde(rename = "type")]
    pub type_name: String,

    /// Type specific settings, validated against the registered schema.
    #[serde(default)]
    pub settings: serde_json::Value,

    /// Processors attached to an input or output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processors: Vec<ComponentConfig>,
}

impl ComponentConfig {
    /// Creates a config for the given type with empty settings.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            label: String::new(),
            type_name: type_name.into(),
            settings: serde_json::Value::Null,
            processors: Vec::new(),
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the attached processors.
    #[must_use]
    pub fn with_processors(mut self, processors: Vec<ComponentConfig>) -> Self {
        self.processors = processors;
        self
    }
}
