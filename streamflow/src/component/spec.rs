//! Component documentation and settings schema.

use super::ComponentKind;
use crate::errors::ConfigError;
use crate::utils::parse_duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Maturity of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Safe to rely on.
    #[default]
    Stable,
    /// Behavior may still change.
    Beta,
    /// May be removed.
    Experimental,
}

/// The type of a settings field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A string.
    String,
    /// A signed integer.
    Int,
    /// A floating point number.
    Float,
    /// A boolean.
    Bool,
    /// Integer milliseconds or a string such as `"250ms"`.
    Duration,
    /// A nested object with its own fields.
    Object,
    /// An array of arbitrary values.
    Array,
    /// Anything.
    Any,
}

/// One field of a component's settings schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// The field name.
    pub name: String,
    /// The expected type.
    pub kind: FieldKind,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Value used when the field is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether the field may be absent without a default.
    #[serde(default)]
    pub optional: bool,
    /// Whether the field is hidden from basic documentation.
    #[serde(default)]
    pub advanced: bool,
    /// Child fields of an object field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldSpec>,
}

impl FieldSpec {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            default: None,
            optional: false,
            advanced: false,
            children: Vec::new(),
        }
    }

    /// A string field.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// An integer field.
    #[must_use]
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    /// A float field.
    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    /// A boolean field.
    #[must_use]
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    /// A duration field.
    #[must_use]
    pub fn duration(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Duration)
    }

    /// An array field.
    #[must_use]
    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Array)
    }

    /// A field accepting any value.
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Any)
    }

    /// An object field with children.
    ///
    /// An absent object defaults to an empty one so children get their
    /// defaults applied.
    #[must_use]
    pub fn object(name: impl Into<String>, children: Vec<FieldSpec>) -> Self {
        let mut field = Self::new(name, FieldKind::Object);
        field.children = children;
        field.default = Some(Value::Object(Map::new()));
        field
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Marks the field optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the field advanced.
    #[must_use]
    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }

    fn check(&self, value: Option<&Value>, path: &str) -> Result<Option<Value>, ConfigError> {
        let value = match value.or(self.default.as_ref()) {
            Some(v) => v,
            None if self.optional => return Ok(None),
            None => return Err(ConfigError::new(path, "field is required")),
        };

        let type_ok = match self.kind {
            FieldKind::String => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Duration => match value {
                Value::String(s) => parse_duration(s).is_ok(),
                Value::Number(n) => n.is_u64(),
                _ => false,
            },
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        };
        if !type_ok {
            return Err(ConfigError::new(
                path,
                format!("expected {}, got {value}", kind_label(self.kind)),
            ));
        }

        if self.kind == FieldKind::Object && !self.children.is_empty() {
            return check_fields(&self.children, value, path).map(Some);
        }
        Ok(Some(value.clone()))
    }
}

fn kind_label(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "a string",
        FieldKind::Int => "an integer",
        FieldKind::Float => "a number",
        FieldKind::Bool => "a boolean",
        FieldKind::Duration => "a duration",
        FieldKind::Object => "an object",
        FieldKind::Array => "an array",
        FieldKind::Any => "any value",
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn check_fields(fields: &[FieldSpec], value: &Value, path: &str) -> Result<Value, ConfigError> {
    let empty = Map::new();
    let obj = match value {
        Value::Null => &empty,
        Value::Object(obj) => obj,
        other => {
            return Err(ConfigError::new(
                if path.is_empty() { "settings" } else { path },
                format!("expected an object, got {other}"),
            ))
        }
    };

    if let Some(unknown) = obj.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
        return Err(ConfigError::new(join_path(path, unknown), "field not recognised"));
    }

    let mut out = Map::new();
    for field in fields {
        let field_path = join_path(path, &field.name);
        if let Some(v) = field.check(obj.get(&field.name), &field_path)? {
            out.insert(field.name.clone(), v);
        }
    }
    Ok(Value::Object(out))
}

/// Validates `value` against `fields` and applies defaults.
///
/// Used for parameter lists that do not belong to a registered component.
///
/// # Errors
///
/// Returns an error naming the first offending field.
pub fn parse_fields(fields: &[FieldSpec], value: &Value) -> Result<ParsedConfig, ConfigError> {
    check_fields(fields, value, "").map(|value| ParsedConfig { value })
}

/// Immutable documentation and schema of a registered component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// The kind of the component. Stamped by the registry on registration.
    pub kind: ComponentKind,
    /// The type name the component is selected by.
    pub name: String,
    /// One line summary.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    /// Maturity.
    #[serde(default)]
    pub status: Status,
    /// Settings schema.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
}

impl ComponentSpec {
    /// Creates a spec with no fields.
    #[must_use]
    pub fn new(kind: ComponentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            summary: String::new(),
            status: Status::Stable,
            fields: Vec::new(),
        }
    }

    /// Sets the summary.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds several fields.
    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Validates settings against the schema and applies defaults.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending field.
    pub fn parse(&self, settings: &Value) -> Result<ParsedConfig, ConfigError> {
        parse_fields(&self.fields, settings)
    }
}

/// Settings that passed schema validation, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedConfig {
    value: Value,
}

impl ParsedConfig {
    /// Wraps an already validated settings object.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    /// Returns the underlying settings object.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    fn field(&self, name: &str) -> Result<&Value, ConfigError> {
        self.value
            .get(name)
            .ok_or_else(|| ConfigError::new(name, "field not present"))
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.value.get(name).is_some_and(|v| !v.is_null())
    }

    /// Returns the nested object under `name`.
    #[must_use]
    pub fn namespace(&self, name: &str) -> Self {
        Self {
            value: self.value.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    /// Returns a string field.
    pub fn field_string(&self, name: &str) -> Result<String, ConfigError> {
        self.field(name)?
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| ConfigError::new(name, "expected a string"))
    }

    /// Returns an integer field.
    pub fn field_int(&self, name: &str) -> Result<i64, ConfigError> {
        self.field(name)?
            .as_i64()
            .ok_or_else(|| ConfigError::new(name, "expected an integer"))
    }

    /// Returns a float field.
    pub fn field_float(&self, name: &str) -> Result<f64, ConfigError> {
        self.field(name)?
            .as_f64()
            .ok_or_else(|| ConfigError::new(name, "expected a number"))
    }

    /// Returns a boolean field.
    pub fn field_bool(&self, name: &str) -> Result<bool, ConfigError> {
        self.field(name)?
            .as_bool()
            .ok_or_else(|| ConfigError::new(name, "expected a boolean"))
    }

    /// Returns a duration field. The empty string is zero.
    pub fn field_duration(&self, name: &str) -> Result<Duration, ConfigError> {
        match self.field(name)? {
            Value::String(s) => {
                parse_duration(s).map_err(|e| ConfigError::new(name, e.to_string()))
            }
            Value::Number(n) => n
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| ConfigError::new(name, "expected non-negative milliseconds")),
            other => Err(ConfigError::new(name, format!("expected a duration, got {other}"))),
        }
    }

    /// Returns an array field.
    pub fn field_array(&self, name: &str) -> Result<Vec<Value>, ConfigError> {
        self.field(name)?
            .as_array()
            .cloned()
            .ok_or_else(|| ConfigError::new(name, "expected an array"))
    }

    /// Deserializes a field into `T`.
    pub fn field_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        serde_json::from_value(self.field(name)?.clone())
            .map_err(|e| ConfigError::new(name, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn backoff_spec() -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Retry, "local")
            .field(FieldSpec::int("max_retries").default(0))
            .field(FieldSpec::object(
                "backoff",
                vec![
                    FieldSpec::duration("initial_interval").default("1s"),
                    FieldSpec::float("randomization_factor").default(0.5),
                ],
            ))
    }

    #[test]
    fn test_defaults_applied() {
        let parsed = backoff_spec().parse(&Value::Null).unwrap();
        assert_eq!(
            parsed.as_value(),
            &json!({
                "max_retries": 0,
                "backoff": { "initial_interval": "1s", "randomization_factor": 0.5 }
            })
        );
        assert_eq!(
            parsed.namespace("backoff").field_duration("initial_interval").unwrap(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = backoff_spec()
            .parse(&json!({ "backoff": { "nope": 1 } }))
            .unwrap_err();
        assert_eq!(err.path, "backoff.nope");
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = backoff_spec().parse(&json!({ "max_retries": "three" })).unwrap_err();
        assert_eq!(err.path, "max_retries");
        assert!(err.message.contains("integer"));
    }

    #[test]
    fn test_required_field() {
        let spec = ComponentSpec::new(ComponentKind::Processor, "retry")
            .field(FieldSpec::string("resource"));
        let err = spec.parse(&json!({})).unwrap_err();
        assert_eq!(err.message, "field is required");
    }

    #[test]
    fn test_optional_field_absent() {
        let spec = ComponentSpec::new(ComponentKind::Cache, "memory")
            .field(FieldSpec::duration("default_ttl").optional());
        let parsed = spec.parse(&json!({})).unwrap();
        assert!(!parsed.contains("default_ttl"));
    }

    #[test]
    fn test_bool_field() {
        let spec = ComponentSpec::new(ComponentKind::Processor, "flag")
            .field(FieldSpec::bool("enabled").default(true));
        let parsed = spec.parse(&json!({})).unwrap();
        assert!(parsed.field_bool("enabled").unwrap());

        let wrong = ParsedConfig::from_value(json!({ "enabled": "yes" }));
        assert_eq!(wrong.field_bool("enabled").unwrap_err().message, "expected a boolean");
    }

    #[test]
    fn test_duration_accepts_millis_and_empty_string() {
        let parsed = ParsedConfig::from_value(json!({ "a": 250, "b": "" }));
        assert_eq!(parsed.field_duration("a").unwrap(), Duration::from_millis(250));
        assert_eq!(parsed.field_duration("b").unwrap(), Duration::ZERO);
    }
}
