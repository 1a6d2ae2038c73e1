//! Typed registries of component constructors.

use crate::component::{
    Cache, ComponentConfig, ComponentKind, ComponentSpec, Input, Output, ParsedConfig, Processor,
    RateLimit, Retry,
};
use crate::errors::{
    ComponentConstructionError, InvalidNameError, StreamflowError, UnknownComponentError,
};
use crate::manager::Resources;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// The grammar every component name must match.
pub const NAME_PATTERN: &str = "^[a-z0-9]+(_[a-z0-9]+)*$";

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAME_PATTERN).expect("name pattern is a valid regex"));

/// Builds a component from its config, its validated settings and the
/// resources handle.
pub type Constructor<T> = Arc<
    dyn Fn(&ComponentConfig, &ParsedConfig, &Resources) -> Result<T, StreamflowError>
        + Send
        + Sync,
>;

/// Boxes a closure as a [`Constructor`].
pub fn constructor<T, F>(f: F) -> Constructor<T>
where
    F: Fn(&ComponentConfig, &ParsedConfig, &Resources) -> Result<T, StreamflowError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Checks a component name against [`NAME_PATTERN`].
///
/// # Errors
///
/// Returns `InvalidNameError` if the name does not match.
pub fn validate_name(name: &str) -> Result<(), InvalidNameError> {
    if NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(InvalidNameError::new(name, NAME_PATTERN))
    }
}

struct Registered<T> {
    constructor: Constructor<T>,
    spec: Arc<ComponentSpec>,
}

impl<T> Clone for Registered<T> {
    fn clone(&self) -> Self {
        Self {
            constructor: Arc::clone(&self.constructor),
            spec: Arc::clone(&self.spec),
        }
    }
}

/// The registry of one component kind.
///
/// Cloning copies the name map; constructors and specs are shared.
pub struct ComponentSet<T> {
    kind: ComponentKind,
    entries: HashMap<String, Registered<T>>,
}

impl<T> Clone for ComponentSet<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: self.entries.clone(),
        }
    }
}

impl<T> fmt::Debug for ComponentSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ComponentSet")
            .field("kind", &self.kind)
            .field("names", &names)
            .finish()
    }
}

impl<T> ComponentSet<T> {
    /// Creates an empty registry for `kind`.
    #[must_use]
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Returns the kind this registry holds.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Registers a constructor under `spec.name`. The last registration wins.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name does not match [`NAME_PATTERN`]; the
    /// registry is left unchanged.
    pub fn add<F>(&mut self, constructor: F, spec: ComponentSpec) -> Result<(), StreamflowError>
    where
        F: Fn(&ComponentConfig, &ParsedConfig, &Resources) -> Result<T, StreamflowError>
            + Send
            + Sync
            + 'static,
    {
        self.add_shared(Arc::new(constructor), Arc::new(spec))
    }

    fn add_shared(
        &mut self,
        constructor: Constructor<T>,
        mut spec: Arc<ComponentSpec>,
    ) -> Result<(), StreamflowError> {
        validate_name(&spec.name)?;
        if spec.kind != self.kind {
            Arc::make_mut(&mut spec).kind = self.kind;
        }
        self.entries
            .insert(spec.name.clone(), Registered { constructor, spec });
        Ok(())
    }

    /// Builds the component selected by `config.type_name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownComponent` if the type is not registered and
    /// `ComponentConstruction` if the settings are invalid or the
    /// constructor fails.
    pub fn init(&self, config: &ComponentConfig, resources: &Resources) -> Result<T, StreamflowError> {
        let entry = self
            .entries
            .get(&config.type_name)
            .ok_or_else(|| UnknownComponentError::new(self.kind, &config.type_name))?;

        debug!(kind = %self.kind, name = %config.type_name, label = %config.label, "Initialising component");

        let result = entry
            .spec
            .parse(&config.settings)
            .map_err(StreamflowError::from)
            .and_then(|parsed| (entry.constructor)(config, &parsed, resources));

        result.map_err(|err| match err {
            StreamflowError::ComponentConstruction(_) => err,
            other => ComponentConstructionError::new(
                self.kind,
                &config.type_name,
                &config.label,
                other,
            )
            .into(),
        })
    }

    /// Returns every registered spec, sorted by name.
    #[must_use]
    pub fn docs(&self) -> Vec<Arc<ComponentSpec>> {
        let mut specs: Vec<_> = self.entries.values().map(|e| Arc::clone(&e.spec)).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Returns the spec registered under `name`.
    #[must_use]
    pub fn docs_for(&self, name: &str) -> Option<Arc<ComponentSpec>> {
        self.entries.get(name).map(|e| Arc::clone(&e.spec))
    }

    /// Returns the constructor registered under `name`.
    #[must_use]
    pub fn constructor(&self, name: &str) -> Option<Constructor<T>> {
        self.entries.get(name).map(|e| Arc::clone(&e.constructor))
    }

    /// Replaces the constructor of every registered component, keeping
    /// each spec untouched.
    ///
    /// `wrap` receives the spec and the current constructor.
    pub fn wrap_all(&mut self, wrap: impl Fn(&Arc<ComponentSpec>, Constructor<T>) -> Constructor<T>) {
        for entry in self.entries.values_mut() {
            let inner = Arc::clone(&entry.constructor);
            entry.constructor = wrap(&entry.spec, inner);
        }
    }

    /// Returns true if no component is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One registry per component kind.
///
/// A base environment is built once at startup. Bundles derive isolated
/// copies with [`Clone`] and substitute wrapped constructors; the base is
/// never affected.
#[derive(Debug, Clone)]
pub struct Environment {
    inputs: ComponentSet<Arc<dyn Input>>,
    outputs: ComponentSet<Arc<dyn Output>>,
    processors: ComponentSet<Arc<dyn Processor>>,
    caches: ComponentSet<Arc<dyn Cache>>,
    rate_limits: ComponentSet<Arc<dyn RateLimit>>,
    retries: ComponentSet<Arc<dyn Retry>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! component_sets {
    ($($field:ident, $field_mut:ident, $ty:ty, $label:literal;)*) => {
        $(
            #[doc = concat!("Returns the ", $label, " registry.")]
            #[must_use]
            pub fn $field(&self) -> &ComponentSet<$ty> {
                &self.$field
            }

            #[doc = concat!("Returns the ", $label, " registry mutably.")]
            pub fn $field_mut(&mut self) -> &mut ComponentSet<$ty> {
                &mut self.$field
            }
        )*
    };
}

impl Environment {
    /// Creates an environment with no components registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: ComponentSet::new(ComponentKind::Input),
            outputs: ComponentSet::new(ComponentKind::Output),
            processors: ComponentSet::new(ComponentKind::Processor),
            caches: ComponentSet::new(ComponentKind::Cache),
            rate_limits: ComponentSet::new(ComponentKind::RateLimit),
            retries: ComponentSet::new(ComponentKind::Retry),
        }
    }

    component_sets! {
        inputs, inputs_mut, Arc<dyn Input>, "input";
        outputs, outputs_mut, Arc<dyn Output>, "output";
        processors, processors_mut, Arc<dyn Processor>, "processor";
        caches, caches_mut, Arc<dyn Cache>, "cache";
        rate_limits, rate_limits_mut, Arc<dyn RateLimit>, "rate limit";
        retries, retries_mut, Arc<dyn Retry>, "retry";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{FieldSpec, Status};
    use crate::processors::NoopProcessor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn test_spec(name: &str) -> ComponentSpec {
        ComponentSpec::new(ComponentKind::Input, name).summary("test processor")
    }

    fn noop_ctor(
        _: &ComponentConfig,
        _: &ParsedConfig,
        _: &Resources,
    ) -> Result<Arc<dyn Processor>, StreamflowError> {
        Ok(Arc::new(NoopProcessor))
    }

    fn names(env: &Environment) -> Vec<String> {
        env.processors().docs().iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_name_grammar() {
        for ok in ["a", "foo_bar", "x1_2y", "123"] {
            assert!(validate_name(ok).is_ok(), "{ok} should be valid");
        }
        for bad in ["", "Foo", "foo-bar", "_foo", "foo_", "foo__bar", "foo bar"] {
            assert!(validate_name(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_invalid_name_leaves_registry_unchanged() {
        let mut env = Environment::new();
        env.processors_mut().add(noop_ctor, test_spec("good")).unwrap();

        let err = env.processors_mut().add(noop_ctor, test_spec("Bad-Name")).unwrap_err();

        assert!(matches!(err, StreamflowError::InvalidName(_)));
        assert_eq!(names(&env), vec!["good".to_string()]);
    }

    #[test]
    fn test_add_stamps_kind_and_last_wins() {
        let mut env = Environment::new();
        env.processors_mut().add(noop_ctor, test_spec("thing")).unwrap();
        env.processors_mut()
            .add(noop_ctor, test_spec("thing").status(Status::Beta))
            .unwrap();

        let spec = env.processors().docs_for("thing").unwrap();
        assert_eq!(spec.kind, ComponentKind::Processor);
        assert_eq!(spec.status, Status::Beta);
        assert_eq!(env.processors().len(), 1);
    }

    #[test]
    fn test_docs_sorted() {
        let mut env = Environment::new();
        for name in ["zeta", "alpha", "mid"] {
            env.processors_mut().add(noop_ctor, test_spec(name)).unwrap();
        }
        assert_eq!(names(&env), vec!["alpha", "mid", "zeta"]);
        assert!(env.processors().docs_for("missing").is_none());
    }

    #[test]
    fn test_clone_is_isolated() {
        let mut base = Environment::new();
        base.processors_mut().add(noop_ctor, test_spec("base")).unwrap();

        let mut derived = base.clone();
        derived.processors_mut().add(noop_ctor, test_spec("extra")).unwrap();

        assert_eq!(names(&base), vec!["base"]);
        assert_eq!(names(&derived), vec!["base", "extra"]);
        assert!(Arc::ptr_eq(
            &base.processors().docs_for("base").unwrap(),
            &derived.processors().docs_for("base").unwrap()
        ));
    }

    #[tokio::test]
    async fn test_init_unknown_type() {
        let env = Environment::new();
        let resources = Resources::new(env.clone());
        let err = env
            .processors()
            .init(&ComponentConfig::new("nope"), &resources)
            .err()
            .unwrap();

        assert_eq!(err.to_string(), "processor type 'nope' was not recognised");
    }

    #[tokio::test]
    async fn test_init_wraps_failures() {
        let mut env = Environment::new();
        env.processors_mut()
            .add(
                |_, _, _| Err(StreamflowError::processing(anyhow::anyhow!("no luck"))),
                test_spec("broken"),
            )
            .unwrap();
        env.processors_mut()
            .add(
                noop_ctor,
                test_spec("typed").field(FieldSpec::int("count").default(1)),
            )
            .unwrap();
        let resources = Resources::new(env.clone());

        let err = env
            .processors()
            .init(&ComponentConfig::new("broken").with_label("b"), &resources)
            .err()
            .unwrap();
        match err {
            StreamflowError::ComponentConstruction(e) => {
                assert_eq!(e.name, "broken");
                assert_eq!(e.label, "b");
                assert!(matches!(*e.source, StreamflowError::Processing(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        let bad = ComponentConfig::new("typed").with_settings(json!({ "count": "x" }));
        let err = env.processors().init(&bad, &resources).err().unwrap();
        assert!(err.to_string().contains("failed to init processor 'typed'"));

        let good = ComponentConfig::new("typed").with_settings(json!({ "count": 3 }));
        assert!(env.processors().init(&good, &resources).is_ok());
    }

    #[test]
    fn test_wrap_all_keeps_specs() {
        let mut env = Environment::new();
        env.processors_mut().add(noop_ctor, test_spec("a")).unwrap();
        let before = env.processors().docs_for("a").unwrap();

        env.processors_mut().wrap_all(|_, inner| inner);

        assert!(Arc::ptr_eq(&before, &env.processors().docs_for("a").unwrap()));
    }
}
