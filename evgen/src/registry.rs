//! Name-indexed module factories, the substrate on which all interchangeable
//! components (processes, integrators, modifiers, exporters) are assembled.

use super::error::{Error, Result};
use super::params::ParameterBag;
use super::schema::ParametersDescription;
use itertools::Itertools;
use rustc_hash::FxHashMap;

/// A module type constructible from a validated parameter bag.
pub trait Buildable: Sized {
    /// Static schema of the module: defaults, documentation, constraints.
    fn description() -> ParametersDescription;

    /// Builds the module from a bag already validated against
    /// [`Self::description`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a parameter value is unusable.
    fn from_bag(params: &ParameterBag) -> Result<Self>;
}

/// Constructor signature stored by a factory.
pub type Builder<T> = fn(&ParameterBag) -> Result<Box<T>>;

/// A registry mapping module names to constructors producing owning handles
/// of a common base type `T`.
pub struct ModuleFactory<T: ?Sized> {
    description: String,
    builders: FxHashMap<String, Builder<T>>,
    schemas: FxHashMap<String, ParametersDescription>,
}

impl<T: ?Sized> ModuleFactory<T> {
    /// Creates an empty factory with a human-readable description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            builders: FxHashMap::default(),
            schemas: FxHashMap::default(),
        }
    }

    /// Human-readable description of the factory.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Registers a named module. Registration of a duplicate name fails
    /// loudly so clashes surface at startup rather than at build time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on a duplicate name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        builder: Builder<T>,
        mut schema: ParametersDescription,
    ) -> Result<()> {
        let name = name.into();
        if self.builders.contains_key(&name) {
            return Err(Error::config(
                &name,
                format!("duplicate module registration in {}", self.description),
            ));
        }
        schema.parameters_mut().set_name(name.clone());
        self.builders.insert(name.clone(), builder);
        self.schemas.insert(name, schema);
        Ok(())
    }

    /// Builds one instance of the named module: the input bag is validated
    /// against the module schema (defaults filled) before the constructor
    /// runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown name (the message
    /// lists every registered module) or when validation/construction fails.
    pub fn build(&self, name: &str, params: &ParameterBag) -> Result<Box<T>> {
        let builder = self.builders.get(name).ok_or_else(|| {
            Error::config(
                name,
                format!(
                    "no such module in {}; registered: {}",
                    self.description,
                    self.modules().iter().join(", ")
                ),
            )
        })?;
        let validated = self.schemas[name].validate(params)?;
        builder(&validated)
    }

    /// Builds a module from a bag carrying its own module name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the bag has no name or the name
    /// is unknown.
    pub fn build_from_bag(&self, params: &ParameterBag) -> Result<Box<T>> {
        let name = params.name();
        if name.is_empty() {
            return Err(Error::config(
                super::params::MOD_NAME,
                format!("no module name carried by the bag handed to {}", self.description),
            ));
        }
        self.build(&name, params)
    }

    /// One-line description of a named module.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown name.
    pub fn describe(&self, name: &str) -> Result<String> {
        self.schemas
            .get(name)
            .map(|schema| schema.description().to_owned())
            .ok_or_else(|| Error::config(name, "no such module"))
    }

    /// Full parameter schema of a named module.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown name.
    pub fn describe_parameters(&self, name: &str) -> Result<&ParametersDescription> {
        self.schemas
            .get(name)
            .ok_or_else(|| Error::config(name, "no such module"))
    }

    /// Sorted list of all registered module names.
    #[must_use]
    pub fn modules(&self) -> Vec<String> {
        self.builders.keys().cloned().sorted().collect()
    }

    /// Is a module with this name registered?
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.builders.len()
    }

    /// Is the factory empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

/// Registers a concrete [`Buildable`] type under `name` in a factory keyed by
/// the base type `base`. Expanded once per module at registration time;
/// linking a plug-in in means calling this for it before the run is
/// assembled.
#[macro_export]
macro_rules! register_module {
    ($factory:expr, $base:ty, $name:expr, $ty:ty) => {
        $factory.register(
            $name,
            |params| {
                let module: Box<$base> =
                    Box::new(<$ty as $crate::registry::Buildable>::from_bag(params)?);
                Ok(module)
            },
            <$ty as $crate::registry::Buildable>::description(),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send {
        fn greet(&self) -> String;
    }

    struct Plain {
        who: String,
    }

    impl Greeter for Plain {
        fn greet(&self) -> String {
            format!("hello {}", self.who)
        }
    }

    impl Buildable for Plain {
        fn description() -> ParametersDescription {
            let mut desc = ParametersDescription::new("plain greeter");
            desc.add("who", "world", "greeting target");
            desc
        }

        fn from_bag(params: &ParameterBag) -> Result<Self> {
            Ok(Self {
                who: params.get("who")?,
            })
        }
    }

    fn factory() -> ModuleFactory<dyn Greeter> {
        let mut factory = ModuleFactory::<dyn Greeter>::new("greeter factory");
        register_module!(factory, dyn Greeter, "plain", Plain).unwrap();
        factory
    }

    #[test]
    fn build_fills_defaults() {
        let factory = factory();
        let module = factory.build("plain", &ParameterBag::new()).unwrap();
        assert_eq!(module.greet(), "hello world");
    }

    #[test]
    fn build_honours_overrides_and_mod_name() {
        let factory = factory();
        let params = ParameterBag::new().with("who", "collider");
        assert_eq!(factory.build("plain", &params).unwrap().greet(), "hello collider");

        let mut named = ParameterBag::new();
        named.set_name("plain");
        assert_eq!(
            factory.build_from_bag(&named).unwrap().greet(),
            "hello world"
        );
    }

    #[test]
    fn duplicate_registration_fails_loudly() {
        let mut factory = factory();
        assert!(register_module!(factory, dyn Greeter, "plain", Plain).is_err());
    }

    #[test]
    fn unknown_module_lists_the_candidates() {
        let err = factory()
            .build("nope", &ParameterBag::new())
            .map(|_| ())
            .unwrap_err()
            .to_string();
        assert!(err.contains("plain"), "{err}");
    }
}
