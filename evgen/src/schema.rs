//! Self-describing parameter schemas: defaults, documentation and
//! allowed-value constraints for every registrable module.

use super::error::{Error, Result};
use super::params::{FromValue, IntoValue, ParameterBag, Value, MOD_NAME};
use itertools::Itertools;
use std::fmt;
use tracing::warn;

#[derive(Clone, Debug, Default)]
struct KeyInfo {
    doc: String,
    allowed: Vec<Value>,
}

/// A parameter schema: a bag of defaults augmented per key with
/// documentation and an optional allowed-value set, plus child schemas for
/// nested bags.
#[derive(Clone, Debug, Default)]
pub struct ParametersDescription {
    description: String,
    defaults: ParameterBag,
    infos: Vec<(String, KeyInfo)>,
    children: Vec<(String, ParametersDescription)>,
    closed: bool,
}

impl ParametersDescription {
    /// Creates a schema with a one-line module description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    /// One-line module description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Replaces the one-line module description.
    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    /// Declares a documented key with its default value.
    pub fn add<T: IntoValue>(
        &mut self,
        key: impl Into<String>,
        default: T,
        doc: impl Into<String>,
    ) -> &mut Self {
        let key = key.into();
        self.defaults.set(key.clone(), default);
        self.set_info(key, doc.into(), Vec::new());
        self
    }

    /// Declares a nested sub-schema under `key`.
    pub fn add_parameters(
        &mut self,
        key: impl Into<String>,
        child: Self,
        doc: impl Into<String>,
    ) -> &mut Self {
        let key = key.into();
        self.defaults.set(key.clone(), child.defaults.clone());
        self.set_info(key.clone(), doc.into(), Vec::new());
        if let Some(entry) = self.children.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = child;
        } else {
            self.children.push((key, child));
        }
        self
    }

    /// Restricts `key` to an explicit set of values.
    pub fn restrict(&mut self, key: impl Into<String>, allowed: Vec<Value>) -> &mut Self {
        let key = key.into();
        if let Some(entry) = self.infos.iter_mut().find(|(k, _)| *k == key) {
            entry.1.allowed = allowed;
        } else {
            self.set_info(key, String::new(), allowed);
        }
        self
    }

    /// Marks the schema as closed: unknown keys are rejected by
    /// [`Self::validate`] instead of warned about.
    pub fn close(&mut self) -> &mut Self {
        self.closed = true;
        self
    }

    /// The default values declared so far.
    #[must_use]
    pub const fn parameters(&self) -> &ParameterBag {
        &self.defaults
    }

    /// Mutable access to the default values (used to fold extra defaults in
    /// at registration time).
    pub fn parameters_mut(&mut self) -> &mut ParameterBag {
        &mut self.defaults
    }

    /// Key-wise merge of another schema: defaults, documentation, constraints
    /// and children of `other` override the ones already present.
    pub fn merge(&mut self, other: &Self) {
        if !other.description.is_empty() {
            self.description.clone_from(&other.description);
        }
        self.defaults.merge(&other.defaults);
        for (key, info) in &other.infos {
            self.set_info(key.clone(), info.doc.clone(), info.allowed.clone());
        }
        for (key, child) in &other.children {
            if let Some(entry) = self.children.iter_mut().find(|(k, _)| k == key) {
                entry.1.merge(child);
            } else {
                self.children.push((key.clone(), child.clone()));
            }
        }
        self.closed |= other.closed;
    }

    /// Checks `input` against this schema and returns the normalised bag:
    /// defaults filled in declaration order, user keys overriding them,
    /// allowed-value constraints enforced, child bags validated recursively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on a type mismatch, a violated
    /// allowed-value constraint, or (for a closed schema) an unknown key.
    pub fn validate(&self, input: &ParameterBag) -> Result<ParameterBag> {
        let mut output = self.defaults.clone();
        for key in input.keys() {
            let value = input.raw(key).cloned().unwrap_or(Value::Bool(false));
            if key == MOD_NAME {
                output.set(key, value);
                continue;
            }
            match output.raw(key) {
                None if self.closed => {
                    return Err(Error::config(
                        key,
                        format!(
                            "unknown key (expected one of: {})",
                            self.defaults.keys().iter().join(", ")
                        ),
                    ));
                }
                None => {
                    warn!(key, "keeping a key not declared in the module schema");
                    output.set(key, value);
                }
                Some(default) => {
                    if std::mem::discriminant(default) != std::mem::discriminant(&value)
                        && !matches!((default, &value), (Value::Double(_), Value::Int(_)))
                    {
                        return Err(Error::config(
                            key,
                            format!(
                                "type mismatch: expected {}, found {}",
                                default.type_name(),
                                value.type_name()
                            ),
                        ));
                    }
                    let value = if let Some((_, child)) = self
                        .children
                        .iter()
                        .find(|(k, _)| k == key)
                    {
                        match &value {
                            Value::Bag(bag) => Value::Bag(child.validate(bag)?),
                            other => other.clone(),
                        }
                    } else {
                        value
                    };
                    if let Some((_, info)) = self.infos.iter().find(|(k, _)| k == key) {
                        if !info.allowed.is_empty() && !info.allowed.contains(&value) {
                            return Err(Error::config(
                                key,
                                format!(
                                    "value {value} not in the allowed set {{{}}}",
                                    info.allowed.iter().map(ToString::to_string).join(", ")
                                ),
                            ));
                        }
                    }
                    output.set(key, value);
                }
            }
        }
        Ok(output)
    }

    /// Typed retrieval of a default value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the key is missing or mistyped.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        self.defaults.get(key)
    }

    fn set_info(&mut self, key: String, doc: String, allowed: Vec<Value>) {
        if let Some(entry) = self.infos.iter_mut().find(|(k, _)| *k == key) {
            if !doc.is_empty() {
                entry.1.doc = doc;
            }
            if !allowed.is_empty() {
                entry.1.allowed = allowed;
            }
        } else {
            self.infos.push((key, KeyInfo { doc, allowed }));
        }
    }
}

impl fmt::Display for ParametersDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.description)?;
        for (key, info) in &self.infos {
            let default = self
                .defaults
                .raw(key)
                .map_or_else(|| "<none>".to_owned(), ToString::to_string);
            write!(f, "  {key}: {}", info.doc)?;
            write!(f, " (default: {default}")?;
            if !info.allowed.is_empty() {
                write!(
                    f,
                    ", allowed: {}",
                    info.allowed.iter().map(ToString::to_string).join(", ")
                )?;
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_schema() -> ParametersDescription {
        let mut desc = ParametersDescription::new("demo module");
        desc.add("mode", "importance", "grid interpolation mode")
            .restrict(
                "mode",
                vec![
                    Value::Str("importance".into()),
                    Value::Str("stratified".into()),
                ],
            )
            .add("ncvg", 100_000_i64, "number of function calls")
            .add("alpha", 1.5, "grid damping parameter");
        desc
    }

    #[test]
    fn defaults_are_filled() {
        let out = demo_schema().validate(&ParameterBag::new()).unwrap();
        assert_eq!(out.get::<String>("mode").unwrap(), "importance");
        assert_eq!(out.get::<i64>("ncvg").unwrap(), 100_000);
    }

    #[test]
    fn validation_is_idempotent() {
        let schema = demo_schema();
        let input = ParameterBag::new().with("ncvg", 5_000_i64);
        let once = schema.validate(&input).unwrap();
        let twice = schema.validate(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn allowed_values_are_enforced() {
        let input = ParameterBag::new().with("mode", "adhoc");
        assert!(demo_schema().validate(&input).is_err());
    }

    #[test]
    fn closed_schemas_reject_unknown_keys() {
        let mut schema = demo_schema();
        let input = ParameterBag::new().with("typo", 1_i64);
        assert!(schema.validate(&input).is_ok());
        schema.close();
        assert!(schema.validate(&input).is_err());
    }

    #[test]
    fn int_default_accepts_int_override_only() {
        let schema = demo_schema();
        // double default takes an int override through promotion
        let out = schema
            .validate(&ParameterBag::new().with("alpha", 2_i64))
            .unwrap();
        assert_eq!(out.raw("alpha"), Some(&Value::Int(2)));
        // int default refuses a string override
        assert!(schema
            .validate(&ParameterBag::new().with("ncvg", "many"))
            .is_err());
    }
}
