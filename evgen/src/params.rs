//! Runtime-typed, insertion-ordered parameter collections steering every
//! module of a run.

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved key carrying the module name of a bag.
pub const MOD_NAME: &str = "mod_name";

/// A tagged value stored in a [`ParameterBag`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double-precision floating point number.
    Double(f64),
    /// Character string.
    Str(String),
    /// Nested collection.
    Bag(ParameterBag),
    /// List of boolean flags.
    BoolList(Vec<bool>),
    /// List of signed integers.
    IntList(Vec<i64>),
    /// List of floating point numbers.
    DoubleList(Vec<f64>),
    /// List of character strings.
    StrList(Vec<String>),
    /// List of nested collections.
    BagList(Vec<ParameterBag>),
}

impl Value {
    /// Human-readable tag of the stored alternative.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Bag(_) => "parameters",
            Self::BoolList(_) => "bool[]",
            Self::IntList(_) => "int[]",
            Self::DoubleList(_) => "double[]",
            Self::StrList(_) => "string[]",
            Self::BagList(_) => "parameters[]",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "\"{v}\""),
            Self::Bag(v) => write!(f, "{v}"),
            Self::BoolList(v) => write!(f, "{v:?}"),
            Self::IntList(v) => write!(f, "{v:?}"),
            Self::DoubleList(v) => write!(f, "{v:?}"),
            Self::StrList(v) => write!(f, "{v:?}"),
            Self::BagList(v) => {
                write!(f, "[")?;
                for (i, bag) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{bag}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Conversion of a [`Value`] into a concrete parameter type.
///
/// The only silent promotion is int → double; every other narrowing fails
/// with a type-mismatch error naming the offending key.
pub trait FromValue: Sized {
    /// Attempts the conversion; `None` signals a type mismatch.
    fn from_value(value: &Value) -> Option<Self>;
    /// Tag used in error messages.
    fn type_name() -> &'static str;
}

/// Conversion of a concrete parameter type into a [`Value`].
pub trait IntoValue {
    /// Wraps `self` into the matching alternative.
    fn into_value(self) -> Value;
}

macro_rules! impl_value_conv {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn type_name() -> &'static str {
                $name
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

impl_value_conv!(bool, Bool, "bool");
impl_value_conv!(i64, Int, "int");
impl_value_conv!(String, Str, "string");
impl_value_conv!(ParameterBag, Bag, "parameters");
impl_value_conv!(Vec<bool>, BoolList, "bool[]");
impl_value_conv!(Vec<i64>, IntList, "int[]");
impl_value_conv!(Vec<f64>, DoubleList, "double[]");
impl_value_conv!(Vec<String>, StrList, "string[]");
impl_value_conv!(Vec<ParameterBag>, BagList, "parameters[]");

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Double(v) => Some(*v),
            // the one promotion of the cast table
            #[allow(clippy::cast_precision_loss)]
            Value::Int(v) => Some(*v as Self),
            _ => None,
        }
    }

    fn type_name() -> &'static str {
        "double"
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Double(self)
    }
}

impl FromValue for usize {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Self::try_from(*v).ok(),
            _ => None,
        }
    }

    fn type_name() -> &'static str {
        "int"
    }
}

impl IntoValue for usize {
    fn into_value(self) -> Value {
        Value::Int(i64::try_from(self).unwrap_or(i64::MAX))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Self::try_from(*v).ok(),
            _ => None,
        }
    }

    fn type_name() -> &'static str {
        "int"
    }
}

impl IntoValue for u64 {
    fn into_value(self) -> Value {
        Value::Int(i64::try_from(self).unwrap_or(i64::MAX))
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_owned())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

/// An ordered string → [`Value`] mapping. Insertion order is preserved so
/// that serialisation and printouts are reproducible run-to-run.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ParameterBag {
    entries: Vec<(String, Value)>,
}

impl ParameterBag {
    /// An empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the collection empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Untyped presence check.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Typed presence check: the key must exist *and* convert to `T`.
    #[must_use]
    pub fn has<T: FromValue>(&self, key: &str) -> bool {
        self.raw(key).is_some_and(|value| T::from_value(value).is_some())
    }

    /// All keys, in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Raw access to a stored value.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Typed retrieval of a required key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the key is missing or stores an
    /// incompatible alternative.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let value = self
            .raw(key)
            .ok_or_else(|| Error::config(key, "missing required key"))?;
        T::from_value(value).ok_or_else(|| {
            Error::config(
                key,
                format!(
                    "type mismatch: expected {}, found {}",
                    T::type_name(),
                    value.type_name()
                ),
            )
        })
    }

    /// Typed retrieval falling back to `default` when the key is absent. A
    /// present-but-mistyped key is still an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on a type mismatch.
    pub fn get_or<T: FromValue>(&self, key: &str, default: T) -> Result<T> {
        if self.contains(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    /// Inserts or overrides a key. Chainable.
    pub fn set<T: IntoValue>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        let key = key.into();
        let value = value.into_value();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
        self
    }

    /// Builder-style [`Self::set`].
    #[must_use]
    pub fn with<T: IntoValue>(mut self, key: impl Into<String>, value: T) -> Self {
        self.set(key, value);
        self
    }

    /// Removes a key, returning its value when present.
    pub fn erase(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Key-wise merge with override: keys of `other` win, new keys are
    /// appended in `other`'s order.
    pub fn merge(&mut self, other: &Self) {
        for (key, value) in &other.entries {
            self.set(key.clone(), value.clone());
        }
    }

    /// Module name carried under the reserved [`MOD_NAME`] key.
    #[must_use]
    pub fn name(&self) -> String {
        self.get::<String>(MOD_NAME).unwrap_or_default()
    }

    /// Stores the module name under the reserved [`MOD_NAME`] key.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.set(MOD_NAME, name.into())
    }
}

impl fmt::Display for ParameterBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        write!(f, "}}")
    }
}

impl std::ops::AddAssign<&Self> for ParameterBag {
    fn add_assign(&mut self, other: &Self) {
        self.merge(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn typed_roundtrip() {
        let mut bag = ParameterBag::new();
        bag.set("flag", true)
            .set("count", 42_i64)
            .set("threshold", 1.5)
            .set("label", "muon");

        assert!(bag.get::<bool>("flag").unwrap());
        assert_eq!(bag.get::<i64>("count").unwrap(), 42);
        assert_approx_eq!(f64, bag.get::<f64>("threshold").unwrap(), 1.5, ulps = 2);
        assert_eq!(bag.get::<String>("label").unwrap(), "muon");
    }

    #[test]
    fn int_promotes_to_double_and_nothing_else() {
        let bag = ParameterBag::new().with("n", 7_i64);
        assert_approx_eq!(f64, bag.get::<f64>("n").unwrap(), 7.0, ulps = 2);
        // int → bool is never silent
        assert!(bag.get::<bool>("n").is_err());
        // double → int is never silent
        let bag = ParameterBag::new().with("x", 7.0);
        assert!(bag.get::<i64>("x").is_err());
    }

    #[test]
    fn errors_name_the_key() {
        let bag = ParameterBag::new().with("mass", "not a number");
        let err = bag.get::<f64>("mass").unwrap_err().to_string();
        assert!(err.contains("mass"), "{err}");
        assert!(err.contains("double"), "{err}");
    }

    #[test]
    fn merge_overrides_and_appends_in_order() {
        let mut lhs = ParameterBag::new().with("a", 1_i64).with("b", 2_i64);
        let rhs = ParameterBag::new().with("b", 20_i64).with("c", 3_i64);
        lhs += &rhs;
        assert_eq!(lhs.keys(), vec!["a", "b", "c"]);
        assert_eq!(lhs.get::<i64>("b").unwrap(), 20);
        assert_eq!(lhs.get::<i64>("c").unwrap(), 3);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut bag = ParameterBag::new();
        for key in ["z", "y", "x", "w"] {
            bag.set(key, 0_i64);
        }
        assert_eq!(bag.keys(), vec!["z", "y", "x", "w"]);
    }

    #[test]
    fn nested_bags() {
        let inner = ParameterBag::new().with("pz", 6800.0);
        let outer = ParameterBag::new().with("beam1", inner.clone());
        assert_eq!(outer.get::<ParameterBag>("beam1").unwrap(), inner);
    }
}
