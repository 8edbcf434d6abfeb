//! Typed property tokens
//!
//! This module provides `Property<T>`, a zero-cost token naming one declared
//! property of one type, typed by the Rust value it carries. Code reads and
//! writes through tokens; tooling that only has names goes through
//! [`AsProperty`] with `&str`.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use super::descriptor::{Descriptor, SemanticType};
use super::registry::TypeInfo;
use super::DataClass;
use crate::error::{DataError, DataResult};
use crate::model::{DataGraph, ObjectId};
use crate::value::Value;

/// A typed handle to one declared property
///
/// # Type Parameters
/// * `T` - The Rust type of the property's value
///
/// # Example
///
/// ```ignore
/// const HEALTH: Property<i64> = Property::new("Hero", 0, "health");
///
/// let hp = HEALTH.get(&graph, hero)?;
/// HEALTH.set(&mut graph, hero, hp + 10)?;
/// ```
pub struct Property<T> {
    type_name: &'static str,
    index: usize,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Property<T> {
    /// Create a token for the property at `index` of `type_name`
    pub const fn new(type_name: &'static str, index: usize, name: &'static str) -> Self {
        Self {
            type_name,
            index,
            name,
            _marker: PhantomData,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: PropertyValue> Property<T> {
    /// Read the property from `object`
    pub fn get(&self, graph: &DataGraph, object: ObjectId) -> DataResult<T> {
        graph.get_as(object, *self)
    }

    /// Write the property on `object`
    pub fn set(&self, graph: &mut DataGraph, object: ObjectId, value: T) -> DataResult<()> {
        graph.set(object, *self, value.into_value())
    }
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Property<T> {}

impl<T> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Property({}.{})", self.type_name, self.name)
    }
}

/// Anything that names a property of a resolved type
pub trait AsProperty {
    /// Find the descriptor this names in `info`
    fn resolve<'a>(&self, info: &'a TypeInfo) -> DataResult<&'a Descriptor>;
}

fn unknown(info: &TypeInfo, property: &str) -> DataError {
    DataError::UnknownProperty {
        type_name: info.name().to_string(),
        property: property.to_string(),
    }
}

impl<T> AsProperty for Property<T> {
    fn resolve<'a>(&self, info: &'a TypeInfo) -> DataResult<&'a Descriptor> {
        if info.name() != self.type_name {
            return Err(unknown(info, &format!("{}.{}", self.type_name, self.name)));
        }
        info.descriptor(self.index)
            .filter(|d| d.name() == self.name)
            .ok_or_else(|| unknown(info, self.name))
    }
}

impl AsProperty for &str {
    fn resolve<'a>(&self, info: &'a TypeInfo) -> DataResult<&'a Descriptor> {
        info.find(self).ok_or_else(|| unknown(info, self))
    }
}

impl AsProperty for String {
    fn resolve<'a>(&self, info: &'a TypeInfo) -> DataResult<&'a Descriptor> {
        self.as_str().resolve(info)
    }
}

impl AsProperty for &String {
    fn resolve<'a>(&self, info: &'a TypeInfo) -> DataResult<&'a Descriptor> {
        self.as_str().resolve(info)
    }
}

impl AsProperty for &Descriptor {
    fn resolve<'a>(&self, info: &'a TypeInfo) -> DataResult<&'a Descriptor> {
        info.descriptor(self.index())
            .filter(|d| d.name() == self.name() && d.semantic_type() == self.semantic_type())
            .ok_or_else(|| unknown(info, self.name()))
    }
}

/// Rust types that can be stored in a property
pub trait PropertyValue: Sized {
    /// Semantic type this Rust type maps to
    fn semantic_type() -> SemanticType;

    fn into_value(self) -> Value;

    /// Convert back from a stored value, `None` on mismatch
    fn from_value(value: &Value) -> Option<Self>;

    /// Declare any data classes this type mentions
    fn declare_nested() {}
}

impl PropertyValue for bool {
    fn semantic_type() -> SemanticType {
        SemanticType::Bool
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl PropertyValue for i64 {
    fn semantic_type() -> SemanticType {
        SemanticType::Int
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl PropertyValue for f64 {
    fn semantic_type() -> SemanticType {
        SemanticType::Float
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl PropertyValue for String {
    fn semantic_type() -> SemanticType {
        SemanticType::String
    }

    fn into_value(self) -> Value {
        Value::String(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

/// Nullable object reference
impl<T: DataClass + PropertyValue> PropertyValue for Option<T> {
    fn semantic_type() -> SemanticType {
        SemanticType::Object(T::TYPE_NAME.to_string())
    }

    fn into_value(self) -> Value {
        self.map(|v| Value::Object(v.id())).unwrap_or(Value::Null)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            Value::Object(id) => Some(Some(T::from_id(*id))),
            _ => None,
        }
    }

    fn declare_nested() {
        T::declare_nested();
    }
}

impl<T: PropertyValue> PropertyValue for Vec<T> {
    fn semantic_type() -> SemanticType {
        SemanticType::array(T::semantic_type())
    }

    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(T::into_value).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }

    fn declare_nested() {
        T::declare_nested();
    }
}

impl<T: PropertyValue + Ord> PropertyValue for BTreeSet<T> {
    fn semantic_type() -> SemanticType {
        SemanticType::set(T::semantic_type())
    }

    fn into_value(self) -> Value {
        Value::Set(self.into_iter().map(T::into_value).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Set(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }

    fn declare_nested() {
        T::declare_nested();
    }
}

impl<T: PropertyValue> PropertyValue for BTreeMap<String, T> {
    fn semantic_type() -> SemanticType {
        SemanticType::map(T::semantic_type())
    }

    fn into_value(self) -> Value {
        Value::Map(self.into_iter().map(|(k, v)| (k, v.into_value())).collect())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k.clone(), v)))
                .collect(),
            _ => None,
        }
    }

    fn declare_nested() {
        T::declare_nested();
    }
}
