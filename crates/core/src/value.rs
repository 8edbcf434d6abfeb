//! Dynamic property values
//!
//! [`Value`] is the tagged union every slot stores. Nested objects are held
//! by [`ObjectId`]; the arena in [`DataGraph`](crate::DataGraph) owns them.

use std::collections::BTreeMap;

use crate::model::ObjectId;

/// A property value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// No value (empty object reference or nullable element)
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Owned nested data object
    Object(ObjectId),
    /// Ordered sequence
    Array(Vec<Value>),
    /// Unique elements, kept in insertion order
    Set(Vec<Value>),
    /// String-keyed mapping, iterated in key order
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the runtime variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view; ints widen
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Elements of an array or set
    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Collect every object id held directly by this value
    ///
    /// Only looks one level deep: ids nested inside the referenced objects
    /// are not included.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        self.collect_object_ids(&mut ids);
        ids
    }

    pub(crate) fn collect_object_ids(&self, out: &mut Vec<ObjectId>) {
        match self {
            Value::Object(id) => out.push(*id),
            Value::Array(items) | Value::Set(items) => {
                for item in items {
                    item.collect_object_ids(out);
                }
            }
            Value::Map(map) => {
                for item in map.values() {
                    item.collect_object_ids(out);
                }
            }
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
